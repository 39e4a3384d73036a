//! Structured event logging with a degradation chain, the shape carried over from
//! `logger/jsonl.rs`'s `EventType`/`Severity`/fallback-chain pattern. The sink differs:
//! the daemon writes to syslog (`LOG_DAEMON`, its own pid) once netlink is attached and
//! stderr is closed; the reader library and CLI tools log to stderr only.

use std::io::Write as _;
use std::path::PathBuf;

/// Severity level for a logged event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// Structured event types emitted across the writer daemon, reader library, and
/// migration engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    DaemonStart,
    DaemonStop,
    DaemonAlreadyRunning,
    ShadowRotate,
    GcSweep,
    LowSpaceSkip,
    ReaderAttach,
    ReaderFallback,
    SequenceRegressed,
    ConfigReload,
    MigrationStart,
    MigrationComplete,
    Error,
}

impl EventType {
    const fn as_str(self) -> &'static str {
        match self {
            Self::DaemonStart => "daemon_start",
            Self::DaemonStop => "daemon_stop",
            Self::DaemonAlreadyRunning => "daemon_already_running",
            Self::ShadowRotate => "shadow_rotate",
            Self::GcSweep => "gc_sweep",
            Self::LowSpaceSkip => "low_space_skip",
            Self::ReaderAttach => "reader_attach",
            Self::ReaderFallback => "reader_fallback",
            Self::SequenceRegressed => "sequence_regressed",
            Self::ConfigReload => "config_reload",
            Self::MigrationStart => "migration_start",
            Self::MigrationComplete => "migration_complete",
            Self::Error => "error",
        }
    }
}

/// A single log event. `path`/`seq`/`error_code` are filled in where relevant;
/// unused fields are simply left `None`.
#[derive(Debug, Clone)]
pub struct LogEvent {
    pub event: EventType,
    pub severity: Severity,
    pub message: String,
    pub path: Option<PathBuf>,
    pub seq: Option<u64>,
    pub error_code: Option<&'static str>,
}

impl LogEvent {
    #[must_use]
    pub fn new(event: EventType, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            event,
            severity,
            message: message.into(),
            path: None,
            seq: None,
            error_code: None,
        }
    }

    #[must_use]
    pub fn with_path(mut self, path: PathBuf) -> Self {
        self.path = Some(path);
        self
    }

    #[must_use]
    pub fn with_seq(mut self, seq: u64) -> Self {
        self.seq = Some(seq);
        self
    }

    #[must_use]
    pub fn with_error_code(mut self, code: &'static str) -> Self {
        self.error_code = Some(code);
        self
    }

    fn render(&self) -> String {
        let mut line = format!("{} {}", self.event.as_str(), self.message);
        if let Some(path) = &self.path {
            line.push_str(&format!(" path={}", path.display()));
        }
        if let Some(seq) = self.seq {
            line.push_str(&format!(" seq={seq}"));
        }
        if let Some(code) = self.error_code {
            line.push_str(&format!(" code={code}"));
        }
        line
    }
}

/// Current degradation state of a [`Logger`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SinkState {
    #[cfg(feature = "daemon")]
    Syslog,
    Stderr,
    Discard,
}

/// Sink abstraction used by the daemon, reader, and migration CLIs. Never panics and
/// never propagates a logging failure to its caller: a daemon must not crash because
/// its log sink went away.
pub struct Logger {
    process_name: String,
    state: SinkState,
    #[cfg(feature = "daemon")]
    syslog: Option<syslog::Logger<syslog::LoggerBackend, syslog::Formatter3164>>,
}

impl Logger {
    /// Construct a stderr-only logger, used by the reader library, `pacctconv`, and
    /// `pacctctl`.
    #[must_use]
    pub fn stderr(process_name: impl Into<String>) -> Self {
        Self {
            process_name: process_name.into(),
            state: SinkState::Stderr,
            #[cfg(feature = "daemon")]
            syslog: None,
        }
    }

    /// Construct a logger that prefers syslog (`LOG_DAEMON` facility, this process's
    /// pid), falling back to stderr if the syslog socket cannot be opened. Used by
    /// `pacctd` once it has attached its netlink wake-up channel and is about to close
    /// stderr, mirroring `atopacctd.c`'s `openlog()` followed by `close(2)` on stderr.
    #[cfg(feature = "daemon")]
    #[must_use]
    pub fn daemonize_sinks(process_name: impl Into<String>) -> Self {
        let process_name = process_name.into();
        let formatter = syslog::Formatter3164 {
            facility: syslog::Facility::LOG_DAEMON,
            hostname: None,
            process: process_name.clone(),
            pid: std::process::id() as i32,
        };
        match syslog::unix(formatter) {
            Ok(writer) => Self {
                process_name,
                state: SinkState::Syslog,
                syslog: Some(writer),
            },
            Err(_) => Self {
                process_name,
                state: SinkState::Stderr,
                syslog: None,
            },
        }
    }

    /// Current sink name, for diagnostics.
    #[must_use]
    pub fn state(&self) -> &'static str {
        match self.state {
            #[cfg(feature = "daemon")]
            SinkState::Syslog => "syslog",
            SinkState::Stderr => "stderr",
            SinkState::Discard => "discard",
        }
    }

    /// Log one event, degrading the sink chain on failure instead of returning an error.
    pub fn log(&mut self, entry: &LogEvent) {
        let line = entry.render();
        match self.state {
            #[cfg(feature = "daemon")]
            SinkState::Syslog => {
                let Some(writer) = self.syslog.as_mut() else {
                    self.state = SinkState::Stderr;
                    return self.log(entry);
                };
                let result = match entry.severity {
                    Severity::Info => writer.info(line),
                    Severity::Warning => writer.warning(line),
                    Severity::Critical => writer.crit(line),
                };
                if result.is_err() {
                    self.syslog = None;
                    self.state = SinkState::Stderr;
                    self.log(entry);
                }
            }
            SinkState::Stderr => {
                if writeln!(std::io::stderr(), "[{}] {line}", self.process_name).is_err() {
                    self.state = SinkState::Discard;
                }
            }
            SinkState::Discard => {}
        }
    }
}
