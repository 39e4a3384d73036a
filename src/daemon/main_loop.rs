//! Writer daemon lifecycle and main loop:
//! `Init → AttachPrivateSem → Daemonize → OpenSourcePacct → CreateShadowDir →
//! EnableKernelAcct → OpenNetlink → Main → Shutdown`.
//!
//! Grounded in `atopacctd.c`'s `main()`/`processacct()` state progression, folded into
//! one function and a single-threaded loop per the single-threaded mandate this build
//! follows, rather than the teacher's crossbeam-channel worker pool: there is exactly
//! one source to drain and one shadow directory to write, so a thread pool buys
//! nothing a loop doesn't already give. No signal handler is installed anywhere in
//! this module — the daemon is stopped by whatever the kernel's default disposition
//! for the delivered signal is, not by a handler this code runs.

use std::time::Instant;

use crate::core::config::Config;
use crate::core::errors::PacctError;
use crate::logger::{EventType, LogEvent, Logger, Severity};
use crate::platform::netlink::{NetlinkChannel, RecvOutcome};
use crate::platform::semaphore::{Provenance, SemaphoreSet};
use crate::platform::ffi;
use crate::store::{ShadowFileId, ShadowStore};

use super::session::WriterSession;

/// Process exit code taxonomy. Each variant names the lifecycle stage or main-loop
/// condition that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Usage = 1,
    DirectoryValidation = 2,
    DuplicateDaemon = 3,
    PrivateSemaphoreIncrement = 4,
    SourceSetupFailure = 5,
    NetlinkOpenFailure = 6,
    ShadowWriteFailure = 7,
    NetlinkRecvFailure = 8,
    RecordSizeDetection = 9,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

fn log_error(logger: &mut Logger, err: &PacctError) {
    logger.log(
        &LogEvent::new(EventType::Error, Severity::Critical, err.to_string()).with_error_code(err.code()),
    );
}

fn is_duplicate_key(err: &PacctError) -> bool {
    matches!(err, PacctError::Semaphore { details, .. } if details.contains("exists") || details.contains("EEXIST"))
}

/// Run the writer daemon to completion, returning the process exit code. Never
/// returns normally in production use (the `Main` state only ends via a fatal
/// condition); structured this way so the lifecycle and loop are unit-testable
/// in pieces without actually daemonizing.
pub fn run(config: Config) -> ExitCode {
    let mut logger = Logger::stderr("pacctd");

    let store = ShadowStore::new(&config.paths.root_dir, &config.shadow.shadow_dir_name);
    if let Err(err) = store.validate_root_dir() {
        log_error(&mut logger, &err);
        return ExitCode::DirectoryValidation;
    }

    let private_sem = match SemaphoreSet::create_exclusive(config.ipc.private_key, 0o600) {
        Ok(sem) => sem,
        Err(err) if is_duplicate_key(&err) => {
            logger.log(&LogEvent::new(
                EventType::DaemonAlreadyRunning,
                Severity::Critical,
                "another writer daemon instance already holds the private semaphore",
            ));
            return ExitCode::DuplicateDaemon;
        }
        Err(err) => {
            log_error(&mut logger, &err);
            return ExitCode::DuplicateDaemon;
        }
    };
    if let Err(err) = private_sem.op(1, true, false) {
        log_error(&mut logger, &err);
        return ExitCode::PrivateSemaphoreIncrement;
    }

    let (pub_sem, provenance) = match SemaphoreSet::create_or_attach(config.ipc.public_key, 0o666) {
        Ok(pair) => pair,
        Err(err) => {
            log_error(&mut logger, &err);
            return ExitCode::PrivateSemaphoreIncrement;
        }
    };
    if provenance == Provenance::Created {
        if let Err(err) = pub_sem.set_val(i32::from(config.ipc.reader_slots)) {
            log_error(&mut logger, &err);
            return ExitCode::PrivateSemaphoreIncrement;
        }
    }

    // Daemonize: raise scheduling priority. A refusal (unprivileged process) is
    // tolerated, matching the reference implementation's non-fatal treatment of it.
    let _ = ffi::renice(config.daemon.nice_level);

    let (source_path, source_file) = match WriterSession::open_source(&config) {
        Ok(pair) => pair,
        Err(err) => {
            log_error(&mut logger, &err);
            return ExitCode::SourceSetupFailure;
        }
    };

    if let Err(err) = store
        .ensure_shadow_dir()
        .and_then(|()| store.create(ShadowFileId(0)))
        .and_then(|_| store.set_current(0, config.shadow.max_records_per_file))
    {
        log_error(&mut logger, &err);
        return ExitCode::SourceSetupFailure;
    }

    if let Err(err) = ffi::enable(&source_path) {
        log_error(&mut logger, &err);
        return ExitCode::SourceSetupFailure;
    }

    let netlink = match NetlinkChannel::open() {
        Ok(channel) => channel,
        Err(err) => {
            log_error(&mut logger, &err);
            let _ = ffi::disable();
            return ExitCode::NetlinkOpenFailure;
        }
    };

    let mut logger = Logger::daemonize_sinks("pacctd");
    logger.log(
        &LogEvent::new(EventType::DaemonStart, Severity::Info, "writer daemon started")
            .with_path(source_path.clone()),
    );

    let mut session = match WriterSession::new(config.clone(), store, pub_sem, source_path, source_file) {
        Ok(session) => session,
        Err(err) => {
            log_error(&mut logger, &err);
            let _ = ffi::disable();
            return ExitCode::SourceSetupFailure;
        }
    };

    let code = main_loop(&mut session, &netlink, &config, &mut logger);

    let _ = ffi::disable();
    logger.log(&LogEvent::new(
        EventType::DaemonStop,
        Severity::Info,
        "writer daemon stopping",
    ));
    code
}

/// The 8-step single-threaded drain cycle, run until a fatal condition ends it.
fn main_loop(session: &mut WriterSession, netlink: &NetlinkChannel, config: &Config, logger: &mut Logger) -> ExitCode {
    let mut last_gc = Instant::now();
    let gc_interval = std::time::Duration::from_secs(config.shadow.gc_interval_secs);
    let mut recv_buf = vec![0u8; 4096];

    loop {
        // Step 1: block on the netlink wake-up channel.
        match netlink.recv(&mut recv_buf) {
            Ok(RecvOutcome::Data(_) | RecvOutcome::Recoverable) => {}
            Err(err) => {
                log_error(logger, &err);
                return ExitCode::NetlinkRecvFailure;
            }
        }

        // Steps 2-3: read a batch, establishing the record size on first success.
        let batch = match session.read_source_batch() {
            Ok(batch) => batch,
            Err(err @ PacctError::UnknownLayout { .. }) => {
                log_error(logger, &err);
                return ExitCode::RecordSizeDetection;
            }
            Err(err) => {
                log_error(logger, &err);
                return ExitCode::ShadowWriteFailure;
            }
        };
        if batch.is_empty() {
            // Persistent EOF: nothing to publish this pass, return to step 1.
            maybe_gc(session, &mut last_gc, gc_interval, logger);
            continue;
        }

        // Step 5: reader-presence transition.
        let has_readers = match session.has_readers() {
            Ok(present) => present,
            Err(err) => {
                log_error(logger, &err);
                return ExitCode::ShadowWriteFailure;
            }
        };
        if !has_readers {
            if session.previously_had_readers() {
                if let Err(err) = session.reset_for_no_readers() {
                    log_error(logger, &err);
                    return ExitCode::ShadowWriteFailure;
                }
            }
            session.mark_had_readers(false);
            maybe_gc(session, &mut last_gc, gc_interval, logger);
            continue;
        }
        session.mark_had_readers(true);

        // Step 7: free-space check before writing.
        match session.has_write_headroom() {
            Ok(true) => {}
            Ok(false) => {
                logger.log(&LogEvent::new(
                    EventType::LowSpaceSkip,
                    Severity::Warning,
                    "shadow directory below free-space floor, skipping write",
                ));
                maybe_gc(session, &mut last_gc, gc_interval, logger);
                continue;
            }
            Err(err) => {
                log_error(logger, &err);
                return ExitCode::ShadowWriteFailure;
            }
        }

        // Step 6: append, rotating as needed.
        let seq_before = session.current_seq();
        if let Err(err) = session.append_batch(&batch) {
            log_error(logger, &err);
            return ExitCode::ShadowWriteFailure;
        }
        if session.current_seq() != seq_before {
            logger.log(
                &LogEvent::new(EventType::ShadowRotate, Severity::Info, "rotated shadow file")
                    .with_seq(session.current_seq()),
            );
        }

        // Step 8: periodic GC.
        maybe_gc(session, &mut last_gc, gc_interval, logger);
    }
}

fn maybe_gc(session: &mut WriterSession, last_gc: &mut Instant, interval: std::time::Duration, logger: &mut Logger) {
    if last_gc.elapsed() < interval {
        return;
    }
    *last_gc = Instant::now();
    match session.gc_tick() {
        Ok(removed) if removed > 0 => {
            logger.log(&LogEvent::new(
                EventType::GcSweep,
                Severity::Info,
                format!("reclaimed {removed} shadow file(s)"),
            ));
        }
        Ok(_) => {}
        Err(err) => log_error(logger, &err),
    }
}
