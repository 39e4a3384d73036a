//! Operator/test CLI over the reader library and shadow store: attach the way any
//! real consumer would, report position and backlog, and dump or skip records for
//! inspection. Not part of the wire contract itself — a thin shell over
//! [`pacct_shadow::reader`].

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::Serialize;

use pacct_shadow::core::config::Config;
use pacct_shadow::core::errors::Result;
use pacct_shadow::logger::{EventType, LogEvent, Logger, Severity};
use pacct_shadow::reader::{Attached, attach_or_fallback};

#[derive(Parser, Debug)]
#[command(name = "pacctctl", version)]
struct Cli {
    /// Path to a config file (defaults to `PACCT_CONFIG` or the standard location).
    #[arg(long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Attach and report current position and backlog size, then detach.
    Status,
    /// Attach, read up to `count` records, and print them as JSON lines.
    Read {
        count: u64,
    },
    /// Attach and skip `count` records without decoding them.
    Skip {
        count: u64,
    },
}

#[derive(Serialize)]
struct StatusReport {
    source: &'static str,
    available: u64,
}

fn run(cli: &Cli, logger: &mut Logger) -> Result<()> {
    let config = Config::load(cli.config.as_deref())?;

    match &cli.command {
        Command::Status => {
            let (source, available) = match attach_or_fallback(&config)? {
                Attached::Daemon(mut session) => ("daemon", session.count_available()?),
                Attached::Fallback(mut session) => ("fallback", session.count_available()?),
            };
            let report = StatusReport { source, available };
            println!("{}", serde_json::to_string(&report).expect("StatusReport serializes"));
        }
        Command::Read { count } => {
            let records = match attach_or_fallback(&config)? {
                Attached::Daemon(mut session) => session.read_next(*count)?,
                Attached::Fallback(mut session) => session.read_next(*count)?,
            };
            for record in &records {
                println!("{}", serde_json::to_string(&TaskRecordView::from(record)).expect("TaskRecordView serializes"));
            }
        }
        Command::Skip { count } => match attach_or_fallback(&config)? {
            Attached::Daemon(mut session) => session.skip(*count)?,
            Attached::Fallback(mut session) => session.skip(*count)?,
        },
    }

    logger.log(&LogEvent::new(EventType::ReaderAttach, Severity::Info, "pacctctl command completed"));
    Ok(())
}

/// JSON-friendly projection of [`pacct_shadow::codec::TaskRecord`]; the in-memory type
/// itself stays undecorated since the reader library has no reason to depend on serde.
#[derive(Serialize)]
struct TaskRecordView {
    pid: u32,
    ppid: u32,
    uid: u32,
    gid: u32,
    comm: String,
    exitcode: u32,
    utime_ticks: u64,
    stime_ticks: u64,
}

impl From<&pacct_shadow::codec::TaskRecord> for TaskRecordView {
    fn from(record: &pacct_shadow::codec::TaskRecord) -> Self {
        Self {
            pid: record.pid,
            ppid: record.ppid,
            uid: record.uid,
            gid: record.gid,
            comm: record.comm.clone(),
            exitcode: record.exitcode,
            utime_ticks: record.utime_ticks,
            stime_ticks: record.stime_ticks,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let mut logger = Logger::stderr("pacctctl");

    match run(&cli, &mut logger) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            logger.log(&LogEvent::new(EventType::Error, Severity::Critical, err.to_string()).with_error_code(err.code()));
            ExitCode::FAILURE
        }
    }
}
