//! Raw-log schema migration CLI: upgrades a compressed raw sample log to a newer
//! schema version, streaming through [`pacct_shadow::migrate::default_chain`].

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use pacct_shadow::core::errors::{PacctError, Result};
use pacct_shadow::logger::{EventType, LogEvent, Logger, Severity};
use pacct_shadow::migrate::default_chain;

/// Convert a raw accounting sample log from any supported schema version to a newer one.
#[derive(Parser, Debug)]
#[command(name = "pacctconv", version)]
struct Cli {
    /// Source raw log.
    input: PathBuf,
    /// Destination path for the converted log.
    output: PathBuf,
    /// Target schema version index to convert up to (defaults to the newest supported).
    #[arg(long)]
    target_version: Option<u16>,
}

fn convert(cli: &Cli, logger: &mut Logger) -> Result<()> {
    let chain = default_chain();
    let target = cli.target_version.unwrap_or(chain.newest_version());

    let input = File::open(&cli.input).map_err(|source| PacctError::io(&cli.input, source))?;
    let output = File::create(&cli.output).map_err(|source| PacctError::io(&cli.output, source))?;
    let mut reader = BufReader::new(input);
    let mut writer = BufWriter::new(output);

    logger.log(
        &LogEvent::new(EventType::MigrationStart, Severity::Info, format!("converting to v{target}"))
            .with_path(cli.input.clone()),
    );
    let report = chain.migrate(&mut reader, &mut writer, target)?;
    logger.log(&LogEvent::new(
        EventType::MigrationComplete,
        Severity::Info,
        format!(
            "converted {} sample(s) from v{} to v{}",
            report.samples_converted, report.source_version, report.target_version
        ),
    ));
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let mut logger = Logger::stderr("pacctconv");

    match convert(&cli, &mut logger) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            logger.log(&LogEvent::new(EventType::Error, Severity::Critical, err.to_string()).with_error_code(err.code()));
            ExitCode::FAILURE
        }
    }
}
