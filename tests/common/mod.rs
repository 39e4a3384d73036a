//! Shared test infrastructure for the CLI integration tests.
//!
//! Provides a `CARGO_BIN_EXE_<name>`-based binary runner, mirroring how unit tests
//! elsewhere in this crate build their own fixtures with `tempfile` rather than
//! touching real system state.

#![allow(dead_code)]

use std::path::PathBuf;
use std::process::{Command, ExitStatus, Output};

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CmdResult {
    fn from_output(output: Output) -> Self {
        Self {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }
}

fn resolve_bin_path(bin_env: &str, bin_name: &str) -> PathBuf {
    if let Ok(path) = std::env::var(bin_env) {
        let p = PathBuf::from(path);
        if p.exists() {
            return p;
        }
    }

    let exe_name = if cfg!(windows) { format!("{bin_name}.exe") } else { bin_name.to_string() };
    let fallback = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .and_then(|deps| deps.parent().map(PathBuf::from))
        .map(|debug_dir| debug_dir.join(exe_name));

    match fallback {
        Some(path) if path.exists() => path,
        _ => panic!("unable to resolve {bin_name} binary path (checked {bin_env} and debug sibling path)"),
    }
}

pub fn run_pacctctl(args: &[&str], envs: &[(&str, &str)]) -> CmdResult {
    run_bin("CARGO_BIN_EXE_pacctctl", "pacctctl", args, envs)
}

pub fn run_pacctconv(args: &[&str], envs: &[(&str, &str)]) -> CmdResult {
    run_bin("CARGO_BIN_EXE_pacctconv", "pacctconv", args, envs)
}

fn run_bin(bin_env: &str, bin_name: &str, args: &[&str], envs: &[(&str, &str)]) -> CmdResult {
    let bin_path = resolve_bin_path(bin_env, bin_name);
    let mut cmd = Command::new(&bin_path);
    cmd.args(args);
    for (k, v) in envs {
        cmd.env(k, v);
    }
    // Neither binary should read an operator's real config file during a test run.
    cmd.env_remove("PACCT_CONFIG");
    let output = cmd.output().unwrap_or_else(|err| panic!("execute {bin_name}: {err}"));
    CmdResult::from_output(output)
}

/// Raw-log builders shared by the migration CLI and property tests. Mirrors the
/// private constants `migrate::chain::{RAW_HEADER_LEN, RAW_RECORD_LEN}` — this
/// build's fixed raw-log header/sample-header sizes — since those two constants are
/// not part of the crate's public surface.
pub mod raw_log {
    use std::io::Write as _;

    use pacct_shadow::migrate::schema::{self, SchemaVersion, encode_task_gen};
    use pacct_shadow::migrate::{MAGIC, RawHeader, SampleHeader};

    pub const RAW_HEADER_LEN: u16 = 4 + 2 + 2 + 2 + 2 + 4 + 4 + 92;
    pub const RAW_RECORD_LEN: u16 = 8 + 2 + 2 + 4 + 4 + 4 + 4;

    fn zlib_compress(data: &[u8]) -> Vec<u8> {
        use flate2::Compression;
        use flate2::write::ZlibEncoder;
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    /// Build a single-sample raw log at the given schema version with the given
    /// `(pid, comm)` tasks, `sstat` filled with a fixed non-zero byte.
    pub fn synth_log(version: SchemaVersion, tasks: &[(u32, &str)]) -> Vec<u8> {
        let mut buf = Vec::new();
        let header = RawHeader {
            magic: MAGIC,
            aversion: version.index,
            rawheadlen: RAW_HEADER_LEN,
            rawreclen: RAW_RECORD_LEN,
            hertz: 100,
            sstatlen: version.sstat_size as u32,
            tstatlen: version.tstat_size as u32,
            trailing: vec![0u8; (RAW_HEADER_LEN - (4 + 2 + 2 + 2 + 2 + 4 + 4)) as usize],
        };
        header.write(&mut buf).unwrap();

        let sstat = vec![0xabu8; version.sstat_size];
        let scomp = zlib_compress(&sstat);
        let tstat_concat: Vec<u8> = tasks
            .iter()
            .flat_map(|(pid, comm)| encode_task_gen(*pid, comm, version.tstat_size))
            .collect();
        let pcomp = zlib_compress(&tstat_concat);

        let sample = SampleHeader {
            curtime: 1_700_000_000,
            flags: 0,
            scomplen: scomp.len() as u32,
            pcomplen: pcomp.len() as u32,
            interval: 1,
            ndeviat: tasks.len() as u32,
        };
        sample.write(&mut buf).unwrap();
        buf.extend_from_slice(&scomp);
        buf.extend_from_slice(&pcomp);
        buf
    }

    pub fn version_by_index(index: u16) -> SchemaVersion {
        match index {
            0 => schema::v0::VERSION,
            1 => schema::v1::VERSION,
            2 => schema::v2::VERSION,
            3 => schema::v3::VERSION,
            other => panic!("no schema version {other}"),
        }
    }
}
