//! Configuration system: TOML file + env var overrides + documented defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{PacctError, Result};

/// Full configuration model for the ingestion/distribution subsystem.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub shadow: ShadowConfig,
    pub daemon: DaemonConfig,
    pub reader: ReaderConfig,
    pub ipc: IpcConfig,
}

/// Filesystem locations the subsystem reads and writes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    /// Path to this config file, filled in by `Config::load`.
    pub config_file: PathBuf,
    /// Root directory holding the source pacct file and the shadow directory
    /// (`PACCTDIR` in the reference implementation, default `/var/run`).
    pub root_dir: PathBuf,
    /// Conventional kernel accounting file names probed when no daemon is
    /// reachable, in priority order (the reference `pacctadm[]` table).
    pub conventional_sources: Vec<PathBuf>,
    /// Private fallback accounting file used when neither a daemon nor a
    /// conventional source is available.
    pub private_fallback_file: PathBuf,
}

/// Shadow directory/file layout and rotation knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ShadowConfig {
    /// Directory name (relative to `root_dir`) holding sequence-numbered shadow files.
    pub shadow_dir_name: String,
    /// Source accounting file name (relative to `root_dir`) the daemon drains.
    pub source_file_name: String,
    /// Maximum accounting records per shadow file before rotating.
    pub max_records_per_file: u64,
    /// Maximum size, in bytes, the source pacct file is allowed to grow to before
    /// the daemon truncates it back to empty.
    pub max_source_size_bytes: u64,
    /// Minimum free-space percentage required before appending; checked at whole-record
    /// granularity (see DESIGN.md Open Question #2).
    pub min_free_space_pct: f64,
    /// How often, in seconds, the daemon sweeps fully-consumed shadow files.
    pub gc_interval_secs: u64,
}

/// Writer-daemon-only tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DaemonConfig {
    /// `nice(2)` value the daemon raises itself to after daemonizing.
    pub nice_level: i32,
    /// Bytes read per pass over the source file before re-checking the wake-up channel.
    pub read_batch_size: usize,
    /// Maximum consecutive empty reads tolerated before falling back to a timed sleep.
    pub max_empty_read_retries: u32,
    /// Milliseconds slept between empty-read retries.
    pub empty_read_retry_delay_ms: u64,
}

/// Reader-library tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReaderConfig {
    /// Hard cap on records returned from one `read_next` call
    /// (`MAXACCTPROCS`-equivalent: `50 MiB / size_of::<TaskRecord>()`).
    pub max_records_per_read: u64,
    /// Size, in bytes, above which the private fallback file is eligible for a
    /// restart-and-truncate cycle (`ACCTMAXFILESZ`-equivalent, default 200 MiB).
    pub private_fallback_max_size_bytes: u64,
    /// Attach handshake timeout in seconds before falling back to conventional/private mode.
    pub attach_timeout_secs: u64,
}

/// SysV semaphore key configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IpcConfig {
    /// Public semaphore key (inverted reader-reference-count), `PACCTPUBKEY` in the
    /// reference implementation.
    pub public_key: i32,
    /// Private semaphore key (single-daemon mutex), `PACCTPRVKEY` in the reference
    /// implementation (conventionally `public_key - 1`).
    pub private_key: i32,
    /// Private-fallback semaphore key pair, `ATOPACCTKEY` in the reference implementation.
    /// The pair occupies `fallback_key` (mutex) and `fallback_key + 1` (inverted
    /// reference count).
    pub fallback_key: i32,
    /// Initial value of the public inverted reader-reference-count semaphore.
    pub reader_slots: u16,
    /// Initial value of the private-fallback inverted reference-count semaphore
    /// (`ATOPACCTTOT` in the reference implementation).
    pub fallback_slots: u16,
}

impl Default for PathsConfig {
    fn default() -> Self {
        let root_dir = PathBuf::from("/var/run");
        Self {
            config_file: PathBuf::from("/etc/pacct-shadow/config.toml"),
            conventional_sources: vec![
                PathBuf::from("/var/log/account/pacct"),
                PathBuf::from("/var/account/pacct"),
            ],
            private_fallback_file: PathBuf::from("/var/cache/pacct-shadow/pacct.acct"),
            root_dir,
        }
    }
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            shadow_dir_name: "pacct_shadow.d".to_string(),
            source_file_name: "pacct_source".to_string(),
            max_records_per_file: 10_000,
            max_source_size_bytes: 1024 * 1024,
            min_free_space_pct: 5.0,
            gc_interval_secs: 15,
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            nice_level: -39,
            read_batch_size: 8192,
            max_empty_read_retries: 50,
            empty_read_retry_delay_ms: 10,
        }
    }
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            max_records_per_read: 50 * 1024 * 1024 / 40,
            private_fallback_max_size_bytes: 200 * 1024 * 1024,
            attach_timeout_secs: 3,
        }
    }
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            public_key: 1_071_980,
            private_key: 1_071_979,
            fallback_key: 3_121_959,
            reader_slots: 100,
            fallback_slots: 100,
        }
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from an explicit path, the `PACCT_CONFIG` environment variable, or the
    /// default path, then apply remaining environment overrides.
    ///
    /// Missing config file is not an error when resolved from the default path; defaults
    /// apply. An explicitly requested path (CLI flag or `PACCT_CONFIG`) that does not exist
    /// is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let env_path = if path.is_none() {
            env::var_os("PACCT_CONFIG").map(PathBuf::from)
        } else {
            None
        };
        let is_explicit = path.is_some() || env_path.is_some();
        let effective_path =
            path.map_or_else(|| env_path.unwrap_or_else(Self::default_path), Path::to_path_buf);

        let mut cfg = if effective_path.exists() {
            let raw = fs::read_to_string(&effective_path)
                .map_err(|source| PacctError::io(&effective_path, source))?;
            toml::from_str::<Self>(&raw)?
        } else if is_explicit {
            return Err(PacctError::MissingConfig {
                path: effective_path,
            });
        } else {
            Self::default()
        };

        cfg.paths.config_file = effective_path;
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        set_env_u64(
            "PACCT_SHADOW_MAX_RECORDS_PER_FILE",
            &mut self.shadow.max_records_per_file,
        )?;
        set_env_u64(
            "PACCT_SHADOW_MAX_SOURCE_SIZE_BYTES",
            &mut self.shadow.max_source_size_bytes,
        )?;
        set_env_f64(
            "PACCT_SHADOW_MIN_FREE_SPACE_PCT",
            &mut self.shadow.min_free_space_pct,
        )?;
        set_env_u64(
            "PACCT_SHADOW_GC_INTERVAL_SECS",
            &mut self.shadow.gc_interval_secs,
        )?;
        set_env_i32("PACCT_DAEMON_NICE_LEVEL", &mut self.daemon.nice_level)?;
        set_env_usize(
            "PACCT_DAEMON_READ_BATCH_SIZE",
            &mut self.daemon.read_batch_size,
        )?;
        set_env_u64(
            "PACCT_READER_MAX_RECORDS_PER_READ",
            &mut self.reader.max_records_per_read,
        )?;
        set_env_u64(
            "PACCT_READER_PRIVATE_FALLBACK_MAX_SIZE_BYTES",
            &mut self.reader.private_fallback_max_size_bytes,
        )?;
        Ok(())
    }

    /// Validate cross-field invariants not expressible via `serde` alone.
    fn validate(&self) -> Result<()> {
        if self.shadow.max_records_per_file == 0 {
            return Err(PacctError::InvalidConfig {
                details: "shadow.max_records_per_file must be >= 1".to_string(),
            });
        }
        if self.shadow.max_source_size_bytes == 0 {
            return Err(PacctError::InvalidConfig {
                details: "shadow.max_source_size_bytes must be >= 1".to_string(),
            });
        }
        if !(0.0..100.0).contains(&self.shadow.min_free_space_pct) {
            return Err(PacctError::InvalidConfig {
                details: format!(
                    "shadow.min_free_space_pct must be in [0, 100), got {}",
                    self.shadow.min_free_space_pct
                ),
            });
        }
        if self.shadow.gc_interval_secs == 0 {
            return Err(PacctError::InvalidConfig {
                details: "shadow.gc_interval_secs must be >= 1".to_string(),
            });
        }
        if self.daemon.read_batch_size == 0 {
            return Err(PacctError::InvalidConfig {
                details: "daemon.read_batch_size must be >= 1".to_string(),
            });
        }
        if self.reader.max_records_per_read == 0 {
            return Err(PacctError::InvalidConfig {
                details: "reader.max_records_per_read must be >= 1".to_string(),
            });
        }
        if self.ipc.public_key == self.ipc.private_key {
            return Err(PacctError::InvalidConfig {
                details: "ipc.public_key and ipc.private_key must differ".to_string(),
            });
        }
        if self.ipc.reader_slots == 0 {
            return Err(PacctError::InvalidConfig {
                details: "ipc.reader_slots must be >= 1".to_string(),
            });
        }
        if self.ipc.fallback_slots == 0 {
            return Err(PacctError::InvalidConfig {
                details: "ipc.fallback_slots must be >= 1".to_string(),
            });
        }
        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn set_env_f64(name: &str, slot: &mut f64) -> Result<()> {
    if let Some(raw) = env_var(name) {
        *slot = raw.parse::<f64>().map_err(|error| PacctError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })?;
    }
    Ok(())
}

fn set_env_u64(name: &str, slot: &mut u64) -> Result<()> {
    if let Some(raw) = env_var(name) {
        *slot = raw.parse::<u64>().map_err(|error| PacctError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })?;
    }
    Ok(())
}

fn set_env_i32(name: &str, slot: &mut i32) -> Result<()> {
    if let Some(raw) = env_var(name) {
        *slot = raw.parse::<i32>().map_err(|error| PacctError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })?;
    }
    Ok(())
}

fn set_env_usize(name: &str, slot: &mut usize) -> Result<()> {
    if let Some(raw) = env_var(name) {
        *slot = raw
            .parse::<usize>()
            .map_err(|error| PacctError::ConfigParse {
                context: "env",
                details: format!("{name}={raw:?}: {error}"),
            })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{Config, PacctError};
    use std::path::Path;

    #[test]
    fn default_config_is_valid() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn zero_max_records_rejected() {
        let mut cfg = Config::default();
        cfg.shadow.max_records_per_file = 0;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("max_records_per_file"));
    }

    #[test]
    fn free_space_pct_out_of_range_rejected() {
        let mut cfg = Config::default();
        cfg.shadow.min_free_space_pct = 150.0;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("min_free_space_pct"));
    }

    #[test]
    fn identical_semaphore_keys_rejected() {
        let mut cfg = Config::default();
        cfg.ipc.private_key = cfg.ipc.public_key;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("must differ"));
    }

    #[test]
    fn load_returns_error_for_explicit_missing_path() {
        let result = Config::load(Some(Path::new("/nonexistent/pacct-shadow/config.toml")));
        assert!(result.is_err());
        assert!(matches!(
            result.unwrap_err(),
            PacctError::MissingConfig { .. }
        ));
    }

    #[test]
    fn load_falls_back_to_defaults_when_default_path_missing() {
        // single-threaded test process, no other thread reads this env var concurrently.
        unsafe {
            std::env::remove_var("PACCT_CONFIG");
        }
        let cfg = Config::load(None).expect("defaults should load even without a config file");
        assert_eq!(cfg.shadow.max_records_per_file, 10_000);
    }

    #[test]
    fn toml_roundtrip_preserves_overrides() {
        let toml_str = r#"
[shadow]
max_records_per_file = 500
gc_interval_secs = 30
"#;
        let cfg: Config = toml::from_str(toml_str).expect("should parse");
        assert_eq!(cfg.shadow.max_records_per_file, 500);
        assert_eq!(cfg.shadow.gc_interval_secs, 30);
        // Untouched fields keep their defaults.
        assert_eq!(cfg.daemon.nice_level, -39);
    }
}
