//! PACCT-prefixed error types with structured error codes.
//!
//! The taxonomy mirrors the failure classes in the design: transient I/O retried
//! in place, resource exhaustion that degrades gracefully, broken-contract
//! failures that abort the current actor, lost privilege, and daemon absence
//! (handled by falling through to fallback mode rather than erroring). Lock
//! contention during `gc` is a normal stopping condition, not an error, and so
//! has no variant here.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the crate.
pub type Result<T> = std::result::Result<T, PacctError>;

/// Top-level error type for the accounting ingestion/distribution subsystem.
#[derive(Debug, Error)]
pub enum PacctError {
    #[error("[PACCT-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[PACCT-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[PACCT-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[PACCT-2001] unknown accounting record layout nibble: {nibble:#x}")]
    UnknownLayout { nibble: u8 },

    #[error("[PACCT-2002] short accounting record read: got {got} bytes, need {need}")]
    ShortRecord { got: usize, need: usize },

    #[error("[PACCT-2101] shadow directory {path} failed validation: {reason}")]
    ShadowDirInvalid { path: PathBuf, reason: String },

    #[error("[PACCT-2102] shadow file busy (locked by a reader): {path}")]
    ShadowBusy { path: PathBuf },

    #[error("[PACCT-2103] malformed current pointer contents: {raw:?}")]
    MalformedCurrent { raw: String },

    #[error(
        "[PACCT-2104] shadow sequence went backwards: reader at {reader_seq}, daemon at {daemon_seq}"
    )]
    SequenceRegressed { reader_seq: u64, daemon_seq: u64 },

    #[error("[PACCT-2201] another daemon instance is already running")]
    DaemonAlreadyRunning,

    #[error("[PACCT-2202] daemon attach handshake timed out")]
    DaemonStalled,

    #[error("[PACCT-2203] semaphore operation failed: {operation}: {details}")]
    Semaphore {
        operation: &'static str,
        details: String,
    },

    #[error("[PACCT-2301] netlink taskstats channel failed: {details}")]
    Netlink { details: String },

    #[error("[PACCT-2401] filesystem nearly full: {path} ({free_pct:.1}% free)")]
    FilesystemFull { path: PathBuf, free_pct: f64 },

    #[error("[PACCT-2501] zlib failure in {context}: {details}")]
    Compression {
        context: &'static str,
        details: String,
    },

    #[error("[PACCT-2502] raw log magic mismatch: expected {expected:#x}, got {got:#x}")]
    BadMagic { expected: u32, got: u32 },

    #[error(
        "[PACCT-2503] raw log record geometry mismatch (built for a different CPU architecture)"
    )]
    GeometryMismatch,

    #[error("[PACCT-2504] unsupported schema version for conversion: {version:#x}")]
    UnsupportedSchemaVersion { version: u16 },

    #[error(
        "[PACCT-2505] downgrade requested: source {source_version:#x} is newer than target {target_version:#x}"
    )]
    Downgrade {
        source_version: u16,
        target_version: u16,
    },

    #[error("[PACCT-2506] raw log structure sizes disagree with the conversion table")]
    CorruptLog,

    #[error("[PACCT-3001] permission denied for {path}")]
    PermissionDenied { path: PathBuf },

    #[error("[PACCT-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[PACCT-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl PacctError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "PACCT-1001",
            Self::MissingConfig { .. } => "PACCT-1002",
            Self::ConfigParse { .. } => "PACCT-1003",
            Self::UnknownLayout { .. } => "PACCT-2001",
            Self::ShortRecord { .. } => "PACCT-2002",
            Self::ShadowDirInvalid { .. } => "PACCT-2101",
            Self::ShadowBusy { .. } => "PACCT-2102",
            Self::MalformedCurrent { .. } => "PACCT-2103",
            Self::SequenceRegressed { .. } => "PACCT-2104",
            Self::DaemonAlreadyRunning => "PACCT-2201",
            Self::DaemonStalled => "PACCT-2202",
            Self::Semaphore { .. } => "PACCT-2203",
            Self::Netlink { .. } => "PACCT-2301",
            Self::FilesystemFull { .. } => "PACCT-2401",
            Self::Compression { .. } => "PACCT-2501",
            Self::BadMagic { .. } => "PACCT-2502",
            Self::GeometryMismatch => "PACCT-2503",
            Self::UnsupportedSchemaVersion { .. } => "PACCT-2504",
            Self::Downgrade { .. } => "PACCT-2505",
            Self::CorruptLog => "PACCT-2506",
            Self::PermissionDenied { .. } => "PACCT-3001",
            Self::Io { .. } => "PACCT-3002",
            Self::Runtime { .. } => "PACCT-3900",
        }
    }

    /// Whether retrying the same operation might succeed without intervention.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io { .. } | Self::FilesystemFull { .. } | Self::Netlink { .. } | Self::Runtime { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

impl From<toml::de::Error> for PacctError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
