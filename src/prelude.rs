//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use pacct_shadow::prelude::*;
//! ```

// Core
pub use crate::core::config::{Config, DaemonConfig, IpcConfig, PathsConfig, ReaderConfig, ShadowConfig};
pub use crate::core::errors::{PacctError, Result};

// Codec
pub use crate::codec::{AcctLayout, RECORD_SIZE, TaskRecord, decode, expand_comp};

// Shadow store
pub use crate::store::{CurrentPointer, LockedReadFile, ShadowFileId, ShadowStore};

// Logging
pub use crate::logger::{EventType, LogEvent, Logger, Severity};

// Platform
pub use crate::platform::free_space_pct;

// Reader
pub use crate::reader::{Attached, FallbackSession, FallbackSource, ReaderSession, attach_or_fallback};

#[cfg(feature = "daemon")]
pub use crate::daemon::{ExitCode, WriterSession};

#[cfg(feature = "convert")]
pub use crate::migrate::{MigrationReport, VersionChain, default_chain};
