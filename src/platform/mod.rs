//! Platform-facing primitives: filesystem free-space probing, the two raw syscalls
//! with no safe wrapper in the dependency stack ([`ffi`]), SysV semaphore sets
//! ([`semaphore`]), and the daemon-only taskstats netlink channel ([`netlink`]).

use std::path::Path;

use crate::core::errors::{PacctError, Result};

pub mod ffi;
#[cfg(feature = "daemon")]
pub mod netlink;
pub mod semaphore;

/// Drop root privileges by setting the real/effective/saved uid to the calling
/// process's own real uid, matching `acctswon()`'s privilege drop immediately after a
/// reader claims its shadow slot: the reader runs unprivileged for the remainder of its
/// attached lifetime (spec.md §4.4 Attach step 2).
///
/// A no-op in effect (though still a real `setuid` call) when the real and effective
/// uid already match, which covers the common case of a reader that was never
/// setuid-root to begin with.
pub fn drop_root_privileges() -> Result<()> {
    let real_uid = nix::unistd::getuid();
    nix::unistd::setuid(real_uid).map_err(|errno| PacctError::Runtime {
        details: format!("setuid({real_uid}) failed: {}", std::io::Error::from(errno)),
    })
}

/// Percentage of the filesystem containing `path` that remains free, in `[0.0, 100.0]`.
///
/// Mirrors `pass2shadow()`'s `fstatvfs` check (`f_bavail * 100 / f_blocks < minfree`),
/// using available-to-unprivileged-users blocks rather than raw free blocks so the
/// daemon's own writes do not appear to starve space reserved for root.
pub fn free_space_pct(path: &Path) -> Result<f64> {
    let stat = nix::sys::statvfs::statvfs(path).map_err(|errno| PacctError::Io {
        path: path.to_path_buf(),
        source: std::io::Error::from(errno),
    })?;
    let blocks = stat.blocks();
    if blocks == 0 {
        return Ok(0.0);
    }
    #[allow(clippy::cast_precision_loss)]
    {
        Ok((stat.blocks_available() as f64 * 100.0) / blocks as f64)
    }
}
