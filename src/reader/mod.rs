//! Shadow reader library: attach to a running daemon's shadow file set, or fall back to
//! conventional/private accounting when no daemon is reachable.
//!
//! Grounded in `acctproc.c`'s `acctswon()`/`acctswoff()`/`acctprocnt()`/`acctphotoproc()`
//! handshake and fallback logic.

mod fallback;
mod session;

pub use fallback::{FallbackSession, FallbackSource, PrivateFallbackGuard};
pub use session::ReaderSession;

use std::thread;
use std::time::{Duration, Instant};

use crate::core::config::Config;
use crate::core::errors::{PacctError, Result};
use crate::platform::semaphore::SemaphoreSet;
use crate::store::ShadowStore;

/// How a reader ended up getting accounting data: a live daemon's shadow files, or one
/// of the two fallback paths.
pub enum Attached {
    Daemon(ReaderSession),
    Fallback(FallbackSession),
}

/// Attach to a running daemon's shadow store, falling back to a conventional kernel
/// accounting file and then to private accounting if no daemon answers within
/// `cfg.reader.attach_timeout_secs`.
///
/// Mirrors `acctswon()`'s three-tier search, plus the `ATOPACCT` environment variable
/// override documented in spec.md §7: set to a path, that path is read directly and the
/// daemon/fallback search is skipped entirely; set to the empty string, accounting is
/// disabled and this returns [`PacctError::Runtime`].
pub fn attach_or_fallback(cfg: &Config) -> Result<Attached> {
    if let Ok(raw) = std::env::var("ATOPACCT") {
        if raw.is_empty() {
            return Err(PacctError::Runtime {
                details: "accounting disabled via ATOPACCT=\"\"".to_string(),
            });
        }
        return FallbackSession::conventional(raw.into()).map(Attached::Fallback);
    }

    match try_attach_daemon(cfg) {
        Ok(session) => return Ok(Attached::Daemon(session)),
        Err(PacctError::DaemonStalled) => {}
        Err(other) => return Err(other),
    }

    for candidate in &cfg.paths.conventional_sources {
        if candidate.exists() {
            if let Ok(session) = FallbackSession::conventional(candidate.clone()) {
                return Ok(Attached::Fallback(session));
            }
        }
    }

    FallbackSession::private(cfg).map(Attached::Fallback)
}

/// Repeatedly attempt the public-semaphore handshake until `cfg.reader.attach_timeout_secs`
/// elapses, at which point this reports [`PacctError::DaemonStalled`] so the caller falls
/// through to the next tier.
fn try_attach_daemon(cfg: &Config) -> Result<ReaderSession> {
    let deadline = Instant::now() + Duration::from_secs(cfg.reader.attach_timeout_secs.max(1));
    loop {
        match attempt_attach(cfg) {
            Ok(Some(session)) => return Ok(session),
            Ok(None) => {}
            Err(err) => return Err(err),
        }
        if Instant::now() >= deadline {
            return Err(PacctError::DaemonStalled);
        }
        thread::sleep(Duration::from_millis(50));
    }
}

fn attempt_attach(cfg: &Config) -> Result<Option<ReaderSession>> {
    let Some(sem) = SemaphoreSet::attach(cfg.ipc.public_key)? else {
        // No daemon has created the public semaphore set yet.
        return Ok(None);
    };
    // spec.md §4.4 Attach step 2: drop root privileges once the public semaphore set
    // is located, before claiming a reader slot or opening any shadow file.
    crate::platform::drop_root_privileges()?;
    if !sem.op(-1, true, true)? {
        // Every reader slot is claimed; treat as transient contention, not absence.
        return Ok(None);
    }
    let store = ShadowStore::new(&cfg.paths.root_dir, &cfg.shadow.shadow_dir_name);
    if store.read_current().is_err() {
        // `current` is not yet readable (daemon mid-startup): release the slot we just
        // claimed and let the outer loop retry rather than fail the whole handshake.
        let _ = sem.op(1, true, false);
        return Ok(None);
    }
    ReaderSession::attach(store, sem).map(Some)
}
