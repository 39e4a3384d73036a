//! Conventional and private fallback accounting, used when no daemon answers the
//! public-semaphore handshake. Grounded in `acctproc.c`'s `acctswon()` third tier and
//! `acctrestarttrial()`.

use std::fs::{self, File, OpenOptions};
use std::io::{Read as _, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::codec::{self, AcctLayout, RECORD_SIZE, TaskRecord};
use crate::core::config::Config;
use crate::core::errors::{PacctError, Result};
use crate::platform::ffi;
use crate::platform::semaphore::{Provenance, SemaphoreSet};

const MAX_RECORDS_PER_READ: u64 = (50 * 1024 * 1024 / RECORD_SIZE) as u64;

/// Which fallback path a [`FallbackSession`] is reading from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackSource {
    /// A conventional kernel accounting file (e.g. `/var/log/account/pacct`), already
    /// enabled by something else (`init`, a distro accounting package).
    Conventional(PathBuf),
    /// This process's own private accounting file, enabled here because nothing else
    /// was reachable.
    Private,
}

/// A reader attached directly to a flat accounting file rather than a shadow store.
pub struct FallbackSession {
    source: FallbackSource,
    path: PathBuf,
    file: File,
    offset: u64,
    layout: Option<AcctLayout>,
    guard: Option<PrivateFallbackGuard>,
}

impl FallbackSession {
    /// Attach to an already-enabled conventional accounting file.
    pub fn conventional(path: PathBuf) -> Result<Self> {
        let file = File::open(&path).map_err(|source| PacctError::io(&path, source))?;
        Ok(Self {
            source: FallbackSource::Conventional(path.clone()),
            path,
            file,
            offset: 0,
            layout: None,
            guard: None,
        })
    }

    /// Enable and attach to this process's private accounting file, guarded by the
    /// `ATOPACCTKEY` semaphore pair so concurrent private readers share one restart
    /// cycle instead of racing each other's `acct(2)` calls.
    pub fn private(cfg: &Config) -> Result<Self> {
        let path = cfg.paths.private_fallback_file.clone();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| PacctError::io(parent, source))?;
        }
        let guard = PrivateFallbackGuard::acquire(
            &path,
            cfg.ipc.fallback_key,
            cfg.ipc.fallback_slots,
            cfg.reader.private_fallback_max_size_bytes,
        )?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|source| PacctError::io(&path, source))?;
        Ok(Self {
            source: FallbackSource::Private,
            path,
            file,
            offset: 0,
            layout: None,
            guard: Some(guard),
        })
    }

    /// Which fallback tier produced this session.
    #[must_use]
    pub const fn source(&self) -> &FallbackSource {
        &self.source
    }

    /// If the file has shrunk below our read offset (truncated by whatever owns
    /// accounting on it, including our own [`PrivateFallbackGuard::maybe_restart`]),
    /// reset to its start rather than erroring — matches spec.md §4.4's reset-on-
    /// truncation behavior (scenario S6).
    fn resync_after_possible_truncation(&mut self) -> Result<()> {
        let len = self
            .file
            .metadata()
            .map_err(|source| PacctError::io(&self.path, source))?
            .len();
        if self.offset > len {
            self.offset = 0;
            self.file
                .seek(SeekFrom::Start(0))
                .map_err(|source| PacctError::io(&self.path, source))?;
        }
        Ok(())
    }

    /// Whole records available to read right now.
    pub fn count_available(&mut self) -> Result<u64> {
        self.resync_after_possible_truncation()?;
        let len = self
            .file
            .metadata()
            .map_err(|source| PacctError::io(&self.path, source))?
            .len();
        Ok(len.saturating_sub(self.offset) / RECORD_SIZE as u64)
    }

    /// Read up to `n` records (capped at [`MAX_RECORDS_PER_READ`]).
    pub fn read_next(&mut self, n: u64) -> Result<Vec<TaskRecord>> {
        let n = n.min(MAX_RECORDS_PER_READ);
        self.resync_after_possible_truncation()?;
        self.file
            .seek(SeekFrom::Start(self.offset))
            .map_err(|source| PacctError::io(&self.path, source))?;

        let mut out = Vec::new();
        let mut buf = [0u8; RECORD_SIZE];
        while (out.len() as u64) < n {
            match self.file.read_exact(&mut buf) {
                Ok(()) => {
                    let layout = match self.layout {
                        Some(layout) => layout,
                        None => {
                            let layout = AcctLayout::detect(&buf)?;
                            self.layout = Some(layout);
                            layout
                        }
                    };
                    out.push(codec::decode(&buf, layout)?);
                    self.offset += RECORD_SIZE as u64;
                }
                Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(err) => return Err(PacctError::io(&self.path, err)),
            }
        }

        if let Some(guard) = self.guard.as_mut() {
            let len = self
                .file
                .metadata()
                .map_err(|source| PacctError::io(&self.path, source))?
                .len();
            let nothing_unread = self.offset >= len;
            if guard.maybe_restart(&mut self.file, nothing_unread)? {
                self.offset = 0;
            }
        }
        Ok(out)
    }

    /// Skip `n` records without decoding them.
    pub fn skip(&mut self, n: u64) -> Result<()> {
        let mut remaining = n;
        while remaining > 0 {
            let batch = remaining.min(MAX_RECORDS_PER_READ);
            let got = self.read_next(batch)?.len() as u64;
            remaining -= got;
            if got < batch {
                break;
            }
        }
        Ok(())
    }
}

/// Coordinates size-based restart of the private fallback file across however many
/// processes are reading it, via the `ATOPACCTKEY` semaphore pair: `fallback_key` is a
/// plain mutex guarding the restart itself, `fallback_key + 1` is an inverted
/// reference count (`ATOPACCTTOT` in the reference implementation) used to detect that
/// this session is the sole private reader before truncating out from under anyone
/// else.
pub struct PrivateFallbackGuard {
    path: PathBuf,
    mutex: SemaphoreSet,
    refcount: SemaphoreSet,
    total_slots: u16,
    max_size_bytes: u64,
}

impl PrivateFallbackGuard {
    /// Claim a slot in the private-fallback reference count, enabling kernel accounting
    /// on `path` if this is the first private reader to do so.
    pub fn acquire(path: &Path, fallback_key: i32, total_slots: u16, max_size_bytes: u64) -> Result<Self> {
        let (mutex, _) = SemaphoreSet::create_or_attach(fallback_key, 0o600)?;
        let (refcount, provenance) = SemaphoreSet::create_or_attach(fallback_key + 1, 0o600)?;
        if provenance == Provenance::Created {
            refcount.set_val(i32::from(total_slots))?;
        }
        refcount.op(-1, true, true)?;
        if provenance == Provenance::Created {
            ffi::enable(path)?;
        }
        Ok(Self {
            path: path.to_path_buf(),
            mutex,
            refcount,
            total_slots,
            max_size_bytes,
        })
    }

    fn is_sole_user(&self) -> Result<bool> {
        Ok(self.refcount.get_val()? == i32::from(self.total_slots) - 1)
    }

    /// Restart (disable, truncate, re-enable) private accounting on `file` if it has
    /// grown past `max_size_bytes`, nothing remains unread, and this session is the
    /// only private reader active. Returns whether a restart happened, so the caller
    /// resets its own read offset.
    pub fn maybe_restart(&mut self, file: &mut File, nothing_unread: bool) -> Result<bool> {
        if !nothing_unread {
            return Ok(false);
        }
        let len = file
            .metadata()
            .map_err(|source| PacctError::Runtime {
                details: format!("stat of private fallback file failed: {source}"),
            })?
            .len();
        if len < self.max_size_bytes {
            return Ok(false);
        }
        if !self.is_sole_user()? {
            return Ok(false);
        }
        if !self.mutex.op(-1, true, true)? {
            // Another session is mid-restart; let it finish rather than racing it.
            return Ok(false);
        }
        let result = self.restart_private_accounting(file);
        let _ = self.mutex.op(1, true, false);
        result?;
        Ok(true)
    }

    /// `acct(NULL)`, truncate, `acct(path)` again — matches `acctrestarttrial()`'s
    /// disable/truncate/re-enable cycle. Accounting targets the path, not a held file
    /// descriptor, so the writer (our own `file`) must be re-seeked to pick up the
    /// fresh, empty file.
    fn restart_private_accounting(&self, file: &mut File) -> Result<()> {
        ffi::disable()?;
        file.set_len(0).map_err(|source| PacctError::Runtime {
            details: format!("truncating private fallback file failed: {source}"),
        })?;
        ffi::enable(&self.path)?;
        file.seek(SeekFrom::Start(0)).map_err(|source| PacctError::Runtime {
            details: format!("seeking private fallback file failed: {source}"),
        })?;
        Ok(())
    }
}
