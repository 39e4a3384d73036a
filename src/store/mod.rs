//! Shadow store: a directory of sequence-numbered shadow files plus a `current`
//! pointer file, the unit of distribution between the writer daemon and readers.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::PathBuf;

use nix::fcntl::{FcntlArg, fcntl};

use crate::core::errors::{PacctError, Result};

/// Build a `libc::flock` covering the first byte of a file, the byte-range every
/// lock in this module operates on (matching `gcshadows()`/the reference reader's
/// `l_start = 0, l_len = 1`).
fn first_byte_lock(l_type: i16) -> libc::flock {
    libc::flock {
        l_type,
        l_whence: libc::SEEK_SET as i16,
        l_start: 0,
        l_len: 1,
        l_pid: 0,
    }
}

/// Sequence number identifying one shadow file within a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ShadowFileId(pub u64);

impl ShadowFileId {
    /// Next sequence number, wrapping is not a practical concern within one daemon lifetime.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

/// Contents of the `current` pointer file: newest sequence number and the
/// per-file record cap in effect when it was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentPointer {
    pub seq: u64,
    pub maxrec: u64,
}

impl std::fmt::Display for CurrentPointer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.seq, self.maxrec)
    }
}

impl std::str::FromStr for CurrentPointer {
    type Err = PacctError;

    /// Parses the exact `"<seq>/<maxrec>"` wire format `setcurrent()` writes
    /// (`snprintf(..., "%ld/%lu", curshadow, maxshadowrec)` in the reference
    /// implementation, with no trailing newline).
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (seq_str, maxrec_str) = trimmed.split_once('/').ok_or_else(|| {
            PacctError::MalformedCurrent {
                raw: trimmed.to_string(),
            }
        })?;
        let seq = seq_str
            .parse::<u64>()
            .map_err(|_| PacctError::MalformedCurrent {
                raw: trimmed.to_string(),
            })?;
        let maxrec = maxrec_str
            .parse::<u64>()
            .map_err(|_| PacctError::MalformedCurrent {
                raw: trimmed.to_string(),
            })?;
        Ok(Self { seq, maxrec })
    }
}

/// A shadow file opened for read, with a standing `F_RDLCK` held on its first byte
/// so that [`ShadowStore::gc`] (anywhere, including a different process) can detect
/// this session as a live reader via a non-blocking `F_WRLCK` probe.
pub struct LockedReadFile {
    pub file: File,
}

impl Read for LockedReadFile {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.file.read(buf)
    }
}

/// A directory of sequence-numbered shadow files plus a `current` pointer file.
#[derive(Debug, Clone)]
pub struct ShadowStore {
    root: PathBuf,
    shadow_dir_name: String,
}

impl ShadowStore {
    /// Open a store rooted at `root`, with shadow files under `root/shadow_dir_name`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, shadow_dir_name: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            shadow_dir_name: shadow_dir_name.into(),
        }
    }

    /// Directory holding the sequence-numbered shadow files.
    #[must_use]
    pub fn shadow_dir(&self) -> PathBuf {
        self.root.join(&self.shadow_dir_name)
    }

    /// Path of one shadow file, `<seq:010>.paf` under the shadow directory.
    #[must_use]
    pub fn shadow_path(&self, id: ShadowFileId) -> PathBuf {
        self.shadow_dir().join(format!("{:010}.paf", id.0))
    }

    fn current_path(&self) -> PathBuf {
        self.shadow_dir().join("current")
    }

    /// Validate that the store's directories exist, are owned by root, and are not
    /// group/other writable. Grounded in `atopacctd.c`'s `dirstat.st_uid`/`st_mode`
    /// checks on the pacct source directory.
    pub fn validate_root_dir(&self) -> Result<()> {
        let meta = fs::metadata(&self.root).map_err(|source| PacctError::io(&self.root, source))?;
        if !meta.is_dir() {
            return Err(PacctError::ShadowDirInvalid {
                path: self.root.clone(),
                reason: "not a directory".to_string(),
            });
        }
        use std::os::unix::fs::MetadataExt;
        if meta.uid() != 0 {
            return Err(PacctError::ShadowDirInvalid {
                path: self.root.clone(),
                reason: format!("not owned by root (uid {})", meta.uid()),
            });
        }
        if meta.mode() & 0o022 != 0 {
            return Err(PacctError::ShadowDirInvalid {
                path: self.root.clone(),
                reason: "group- or other-writable".to_string(),
            });
        }
        Ok(())
    }

    /// Ensure the shadow directory exists, creating it (mode 0755) if necessary.
    pub fn ensure_shadow_dir(&self) -> Result<()> {
        let dir = self.shadow_dir();
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|source| PacctError::io(&dir, source))?;
            fs::set_permissions(&dir, fs::Permissions::from_mode(0o755))
                .map_err(|source| PacctError::io(&dir, source))?;
        }
        Ok(())
    }

    /// Create a new shadow file, truncating any previous contents at this sequence
    /// number. Mirrors `createshadow()`'s `creat(shadowpath, 0644)`.
    pub fn create(&self, id: ShadowFileId) -> Result<File> {
        let path = self.shadow_path(id);
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o644)
            .open(&path)
            .map_err(|source| PacctError::io(&path, source))
    }

    /// Open an existing shadow file for read, placing a shared (`F_RDLCK`) advisory
    /// lock on its first byte so that concurrent [`ShadowStore::gc`] calls treat it
    /// as still in use. Matches the reference reader's lock-on-attach behavior: more
    /// than one reader may hold this shared lock at once.
    pub fn open_for_read(&self, id: ShadowFileId) -> Result<LockedReadFile> {
        let path = self.shadow_path(id);
        let file = File::open(&path).map_err(|source| PacctError::io(&path, source))?;
        let lock = first_byte_lock(libc::F_RDLCK as i16);
        fcntl(&file, FcntlArg::F_SETLK(&lock)).map_err(|errno| PacctError::Io {
            path: path.clone(),
            source: std::io::Error::from(errno),
        })?;
        Ok(LockedReadFile { file })
    }

    /// Write the `current` pointer file: `"<seq>/<maxrec>"`, matching `setcurrent()`.
    pub fn set_current(&self, seq: u64, maxrec: u64) -> Result<()> {
        let path = self.current_path();
        let pointer = CurrentPointer { seq, maxrec };
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o644)
            .open(&path)
            .map_err(|source| PacctError::io(&path, source))?;
        file.write_all(pointer.to_string().as_bytes())
            .map_err(|source| PacctError::io(&path, source))
    }

    /// Read and parse the `current` pointer file.
    pub fn read_current(&self) -> Result<CurrentPointer> {
        let path = self.current_path();
        let raw = fs::read_to_string(&path).map_err(|source| PacctError::io(&path, source))?;
        raw.parse()
    }

    /// Remove fully-consumed shadow files in `[*oldest, newest)`, advancing `*oldest`
    /// past each one removed. Returns the count removed.
    ///
    /// Stops at the first sequence number it cannot write-lock (still held by a
    /// reader's shared lock, or genuinely missing) — preserved verbatim from
    /// `gcshadows()`, not redesigned. A reader's forward scan (`switchshadow()` in the
    /// reference implementation) depends on `oldest+1` still existing once it has
    /// finished `oldest`, so continuing past a locked file here would race a reader
    /// that has not yet advanced.
    pub fn gc(&self, oldest: &mut u64, newest: u64) -> Result<u64> {
        let mut removed = 0u64;
        while *oldest < newest {
            let path = self.shadow_path(ShadowFileId(*oldest));
            let file = match OpenOptions::new().write(true).open(&path) {
                Ok(f) => f,
                Err(_) => break,
            };
            let lock = first_byte_lock(libc::F_WRLCK as i16);
            if fcntl(&file, FcntlArg::F_SETLK(&lock)).is_err() {
                // Still in use by a reader's shared lock.
                break;
            }
            drop(file);
            fs::remove_file(&path).map_err(|source| PacctError::io(&path, source))?;
            *oldest += 1;
            removed += 1;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn store(dir: &tempfile::TempDir) -> ShadowStore {
        ShadowStore::new(dir.path(), "pacct_shadow.d")
    }

    #[test]
    fn current_pointer_roundtrips_through_display_and_fromstr() {
        let pointer = CurrentPointer {
            seq: 7,
            maxrec: 10_000,
        };
        let rendered = pointer.to_string();
        assert_eq!(rendered, "7/10000");
        let parsed: CurrentPointer = rendered.parse().unwrap();
        assert_eq!(parsed, pointer);
    }

    #[test]
    fn current_pointer_rejects_malformed_input() {
        let err = "not-a-pointer".parse::<CurrentPointer>().unwrap_err();
        assert!(matches!(err, PacctError::MalformedCurrent { .. }));
    }

    #[test]
    fn create_and_read_current_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir);
        s.ensure_shadow_dir().unwrap();
        s.set_current(3, 10_000).unwrap();
        let current = s.read_current().unwrap();
        assert_eq!(current.seq, 3);
        assert_eq!(current.maxrec, 10_000);
    }

    #[test]
    fn create_truncates_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir);
        s.ensure_shadow_dir().unwrap();
        {
            let mut f = s.create(ShadowFileId(1)).unwrap();
            f.write_all(b"hello").unwrap();
        }
        {
            let f = s.create(ShadowFileId(1)).unwrap();
            assert_eq!(f.metadata().unwrap().len(), 0);
        }
    }

    #[test]
    fn gc_removes_unlocked_files_and_stops_at_locked() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir);
        s.ensure_shadow_dir().unwrap();
        for seq in 0..4u64 {
            s.create(ShadowFileId(seq)).unwrap();
        }

        // Hold a shared lock on seq=2 to simulate an active reader.
        let _locked = s.open_for_read(ShadowFileId(2)).unwrap();

        let mut oldest = 0u64;
        let removed = s.gc(&mut oldest, 4).unwrap();
        assert_eq!(removed, 2);
        assert_eq!(oldest, 2);
        assert!(!s.shadow_path(ShadowFileId(0)).exists());
        assert!(!s.shadow_path(ShadowFileId(1)).exists());
        assert!(s.shadow_path(ShadowFileId(2)).exists());
        assert!(s.shadow_path(ShadowFileId(3)).exists());
    }

    #[test]
    fn gc_stops_at_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir);
        s.ensure_shadow_dir().unwrap();
        s.create(ShadowFileId(0)).unwrap();
        // seq=1 never created.
        s.create(ShadowFileId(2)).unwrap();

        let mut oldest = 0u64;
        let removed = s.gc(&mut oldest, 3).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(oldest, 1);
    }

    #[test]
    fn shadow_path_uses_zero_padded_ten_digit_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir);
        let path = s.shadow_path(ShadowFileId(42));
        assert!(path.ends_with("0000000042.paf"));
    }
}
