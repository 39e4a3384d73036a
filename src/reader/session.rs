//! A live attachment to a running daemon's shadow store.

use std::fs;
use std::io::Read as _;
use std::os::unix::fs::MetadataExt;

use crate::codec::{self, AcctLayout, RECORD_SIZE, TaskRecord};
use crate::core::errors::{PacctError, Result};
use crate::platform::semaphore::SemaphoreSet;
use crate::store::{CurrentPointer, LockedReadFile, ShadowFileId, ShadowStore};

/// Hard cap on records returned from one [`ReaderSession::read_next`] call
/// (`MAXACCTPROCS`-equivalent: `50 MiB / size_of::<TaskRecord>()`, using the on-disk
/// record size rather than the decoded struct's in-memory size).
const MAX_RECORDS_PER_READ: u64 = (50 * 1024 * 1024 / RECORD_SIZE) as u64;

/// An attached reader's position within a shadow store: which sequence number it is
/// reading, how far into that file, and the daemon's currently-advertised record cap.
pub struct ReaderSession {
    store: ShadowStore,
    /// Held for the session's lifetime; `SEM_UNDO` releases this reader's slot
    /// automatically if the process exits without calling [`Drop`] explicitly (there is
    /// none here — the kernel does the cleanup spec.md Invariant I1 relies on).
    _slot: SemaphoreSet,
    seq: u64,
    maxrec: u64,
    file: LockedReadFile,
    offset: u64,
    layout: Option<AcctLayout>,
}

impl ReaderSession {
    /// Attach to `store`'s current shadow file, holding `slot` (the public semaphore
    /// handle the caller already claimed) for the session's lifetime.
    ///
    /// # Errors
    ///
    /// Returns whatever [`ShadowStore::read_current`] or [`ShadowStore::open_for_read`]
    /// returns; the caller is responsible for releasing `slot` if this fails (the
    /// session has not taken ownership of it on the error path here, since it owns it
    /// on the `Ok` path).
    pub fn attach(store: ShadowStore, slot: SemaphoreSet) -> Result<Self> {
        let current = store.read_current()?;
        let file = store.open_for_read(ShadowFileId(current.seq))?;
        Ok(Self {
            store,
            _slot: slot,
            seq: current.seq,
            maxrec: current.maxrec,
            file,
            offset: 0,
            layout: None,
        })
    }

    fn open_file_metadata(&self) -> Result<fs::Metadata> {
        self.file.file.metadata().map_err(|source| PacctError::Runtime {
            details: format!("stat of open shadow file failed: {source}"),
        })
    }

    fn pending_in_open_file(&self) -> Result<u64> {
        let len = self.open_file_metadata()?.len();
        Ok(len.saturating_sub(self.offset) / RECORD_SIZE as u64)
    }

    /// Re-attach onto whatever `current` points at right now, discarding the stale
    /// open file. Used when [`ReaderSession::count_available`] finds the previously
    /// open shadow file has been unlinked beneath us.
    fn reattach_to_current(&mut self) -> Result<()> {
        let current = self.store.read_current()?;
        self.file = self.store.open_for_read(ShadowFileId(current.seq))?;
        self.seq = current.seq;
        self.maxrec = current.maxrec;
        self.offset = 0;
        self.layout = None;
        Ok(())
    }

    /// Number of whole records available to read right now, across the currently open
    /// shadow file and any already-rotated files between it and the daemon's newest.
    ///
    /// Re-reads `current` first: if the daemon has rotated past `self.seq`, the skipped
    /// files are known to be exactly `maxrec` records each (the rotation invariant), so
    /// this avoids statting every intervening file.
    pub fn count_available(&mut self) -> Result<u64> {
        // spec.md §4.4 Counting step 1: if the daemon's GC unlinked the file we have
        // open beneath us (`st_nlink == 0`), close it, re-attach onto whatever
        // `current` names now, and report zero for this interval rather than reading
        // from a file with no directory entry left pointing at it.
        if self.open_file_metadata()?.nlink() == 0 {
            self.reattach_to_current()?;
            return Ok(0);
        }

        let current = self.store.read_current()?;
        if current.seq < self.seq {
            return Err(PacctError::SequenceRegressed {
                reader_seq: self.seq,
                daemon_seq: current.seq,
            });
        }
        if current.seq > self.seq {
            self.maxrec = current.maxrec;
        }
        let mut total = self.pending_in_open_file()?;
        if current.seq > self.seq {
            let closed_files = current.seq - self.seq - 1;
            total += closed_files * self.maxrec;
            let newest_path = self.store.shadow_path(ShadowFileId(current.seq));
            let newest_len = fs::metadata(&newest_path)
                .map_err(|source| PacctError::io(&newest_path, source))?
                .len();
            total += newest_len / RECORD_SIZE as u64;
        }
        Ok(total)
    }

    /// Advance past the current shadow file onto the next sequence number, matching the
    /// reference reader's `switchshadow()`.
    fn rotate(&mut self) -> Result<bool> {
        let current = self.store.read_current()?;
        if current.seq <= self.seq {
            return Ok(false);
        }
        self.seq += 1;
        self.maxrec = current.maxrec;
        self.file = self.store.open_for_read(ShadowFileId(self.seq))?;
        self.offset = 0;
        Ok(true)
    }

    /// Read up to `n` records (capped at [`MAX_RECORDS_PER_READ`]), rotating onto
    /// successive shadow files as the current one is exhausted. Returns fewer than `n`
    /// (including zero) once no more data is available right now; it never blocks.
    ///
    /// # Errors
    ///
    /// [`PacctError::SequenceRegressed`] if `current`'s sequence number ever goes
    /// backwards (a broken-contract condition, not retried).
    pub fn read_next(&mut self, n: u64) -> Result<Vec<TaskRecord>> {
        let n = n.min(MAX_RECORDS_PER_READ);
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
                Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                    if !self.rotate()? {
                        break;
                    }
                }
                Err(err) => {
                    return Err(PacctError::Runtime {
                        details: format!("reading shadow file at seq {}: {err}", self.seq),
                    });
                }
            }
        }
        Ok(out)
    }

    /// Skip `n` records without decoding them, advancing rotation state the same way
    /// [`ReaderSession::read_next`] does.
    pub fn skip(&mut self, mut n: u64) -> Result<()> {
        let mut buf = [0u8; RECORD_SIZE];
        while n > 0 {
            match self.file.read_exact(&mut buf) {
                Ok(()) => {
                    self.offset += RECORD_SIZE as u64;
                    n -= 1;
                }
                Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                    if !self.rotate()? {
                        break;
                    }
                }
                Err(err) => {
                    return Err(PacctError::Runtime {
                        details: format!("skipping shadow file at seq {}: {err}", self.seq),
                    });
                }
            }
        }
        Ok(())
    }

    /// Current position, exposed for `pacctctl status`.
    #[must_use]
    pub const fn position(&self) -> CurrentPointer {
        CurrentPointer {
            seq: self.seq,
            maxrec: self.maxrec,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::RECORD_SIZE;
    use std::io::Write as _;

    fn v2_record(uid: u32) -> [u8; RECORD_SIZE] {
        let mut buf = [0u8; RECORD_SIZE];
        buf[1] = 2; // ac_version low nibble selects V2
        buf[56..60].copy_from_slice(&uid.to_le_bytes());
        buf
    }

    fn test_store() -> (tempfile::TempDir, ShadowStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ShadowStore::new(dir.path(), "pacct_shadow.d");
        store.ensure_shadow_dir().unwrap();
        (dir, store)
    }

    fn claimed_slot() -> SemaphoreSet {
        let key = 0x6eed_0000 + (std::process::id() as i32 & 0xffff);
        let (sem, _) = SemaphoreSet::create_or_attach(key, 0o600).unwrap();
        sem.set_val(100).unwrap();
        sem
    }

    #[test]
    fn read_next_decodes_records_within_one_file() {
        let (_dir, store) = test_store();
        {
            let mut f = store.create(ShadowFileId(0)).unwrap();
            f.write_all(&v2_record(1)).unwrap();
            f.write_all(&v2_record(2)).unwrap();
        }
        store.set_current(0, 10).unwrap();

        let mut session = ReaderSession::attach(store, claimed_slot()).unwrap();
        let records = session.read_next(10).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].uid, 1);
        assert_eq!(records[1].uid, 2);
        assert!(session.read_next(10).unwrap().is_empty());
    }

    #[test]
    fn read_next_rotates_across_shadow_files() {
        let (_dir, store) = test_store();
        {
            let mut f = store.create(ShadowFileId(0)).unwrap();
            f.write_all(&v2_record(1)).unwrap();
        }
        store.set_current(0, 1).unwrap();

        let mut session = ReaderSession::attach(store.clone(), claimed_slot()).unwrap();
        assert_eq!(session.read_next(10).unwrap().len(), 1);
        assert!(session.read_next(10).unwrap().is_empty());

        // Daemon rotates to seq=1 with a new record.
        {
            let mut f = store.create(ShadowFileId(1)).unwrap();
            f.write_all(&v2_record(9)).unwrap();
        }
        store.set_current(1, 1).unwrap();

        let records = session.read_next(10).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].uid, 9);
    }

    #[test]
    fn count_available_accounts_for_fully_closed_intervening_files() {
        let (_dir, store) = test_store();
        for seq in 0..3u64 {
            let mut f = store.create(ShadowFileId(seq)).unwrap();
            f.write_all(&v2_record(seq as u32)).unwrap();
        }
        store.set_current(2, 1).unwrap();

        let mut session = ReaderSession::attach(store, claimed_slot()).unwrap();
        // One unread record in seq=0 (the open file), one fully-closed file at seq=1
        // (maxrec=1), one record in the newest file at seq=2.
        assert_eq!(session.count_available().unwrap(), 3);
    }

    #[test]
    fn count_available_reattaches_when_open_file_is_unlinked() {
        let (_dir, store) = test_store();
        {
            let mut f = store.create(ShadowFileId(0)).unwrap();
            f.write_all(&v2_record(1)).unwrap();
        }
        store.set_current(0, 10).unwrap();

        let mut session = ReaderSession::attach(store.clone(), claimed_slot()).unwrap();

        // Simulate the daemon's GC reclaiming seq=0 out from under the reader (only
        // possible here because the test never took the advisory read-lock's
        // would-be-held-open invariant as a hard guarantee) and publishing seq=1 as
        // the new current file.
        std::fs::remove_file(store.shadow_path(ShadowFileId(0))).unwrap();
        {
            let mut f = store.create(ShadowFileId(1)).unwrap();
            f.write_all(&v2_record(7)).unwrap();
        }
        store.set_current(1, 10).unwrap();

        assert_eq!(session.count_available().unwrap(), 0);
        assert_eq!(session.position().seq, 1);
        // The re-attached session reads from the new current file from offset 0.
        let records = session.read_next(10).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].uid, 7);
    }

    #[test]
    fn skip_advances_without_decoding() {
        let (_dir, store) = test_store();
        {
            let mut f = store.create(ShadowFileId(0)).unwrap();
            f.write_all(&v2_record(1)).unwrap();
            f.write_all(&v2_record(2)).unwrap();
            f.write_all(&v2_record(3)).unwrap();
        }
        store.set_current(0, 10).unwrap();

        let mut session = ReaderSession::attach(store, claimed_slot()).unwrap();
        session.skip(2).unwrap();
        let remaining = session.read_next(10).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].uid, 3);
    }
}
