//! The writer daemon's live state: source file position, the shadow file currently
//! being appended to, and the reader-presence counter consulted every pass.
//!
//! Grounded in `atopacctd.c`'s global state (`curshadow`, `oldshadow`,
//! `cursize`/`maxshadowsize`, `acctrecsz`) and `pass2shadow()`/`processacct()`, folded
//! into one struct rather than file-scope globals.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use crate::codec::AcctLayout;
use crate::core::config::Config;
use crate::core::errors::{PacctError, Result};
use crate::platform::{self, semaphore::SemaphoreSet};
use crate::store::{ShadowFileId, ShadowStore};

/// The writer's running state across the lifetime of one `Main` loop.
pub struct WriterSession {
    config: Config,
    store: ShadowStore,
    source_path: PathBuf,
    source_file: File,
    /// Reader-presence counter: `semget`'d once at `AttachPrivateSem` time by
    /// [`super::main_loop::run`]'s `SemaphoreSet::create_or_attach` call and handed in
    /// here, since the public set (unlike the private mutex) is shared with every
    /// reader, not exclusive to this session.
    pub_sem: SemaphoreSet,
    current_seq: u64,
    old_seq: u64,
    current_file: File,
    shadow_bytes: u64,
    source_bytes_written: u64,
    /// Record size once derived from the first successfully read batch
    /// (`R` in spec.md §4.1); `None` until then.
    record_size: Option<u64>,
    max_shadow_bytes: Option<u64>,
    had_readers: bool,
}

impl WriterSession {
    /// Open the source pacct file (`OpenSourcePacct` state), creating it if absent.
    /// Mirrors `creataccsock()`/`acctdgram_file()`'s `open(ACCTDIR "/" ACCTFILE,
    /// O_RDWR | O_CREAT, 0600)`.
    pub fn open_source(config: &Config) -> Result<(PathBuf, File)> {
        let path = config.paths.root_dir.join(&config.shadow.source_file_name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .mode(0o600)
            .open(&path)
            .map_err(|source| PacctError::io(&path, source))?;
        Ok((path, file))
    }

    /// Assemble a session once the shadow directory exists and sequence 0 has been
    /// created (`CreateShadowDir` state, handled by the caller before this is built).
    pub fn new(config: Config, store: ShadowStore, pub_sem: SemaphoreSet, source_path: PathBuf, source_file: File) -> Result<Self> {
        let current_file = open_for_append(&store, ShadowFileId(0))?;
        Ok(Self {
            config,
            store,
            source_path,
            source_file,
            pub_sem,
            current_seq: 0,
            old_seq: 0,
            current_file,
            shadow_bytes: 0,
            source_bytes_written: 0,
            record_size: None,
            max_shadow_bytes: None,
            had_readers: false,
        })
    }

    #[must_use]
    pub const fn current_seq(&self) -> u64 {
        self.current_seq
    }

    #[must_use]
    pub const fn shadow_bytes(&self) -> u64 {
        self.shadow_bytes
    }

    /// Read up to `read_batch_size` bytes from the source pacct file, retrying a
    /// zero-length read up to `max_empty_read_retries` times (the kernel may not have
    /// flushed the record yet). Returns an empty vec on persistent EOF.
    pub fn read_source_batch(&mut self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; self.config.daemon.read_batch_size];
        for attempt in 0..=self.config.daemon.max_empty_read_retries {
            let n = self
                .source_file
                .read(&mut buf)
                .map_err(|source| PacctError::io(&self.source_path, source))?;
            if n > 0 {
                buf.truncate(n);
                if self.record_size.is_none() {
                    let layout = AcctLayout::detect(&buf)?;
                    let r = layout.record_size() as u64;
                    self.record_size = Some(r);
                    self.max_shadow_bytes = Some(self.config.shadow.max_records_per_file * r);
                }
                self.track_source_bytes(n as u64)?;
                return Ok(buf);
            }
            if attempt < self.config.daemon.max_empty_read_retries {
                thread::sleep(Duration::from_millis(self.config.daemon.empty_read_retry_delay_ms));
            }
        }
        Ok(Vec::new())
    }

    /// Truncate the source file back to empty once it has accumulated
    /// `max_source_size_bytes`, matching `pass2shadow()`'s `ftruncate` + `lseek(0)`
    /// cycle — the kernel keeps appending from offset 0 afterward.
    fn track_source_bytes(&mut self, n: u64) -> Result<()> {
        self.source_bytes_written += n;
        if self.source_bytes_written >= self.config.shadow.max_source_size_bytes {
            self.source_file
                .set_len(0)
                .map_err(|source| PacctError::io(&self.source_path, source))?;
            self.source_file
                .seek(SeekFrom::Start(0))
                .map_err(|source| PacctError::io(&self.source_path, source))?;
            self.source_bytes_written = 0;
        }
        Ok(())
    }

    /// Whether at least one reader currently holds a slot on the public semaphore
    /// (`reader_slots - GETVAL() > 0`).
    pub fn has_readers(&self) -> Result<bool> {
        let claimed = i32::from(self.config.ipc.reader_slots) - self.pub_sem.get_val()?;
        Ok(claimed > 0)
    }

    /// Free-space check ahead of a write (`ResourceExhaustion` policy): `Ok(true)`
    /// means there is enough headroom to proceed.
    pub fn has_write_headroom(&self) -> Result<bool> {
        let pct = platform::free_space_pct(&self.store.shadow_dir())?;
        Ok(pct >= self.config.shadow.min_free_space_pct)
    }

    /// Discard every shadow file and restart numbering at sequence 0, matching step 5
    /// of the main loop when the reader-presence counter transitions to empty:
    /// sweep from a literal `0` (not `self.old_seq`) regardless of how far GC had
    /// already advanced, since a reader detaching may have left files behind that
    /// GC's normal incremental sweep has not yet reached.
    pub fn reset_for_no_readers(&mut self) -> Result<()> {
        let mut zero = 0u64;
        let _ = self.store.gc(&mut zero, self.current_seq + 1)?;
        self.current_seq = 0;
        self.old_seq = 0;
        self.store.create(ShadowFileId(0))?;
        self.store
            .set_current(0, self.config.shadow.max_records_per_file)?;
        self.current_file = open_for_append(&self.store, ShadowFileId(0))?;
        self.shadow_bytes = 0;
        self.had_readers = false;
        Ok(())
    }

    /// `true` exactly once, the iteration after readers were last observed present but
    /// are now absent — the trigger condition for [`WriterSession::reset_for_no_readers`].
    #[must_use]
    pub const fn previously_had_readers(&self) -> bool {
        self.had_readers
    }

    pub fn mark_had_readers(&mut self, present: bool) {
        self.had_readers = present;
    }

    fn rotate_shadow_file(&mut self) -> Result<()> {
        self.current_seq += 1;
        self.store.create(ShadowFileId(self.current_seq))?;
        self.store
            .set_current(self.current_seq, self.config.shadow.max_records_per_file)?;
        self.current_file = open_for_append(&self.store, ShadowFileId(self.current_seq))?;
        Ok(())
    }

    /// Append `batch` to the current shadow file, rotating to `seq+1` mid-batch if it
    /// would overflow `max_shadow_bytes`. Mirrors `pass2shadow()`'s split-write.
    ///
    /// # Errors
    ///
    /// [`PacctError::Runtime`] if called before any batch has established a record
    /// size (`max_shadow_bytes` is only known after the first successful read).
    pub fn append_batch(&mut self, batch: &[u8]) -> Result<()> {
        let mut remaining = batch;
        while !remaining.is_empty() {
            let max_shadow_bytes = self.max_shadow_bytes.ok_or_else(|| PacctError::Runtime {
                details: "append_batch called before record size was established".to_string(),
            })?;
            let fit = max_shadow_bytes.saturating_sub(self.shadow_bytes) as usize;
            if remaining.len() <= fit {
                self.write_current(remaining)?;
                self.shadow_bytes += remaining.len() as u64;
                return Ok(());
            }
            let (head, tail) = remaining.split_at(fit);
            self.write_current(head)?;
            self.rotate_shadow_file()?;
            self.shadow_bytes = 0;
            remaining = tail;
        }
        Ok(())
    }

    fn write_current(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        self.current_file
            .write_all(bytes)
            .map_err(|source| PacctError::io(self.store.shadow_path(ShadowFileId(self.current_seq)), source))
    }

    /// Sweep fully-consumed shadow files, advancing `old_seq` past each one reclaimed.
    /// Returns the count removed.
    pub fn gc_tick(&mut self) -> Result<u64> {
        let mut old_seq = self.old_seq;
        let removed = self.store.gc(&mut old_seq, self.current_seq)?;
        self.old_seq = old_seq;
        Ok(removed)
    }

    #[must_use]
    pub const fn record_size(&self) -> Option<u64> {
        self.record_size
    }
}

fn open_for_append(store: &ShadowStore, id: ShadowFileId) -> Result<File> {
    let path = store.shadow_path(id);
    OpenOptions::new()
        .append(true)
        .open(&path)
        .map_err(|source| PacctError::io(&path, source))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::RECORD_SIZE;

    fn v2_record(uid: u32) -> [u8; RECORD_SIZE] {
        let mut buf = [0u8; RECORD_SIZE];
        buf[1] = 2;
        buf[56..60].copy_from_slice(&uid.to_le_bytes());
        buf
    }

    fn test_session(max_records_per_file: u64) -> (tempfile::TempDir, WriterSession) {
        let dir = tempfile::tempdir().unwrap();
        let store = ShadowStore::new(dir.path(), "pacct_shadow.d");
        store.ensure_shadow_dir().unwrap();
        store.create(ShadowFileId(0)).unwrap();
        store.set_current(0, max_records_per_file).unwrap();

        let mut config = Config::default();
        config.shadow.max_records_per_file = max_records_per_file;

        let key = 0x7eed_0000 + (std::process::id() as i32 & 0xffff);
        let (pub_sem, _) = SemaphoreSet::create_or_attach(key, 0o600).unwrap();
        pub_sem.set_val(i32::from(config.ipc.reader_slots)).unwrap();

        let source_path = dir.path().join("pacct_source");
        let source_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&source_path)
            .unwrap();

        let mut session = WriterSession::new(config, store, pub_sem, source_path, source_file).unwrap();
        // Establish record_size/max_shadow_bytes the way the first real read would.
        session.record_size = Some(RECORD_SIZE as u64);
        session.max_shadow_bytes = Some(max_records_per_file * RECORD_SIZE as u64);
        (dir, session)
    }

    #[test]
    fn has_readers_reflects_semaphore_claims() {
        let (_dir, session) = test_session(10_000);
        assert!(!session.has_readers().unwrap());
        session.pub_sem.op(-1, true, false).unwrap();
        assert!(session.has_readers().unwrap());
    }

    #[test]
    fn append_batch_within_capacity_stays_on_one_file() {
        let (dir, mut session) = test_session(2);
        let batch: Vec<u8> = [v2_record(1), v2_record(2)].concat();
        session.append_batch(&batch).unwrap();
        assert_eq!(session.current_seq(), 0);
        assert_eq!(session.shadow_bytes(), RECORD_SIZE as u64 * 2);
        let on_disk = std::fs::read(dir.path().join("pacct_shadow.d/0000000000.paf")).unwrap();
        assert_eq!(on_disk.len(), RECORD_SIZE * 2);
    }

    #[test]
    fn append_batch_overflow_rotates_mid_batch() {
        let (dir, mut session) = test_session(1);
        let batch: Vec<u8> = [v2_record(1), v2_record(2)].concat();
        session.append_batch(&batch).unwrap();
        assert_eq!(session.current_seq(), 1);
        assert_eq!(session.shadow_bytes(), RECORD_SIZE as u64);
        let first = std::fs::read(dir.path().join("pacct_shadow.d/0000000000.paf")).unwrap();
        assert_eq!(first.len(), RECORD_SIZE);
        let second = std::fs::read(dir.path().join("pacct_shadow.d/0000000001.paf")).unwrap();
        assert_eq!(second.len(), RECORD_SIZE);
    }

    #[test]
    fn reset_for_no_readers_deletes_prior_files_and_restarts_at_zero() {
        let (dir, mut session) = test_session(1);
        let batch: Vec<u8> = [v2_record(1), v2_record(2), v2_record(3)].concat();
        session.append_batch(&batch).unwrap();
        assert_eq!(session.current_seq(), 2);

        session.reset_for_no_readers().unwrap();
        assert_eq!(session.current_seq(), 0);
        assert_eq!(session.shadow_bytes(), 0);
        assert!(!dir.path().join("pacct_shadow.d/0000000001.paf").exists());
        assert!(!dir.path().join("pacct_shadow.d/0000000002.paf").exists());
        assert!(dir.path().join("pacct_shadow.d/0000000000.paf").exists());
        let current = session.store.read_current().unwrap();
        assert_eq!(current.seq, 0);
    }

    #[test]
    fn gc_tick_reclaims_unlocked_files() {
        let (_dir, mut session) = test_session(1);
        let batch: Vec<u8> = [v2_record(1), v2_record(2), v2_record(3)].concat();
        session.append_batch(&batch).unwrap();
        let removed = session.gc_tick().unwrap();
        assert_eq!(removed, 2);
    }
}
