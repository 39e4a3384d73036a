//! SysV semaphore set primitives (`semget`/`semop`/`semctl`), the second raw-syscall
//! surface the crate carries, alongside [`super::ffi`]: no dependency in the stack
//! wraps these safely (`sysv-ipc` was evaluated and dropped — see `DESIGN.md` — in
//! favor of calling `libc` directly, since the exact `SEM_UNDO`/`GETVAL` semantics the
//! daemon-reader handshake needs are a handful of well-known syscalls, not a large
//! surface worth an external dependency).
//!
//! Every semaphore in this crate is a single-member set (`nsems == 1`); the `semnum`
//! parameter threading through these functions is always `0`.

#![allow(unsafe_code)]

use crate::core::errors::{PacctError, Result};

/// A handle to one SysV semaphore set, identified by its `key`.
#[derive(Debug)]
pub struct SemaphoreSet {
    id: libc::c_int,
    key: i32,
}

/// Whether [`SemaphoreSet::create_or_attach`] created a fresh set or attached to an
/// existing one — callers use this to decide whether to `SETVAL` the initial count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    Created,
    Attached,
}

impl SemaphoreSet {
    /// `semget(key, 1, IPC_CREAT | IPC_EXCL | mode)`. Fails with
    /// [`PacctError::DaemonAlreadyRunning`]-flavored detail if the key already exists —
    /// callers needing the specific [`PacctError::DaemonAlreadyRunning`] variant check
    /// `std::io::Error::last_os_error().raw_os_error() == Some(libc::EEXIST)` themselves,
    /// since this function is shared by both the daemon's private mutex and any other
    /// exclusive-create caller.
    pub fn create_exclusive(key: i32, mode: i32) -> Result<Self> {
        // SAFETY: `semget` takes plain integers and returns either a valid semaphore
        // set id or -1; no pointers cross the FFI boundary.
        let id = unsafe { libc::semget(key, 1, libc::IPC_CREAT | libc::IPC_EXCL | mode) };
        if id < 0 {
            return Err(PacctError::Semaphore {
                operation: "semget(IPC_CREAT|IPC_EXCL)",
                details: std::io::Error::last_os_error().to_string(),
            });
        }
        Ok(Self { id, key })
    }

    /// Attach to an existing set (`semget(key, 1, 0)`, no creation flags). Returns
    /// `Ok(None)` rather than an error when the key does not exist — the common case of
    /// "no daemon is running", which callers treat as a fallback signal, not a failure.
    pub fn attach(key: i32) -> Result<Option<Self>> {
        // SAFETY: as above.
        let id = unsafe { libc::semget(key, 1, 0) };
        if id < 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::ENOENT) {
                return Ok(None);
            }
            return Err(PacctError::Semaphore {
                operation: "semget(attach)",
                details: err.to_string(),
            });
        }
        Ok(Some(Self { id, key }))
    }

    /// Create the set if absent, or attach if another process created it first
    /// (`create_exclusive`, retrying as `attach` on `EEXIST`). Used for the two
    /// semaphore pairs (public reader-count, private fallback-accounting) that any
    /// process may race to create first.
    pub fn create_or_attach(key: i32, mode: i32) -> Result<(Self, Provenance)> {
        match Self::create_exclusive(key, mode) {
            Ok(set) => Ok((set, Provenance::Created)),
            Err(PacctError::Semaphore { details, .. })
                if details.contains("File exists") || details.contains("EEXIST") =>
            {
                let set = Self::attach(key)?.ok_or_else(|| PacctError::Semaphore {
                    operation: "semget(race)",
                    details: "set disappeared between EEXIST and attach".to_string(),
                })?;
                Ok((set, Provenance::Attached))
            }
            Err(other) => Err(other),
        }
    }

    /// `semctl(id, 0, SETVAL, value)`.
    pub fn set_val(&self, value: i32) -> Result<()> {
        // SAFETY: `SETVAL`'s variadic argument is a plain `int`, passed by value; no
        // pointer is read or retained by the kernel.
        let rc = unsafe { libc::semctl(self.id, 0, libc::SETVAL, value) };
        if rc < 0 {
            return Err(PacctError::Semaphore {
                operation: "semctl(SETVAL)",
                details: std::io::Error::last_os_error().to_string(),
            });
        }
        Ok(())
    }

    /// `semctl(id, 0, GETVAL)`.
    pub fn get_val(&self) -> Result<i32> {
        // SAFETY: `GETVAL` takes no variadic argument.
        let rc = unsafe { libc::semctl(self.id, 0, libc::GETVAL) };
        if rc < 0 {
            return Err(PacctError::Semaphore {
                operation: "semctl(GETVAL)",
                details: std::io::Error::last_os_error().to_string(),
            });
        }
        Ok(rc)
    }

    /// `semop` with a single operation on member 0. `undo` requests `SEM_UNDO` so the
    /// kernel reverses the delta automatically if this process dies before releasing
    /// it (the crash-self-healing property spec.md §3 Invariant I1 relies on). `nowait`
    /// requests `IPC_NOWAIT`; a would-block condition is reported as
    /// `Ok(false)` rather than an error, since refusal is an expected outcome (all
    /// reader slots claimed, or the private-fallback mutex already held).
    pub fn op(&self, delta: i16, undo: bool, nowait: bool) -> Result<bool> {
        let mut flags = 0;
        if undo {
            flags |= libc::SEM_UNDO;
        }
        if nowait {
            flags |= libc::IPC_NOWAIT;
        }
        let mut sop = libc::sembuf {
            sem_num: 0,
            sem_op: delta,
            sem_flg: flags,
        };
        // SAFETY: `sop` is a valid, live `sembuf` for the duration of the call; `semop`
        // does not retain the pointer afterward.
        let rc = unsafe { libc::semop(self.id, std::ptr::addr_of_mut!(sop), 1) };
        if rc < 0 {
            let err = std::io::Error::last_os_error();
            if nowait && matches!(err.raw_os_error(), Some(libc::EAGAIN)) {
                return Ok(false);
            }
            return Err(PacctError::Semaphore {
                operation: "semop",
                details: err.to_string(),
            });
        }
        Ok(true)
    }

    /// The well-known key this handle was opened with.
    #[must_use]
    pub const fn key(&self) -> i32 {
        self.key
    }

    /// `semctl(id, 0, IPC_RMID)` — destroy the set outright. Never called during
    /// normal daemon/reader operation (the set outlives any single process); only used
    /// by tests to avoid leaking kernel semaphore sets across runs.
    #[cfg(test)]
    fn remove(&self) {
        // SAFETY: `IPC_RMID` takes no variadic argument.
        unsafe {
            libc::semctl(self.id, 0, libc::IPC_RMID);
        }
    }
}
