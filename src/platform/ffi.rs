//! The crate's sole `unsafe` surface: `acct(2)` and `nice(2)`, neither of which `nix`
//! wraps safely. Every other platform interaction (locks, statvfs, semaphores, netlink)
//! goes through a safe dependency API.

#![allow(unsafe_code)]

use std::ffi::CString;
use std::path::Path;

use crate::core::errors::{PacctError, Result};

/// Enable kernel process accounting, writing new records to `path`.
///
/// Mirrors every `acct(ACCTDIR "/" ACCTFILE)` call in the reference implementation:
/// the writer daemon's `EnableKernelAcct` state, and the reader's private-fallback
/// accounting path.
pub fn enable(path: &Path) -> Result<()> {
    let c_path = CString::new(path.as_os_str().as_encoded_bytes()).map_err(|_| {
        PacctError::InvalidConfig {
            details: format!("accounting path {} contains an embedded NUL", path.display()),
        }
    })?;
    // SAFETY: `c_path` is a valid, NUL-terminated byte string for the duration of the
    // call; `acct(2)` reads it once and does not retain the pointer afterward.
    let rc = unsafe { libc::acct(c_path.as_ptr()) };
    if rc != 0 {
        return Err(PacctError::io(path, std::io::Error::last_os_error()));
    }
    Ok(())
}

/// Disable kernel process accounting (`acct(NULL)`), matching every `(void) acct(0)`
/// call in the reference implementation's shutdown and restart paths.
pub fn disable() -> Result<()> {
    // SAFETY: a null pointer is the documented "disable accounting" argument to
    // `acct(2)`; no memory is read through it.
    let rc = unsafe { libc::acct(std::ptr::null()) };
    if rc != 0 {
        return Err(PacctError::Runtime {
            details: format!("acct(NULL) failed: {}", std::io::Error::last_os_error()),
        });
    }
    Ok(())
}

/// Raise this process's scheduling priority by adding `increment` to its nice value
/// (negative values raise priority). Mirrors `atopacctd.c`'s `nice(-39)` call in its
/// `Daemonize` state; failure is non-fatal there (an unprivileged daemon simply keeps
/// its inherited priority), so this returns the resulting errno rather than an error.
#[must_use]
pub fn renice(increment: i32) -> std::result::Result<i32, i32> {
    // SAFETY: `nice(2)` takes a plain integer and returns a plain integer; no pointers
    // cross the FFI boundary. Per POSIX, a return of -1 is ambiguous with a legitimate
    // new priority of -1, so errno is cleared first and consulted on a -1 return.
    unsafe {
        *libc::__errno_location() = 0;
        let result = libc::nice(increment);
        if result == -1 && *libc::__errno_location() != 0 {
            Err(*libc::__errno_location())
        } else {
            Ok(result)
        }
    }
}
