//! Kernel process-accounting record codec.
//!
//! Decodes legacy (v2) and extended (v3) BSD-style `struct acct`/`struct acct_v3`
//! records, both exactly 64 bytes on a 64-bit Linux host. Every field is read with
//! explicit little-endian byte accessors from a `&[u8; RECORD_SIZE]` rather than an
//! overlaid `repr(C)` struct: the crate forbids `unsafe`, so a raw transmute of
//! untrusted kernel bytes is not an option, and this is the non-transmute discipline
//! spec callers rely on.

use crate::core::errors::{PacctError, Result};

/// Size in bytes of every accounting record, regardless of layout.
pub const RECORD_SIZE: usize = 64;

/// Which on-disk accounting record layout a byte buffer uses.
///
/// Distinguished by the low nibble of the `ac_version` byte at offset 1
/// (`acctsize()` in the reference implementation).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcctLayout {
    /// Legacy layout (`struct acct`): no pid/tgid/ppid fields.
    V2,
    /// Extended layout (`struct acct_v3`): carries pid/tgid/ppid.
    V3,
}

impl AcctLayout {
    /// Detect the layout from the version nibble of a raw record buffer.
    ///
    /// `buf` only needs to be at least 2 bytes long (`ac_version` is the second byte
    /// in both layouts); callers typically pass a full `RECORD_SIZE` buffer anyway.
    pub fn detect(buf: &[u8]) -> Result<Self> {
        let version = *buf.get(1).ok_or(PacctError::ShortRecord {
            got: buf.len(),
            need: 2,
        })?;
        match version & 0x0f {
            2 => Ok(Self::V2),
            3 => Ok(Self::V3),
            other => Err(PacctError::UnknownLayout { nibble: other }),
        }
    }

    /// Size in bytes of a record in this layout. Both layouts are 64 bytes; the
    /// distinct return kept here (rather than a bare constant) mirrors
    /// `acctsize()`'s per-layout dispatch in the reference implementation, in case a
    /// future layout is not 64 bytes.
    #[must_use]
    pub const fn record_size(self) -> usize {
        RECORD_SIZE
    }
}

/// A decoded accounting record, layout-independent.
///
/// Fields only present in [`AcctLayout::V3`] (`pid`, `tgid`, `ppid`) are zero when
/// decoded from a [`AcctLayout::V2`] record, matching `acctphotoproc()`'s v2 branch.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRecord {
    /// Raw `ac_flag` bitmask (fork/core-dump/swap/exit flags).
    pub flag: u8,
    /// Process id. Zero for [`AcctLayout::V2`].
    pub pid: u32,
    /// Thread-group id, equal to `pid` at exit time. Zero for [`AcctLayout::V2`].
    pub tgid: u32,
    /// Parent process id. Zero for [`AcctLayout::V2`].
    pub ppid: u32,
    /// Real user id.
    pub uid: u32,
    /// Real group id.
    pub gid: u32,
    /// Controlling terminal device number.
    pub tty: u16,
    /// Process creation time, seconds since the epoch.
    pub btime: u32,
    /// Exit code as returned to `wait(2)`.
    pub exitcode: u32,
    /// User-mode CPU ticks, expanded from the compressed `comp_t` encoding.
    pub utime_ticks: u64,
    /// Kernel-mode CPU ticks, expanded.
    pub stime_ticks: u64,
    /// Wall-clock elapsed ticks, expanded. Zero-filled for V3 (carried as a float
    /// there; callers needing sub-tick precision should read `etime_secs` instead).
    pub etime_ticks: u64,
    /// Elapsed wall-clock seconds, populated only for [`AcctLayout::V3`].
    pub etime_secs: f32,
    /// Average memory usage, expanded.
    pub mem: u64,
    /// Characters transferred, expanded.
    pub io: u64,
    /// Blocks read or written, expanded.
    pub rw: u64,
    /// Minor page faults, expanded.
    pub minflt: u64,
    /// Major page faults, expanded.
    pub majflt: u64,
    /// Swap count, expanded.
    pub swaps: u64,
    /// Command name, truncated to the accounting record's comm field width.
    pub comm: String,
}

/// Expand a compressed 16-bit `comp_t` counter (3-bit base-8 exponent, 13-bit
/// mantissa) into its full value.
///
/// Mirrors `acctexp()` in the reference implementation exactly: `exp = (ct >> 13) &
/// 0x7`, `val = ct & 0x1fff`, then `val <<= 3` repeated `exp` times.
#[must_use]
pub fn expand_comp(ct: u16) -> u64 {
    let mut exp = (ct >> 13) & 0x7;
    let mut val = u64::from(ct & 0x1fff);
    while exp > 0 {
        val <<= 3;
        exp -= 1;
    }
    val
}

fn u16le(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buf[offset], buf[offset + 1]])
}

fn u32le(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ])
}

fn comm_from(buf: &[u8], offset: usize, len: usize) -> String {
    let raw = &buf[offset..offset + len];
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

/// Decode a raw `RECORD_SIZE`-byte buffer into a [`TaskRecord`] using the given layout.
///
/// # Errors
///
/// Returns [`PacctError::ShortRecord`] if `buf` is smaller than [`RECORD_SIZE`]. This
/// is the only error path: once layout and length are known, decoding cannot fail.
pub fn decode(buf: &[u8], layout: AcctLayout) -> Result<TaskRecord> {
    if buf.len() < layout.record_size() {
        return Err(PacctError::ShortRecord {
            got: buf.len(),
            need: layout.record_size(),
        });
    }

    match layout {
        AcctLayout::V2 => decode_v2(buf),
        AcctLayout::V3 => decode_v3(buf),
    }
}

/// Field offsets for `struct acct` (legacy, 64 bytes, no internal padding).
mod offsets_v2 {
    pub const AC_FLAG: usize = 0;
    pub const AC_VERSION: usize = 1;
    pub const AC_UID16: usize = 2;
    pub const AC_GID16: usize = 4;
    pub const AC_TTY: usize = 6;
    pub const AC_BTIME: usize = 8;
    pub const AC_UTIME: usize = 12;
    pub const AC_STIME: usize = 14;
    pub const AC_ETIME: usize = 16;
    pub const AC_MEM: usize = 18;
    pub const AC_IO: usize = 20;
    pub const AC_RW: usize = 22;
    pub const AC_MINFLT: usize = 24;
    pub const AC_MAJFLT: usize = 26;
    pub const AC_SWAPS: usize = 28;
    // AC_AHZ at 30, unused by TaskRecord.
    pub const AC_EXITCODE: usize = 32;
    pub const AC_COMM: usize = 36;
    pub const AC_COMM_LEN: usize = 17;
    // ac_etime_hi/lo at 53/54, superseded by the mid-record ac_etime comp_t above.
    pub const AC_UID: usize = 56;
    pub const AC_GID: usize = 60;
}

/// Field offsets for `struct acct_v3` (extended, 64 bytes, no internal padding).
mod offsets_v3 {
    pub const AC_FLAG: usize = 0;
    pub const AC_VERSION: usize = 1;
    pub const AC_TTY: usize = 2;
    pub const AC_EXITCODE: usize = 4;
    pub const AC_UID: usize = 8;
    pub const AC_GID: usize = 12;
    pub const AC_PID: usize = 16;
    pub const AC_PPID: usize = 20;
    pub const AC_BTIME: usize = 24;
    pub const AC_ETIME: usize = 28;
    pub const AC_UTIME: usize = 32;
    pub const AC_STIME: usize = 34;
    pub const AC_MEM: usize = 36;
    pub const AC_IO: usize = 38;
    pub const AC_RW: usize = 40;
    pub const AC_MINFLT: usize = 42;
    pub const AC_MAJFLT: usize = 44;
    pub const AC_SWAPS: usize = 46;
    pub const AC_COMM: usize = 48;
    pub const AC_COMM_LEN: usize = 16;
}

fn decode_v2(buf: &[u8]) -> Result<TaskRecord> {
    use offsets_v2 as o;
    Ok(TaskRecord {
        flag: buf[o::AC_FLAG],
        pid: 0,
        tgid: 0,
        ppid: 0,
        uid: u32le(buf, o::AC_UID),
        gid: u32le(buf, o::AC_GID),
        tty: u16le(buf, o::AC_TTY),
        btime: u32le(buf, o::AC_BTIME),
        exitcode: u32le(buf, o::AC_EXITCODE),
        utime_ticks: expand_comp(u16le(buf, o::AC_UTIME)),
        stime_ticks: expand_comp(u16le(buf, o::AC_STIME)),
        etime_ticks: expand_comp(u16le(buf, o::AC_ETIME)),
        etime_secs: 0.0,
        mem: expand_comp(u16le(buf, o::AC_MEM)),
        io: expand_comp(u16le(buf, o::AC_IO)),
        rw: expand_comp(u16le(buf, o::AC_RW)),
        minflt: expand_comp(u16le(buf, o::AC_MINFLT)),
        majflt: expand_comp(u16le(buf, o::AC_MAJFLT)),
        swaps: expand_comp(u16le(buf, o::AC_SWAPS)),
        comm: comm_from(buf, o::AC_COMM, o::AC_COMM_LEN),
    })
}

fn decode_v3(buf: &[u8]) -> Result<TaskRecord> {
    use offsets_v3 as o;
    let etime_bits = u32le(buf, o::AC_ETIME);
    Ok(TaskRecord {
        flag: buf[o::AC_FLAG],
        pid: u32le(buf, o::AC_PID),
        tgid: u32le(buf, o::AC_PID),
        ppid: u32le(buf, o::AC_PPID),
        uid: u32le(buf, o::AC_UID),
        gid: u32le(buf, o::AC_GID),
        tty: u16le(buf, o::AC_TTY),
        btime: u32le(buf, o::AC_BTIME),
        exitcode: u32le(buf, o::AC_EXITCODE),
        utime_ticks: expand_comp(u16le(buf, o::AC_UTIME)),
        stime_ticks: expand_comp(u16le(buf, o::AC_STIME)),
        etime_ticks: 0,
        etime_secs: f32::from_bits(etime_bits),
        mem: expand_comp(u16le(buf, o::AC_MEM)),
        io: expand_comp(u16le(buf, o::AC_IO)),
        rw: expand_comp(u16le(buf, o::AC_RW)),
        minflt: expand_comp(u16le(buf, o::AC_MINFLT)),
        majflt: expand_comp(u16le(buf, o::AC_MAJFLT)),
        swaps: expand_comp(u16le(buf, o::AC_SWAPS)),
        comm: comm_from(buf, o::AC_COMM, o::AC_COMM_LEN),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v2_buf(version: u8) -> [u8; RECORD_SIZE] {
        let mut buf = [0u8; RECORD_SIZE];
        buf[offsets_v2::AC_VERSION] = version;
        buf
    }

    #[test]
    fn detect_v2_from_version_nibble() {
        assert_eq!(AcctLayout::detect(&v2_buf(2)).unwrap(), AcctLayout::V2);
        // High nibble set (e.g. ACCT_BYTESWAPPED flags live there on some kernels)
        // must not affect detection.
        assert_eq!(AcctLayout::detect(&v2_buf(0x12)).unwrap(), AcctLayout::V2);
    }

    #[test]
    fn detect_v3_from_version_nibble() {
        assert_eq!(AcctLayout::detect(&v2_buf(3)).unwrap(), AcctLayout::V3);
    }

    #[test]
    fn detect_unknown_nibble_errors() {
        let err = AcctLayout::detect(&v2_buf(9)).unwrap_err();
        assert!(matches!(err, PacctError::UnknownLayout { nibble: 9 }));
    }

    #[test]
    fn detect_short_buffer_errors() {
        let err = AcctLayout::detect(&[0u8]).unwrap_err();
        assert!(matches!(err, PacctError::ShortRecord { .. }));
    }

    #[test]
    fn record_size_is_64_for_both_layouts() {
        assert_eq!(AcctLayout::V2.record_size(), 64);
        assert_eq!(AcctLayout::V3.record_size(), 64);
    }

    #[test]
    fn decode_short_buffer_errors() {
        let err = decode(&[0u8; 10], AcctLayout::V2).unwrap_err();
        assert!(matches!(err, PacctError::ShortRecord { got: 10, need: 64 }));
    }

    #[test]
    fn expand_comp_zero_exponent_is_identity() {
        assert_eq!(expand_comp(0), 0);
        assert_eq!(expand_comp(0x1fff), 0x1fff);
    }

    #[test]
    fn expand_comp_matches_reference_algorithm() {
        // exp=1, val=1 -> 1 << 3 = 8
        let ct = (1u16 << 13) | 1;
        assert_eq!(expand_comp(ct), 8);
        // exp=7 (max), val=1 -> 1 << 21
        let ct = (7u16 << 13) | 1;
        assert_eq!(expand_comp(ct), 1u64 << 21);
    }

    #[test]
    fn decode_v2_extracts_comm_and_times() {
        let mut buf = v2_buf(2);
        buf[offsets_v2::AC_UID..offsets_v2::AC_UID + 4].copy_from_slice(&42u32.to_le_bytes());
        buf[offsets_v2::AC_COMM..offsets_v2::AC_COMM + 4].copy_from_slice(b"cat\0");
        let rec = decode(&buf, AcctLayout::V2).unwrap();
        assert_eq!(rec.uid, 42);
        assert_eq!(rec.comm, "cat");
        assert_eq!(rec.pid, 0);
        assert_eq!(rec.tgid, 0);
    }

    #[test]
    fn decode_v3_extracts_pid_tgid_ppid() {
        let mut buf = v2_buf(3);
        buf[offsets_v3::AC_PID..offsets_v3::AC_PID + 4].copy_from_slice(&1234u32.to_le_bytes());
        buf[offsets_v3::AC_PPID..offsets_v3::AC_PPID + 4].copy_from_slice(&1u32.to_le_bytes());
        buf[offsets_v3::AC_COMM..offsets_v3::AC_COMM + 4].copy_from_slice(b"sh\0\0");
        let rec = decode(&buf, AcctLayout::V3).unwrap();
        assert_eq!(rec.pid, 1234);
        assert_eq!(rec.tgid, 1234);
        assert_eq!(rec.ppid, 1);
        assert_eq!(rec.comm, "sh");
    }

    #[test]
    fn comm_without_nul_terminator_uses_full_width() {
        let mut buf = v2_buf(2);
        let full = b"0123456789abcdef!"; // exactly 17 bytes, no NUL
        buf[offsets_v2::AC_COMM..offsets_v2::AC_COMM + 17].copy_from_slice(full);
        let rec = decode(&buf, AcctLayout::V2).unwrap();
        assert_eq!(rec.comm, "0123456789abcdef!");
    }
}
