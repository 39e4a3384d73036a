//! Concrete schema versions 0 through 3 (renamed away from the reference
//! implementation's `2.0`–`2.4` version numbers per spec.md §4.5), each a named
//! sequence of substructures with a fixed byte offset and size within the sample's
//! `sstat`/`tstat` blobs.
//!
//! Task identity fields (`pid`, `comm`) live inside the `gen` substructure at a fixed
//! offset that never moves across any of the four versions, matching the reference
//! implementation's `tgen_to_*` converters, none of which ever touch `pid`/`comm` —
//! only fields after them.

pub mod v0;
pub mod v1;
pub mod v2;
pub mod v3;

/// Byte range of one substructure within a sample's `sstat` or `tstat` blob. A
/// `size == 0` substructure did not exist yet at this schema version (the reference
/// implementation's `{0, NULL, NULL}` table entries for `nfs`/`cfs`/`psi`/`gpu`/`ifb`
/// before their introduction).
#[derive(Debug, Clone, Copy)]
pub struct SubstructLayout {
    pub name: &'static str,
    pub offset: usize,
    pub size: usize,
}

/// One schema version's full layout.
#[derive(Debug, Clone, Copy)]
pub struct SchemaVersion {
    pub index: u16,
    pub sstat_size: usize,
    pub sstat_parts: &'static [SubstructLayout],
    pub tstat_size: usize,
    pub tstat_parts: &'static [SubstructLayout],
}

/// Offset of the `pid` field (`u32`, little-endian) within the `gen` substructure,
/// invariant across every version in this chain.
pub const TASK_PID_OFFSET: usize = 4;
/// Offset and width of the NUL-padded command-name field within `gen`, also
/// invariant across every version.
pub const TASK_COMM_OFFSET: usize = 12;
pub const TASK_COMM_LEN: usize = 16;

/// Build one `gen`-substructure-prefixed task record with `pid` and `comm` set,
/// zero-padded out to `gen_size` bytes — used by tests and by
/// [`crate::migrate::chain::VersionChain`] round-trip fixtures to synthesize a sample
/// at the source schema version.
#[must_use]
pub fn encode_task_gen(pid: u32, comm: &str, gen_size: usize) -> Vec<u8> {
    let mut buf = vec![0u8; gen_size];
    buf[TASK_PID_OFFSET..TASK_PID_OFFSET + 4].copy_from_slice(&pid.to_le_bytes());
    let bytes = comm.as_bytes();
    let n = bytes.len().min(TASK_COMM_LEN);
    buf[TASK_COMM_OFFSET..TASK_COMM_OFFSET + n].copy_from_slice(&bytes[..n]);
    buf
}

/// Inverse of [`encode_task_gen`]: read `pid` and `comm` back out of a `gen`
/// substructure, trimming at the first NUL (or the field width, if none).
#[must_use]
pub fn decode_task_gen(buf: &[u8]) -> (u32, String) {
    let pid = u32::from_le_bytes(
        buf[TASK_PID_OFFSET..TASK_PID_OFFSET + 4]
            .try_into()
            .expect("gen substructure always carries at least TASK_PID_OFFSET+4 bytes"),
    );
    let comm_bytes = &buf[TASK_COMM_OFFSET..TASK_COMM_OFFSET + TASK_COMM_LEN];
    let end = comm_bytes.iter().position(|&b| b == 0).unwrap_or(comm_bytes.len());
    (pid, String::from_utf8_lossy(&comm_bytes[..end]).into_owned())
}

/// Look up a named substructure's layout within a version's `sstat_parts` or
/// `tstat_parts`. `None` if the substructure does not exist at that version.
#[must_use]
pub fn find<'a>(parts: &'a [SubstructLayout], name: &str) -> Option<&'a SubstructLayout> {
    parts.iter().find(|p| p.name == name && p.size > 0)
}
