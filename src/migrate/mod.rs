//! Schema migration engine: upgrades a compressed raw sample log from any supported
//! historical schema version to any newer version by chaining per-substructure
//! converters one version step at a time.
//!
//! Grounded in `atopconvert.c` end-to-end: [`RawHeader`]/[`SampleHeader`] mirror
//! `struct rawheader`/`struct rawrecord`; [`VersionChain::migrate`] mirrors
//! `convert_samples()`'s read/decompress/step-convert/compress/write loop;
//! [`converter::SubstructConverter`] mirrors the `structconv` function-pointer table
//! (`convs[]`), narrowed to tagged variants per DESIGN.md rather than raw function
//! pointers, since no reflection is available or needed.

mod chain;
mod converter;
pub mod schema;

pub use chain::{MigrationReport, VersionChain, default_chain};
pub use converter::{Identity, SubstructConverter};

use std::io::{Read, Write};

use crate::core::errors::{PacctError, Result};

/// Fixed magic value at the start of every raw log (`MYMAGIC` in the reference
/// implementation).
pub const MAGIC: u32 = 0xfeed_beef;

/// High bit of `aversion` marking "this file was produced or touched by the
/// conversion tool", set unconditionally on every write by [`VersionChain::migrate`].
pub const CONVERTED_BIT: u16 = 0x8000;

/// Fixed-size header at the start of every raw log. Layout mirrors `struct rawheader`
/// closely enough to round-trip its fields; `utsname`/`cfuture`/`ifuture` are kept as
/// opaque byte blobs rather than decoded, since this engine never inspects or alters
/// them — only `aversion`, `sstatlen`, and `tstatlen` are read or rewritten.
#[derive(Debug, Clone)]
pub struct RawHeader {
    pub magic: u32,
    pub aversion: u16,
    pub rawheadlen: u16,
    pub rawreclen: u16,
    pub hertz: u16,
    pub sstatlen: u32,
    pub tstatlen: u32,
    /// Everything after `tstatlen` in the on-disk header (uname, page size, OS release
    /// fields, reserved future-use slots): carried through unexamined.
    pub trailing: Vec<u8>,
}

/// Size, in bytes, of the fixed-length prefix of [`RawHeader`] this engine parses
/// directly (magic through tstatlen). The `trailing` tail's length is whatever the
/// source file's `rawheadlen` declares it to be, minus this prefix.
pub(crate) const HEADER_PREFIX_LEN: usize = 4 + 2 + 2 + 2 + 2 + 4 + 4;

impl RawHeader {
    /// Read and validate a raw header from `reader`, rejecting a bad magic or a
    /// `rawheadlen`/`rawreclen` mismatch against this build's own sizes (the
    /// "built for a different CPU architecture" check in the reference implementation).
    pub fn read(reader: &mut impl Read, expected_rawheadlen: u16, expected_rawreclen: u16) -> Result<Self> {
        let mut prefix = [0u8; HEADER_PREFIX_LEN];
        reader
            .read_exact(&mut prefix)
            .map_err(|source| PacctError::Runtime {
                details: format!("reading raw log header: {source}"),
            })?;
        let magic = u32::from_le_bytes(prefix[0..4].try_into().unwrap());
        if magic != MAGIC {
            return Err(PacctError::BadMagic {
                expected: MAGIC,
                got: magic,
            });
        }
        let aversion = u16::from_le_bytes(prefix[4..6].try_into().unwrap());
        let rawheadlen = u16::from_le_bytes(prefix[6..8].try_into().unwrap());
        let rawreclen = u16::from_le_bytes(prefix[8..10].try_into().unwrap());
        let hertz = u16::from_le_bytes(prefix[10..12].try_into().unwrap());
        let sstatlen = u32::from_le_bytes(prefix[12..16].try_into().unwrap());
        let tstatlen = u32::from_le_bytes(prefix[16..20].try_into().unwrap());

        if rawheadlen != expected_rawheadlen || rawreclen != expected_rawreclen {
            return Err(PacctError::GeometryMismatch);
        }

        let trailing_len = usize::from(rawheadlen).saturating_sub(HEADER_PREFIX_LEN);
        let mut trailing = vec![0u8; trailing_len];
        reader
            .read_exact(&mut trailing)
            .map_err(|source| PacctError::Runtime {
                details: format!("reading raw log header trailer: {source}"),
            })?;

        Ok(Self {
            magic,
            aversion,
            rawheadlen,
            rawreclen,
            hertz,
            sstatlen,
            tstatlen,
            trailing,
        })
    }

    /// Write this header back out, with `aversion`/`sstatlen`/`tstatlen` as given
    /// (the caller is expected to have already set `aversion` to the target version
    /// with [`CONVERTED_BIT`] set, and the two lengths to the target schema's sizes).
    pub fn write(&self, writer: &mut impl Write) -> Result<()> {
        let err = |source: std::io::Error| PacctError::Runtime {
            details: format!("writing raw log header: {source}"),
        };
        writer.write_all(&self.magic.to_le_bytes()).map_err(err)?;
        writer.write_all(&self.aversion.to_le_bytes()).map_err(err)?;
        writer.write_all(&self.rawheadlen.to_le_bytes()).map_err(err)?;
        writer.write_all(&self.rawreclen.to_le_bytes()).map_err(err)?;
        writer.write_all(&self.hertz.to_le_bytes()).map_err(err)?;
        writer.write_all(&self.sstatlen.to_le_bytes()).map_err(err)?;
        writer.write_all(&self.tstatlen.to_le_bytes()).map_err(err)?;
        writer.write_all(&self.trailing).map_err(err)?;
        Ok(())
    }

    /// Embedded schema-version index, with [`CONVERTED_BIT`] masked off.
    #[must_use]
    pub const fn version(&self) -> u16 {
        self.aversion & !CONVERTED_BIT
    }
}

/// Per-sample header (`struct rawrecord` in the reference implementation): a
/// timestamp, flags, the compressed-blob lengths that follow it, and the task count
/// needed to size the decompressed `tstat` array.
#[derive(Debug, Clone, Copy)]
pub struct SampleHeader {
    pub curtime: i64,
    pub flags: u16,
    pub scomplen: u32,
    pub pcomplen: u32,
    pub interval: u32,
    pub ndeviat: u32,
}

pub(crate) const SAMPLE_HEADER_LEN: usize = 8 + 2 + 2 + 4 + 4 + 4 + 4;

impl SampleHeader {
    /// Read one sample header, or `Ok(None)` on a clean EOF before any bytes of the
    /// next header are read (spec.md §4.5 "truncated final sample ends the stream
    /// normally" — this is the only place that normal-termination check applies; a
    /// partial read past the first byte is still a hard I/O error).
    pub fn read(reader: &mut impl Read) -> Result<Option<Self>> {
        let mut buf = [0u8; SAMPLE_HEADER_LEN];
        let mut filled = 0usize;
        loop {
            match reader.read(&mut buf[filled..]) {
                Ok(0) => {
                    if filled == 0 {
                        return Ok(None);
                    }
                    return Err(PacctError::Runtime {
                        details: "truncated sample header".to_string(),
                    });
                }
                Ok(n) => {
                    filled += n;
                    if filled == buf.len() {
                        break;
                    }
                }
                Err(source) => {
                    return Err(PacctError::Runtime {
                        details: format!("reading sample header: {source}"),
                    });
                }
            }
        }
        Ok(Some(Self {
            curtime: i64::from_le_bytes(buf[0..8].try_into().unwrap()),
            flags: u16::from_le_bytes(buf[8..10].try_into().unwrap()),
            scomplen: u32::from_le_bytes(buf[12..16].try_into().unwrap()),
            pcomplen: u32::from_le_bytes(buf[16..20].try_into().unwrap()),
            interval: u32::from_le_bytes(buf[20..24].try_into().unwrap()),
            ndeviat: u32::from_le_bytes(buf[24..28].try_into().unwrap()),
        }))
    }

    pub fn write(&self, writer: &mut impl Write) -> Result<()> {
        let err = |source: std::io::Error| PacctError::Runtime {
            details: format!("writing sample header: {source}"),
        };
        writer.write_all(&self.curtime.to_le_bytes()).map_err(err)?;
        writer.write_all(&self.flags.to_le_bytes()).map_err(err)?;
        writer.write_all(&0u16.to_le_bytes()).map_err(err)?; // sfuture[0..1] padding
        writer.write_all(&self.scomplen.to_le_bytes()).map_err(err)?;
        writer.write_all(&self.pcomplen.to_le_bytes()).map_err(err)?;
        writer.write_all(&self.interval.to_le_bytes()).map_err(err)?;
        writer.write_all(&self.ndeviat.to_le_bytes()).map_err(err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> SampleHeader {
        SampleHeader {
            curtime: 1_700_000_000,
            flags: 0,
            scomplen: 123,
            pcomplen: 456,
            interval: 10,
            ndeviat: 7,
        }
    }

    #[test]
    fn sample_header_roundtrips() {
        let header = sample_header();
        let mut buf = Vec::new();
        header.write(&mut buf).unwrap();
        assert_eq!(buf.len(), SAMPLE_HEADER_LEN);
        let parsed = SampleHeader::read(&mut &buf[..]).unwrap().unwrap();
        assert_eq!(parsed.curtime, header.curtime);
        assert_eq!(parsed.scomplen, header.scomplen);
        assert_eq!(parsed.pcomplen, header.pcomplen);
        assert_eq!(parsed.ndeviat, header.ndeviat);
    }

    #[test]
    fn sample_header_clean_eof_returns_none() {
        let mut buf: &[u8] = &[];
        assert!(SampleHeader::read(&mut buf).unwrap().is_none());
    }

    #[test]
    fn sample_header_truncated_mid_header_errors() {
        let header = sample_header();
        let mut buf = Vec::new();
        header.write(&mut buf).unwrap();
        let mut truncated = &buf[..buf.len() - 3];
        let err = SampleHeader::read(&mut truncated).unwrap_err();
        assert!(matches!(err, PacctError::Runtime { .. }));
    }

    #[test]
    fn raw_header_rejects_bad_magic() {
        let mut buf = vec![0u8; HEADER_PREFIX_LEN];
        buf[0..4].copy_from_slice(&0xdead_beefu32.to_le_bytes());
        let err = RawHeader::read(&mut &buf[..], 64, 64).unwrap_err();
        assert!(matches!(err, PacctError::BadMagic { .. }));
    }

    #[test]
    fn raw_header_rejects_geometry_mismatch() {
        let mut buf = vec![0u8; HEADER_PREFIX_LEN];
        buf[0..4].copy_from_slice(&MAGIC.to_le_bytes());
        buf[6..8].copy_from_slice(&999u16.to_le_bytes()); // wrong rawheadlen
        let err = RawHeader::read(&mut &buf[..], 64, 64).unwrap_err();
        assert!(matches!(err, PacctError::GeometryMismatch));
    }

    #[test]
    fn raw_header_roundtrips_through_trailing_bytes() {
        let mut header = RawHeader {
            magic: MAGIC,
            aversion: 0 | CONVERTED_BIT,
            rawheadlen: (HEADER_PREFIX_LEN + 16) as u16,
            rawreclen: 64,
            hertz: 100,
            sstatlen: 10,
            tstatlen: 20,
            trailing: vec![7u8; 16],
        };
        let mut buf = Vec::new();
        header.write(&mut buf).unwrap();
        let parsed = RawHeader::read(
            &mut &buf[..],
            header.rawheadlen,
            header.rawreclen,
        )
        .unwrap();
        assert_eq!(parsed.trailing, header.trailing);
        assert_eq!(parsed.version(), 0);
        header.aversion = 3;
        assert_eq!(header.version(), 3);
    }
}
