//! Wires the four concrete [`schema`] versions together with the per-step
//! converter tables, and drives the sample-by-sample migration loop.
//!
//! [`VersionChain::migrate`] mirrors `convert_samples()`: read one compressed
//! sample at a time, decompress, walk it through every intervening version's
//! converters, recompress, write. Nothing is ever buffered beyond a single sample.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;

use super::converter::{Identity, RenameField, SplitScalar, SubstructConverter, WidenArray};
use super::schema::{self, SchemaVersion, SubstructLayout};
use super::{CONVERTED_BIT, HEADER_PREFIX_LEN, RawHeader, SAMPLE_HEADER_LEN, SampleHeader};
use crate::core::errors::{PacctError, Result};

/// This build's own raw-log header and sample-header geometry, validated against
/// every source log on read (`rawheadlen`/`rawreclen` in the reference
/// implementation — a mismatch there means the log came from a different CPU
/// architecture's build, not a different schema version).
pub const RAW_HEADER_LEN: u16 = (HEADER_PREFIX_LEN + 92) as u16;
pub const RAW_RECORD_LEN: u16 = SAMPLE_HEADER_LEN as u16;

/// Named converters for one substructure, applied when stepping from one schema
/// version to the next. A substructure with no entry here is either unchanged
/// (handled by falling back to [`Identity`] never being necessary, since
/// unchanged substructures still get an explicit `Identity` entry for clarity)
/// or newly introduced at the target version, in which case it is left zeroed.
struct StepTable {
    sstat: Vec<(&'static str, Box<dyn SubstructConverter>)>,
    tstat: Vec<(&'static str, Box<dyn SubstructConverter>)>,
}

impl StepTable {
    fn sstat_converter(&self, name: &str) -> Option<&dyn SubstructConverter> {
        self.sstat
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, c)| c.as_ref())
    }

    fn tstat_converter(&self, name: &str) -> Option<&dyn SubstructConverter> {
        self.tstat
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, c)| c.as_ref())
    }
}

/// Summary of one migration run.
#[derive(Debug, Clone, Copy)]
pub struct MigrationReport {
    pub source_version: u16,
    pub target_version: u16,
    pub samples_converted: u64,
}

/// The full set of supported schema versions plus the converters needed to step
/// between any pair of adjacent ones.
pub struct VersionChain {
    versions: [SchemaVersion; 4],
    steps: [StepTable; 3],
}

/// Build the standard four-version chain (schema indices 0 through 3) with the
/// converter tables grounded in `atopconvert.c`'s `convs[]` table.
#[must_use]
pub fn default_chain() -> VersionChain {
    VersionChain {
        versions: [schema::v0::VERSION, schema::v1::VERSION, schema::v2::VERSION, schema::v3::VERSION],
        steps: [step_v0_v1(), step_v1_v2(), step_v2_v3()],
    }
}

fn step_v0_v1() -> StepTable {
    StepTable {
        sstat: vec![
            ("cpu", Box::new(WidenArray { header_len: 8, elem_size: 8, old_count: 3 })),
            ("mem", Box::new(Identity)),
            ("net", Box::new(Identity)),
            ("intf", Box::new(Identity)),
            ("dsk", Box::new(WidenArray { header_len: 8, elem_size: 8, old_count: 5 })),
        ],
        tstat: vec![
            ("gen", Box::new(Identity)),
            ("cpu", Box::new(Identity)),
            ("dsk", Box::new(Identity)),
            ("mem", Box::new(Identity)),
            ("net", Box::new(Identity)),
        ],
    }
}

fn step_v1_v2() -> StepTable {
    StepTable {
        sstat: vec![
            ("cpu", Box::new(Identity)),
            ("mem", Box::new(Identity)),
            ("net", Box::new(Identity)),
            ("intf", Box::new(SplitScalar {
                prefix_len: 56,
                field_size: 8,
                old_offset: 56,
                new_offset_a: 56,
                new_offset_b: 64,
            })),
            ("dsk", Box::new(Identity)),
        ],
        tstat: vec![
            ("gen", Box::new(RenameField {
                prefix_len: 40,
                field_size: 4,
                old_offset: 40,
                new_offset: 48,
            })),
            ("cpu", Box::new(Identity)),
            ("dsk", Box::new(Identity)),
            ("mem", Box::new(Identity)),
            ("net", Box::new(Identity)),
        ],
    }
}

fn step_v2_v3() -> StepTable {
    StepTable {
        sstat: vec![
            ("cpu", Box::new(Identity)),
            ("mem", Box::new(Identity)),
            ("net", Box::new(Identity)),
            ("intf", Box::new(Identity)),
            ("dsk", Box::new(Identity)),
            ("nfs", Box::new(Identity)),
            ("cfs", Box::new(Identity)),
        ],
        tstat: vec![
            ("gen", Box::new(Identity)),
            ("cpu", Box::new(Identity)),
            ("dsk", Box::new(Identity)),
            ("mem", Box::new(Identity)),
            ("net", Box::new(Identity)),
        ],
    }
}

/// Apply one step's converters across every substructure of a single `sstat` or
/// `tstat` blob, producing a freshly zeroed buffer of `new_size` bytes.
fn apply_step(
    step_lookup: impl Fn(&str) -> Option<&dyn SubstructConverter>,
    old_parts: &'static [SubstructLayout],
    old_buf: &[u8],
    new_parts: &'static [SubstructLayout],
    new_size: usize,
) -> Result<Vec<u8>> {
    let mut new_buf = vec![0u8; new_size];
    for part in new_parts.iter().filter(|p| p.size > 0) {
        let new_slice = &mut new_buf[part.offset..part.offset + part.size];
        let Some(conv) = step_lookup(part.name) else {
            continue; // newly introduced this step; stays zeroed
        };
        let old_slice: &[u8] = match schema::find(old_parts, part.name) {
            Some(old_part) => &old_buf[old_part.offset..old_part.offset + old_part.size],
            None => &[],
        };
        conv.convert(old_slice, new_slice)?;
    }
    Ok(new_buf)
}

fn zlib_compress(context: &'static str, data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).map_err(|source| PacctError::Compression {
        context,
        details: source.to_string(),
    })?;
    encoder.finish().map_err(|source| PacctError::Compression {
        context,
        details: source.to_string(),
    })
}

fn zlib_decompress(context: &'static str, data: &[u8], expected_len: usize) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::with_capacity(expected_len);
    decoder.read_to_end(&mut out).map_err(|source| PacctError::Compression {
        context,
        details: source.to_string(),
    })?;
    if out.len() != expected_len {
        return Err(PacctError::CorruptLog);
    }
    Ok(out)
}

impl VersionChain {
    /// Highest schema version index this chain can convert up to.
    #[must_use]
    pub const fn newest_version(&self) -> u16 {
        (self.versions.len() - 1) as u16
    }

    fn version_at(&self, index: u16) -> Result<SchemaVersion> {
        self.versions
            .get(index as usize)
            .copied()
            .ok_or(PacctError::UnsupportedSchemaVersion { version: index })
    }

    /// Convert one `sstat` blob from `from` to `from + 1`.
    fn step_sstat(&self, step_index: usize, from: SchemaVersion, to: SchemaVersion, buf: &[u8]) -> Result<Vec<u8>> {
        let table = &self.steps[step_index];
        apply_step(|n| table.sstat_converter(n), from.sstat_parts, buf, to.sstat_parts, to.sstat_size)
    }

    /// Convert one `tstat` blob (a single task's fixed-size record) from `from` to
    /// `from + 1`.
    fn step_tstat(&self, step_index: usize, from: SchemaVersion, to: SchemaVersion, buf: &[u8]) -> Result<Vec<u8>> {
        let table = &self.steps[step_index];
        apply_step(|n| table.tstat_converter(n), from.tstat_parts, buf, to.tstat_parts, to.tstat_size)
    }

    /// Walk `sstat_buf` through every intervening version between `source` and
    /// `target`, inclusive of neither endpoint's own converter (there is nothing
    /// to do at the source, and the target is the final result).
    fn chain_sstat(&self, source: u16, target: u16, mut buf: Vec<u8>) -> Result<Vec<u8>> {
        for step_index in source..target {
            let from = self.version_at(step_index)?;
            let to = self.version_at(step_index + 1)?;
            buf = self.step_sstat(step_index as usize, from, to, &buf)?;
        }
        Ok(buf)
    }

    fn chain_tstat(&self, source: u16, target: u16, mut buf: Vec<u8>) -> Result<Vec<u8>> {
        for step_index in source..target {
            let from = self.version_at(step_index)?;
            let to = self.version_at(step_index + 1)?;
            buf = self.step_tstat(step_index as usize, from, to, &buf)?;
        }
        Ok(buf)
    }

    /// Migrate an entire raw log from `reader` to `writer`, rewriting every
    /// sample's `sstat`/`tstat` blobs at `target_version`. Rejects a source newer
    /// than `target_version` ([`PacctError::Downgrade`]) and a header whose
    /// declared substructure sizes disagree with the source version's known sizes
    /// ([`PacctError::CorruptLog`]).
    ///
    /// # Errors
    ///
    /// Propagates I/O, decompression, and schema-version errors from any step.
    pub fn migrate(&self, reader: &mut impl Read, writer: &mut impl Write, target_version: u16) -> Result<MigrationReport> {
        let mut header = RawHeader::read(reader, RAW_HEADER_LEN, RAW_RECORD_LEN)?;
        let source_version = header.version();
        let source = self.version_at(source_version)?;
        let target = self.version_at(target_version)?;

        if source_version > target_version {
            return Err(PacctError::Downgrade {
                source_version,
                target_version,
            });
        }
        if header.sstatlen != source.sstat_size as u32 || header.tstatlen != source.tstat_size as u32 {
            return Err(PacctError::CorruptLog);
        }

        header.aversion = target_version | CONVERTED_BIT;
        header.sstatlen = target.sstat_size as u32;
        header.tstatlen = target.tstat_size as u32;
        header.write(writer)?;

        let mut samples_converted = 0u64;
        loop {
            let Some(mut sample) = SampleHeader::read(reader)? else {
                break;
            };

            let mut scomp = vec![0u8; sample.scomplen as usize];
            reader.read_exact(&mut scomp).map_err(|source| PacctError::Runtime {
                details: format!("reading compressed sstat blob: {source}"),
            })?;
            let mut pcomp = vec![0u8; sample.pcomplen as usize];
            reader.read_exact(&mut pcomp).map_err(|source| PacctError::Runtime {
                details: format!("reading compressed tstat blob: {source}"),
            })?;

            let sstat = zlib_decompress("sstat", &scomp, source.sstat_size)?;
            let sstat = self.chain_sstat(source_version, target_version, sstat)?;
            let scomp_out = zlib_compress("sstat", &sstat)?;

            let ntask = sample.ndeviat as usize;
            let tstat_all = zlib_decompress("tstat", &pcomp, ntask * source.tstat_size)?;
            let mut tstat_out = Vec::with_capacity(ntask * target.tstat_size);
            for chunk in tstat_all.chunks_exact(source.tstat_size) {
                let converted = self.chain_tstat(source_version, target_version, chunk.to_vec())?;
                tstat_out.extend_from_slice(&converted);
            }
            let pcomp_out = zlib_compress("tstat", &tstat_out)?;

            sample.scomplen = scomp_out.len() as u32;
            sample.pcomplen = pcomp_out.len() as u32;
            sample.write(writer)?;
            writer.write_all(&scomp_out).map_err(|source| PacctError::Runtime {
                details: format!("writing compressed sstat blob: {source}"),
            })?;
            writer.write_all(&pcomp_out).map_err(|source| PacctError::Runtime {
                details: format!("writing compressed tstat blob: {source}"),
            })?;

            samples_converted += 1;
        }

        Ok(MigrationReport {
            source_version,
            target_version,
            samples_converted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_sample(
        writer: &mut impl Write,
        curtime: i64,
        sstat: &[u8],
        tstats: &[Vec<u8>],
    ) {
        let scomp = zlib_compress("test", sstat).unwrap();
        let tstat_concat: Vec<u8> = tstats.iter().flatten().copied().collect();
        let pcomp = zlib_compress("test", &tstat_concat).unwrap();
        let header = SampleHeader {
            curtime,
            flags: 0,
            scomplen: scomp.len() as u32,
            pcomplen: pcomp.len() as u32,
            interval: 1,
            ndeviat: tstats.len() as u32,
        };
        header.write(writer).unwrap();
        writer.write_all(&scomp).unwrap();
        writer.write_all(&pcomp).unwrap();
    }

    fn synth_log(version: u16, sstat_size: usize, tstat_size: usize, tasks: &[(u32, &str)]) -> Vec<u8> {
        let mut buf = Vec::new();
        let header = RawHeader {
            magic: super::super::MAGIC,
            aversion: version,
            rawheadlen: RAW_HEADER_LEN,
            rawreclen: RAW_RECORD_LEN,
            hertz: 100,
            sstatlen: sstat_size as u32,
            tstatlen: tstat_size as u32,
            trailing: vec![0u8; RAW_HEADER_LEN as usize - HEADER_PREFIX_LEN],
        };
        header.write(&mut buf).unwrap();
        let sstat = vec![0xabu8; sstat_size];
        let tstats: Vec<Vec<u8>> = tasks
            .iter()
            .map(|(pid, comm)| schema::encode_task_gen(*pid, comm, tstat_size))
            .collect();
        write_sample(&mut buf, 1_700_000_000, &sstat, &tstats);
        buf
    }

    #[test]
    fn same_version_migration_is_a_noop_copy_of_samples() {
        let chain = default_chain();
        let log = synth_log(3, schema::v3::VERSION.sstat_size, schema::v3::VERSION.tstat_size, &[(1, "init")]);
        let mut out = Vec::new();
        let report = chain.migrate(&mut &log[..], &mut out, 3).unwrap();
        assert_eq!(report.source_version, 3);
        assert_eq!(report.target_version, 3);
        assert_eq!(report.samples_converted, 1);

        let header = RawHeader::read(&mut &out[..], RAW_HEADER_LEN, RAW_RECORD_LEN).unwrap();
        assert_eq!(header.version(), 3);
        assert_eq!(header.sstatlen, schema::v3::VERSION.sstat_size as u32);
    }

    #[test]
    fn chained_v0_to_v3_preserves_task_identity() {
        let chain = default_chain();
        let tasks = [(100u32, "sh"), (200u32, "cat"), (300u32, "init")];
        let log = synth_log(0, schema::v0::VERSION.sstat_size, schema::v0::VERSION.tstat_size, &tasks);
        let mut out = Vec::new();
        let report = chain.migrate(&mut &log[..], &mut out, 3).unwrap();
        assert_eq!(report.samples_converted, 1);

        let mut cursor = &out[..];
        let header = RawHeader::read(&mut cursor, RAW_HEADER_LEN, RAW_RECORD_LEN).unwrap();
        assert_eq!(header.version(), 3);
        assert_eq!(header.sstatlen, schema::v3::VERSION.sstat_size as u32);
        assert_eq!(header.tstatlen, schema::v3::VERSION.tstat_size as u32);

        let sample = SampleHeader::read(&mut cursor).unwrap().unwrap();
        assert_eq!(sample.ndeviat as usize, tasks.len());
        let mut scomp = vec![0u8; sample.scomplen as usize];
        cursor.read_exact(&mut scomp).unwrap();
        let mut pcomp = vec![0u8; sample.pcomplen as usize];
        cursor.read_exact(&mut pcomp).unwrap();
        let tstat_all = zlib_decompress("test", &pcomp, tasks.len() * schema::v3::VERSION.tstat_size).unwrap();
        for (chunk, (pid, comm)) in tstat_all.chunks_exact(schema::v3::VERSION.tstat_size).zip(tasks.iter()) {
            let (decoded_pid, decoded_comm) = schema::decode_task_gen(chunk);
            assert_eq!(decoded_pid, *pid);
            assert_eq!(decoded_comm, *comm);
        }
    }

    #[test]
    fn rejects_downgrade() {
        let chain = default_chain();
        let log = synth_log(2, schema::v2::VERSION.sstat_size, schema::v2::VERSION.tstat_size, &[(1, "a")]);
        let mut out = Vec::new();
        let err = chain.migrate(&mut &log[..], &mut out, 1).unwrap_err();
        assert!(matches!(err, PacctError::Downgrade { .. }));
    }

    #[test]
    fn rejects_size_mismatch_as_corrupt() {
        let chain = default_chain();
        // Claim version 0 geometry but supply version 1's sstat size.
        let log = synth_log(0, schema::v1::VERSION.sstat_size, schema::v0::VERSION.tstat_size, &[(1, "a")]);
        let mut out = Vec::new();
        let err = chain.migrate(&mut &log[..], &mut out, 3).unwrap_err();
        assert!(matches!(err, PacctError::CorruptLog));
    }
}
