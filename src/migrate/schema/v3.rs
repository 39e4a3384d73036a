//! Schema version 3: the newest version this chain produces. Three substructures
//! appear for the first time — `psi` (pressure-stall info), `gpu` (both system-wide
//! and per-task), `ifb` (infiniband) — none of which have a predecessor to convert
//! from, so they are simply zero-filled by [`super::super::chain::VersionChain`]
//! rather than assigned a converter. Everything else is unchanged from
//! [`super::v2`].

use super::{SchemaVersion, SubstructLayout};

pub const SSTAT_PARTS: &[SubstructLayout] = &[
    SubstructLayout { name: "cpu", offset: 0, size: 48 },
    SubstructLayout { name: "mem", offset: 48, size: 24 },
    SubstructLayout { name: "net", offset: 72, size: 40 },
    SubstructLayout { name: "intf", offset: 112, size: 80 },
    SubstructLayout { name: "dsk", offset: 192, size: 64 },
    SubstructLayout { name: "nfs", offset: 256, size: 32 },
    SubstructLayout { name: "cfs", offset: 288, size: 24 },
    SubstructLayout { name: "psi", offset: 312, size: 16 },
    SubstructLayout { name: "gpu", offset: 328, size: 40 },
    SubstructLayout { name: "ifb", offset: 368, size: 24 },
];

pub const TSTAT_PARTS: &[SubstructLayout] = &[
    SubstructLayout { name: "gen", offset: 0, size: 56 },
    SubstructLayout { name: "cpu", offset: 56, size: 24 },
    SubstructLayout { name: "dsk", offset: 80, size: 16 },
    SubstructLayout { name: "mem", offset: 96, size: 32 },
    SubstructLayout { name: "net", offset: 128, size: 16 },
    SubstructLayout { name: "gpu", offset: 144, size: 16 },
];

pub const VERSION: SchemaVersion = SchemaVersion {
    index: 3,
    sstat_size: 392,
    sstat_parts: SSTAT_PARTS,
    tstat_size: 160,
    tstat_parts: TSTAT_PARTS,
};
