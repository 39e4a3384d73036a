//! Schema version 0: the oldest version this chain accepts as a migration source.
//! No `nfs`/`cfs`/`psi`/`gpu`/`ifb` substructures yet, matching the reference
//! implementation's `2.0` table row (all four of those fields `{0, NULL, NULL}`).

use super::{SchemaVersion, SubstructLayout};

pub const SSTAT_PARTS: &[SubstructLayout] = &[
    SubstructLayout { name: "cpu", offset: 0, size: 32 },
    SubstructLayout { name: "mem", offset: 32, size: 24 },
    SubstructLayout { name: "net", offset: 56, size: 40 },
    SubstructLayout { name: "intf", offset: 96, size: 64 },
    SubstructLayout { name: "dsk", offset: 160, size: 48 },
    SubstructLayout { name: "nfs", offset: 0, size: 0 },
    SubstructLayout { name: "cfs", offset: 0, size: 0 },
    SubstructLayout { name: "psi", offset: 0, size: 0 },
    SubstructLayout { name: "gpu", offset: 0, size: 0 },
    SubstructLayout { name: "ifb", offset: 0, size: 0 },
];

pub const TSTAT_PARTS: &[SubstructLayout] = &[
    SubstructLayout { name: "gen", offset: 0, size: 40 },
    SubstructLayout { name: "cpu", offset: 40, size: 24 },
    SubstructLayout { name: "dsk", offset: 64, size: 16 },
    SubstructLayout { name: "mem", offset: 80, size: 24 },
    SubstructLayout { name: "net", offset: 104, size: 16 },
    SubstructLayout { name: "gpu", offset: 0, size: 0 },
];

pub const VERSION: SchemaVersion = SchemaVersion {
    index: 0,
    sstat_size: 208,
    sstat_parts: SSTAT_PARTS,
    tstat_size: 120,
    tstat_parts: TSTAT_PARTS,
};
