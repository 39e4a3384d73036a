//! Schema version 1: `cpu` and `dsk` widen (more CPUs/disks tracked per sample,
//! `scpu_to_21`/`sdsk_to_21` in the reference implementation), `mem` gains a tail
//! field (`tmem_to_21`'s `pmem`), and `gen` gains a tail field (`tgen_to_21`'s
//! `envid`). Everything else is unchanged from [`super::v0`].

use super::{SchemaVersion, SubstructLayout};

pub const SSTAT_PARTS: &[SubstructLayout] = &[
    SubstructLayout { name: "cpu", offset: 0, size: 48 },
    SubstructLayout { name: "mem", offset: 48, size: 24 },
    SubstructLayout { name: "net", offset: 72, size: 40 },
    SubstructLayout { name: "intf", offset: 112, size: 64 },
    SubstructLayout { name: "dsk", offset: 176, size: 64 },
    SubstructLayout { name: "nfs", offset: 0, size: 0 },
    SubstructLayout { name: "cfs", offset: 0, size: 0 },
    SubstructLayout { name: "psi", offset: 0, size: 0 },
    SubstructLayout { name: "gpu", offset: 0, size: 0 },
    SubstructLayout { name: "ifb", offset: 0, size: 0 },
];

pub const TSTAT_PARTS: &[SubstructLayout] = &[
    SubstructLayout { name: "gen", offset: 0, size: 48 },
    SubstructLayout { name: "cpu", offset: 48, size: 24 },
    SubstructLayout { name: "dsk", offset: 72, size: 16 },
    SubstructLayout { name: "mem", offset: 88, size: 32 },
    SubstructLayout { name: "net", offset: 120, size: 16 },
    SubstructLayout { name: "gpu", offset: 0, size: 0 },
];

pub const VERSION: SchemaVersion = SchemaVersion {
    index: 1,
    sstat_size: 240,
    sstat_parts: SSTAT_PARTS,
    tstat_size: 136,
    tstat_parts: TSTAT_PARTS,
};
