//! Schema version 2: `intf` gains a prior-reading field (`sint_to_22()`'s
//! `speed`/`speedp` split), two new substructures appear (`nfs`, `cfs`), and the
//! per-task `gen` substructure's `envid` field is renamed to `ctid` and a `vpid`
//! field is appended (`tgen_to_22()`). `cpu`/`mem`/`net`/`dsk` are unchanged from
//! [`super::v1`].

use super::{SchemaVersion, SubstructLayout};

pub const SSTAT_PARTS: &[SubstructLayout] = &[
    SubstructLayout { name: "cpu", offset: 0, size: 48 },
    SubstructLayout { name: "mem", offset: 48, size: 24 },
    SubstructLayout { name: "net", offset: 72, size: 40 },
    SubstructLayout { name: "intf", offset: 112, size: 80 },
    SubstructLayout { name: "dsk", offset: 192, size: 64 },
    SubstructLayout { name: "nfs", offset: 256, size: 32 },
    SubstructLayout { name: "cfs", offset: 288, size: 24 },
    SubstructLayout { name: "psi", offset: 0, size: 0 },
    SubstructLayout { name: "gpu", offset: 0, size: 0 },
    SubstructLayout { name: "ifb", offset: 0, size: 0 },
];

pub const TSTAT_PARTS: &[SubstructLayout] = &[
    SubstructLayout { name: "gen", offset: 0, size: 56 },
    SubstructLayout { name: "cpu", offset: 56, size: 24 },
    SubstructLayout { name: "dsk", offset: 80, size: 16 },
    SubstructLayout { name: "mem", offset: 96, size: 32 },
    SubstructLayout { name: "net", offset: 128, size: 16 },
    SubstructLayout { name: "gpu", offset: 0, size: 0 },
];

pub const VERSION: SchemaVersion = SchemaVersion {
    index: 2,
    sstat_size: 312,
    sstat_parts: SSTAT_PARTS,
    tstat_size: 144,
    tstat_parts: TSTAT_PARTS,
};
