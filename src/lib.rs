#![deny(unsafe_code)]

//! pacct-shadow — kernel process-accounting ingestion daemon, shadow-file
//! distribution library, and raw-log schema migration engine.
//!
//! Three components share this crate:
//! 1. **Writer daemon** (`daemon`, feature `daemon`) — drains the kernel's BSD-style
//!    process accounting file and republishes records into bounded, sequence-numbered
//!    shadow files that unprivileged readers can consume without `CAP_SYS_PACCT`.
//! 2. **Reader library** (`reader`) — attaches to the shadow file set (or falls back to
//!    conventional/private accounting when no daemon is running).
//! 3. **Migration engine** (`migrate`, feature `convert`) — upgrades a compressed
//!    time-series raw log from an older schema generation to a newer one.
//!
//! `unsafe` is denied crate-wide except for three narrow, explicitly-documented
//! carve-outs: [`platform::ffi`] (`acct(2)`, `nice(2)`), [`platform::semaphore`]
//! (`semget`/`semop`/`semctl`), and [`platform::netlink`] (the raw `AF_NETLINK` socket
//! calls backing the taskstats wake-up channel) — none of which any dependency already
//! in the stack wraps safely. Everything else — including decoding untrusted kernel
//! bytes in `codec` and taking byte-range locks in `store` — goes through safe
//! `nix`/`libc` struct-based APIs, never a transmute.

pub mod codec;
pub mod core;
pub mod logger;
pub mod platform;
pub mod prelude;
pub mod reader;
pub mod store;

#[cfg(feature = "daemon")]
pub mod daemon;

#[cfg(feature = "convert")]
pub mod migrate;
