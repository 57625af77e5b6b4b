//! Compressed self-extracting stub payload framing.
//!
//! This module owns the self-describing byte layout written into a
//! compressed stub's `PRESSED_DATA` slot (magic marker, sizes, cache key,
//! platform triple, optional nested config, compressed bytes) and the
//! deterministic cache-key derivation used to name cache directories.

pub mod stub_record;

pub use stub_record::{
    find_magic, magic, CacheKey, PlatformArch, PlatformLibc, PlatformOs, PlatformTriple,
    StubPayload,
};
