//! Encode/decode of the compressed-stub payload byte layout.
//!
//! Layout (little-endian throughout, per the wire format this crate shares
//! with the host interpreter's stub reader):
//!
//! | Offset | Size | Field |
//! |---|---|---|
//! | 0 | 32 | magic marker |
//! | 32 | 8 | compressed size (u64) |
//! | 40 | 8 | uncompressed size (u64) |
//! | 48 | 16 | cache key, lowercase hex ASCII |
//! | 64 | 3 | platform triple (os, arch, libc) |
//! | 67 | 1 | has_smol_config flag |
//! | 68 | 1112 (optional) | nested smol config record |
//! | var | var | compressed bytes |
//!
//! The variable-length optional config block and trailing compressed bytes
//! rule out a single `#[derive(Pread, Pwrite)]` struct, so encode/decode are
//! hand-written over a byte buffer using `scroll`'s `Pread`/`Pwrite` traits
//! for the fixed-width fields, the same way the underlying wire codecs this
//! crate's container drivers build on encode their own headers.

use scroll::{Pread, Pwrite, LE};
use sha2::{Digest, Sha512};

use crate::{Error, Result};

// Assembled at runtime from three literal parts so the 32-byte sequence
// never appears verbatim in this binary's own `.rodata` — a stub detector
// scanning this tool's own executable would otherwise flag a false
// positive.
const MAGIC_PART_1: &str = "NODE_SEA_PRESS";
const MAGIC_PART_2: &str = "ED_DATA_MAGIC_";
const MAGIC_PART_3: &str = "v1v1";

/// Size in bytes of the magic marker field.
pub const MAGIC_LEN: usize = 32;
/// Size in bytes of the cache-key field (16 ASCII hex characters, not
/// null-terminated).
pub const CACHE_KEY_LEN: usize = 16;
/// Size in bytes of the optional nested smol-config record.
pub const SMOL_CONFIG_LEN: usize = 1112;
/// Hard cap on the uncompressed payload size: 512 MiB.
pub const MAX_UNCOMPRESSED_SIZE: u64 = 512 * 1024 * 1024;

const OFF_MAGIC: usize = 0;
const OFF_COMPRESSED_SIZE: usize = 32;
const OFF_UNCOMPRESSED_SIZE: usize = 40;
const OFF_CACHE_KEY: usize = 48;
const OFF_PLATFORM: usize = 64;
const OFF_HAS_SMOL_CONFIG: usize = 67;
const OFF_SMOL_CONFIG: usize = 68;
const HEADER_LEN_NO_CONFIG: usize = OFF_SMOL_CONFIG;
const HEADER_LEN_WITH_CONFIG: usize = OFF_SMOL_CONFIG + SMOL_CONFIG_LEN;

/// Builds the 32-byte magic marker.
pub fn magic() -> [u8; MAGIC_LEN] {
    let joined = format!("{MAGIC_PART_1}{MAGIC_PART_2}{MAGIC_PART_3}");
    debug_assert_eq!(joined.len(), MAGIC_LEN);
    let mut out = [0u8; MAGIC_LEN];
    out.copy_from_slice(joined.as_bytes());
    out
}

/// Returns true iff `haystack` contains the magic marker at any offset
/// within its first `window` bytes.
pub fn find_magic(haystack: &[u8], window: usize) -> Option<usize> {
    let m = magic();
    let search_end = haystack.len().min(window);
    if search_end < MAGIC_LEN {
        return None;
    }
    haystack[..search_end]
        .windows(MAGIC_LEN)
        .position(|w| w == m)
}

/// Operating system field of the platform triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformOs {
    Linux = 0,
    Darwin = 1,
    Win32 = 2,
}

impl PlatformOs {
    fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(PlatformOs::Linux),
            1 => Ok(PlatformOs::Darwin),
            2 => Ok(PlatformOs::Win32),
            other => Err(Error::InvalidFormat(format!(
                "stub platform triple: unknown os byte {other:#x}"
            ))),
        }
    }
}

/// CPU architecture field of the platform triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformArch {
    X64 = 0,
    Arm64 = 1,
    Ia32 = 2,
    Arm = 3,
}

impl PlatformArch {
    fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(PlatformArch::X64),
            1 => Ok(PlatformArch::Arm64),
            2 => Ok(PlatformArch::Ia32),
            3 => Ok(PlatformArch::Arm),
            other => Err(Error::InvalidFormat(format!(
                "stub platform triple: unknown arch byte {other:#x}"
            ))),
        }
    }
}

/// libc family field of the platform triple; `NotApplicable` on non-Linux.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformLibc {
    Glibc = 0,
    Musl = 1,
    NotApplicable = 255,
}

impl PlatformLibc {
    fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(PlatformLibc::Glibc),
            1 => Ok(PlatformLibc::Musl),
            255 => Ok(PlatformLibc::NotApplicable),
            other => Err(Error::InvalidFormat(format!(
                "stub platform triple: unknown libc byte {other:#x}"
            ))),
        }
    }
}

/// The {os, arch, libc} triple recorded alongside a compressed stub's
/// payload, used by the host to pick the right extracted binary name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformTriple {
    pub os: PlatformOs,
    pub arch: PlatformArch,
    pub libc: PlatformLibc,
}

impl PlatformTriple {
    /// The triple for the platform this crate is compiled for.
    pub fn host() -> Self {
        let os = if cfg!(target_os = "linux") {
            PlatformOs::Linux
        } else if cfg!(target_os = "macos") {
            PlatformOs::Darwin
        } else {
            PlatformOs::Win32
        };
        let arch = if cfg!(target_arch = "x86_64") {
            PlatformArch::X64
        } else if cfg!(target_arch = "aarch64") {
            PlatformArch::Arm64
        } else if cfg!(target_arch = "x86") {
            PlatformArch::Ia32
        } else {
            PlatformArch::Arm
        };
        let libc = if !cfg!(target_os = "linux") {
            PlatformLibc::NotApplicable
        } else if cfg!(target_env = "musl") {
            PlatformLibc::Musl
        } else {
            PlatformLibc::Glibc
        };
        PlatformTriple { os, arch, libc }
    }

    fn to_bytes(self) -> [u8; 3] {
        [self.os as u8, self.arch as u8, self.libc as u8]
    }

    fn from_bytes(b: [u8; 3]) -> Result<Self> {
        Ok(PlatformTriple {
            os: PlatformOs::from_u8(b[0])?,
            arch: PlatformArch::from_u8(b[1])?,
            libc: PlatformLibc::from_u8(b[2])?,
        })
    }
}

/// A 16-lowercase-hex-character cache key identifying a compressed
/// payload's cache directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey([u8; CACHE_KEY_LEN]);

impl CacheKey {
    /// Derives the cache key from compressed bytes: the first 8 bytes of
    /// SHA-512 over `compressed`, rendered as 16 lowercase hex characters.
    ///
    /// One hash family is used on every platform (see `DESIGN.md` for the
    /// reasoning): the repacker must reconstruct the exact key the host's
    /// stub reader expects, and a split hash family is a standing source
    /// of cache-miss bugs when the two sides disagree.
    pub fn derive(compressed: &[u8]) -> Self {
        let digest = Sha512::digest(compressed);
        let mut hex = [0u8; CACHE_KEY_LEN];
        for (i, byte) in digest[..8].iter().enumerate() {
            let pair = format!("{byte:02x}");
            hex[i * 2] = pair.as_bytes()[0];
            hex[i * 2 + 1] = pair.as_bytes()[1];
        }
        CacheKey(hex)
    }

    /// Parses a cache key from its 16-byte ASCII hex representation,
    /// validating that every byte is a lowercase hex digit.
    pub fn from_ascii(bytes: [u8; CACHE_KEY_LEN]) -> Result<Self> {
        if !bytes.iter().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()) {
            return Err(Error::InvalidFormat(
                "cache key is not 16 lowercase hex characters".into(),
            ));
        }
        Ok(CacheKey(bytes))
    }

    /// Parses a cache key from a `&str`, validating length and charset.
    pub fn from_str_strict(s: &str) -> Result<Self> {
        let bytes = s.as_bytes();
        if bytes.len() != CACHE_KEY_LEN {
            return Err(Error::InvalidFormat(format!(
                "cache key must be {CACHE_KEY_LEN} characters, got {}",
                bytes.len()
            )));
        }
        let mut arr = [0u8; CACHE_KEY_LEN];
        arr.copy_from_slice(bytes);
        Self::from_ascii(arr)
    }

    /// Returns the cache key as a `&str` directory-name component.
    pub fn as_str(&self) -> &str {
        // Validated ASCII hex at construction time.
        std::str::from_utf8(&self.0).expect("cache key bytes are ASCII by construction")
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed (or about-to-be-written) compressed-stub payload.
#[derive(Debug, Clone)]
pub struct StubPayload {
    pub cache_key: CacheKey,
    pub platform: PlatformTriple,
    pub smol_config: Option<[u8; SMOL_CONFIG_LEN]>,
    pub compressed: Vec<u8>,
    pub uncompressed_size: u64,
}

impl StubPayload {
    /// Encodes this payload into the on-disk byte layout.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let header_len = if self.smol_config.is_some() {
            HEADER_LEN_WITH_CONFIG
        } else {
            HEADER_LEN_NO_CONFIG
        };
        let mut buf = vec![0u8; header_len + self.compressed.len()];

        buf.pwrite_with(&magic()[..], OFF_MAGIC, ())
            .map_err(|e| Error::Unknown(format!("encoding stub magic: {e}")))?;
        buf.pwrite_with(self.compressed.len() as u64, OFF_COMPRESSED_SIZE, LE)
            .map_err(|e| Error::Unknown(format!("encoding compressed size: {e}")))?;
        buf.pwrite_with(self.uncompressed_size, OFF_UNCOMPRESSED_SIZE, LE)
            .map_err(|e| Error::Unknown(format!("encoding uncompressed size: {e}")))?;
        buf.pwrite_with(self.cache_key.as_str().as_bytes(), OFF_CACHE_KEY, ())
            .map_err(|e| Error::Unknown(format!("encoding cache key: {e}")))?;
        buf.pwrite_with(&self.platform.to_bytes()[..], OFF_PLATFORM, ())
            .map_err(|e| Error::Unknown(format!("encoding platform triple: {e}")))?;

        match &self.smol_config {
            Some(cfg) => {
                buf[OFF_HAS_SMOL_CONFIG] = 1;
                buf[OFF_SMOL_CONFIG..OFF_SMOL_CONFIG + SMOL_CONFIG_LEN].copy_from_slice(cfg);
            }
            None => {
                buf[OFF_HAS_SMOL_CONFIG] = 0;
            }
        }

        buf[header_len..].copy_from_slice(&self.compressed);
        Ok(buf)
    }

    /// Decodes a payload from its on-disk byte layout, validating the
    /// magic marker, size bounds, and cache-key charset.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_LEN_NO_CONFIG {
            return Err(Error::InvalidFormat(
                "stub payload shorter than fixed header".into(),
            ));
        }

        let found_magic: [u8; MAGIC_LEN] = buf
            .pread_with(OFF_MAGIC, ())
            .map_err(|e| Error::InvalidFormat(format!("reading stub magic: {e}")))?;
        if found_magic != magic() {
            return Err(Error::InvalidFormat("stub magic mismatch".into()));
        }

        let compressed_size: u64 = buf
            .pread_with(OFF_COMPRESSED_SIZE, LE)
            .map_err(|e| Error::InvalidFormat(format!("reading compressed size: {e}")))?;
        if compressed_size == 0 {
            return Err(Error::InvalidFormat("compressed size is zero".into()));
        }

        let uncompressed_size: u64 = buf
            .pread_with(OFF_UNCOMPRESSED_SIZE, LE)
            .map_err(|e| Error::InvalidFormat(format!("reading uncompressed size: {e}")))?;
        if uncompressed_size == 0 || uncompressed_size > MAX_UNCOMPRESSED_SIZE {
            return Err(Error::InvalidFormat(format!(
                "uncompressed size {uncompressed_size} out of bounds (1..={MAX_UNCOMPRESSED_SIZE})"
            )));
        }

        let mut cache_key_bytes = [0u8; CACHE_KEY_LEN];
        cache_key_bytes.copy_from_slice(&buf[OFF_CACHE_KEY..OFF_CACHE_KEY + CACHE_KEY_LEN]);
        let cache_key = CacheKey::from_ascii(cache_key_bytes)?;

        let mut platform_bytes = [0u8; 3];
        platform_bytes.copy_from_slice(&buf[OFF_PLATFORM..OFF_PLATFORM + 3]);
        let platform = PlatformTriple::from_bytes(platform_bytes)?;

        let has_smol_config = match buf[OFF_HAS_SMOL_CONFIG] {
            0 => false,
            1 => true,
            other => {
                return Err(Error::InvalidFormat(format!(
                    "has_smol_config flag must be 0 or 1, got {other}"
                )))
            }
        };

        let (smol_config, data_offset) = if has_smol_config {
            if buf.len() < HEADER_LEN_WITH_CONFIG {
                return Err(Error::InvalidFormat(
                    "stub payload truncated: missing smol config record".into(),
                ));
            }
            let mut cfg = [0u8; SMOL_CONFIG_LEN];
            cfg.copy_from_slice(&buf[OFF_SMOL_CONFIG..OFF_SMOL_CONFIG + SMOL_CONFIG_LEN]);
            (Some(cfg), HEADER_LEN_WITH_CONFIG)
        } else {
            (None, HEADER_LEN_NO_CONFIG)
        };

        let compressed_size = compressed_size as usize;
        if buf.len() < data_offset + compressed_size {
            return Err(Error::InvalidFormat(
                "stub payload truncated: missing compressed bytes".into(),
            ));
        }
        let compressed = buf[data_offset..data_offset + compressed_size].to_vec();

        Ok(StubPayload {
            cache_key,
            platform,
            smol_config,
            compressed,
            uncompressed_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_is_32_bytes() {
        assert_eq!(magic().len(), MAGIC_LEN);
    }

    #[test]
    fn cache_key_is_deterministic() {
        let data = b"some compressed bytes";
        let a = CacheKey::derive(data);
        let b = CacheKey::derive(data);
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 16);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn cache_key_differs_for_different_input() {
        let a = CacheKey::derive(b"alpha");
        let b = CacheKey::derive(b"beta");
        assert_ne!(a, b);
    }

    #[test]
    fn roundtrip_without_smol_config() {
        let payload = StubPayload {
            cache_key: CacheKey::derive(b"payload-a"),
            platform: PlatformTriple::host(),
            smol_config: None,
            compressed: vec![1, 2, 3, 4, 5],
            uncompressed_size: 4096,
        };
        let encoded = payload.encode().unwrap();
        let decoded = StubPayload::decode(&encoded).unwrap();
        assert_eq!(decoded.cache_key, payload.cache_key);
        assert_eq!(decoded.platform, payload.platform);
        assert!(decoded.smol_config.is_none());
        assert_eq!(decoded.compressed, payload.compressed);
        assert_eq!(decoded.uncompressed_size, payload.uncompressed_size);
    }

    #[test]
    fn roundtrip_with_smol_config() {
        let mut cfg = [0u8; SMOL_CONFIG_LEN];
        cfg[0..4].copy_from_slice(b"SMFG");
        let payload = StubPayload {
            cache_key: CacheKey::derive(b"payload-b"),
            platform: PlatformTriple::host(),
            smol_config: Some(cfg),
            compressed: vec![9, 9, 9],
            uncompressed_size: 10,
        };
        let encoded = payload.encode().unwrap();
        let decoded = StubPayload::decode(&encoded).unwrap();
        assert_eq!(decoded.smol_config, Some(cfg));
    }

    #[test]
    fn decode_rejects_bad_magic() {
        let mut buf = vec![0u8; HEADER_LEN_NO_CONFIG];
        buf[OFF_UNCOMPRESSED_SIZE..OFF_UNCOMPRESSED_SIZE + 8]
            .copy_from_slice(&1u64.to_le_bytes());
        assert!(StubPayload::decode(&buf).is_err());
    }

    #[test]
    fn decode_rejects_oversized_uncompressed() {
        let payload = StubPayload {
            cache_key: CacheKey::derive(b"too-big"),
            platform: PlatformTriple::host(),
            smol_config: None,
            compressed: vec![0u8; 8],
            uncompressed_size: MAX_UNCOMPRESSED_SIZE + 1,
        };
        let encoded = payload.encode().unwrap();
        assert!(StubPayload::decode(&encoded).is_err());
    }

    #[test]
    fn find_magic_locates_embedded_marker() {
        let mut haystack = vec![0u8; 100];
        let m = magic();
        haystack[40..40 + MAGIC_LEN].copy_from_slice(&m);
        assert_eq!(find_magic(&haystack, 1024), Some(40));
        assert_eq!(find_magic(&haystack, 10), None);
    }
}
