//! LZFSE compression over in-memory buffers.
//!
//! One codec, no dispatch table: this crate only ever needs LZFSE — the
//! format the host interpreter's compressed-stub reader expects on every
//! platform (Apple's Compression framework where available, the
//! open-source LZFSE algorithm elsewhere; the `lzfse` crate implements
//! the same algorithm in pure Rust so the behavior doesn't depend on
//! which OS this tool runs on).

use crate::{Error, Result};

/// Hard cap on decompressed size: 512 MiB.
pub const MAX_DECOMPRESSED_SIZE: u64 = 512 * 1024 * 1024;

/// Compresses `input` with LZFSE.
pub fn compress(input: &[u8]) -> Result<Vec<u8>> {
    lzfse::encode_bytes(input).map_err(|e| Error::CompressionFailed(e.to_string()))
}

/// Decompresses `input`, which must decode to no more than
/// [`MAX_DECOMPRESSED_SIZE`] bytes and, if `expected_size` is given, to
/// exactly that many bytes.
pub fn decompress(input: &[u8], expected_size: Option<u64>) -> Result<Vec<u8>> {
    if let Some(expected) = expected_size {
        if expected > MAX_DECOMPRESSED_SIZE {
            return Err(Error::DecompressionFailed(format!(
                "expected decompressed size {expected} exceeds {MAX_DECOMPRESSED_SIZE}-byte cap"
            )));
        }
    }

    let out = lzfse::decode_bytes(input).map_err(|e| Error::DecompressionFailed(e.to_string()))?;

    if out.len() as u64 > MAX_DECOMPRESSED_SIZE {
        return Err(Error::DecompressionFailed(format!(
            "decompressed size {} exceeds {MAX_DECOMPRESSED_SIZE}-byte cap",
            out.len()
        )));
    }
    if let Some(expected) = expected_size {
        if out.len() as u64 != expected {
            return Err(Error::DecompressionFailed(format!(
                "decompressed size {} does not match expected {expected}",
                out.len()
            )));
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let data = b"the quick brown fox jumps over the lazy dog".repeat(100);
        let compressed = compress(&data).unwrap();
        let decompressed = decompress(&compressed, Some(data.len() as u64)).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn roundtrip_empty() {
        let compressed = compress(&[]).unwrap();
        let decompressed = decompress(&compressed, Some(0)).unwrap();
        assert!(decompressed.is_empty());
    }

    #[test]
    fn rejects_expected_size_mismatch() {
        let data = b"hello world".to_vec();
        let compressed = compress(&data).unwrap();
        assert!(decompress(&compressed, Some(999)).is_err());
    }

    #[test]
    fn rejects_expected_size_over_cap() {
        assert!(decompress(&[], Some(MAX_DECOMPRESSED_SIZE + 1)).is_err());
    }
}
