//! Detects compressed self-extracting stubs, owns the extraction cache,
//! and orchestrates the extract/modify/repack loop.

use std::fs;
use std::path::{Path, PathBuf};

use crate::container::{self, Container};
use crate::format::{detect_format, ExecFormat, PayloadName};
use crate::payload::{find_magic, CacheKey, PlatformTriple, StubPayload};
use crate::{cache, compress, integrity};
use crate::{Error, Result};

/// Detection window sizes, in bytes, tuned per format: the marker search
/// only needs to look as deep as each format's reference tooling actually
/// places the stub payload.
const WINDOW_MACHO: usize = 64 * 1024;
const WINDOW_PE: usize = 128 * 1024;
const WINDOW_ELF: usize = 1408 * 1024;

fn detection_window(format: ExecFormat) -> usize {
    match format {
        ExecFormat::MachO => WINDOW_MACHO,
        ExecFormat::Pe => WINDOW_PE,
        ExecFormat::Elf => WINDOW_ELF,
        ExecFormat::Unknown => 0,
    }
}

/// Returns `true` iff `path` is a compressed self-extracting stub: its
/// detected container format has a `PRESSED_DATA` slot whose bytes begin
/// with the stub magic marker followed by plausible size and cache-key
/// fields within the format's detection window.
pub fn is_stub(path: impl AsRef<Path>) -> Result<bool> {
    let path = path.as_ref();
    let format = detect_format(path);
    if format == ExecFormat::Unknown {
        return Ok(false);
    }
    let window = detection_window(format);
    let bytes = fs::read(path)?;
    if find_magic(&bytes, window).is_none() {
        return Ok(false);
    }

    // Secondary validation: a container open must actually yield a
    // PRESSED_DATA slot that decodes as a well-formed StubPayload header,
    // eliminating false positives from marker bytes appearing inside
    // ordinary string constants.
    match container::open_bytes(bytes) {
        Ok(c) => match c.get(PayloadName::PressedData) {
            Ok(slot) => Ok(StubPayload::decode(&slot).is_ok()),
            Err(_) => Ok(false),
        },
        Err(_) => Ok(false),
    }
}

/// Extracts the inner binary of a compressed stub at `stub_path` into the
/// content-addressed cache, returning the path to the extracted binary.
/// Idempotent: if an entry already exists for the stub's cache key, its
/// magic bytes are validated against a known executable format and the
/// existing path is returned without re-decompressing.
pub fn extract(stub_path: impl AsRef<Path>) -> Result<PathBuf> {
    let stub_path = stub_path.as_ref();
    let container = container::open(stub_path)?;
    let slot = container
        .get(PayloadName::PressedData)
        .map_err(|_| Error::SectionNotFound(PayloadName::PressedData.as_str().to_string()))?;
    let stub = StubPayload::decode(&slot)?;

    let root = cache::resolve_root()?;
    let entry = cache::entry_path(&root, stub.cache_key.as_str());

    if entry.exists() {
        use std::io::Read as _;
        let mut existing = Vec::new();
        cache::open_entry_nofollow(&entry)?.read_to_end(&mut existing)?;
        if existing.len() < 4 {
            return Err(Error::InvalidFormat(
                "cached extraction entry is too short to be a valid executable".into(),
            ));
        }
        let mut header = [0u8; 4];
        header.copy_from_slice(&existing[..4]);
        if matches!(
            crate::format::detect::detect_format_bytes(&header),
            ExecFormat::Unknown
        ) {
            return Err(Error::InvalidFormat(
                "cached extraction entry does not match a known executable format".into(),
            ));
        }
        return Ok(entry);
    }

    let inner = compress::decompress(&stub.compressed, Some(stub.uncompressed_size))?;
    integrity::atomic_write(&entry, &inner, true)?;
    Ok(entry)
}

/// Repacks a compressed stub after its extracted inner binary has been
/// modified in place: re-compresses the inner binary, derives a fresh
/// cache key, builds a new `PRESSED_DATA` payload, and rewrites the
/// stub's existing slot.
pub fn repack(stub_path: impl AsRef<Path>, inner_binary_path: impl AsRef<Path>, output_path: impl AsRef<Path>) -> Result<()> {
    let stub_path = stub_path.as_ref();
    let inner_binary_path = inner_binary_path.as_ref();
    let output_path = output_path.as_ref();

    if cfg!(target_os = "macos") {
        integrity::codesign_adhoc(inner_binary_path)?;
    }

    let inner_bytes = fs::read(inner_binary_path)?;
    let uncompressed_size = inner_bytes.len() as u64;
    if uncompressed_size == 0 || uncompressed_size > compress::MAX_DECOMPRESSED_SIZE {
        return Err(Error::InvalidFormat(format!(
            "inner binary size {uncompressed_size} out of bounds for a compressed stub payload"
        )));
    }

    let compressed = compress::compress(&inner_bytes)?;
    let cache_key = CacheKey::derive(&compressed);

    let new_payload = StubPayload {
        cache_key,
        platform: PlatformTriple::host(),
        smol_config: None,
        compressed,
        uncompressed_size,
    };
    let encoded = new_payload.encode()?;

    let mut container = container::open(stub_path)?;
    match container.format() {
        ExecFormat::Elf => {
            // ELF stub repack overwrites the note's descriptor in place to
            // preserve the Program Header Table's file offset exactly — it
            // does not go through the generic `Container::put`, which would
            // append a brand new note segment and shift file layout.
            let elf = container
                .as_any_mut()
                .downcast_mut::<crate::container::elf::ElfContainer>()
                .ok_or_else(|| Error::Unknown("expected ELF container".into()))?;
            let rewritten = elf.overwrite_note_in_place(PayloadName::PressedData, &encoded)?;
            integrity::atomic_write(output_path, &rewritten, true)?;
        }
        ExecFormat::MachO => {
            container.remove(PayloadName::PressedData)?;
            container.put(PayloadName::PressedData, encoded)?;
            container.write(output_path)?;
        }
        ExecFormat::Pe => {
            container.remove(PayloadName::PressedData)?;
            container.put(PayloadName::PressedData, encoded)?;
            container.write(output_path)?;
        }
        ExecFormat::Unknown => unreachable!("container::open never yields Unknown"),
    }

    if cfg!(target_os = "macos") {
        integrity::codesign_adhoc(output_path)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detection_windows_per_format() {
        assert_eq!(detection_window(ExecFormat::MachO), 64 * 1024);
        assert_eq!(detection_window(ExecFormat::Pe), 128 * 1024);
        assert_eq!(detection_window(ExecFormat::Elf), 1408 * 1024);
        assert_eq!(detection_window(ExecFormat::Unknown), 0);
    }
}
