//! Integration tests for the compressed self-extracting stub lifecycle:
//! detection, extraction into the content-addressed cache, and repack.

mod common;

use std::sync::Mutex;

use seastitch::container::{self, Container};
use seastitch::payload::{CacheKey, PlatformTriple, StubPayload};
use seastitch::{stub, ExecFormat, PayloadName};
use tempfile::tempdir;

/// `stub::extract`/`stub::repack` resolve the cache root from process
/// environment variables (`SOCKET_DLX_DIR`). Tests that set these run
/// serially under this lock so they don't race with each other across
/// `cargo test`'s default multi-threaded test runner.
static ENV_LOCK: Mutex<()> = Mutex::new(());

/// Builds a minimal valid stub: a host container (any format) carrying a
/// `PRESSED_DATA` slot whose bytes are an encoded `StubPayload` wrapping
/// LZFSE-compressed `inner_binary`.
fn build_stub(host: Vec<u8>, inner_binary: &[u8]) -> Vec<u8> {
    let compressed = seastitch::compress::compress(inner_binary).unwrap();
    let payload = StubPayload {
        cache_key: CacheKey::derive(&compressed),
        platform: PlatformTriple::host(),
        smol_config: None,
        compressed,
        uncompressed_size: inner_binary.len() as u64,
    };
    let encoded = payload.encode().unwrap();

    let mut c = container::open_bytes(host).unwrap();
    c.put(PayloadName::PressedData, encoded).unwrap();

    let dir = tempdir().unwrap();
    let path = dir.path().join("stub.bin");
    c.write(&path).unwrap();
    std::fs::read(&path).unwrap()
}

#[test]
fn is_stub_detects_elf_compressed_stub() {
    let inner = common::fake_elf64(None);
    let host = common::fake_elf64(None);
    let stub_bytes = build_stub(host, &inner);

    let dir = tempdir().unwrap();
    let path = dir.path().join("app");
    std::fs::write(&path, &stub_bytes).unwrap();

    assert!(stub::is_stub(&path).unwrap());
}

#[test]
fn is_stub_rejects_plain_binary() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("plain");
    std::fs::write(&path, common::fake_elf64(None)).unwrap();

    assert!(!stub::is_stub(&path).unwrap());
}

#[test]
fn is_stub_rejects_marker_look_alike_outside_a_real_slot() {
    // A file that merely contains bytes resembling part of the marker
    // embedded in ordinary data must not be mistaken for a real stub: the
    // secondary container-open-and-decode check exists precisely for this.
    let mut bytes = common::fake_elf64(None);
    bytes.extend_from_slice(b"NODE_SEA_PRESSED_DATA_MAGIC_v1v1 but not inside a PRESSED_DATA note");

    let dir = tempdir().unwrap();
    let path = dir.path().join("lookalike");
    std::fs::write(&path, &bytes).unwrap();

    assert!(!stub::is_stub(&path).unwrap());
}

#[test]
fn extract_decompresses_into_cache_and_is_idempotent() {
    let _guard = ENV_LOCK.lock().unwrap();

    let cache_dir = tempdir().unwrap();
    std::env::set_var("SOCKET_DLX_DIR", cache_dir.path());

    let inner = common::fake_elf64(None);
    let host = common::fake_elf64(None);
    let stub_bytes = build_stub(host, &inner);

    let stub_dir = tempdir().unwrap();
    let stub_path = stub_dir.path().join("app");
    std::fs::write(&stub_path, &stub_bytes).unwrap();

    let extracted_once = stub::extract(&stub_path).unwrap();
    assert!(extracted_once.starts_with(cache_dir.path()));
    let bytes_once = std::fs::read(&extracted_once).unwrap();
    assert_eq!(bytes_once, inner);

    // Idempotent: a second extract of the same stub must hit the existing
    // cache entry (same path) rather than re-decompressing into a new one.
    let extracted_twice = stub::extract(&stub_path).unwrap();
    assert_eq!(extracted_once, extracted_twice);

    std::env::remove_var("SOCKET_DLX_DIR");
}

#[test]
fn cache_key_is_a_pure_function_of_compressed_bytes() {
    let a = seastitch::compress::compress(b"payload one").unwrap();
    let b = seastitch::compress::compress(b"payload one").unwrap();
    let c = seastitch::compress::compress(b"payload two").unwrap();

    assert_eq!(CacheKey::derive(&a), CacheKey::derive(&b));
    assert_ne!(CacheKey::derive(&a), CacheKey::derive(&c));
}

#[test]
fn repack_on_elf_stub_preserves_phoff_and_yields_a_fresh_valid_stub() {
    let _guard = ENV_LOCK.lock().unwrap();

    let cache_dir = tempdir().unwrap();
    std::env::set_var("SOCKET_DLX_DIR", cache_dir.path());

    let inner_original = common::fake_elf64(None);
    let host = common::fake_elf64(None);
    let stub_bytes = build_stub(host, &inner_original);
    let original_phoff =
        u64::from_le_bytes(stub_bytes[0x20..0x28].try_into().unwrap());

    let stub_dir = tempdir().unwrap();
    let stub_path = stub_dir.path().join("app");
    std::fs::write(&stub_path, &stub_bytes).unwrap();

    // Modify the extracted inner binary in place (simulating an `inject`
    // against it) before repacking.
    let inner_path = stub::extract(&stub_path).unwrap();
    let mut inner_container = container::open(&inner_path).unwrap();
    inner_container.put(PayloadName::Sea, b"new sea payload".to_vec()).unwrap();
    inner_container.write(&inner_path).unwrap();

    let repacked_path = stub_dir.path().join("app.repacked");
    stub::repack(&stub_path, &inner_path, &repacked_path).unwrap();

    let repacked_bytes = std::fs::read(&repacked_path).unwrap();
    let repacked_phoff =
        u64::from_le_bytes(repacked_bytes[0x20..0x28].try_into().unwrap());
    assert_eq!(
        repacked_phoff, original_phoff,
        "stub repack on ELF must never relocate the Program Header Table"
    );

    assert!(stub::is_stub(&repacked_path).unwrap());

    // The new cache key must differ, since the inner binary's compressed
    // bytes changed.
    let repacked_container = container::open(&repacked_path).unwrap();
    let slot = repacked_container.get(PayloadName::PressedData).unwrap();
    let repacked_payload = StubPayload::decode(&slot).unwrap();
    let original_container = container::open_bytes(stub_bytes.clone()).unwrap();
    let original_slot = original_container.get(PayloadName::PressedData).unwrap();
    let original_payload = StubPayload::decode(&original_slot).unwrap();
    assert_ne!(repacked_payload.cache_key, original_payload.cache_key);

    std::env::remove_var("SOCKET_DLX_DIR");
}

#[test]
fn repacked_stub_extracts_the_modified_inner_binary() {
    let _guard = ENV_LOCK.lock().unwrap();

    let cache_dir = tempdir().unwrap();
    std::env::set_var("SOCKET_DLX_DIR", cache_dir.path());

    let inner_original = common::fake_elf64(None);
    let host = common::fake_elf64(None);
    let stub_bytes = build_stub(host, &inner_original);

    let stub_dir = tempdir().unwrap();
    let stub_path = stub_dir.path().join("app");
    std::fs::write(&stub_path, &stub_bytes).unwrap();

    let inner_path = stub::extract(&stub_path).unwrap();
    let mut inner_container = container::open(&inner_path).unwrap();
    inner_container.put(PayloadName::Vfs, b"packed files".to_vec()).unwrap();
    inner_container.write(&inner_path).unwrap();
    let modified_inner_bytes = std::fs::read(&inner_path).unwrap();

    let repacked_path = stub_dir.path().join("app.repacked");
    stub::repack(&stub_path, &inner_path, &repacked_path).unwrap();

    // A fresh cache root so re-extracting the repacked stub can't
    // accidentally reuse the previous cache entry.
    let cache_dir_2 = tempdir().unwrap();
    std::env::set_var("SOCKET_DLX_DIR", cache_dir_2.path());
    let re_extracted = stub::extract(&repacked_path).unwrap();
    assert_eq!(std::fs::read(&re_extracted).unwrap(), modified_inner_bytes);

    std::env::remove_var("SOCKET_DLX_DIR");
}

#[test]
fn detect_format_on_a_stub_still_reports_its_host_format() {
    let inner = common::fake_macho64();
    let host = common::fake_macho64();
    let stub_bytes = build_stub(host, &inner);

    let dir = tempdir().unwrap();
    let path = dir.path().join("app.macho");
    std::fs::write(&path, &stub_bytes).unwrap();

    assert_eq!(seastitch::format::detect_format(&path), ExecFormat::MachO);
}
