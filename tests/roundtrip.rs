//! Inject/extract round trips across every supported container format.

mod common;

use seastitch::container::{self, Container};
use seastitch::format::detect_format;
use seastitch::{ExecFormat, PayloadName};
use tempfile::tempdir;

#[test]
fn elf_sea_payload_round_trips() {
    let input = common::fake_elf64(None);
    let mut c = container::open_bytes(input).unwrap();
    assert_eq!(c.format(), ExecFormat::Elf);

    let payload = b"the quick brown fox".to_vec();
    c.put(PayloadName::Sea, payload.clone()).unwrap();

    let dir = tempdir().unwrap();
    let out_path = dir.path().join("out.elf");
    c.write(&out_path).unwrap();

    assert_eq!(detect_format(&out_path), ExecFormat::Elf);

    let reopened = container::open(&out_path).unwrap();
    assert_eq!(reopened.get(PayloadName::Sea).unwrap(), payload);
}

#[test]
fn elf_preserves_unrelated_note_and_phoff() {
    let vendor_note = common::pack_note("VENDOR_NOTE", 99, b"hello");
    let input = common::fake_elf64(Some(&vendor_note));
    let original_phoff = u64::from_le_bytes(input[0x20..0x28].try_into().unwrap());

    let mut c = container::open_bytes(input).unwrap();
    c.put(PayloadName::Vfs, b"vfs-bytes".to_vec()).unwrap();

    let dir = tempdir().unwrap();
    let out_path = dir.path().join("out.elf");
    c.write(&out_path).unwrap();

    let out_bytes = std::fs::read(&out_path).unwrap();
    let new_phoff = u64::from_le_bytes(out_bytes[0x20..0x28].try_into().unwrap());
    assert_eq!(new_phoff, original_phoff, "ELF write must never relocate the PHT");

    let haystack = String::from_utf8_lossy(&out_bytes);
    assert!(haystack.contains("VENDOR_NOTE"), "unrelated note must survive a write");

    let reopened = container::open(&out_path).unwrap();
    assert_eq!(reopened.get(PayloadName::Vfs).unwrap(), b"vfs-bytes");
}

#[test]
fn macho_sea_payload_round_trips_and_preserves_header_fields() {
    let input = common::fake_macho64();
    let mut c = container::open_bytes(input).unwrap();
    assert_eq!(c.format(), ExecFormat::MachO);

    let payload = b"sea-blob-contents".to_vec();
    c.put(PayloadName::Sea, payload.clone()).unwrap();

    let dir = tempdir().unwrap();
    let out_path = dir.path().join("out.macho");
    c.write(&out_path).unwrap();

    let out_bytes = std::fs::read(&out_path).unwrap();
    // Regression check for the magic/cputype/filetype fields that a prior
    // version of this driver zeroed or byte-swapped on every rebuild.
    assert_eq!(&out_bytes[0..4], &[0xCF, 0xFA, 0xED, 0xFE]);
    assert_eq!(u32::from_le_bytes(out_bytes[4..8].try_into().unwrap()), 0x0100_0007);
    assert_eq!(u32::from_le_bytes(out_bytes[8..12].try_into().unwrap()), 0x0000_0003);
    assert_eq!(u32::from_le_bytes(out_bytes[12..16].try_into().unwrap()), 2);
    assert_eq!(u32::from_le_bytes(out_bytes[24..28].try_into().unwrap()), 0x0020_0085);

    let reopened = container::open(&out_path).unwrap();
    assert_eq!(reopened.get(PayloadName::Sea).unwrap(), payload);
}

#[test]
fn macho_write_preserves_text_and_linkedit_content() {
    let input = common::fake_macho64_with_real_segments();
    let original_text = input[0x1000..0x1000 + 64].to_vec();
    let original_linkedit = input[0x2000..0x2000 + 256].to_vec();
    let original_symtab_cmd = input[256..256 + 24].to_vec();

    let mut c = container::open_bytes(input).unwrap();
    assert_eq!(c.format(), ExecFormat::MachO);

    let payload = b"sea-blob-on-a-real-binary".to_vec();
    c.put(PayloadName::Sea, payload.clone()).unwrap();

    let dir = tempdir().unwrap();
    let out_path = dir.path().join("out.macho");
    c.write(&out_path).unwrap();

    let out_bytes = std::fs::read(&out_path).unwrap();
    assert_eq!(
        &out_bytes[0x1000..0x1000 + 64],
        &original_text[..],
        "__text content and offset must survive a write untouched"
    );
    assert_eq!(
        &out_bytes[0x2000..0x2000 + 256],
        &original_linkedit[..],
        "__LINKEDIT content and offset must survive a write untouched"
    );
    assert_eq!(
        &out_bytes[256..256 + 24],
        &original_symtab_cmd[..],
        "LC_SYMTAB must keep pointing at the unmoved __LINKEDIT content"
    );

    let reopened = container::open(&out_path).unwrap();
    assert_eq!(reopened.get(PayloadName::Sea).unwrap(), payload);
}

#[test]
fn pe_synthesizes_rsrc_for_sea_and_vfs() {
    let input = common::fake_pe64();
    let mut c = container::open_bytes(input).unwrap();
    assert_eq!(c.format(), ExecFormat::Pe);
    assert!(c.list().is_empty());

    c.put(PayloadName::Sea, b"sea-blob".to_vec()).unwrap();
    c.put(PayloadName::Vfs, b"vfs-blob".to_vec()).unwrap();

    let dir = tempdir().unwrap();
    let out_path = dir.path().join("out.exe");
    c.write(&out_path).unwrap();

    let reopened = container::open(&out_path).unwrap();
    let mut slots: Vec<_> = reopened.list().into_iter().map(|(n, _)| n.as_str()).collect();
    slots.sort();
    assert_eq!(slots, ["NODE_SEA_BLOB", "SMOL_VFS_BLOB"]);
    assert_eq!(reopened.get(PayloadName::Sea).unwrap(), b"sea-blob");
    assert_eq!(reopened.get(PayloadName::Vfs).unwrap(), b"vfs-blob");
}

#[test]
fn pe_vfs_compat_writes_zero_byte_slot() {
    let input = common::fake_pe64();
    let mut c = container::open_bytes(input).unwrap();
    c.put(PayloadName::Vfs, Vec::new()).unwrap();

    let dir = tempdir().unwrap();
    let out_path = dir.path().join("out.exe");
    c.write(&out_path).unwrap();

    let reopened = container::open(&out_path).unwrap();
    assert!(reopened.has(PayloadName::Vfs));
    assert_eq!(reopened.get(PayloadName::Vfs).unwrap(), Vec::<u8>::new());
}

#[test]
fn pe_put_twice_overwrites_before_write() {
    let input = common::fake_pe64();
    let mut c = container::open_bytes(input).unwrap();
    c.put(PayloadName::Sea, b"first".to_vec()).unwrap();
    c.put(PayloadName::Sea, b"second".to_vec()).unwrap();

    let dir = tempdir().unwrap();
    let out_path = dir.path().join("out.exe");
    c.write(&out_path).unwrap();

    let reopened = container::open(&out_path).unwrap();
    assert_eq!(reopened.get(PayloadName::Sea).unwrap(), b"second");
}

#[test]
fn flip_fuse_flips_trailing_digit_in_sea_payload() {
    let needle = concat!("NODE_SEA_FUSE_fce680ab2cc467b6e072b8b5df1996b2", ":0");
    let mut payload = b"leading padding ".to_vec();
    payload.extend_from_slice(needle.as_bytes());
    payload.extend_from_slice(b" trailing padding");

    let input = common::fake_elf64(None);
    let mut c = container::open_bytes(input).unwrap();
    c.put(PayloadName::Sea, payload).unwrap();

    assert!(c.flip_fuse().unwrap());
    let flipped = c.get(PayloadName::Sea).unwrap();
    let flipped_needle = format!("{}{}", &needle[..needle.len() - 1], "1");
    assert!(String::from_utf8_lossy(&flipped).contains(&flipped_needle));
}

#[test]
fn put_checked_rejects_occupied_slot() {
    let vendor_note = common::pack_note(PayloadName::Sea.elf_owner(), 0, b"already-here");
    let input = common::fake_elf64(Some(&vendor_note));
    let mut c = container::open_bytes(input).unwrap();
    assert!(c.has(PayloadName::Sea));
    assert!(c.put_checked(PayloadName::Sea, b"overwrite attempt".to_vec()).is_err());
}
