//! End-to-end CLI integration tests: spawns the compiled `seastitch`
//! binary via `CARGO_BIN_EXE_seastitch` and drives it the way a build
//! pipeline would, checking stdout, stderr, and exit codes.

mod common;

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tempfile::{tempdir, TempDir};

fn bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_seastitch"))
}

fn run(args: &[&str]) -> Output {
    Command::new(bin())
        .args(args)
        .output()
        .expect("failed to spawn seastitch binary")
}

fn write_fixture(dir: &TempDir, name: &str, bytes: Vec<u8>) -> PathBuf {
    let path: &Path = dir.path();
    let path = path.join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

#[test]
fn inject_then_list_then_extract_then_verify_round_trip() {
    let dir = tempdir().unwrap();
    let host = write_fixture(&dir, "host.elf", common::fake_elf64(None));
    let sea_blob = write_fixture(&dir, "app.blob", b"sea payload bytes".to_vec());
    let output = dir.path().join("host.out.elf");

    let inject = run(&[
        "inject",
        "-e",
        host.to_str().unwrap(),
        "-o",
        output.to_str().unwrap(),
        "--sea",
        sea_blob.to_str().unwrap(),
    ]);
    assert!(
        inject.status.success(),
        "inject failed: {}",
        String::from_utf8_lossy(&inject.stderr)
    );

    let list = run(&["list", output.to_str().unwrap()]);
    assert!(list.status.success());
    let list_stdout = String::from_utf8_lossy(&list.stdout);
    assert!(list_stdout.contains("NODE_SEA_BLOB"));

    let extracted = dir.path().join("extracted.blob");
    let extract = run(&[
        "extract",
        output.to_str().unwrap(),
        "sea",
        "-o",
        extracted.to_str().unwrap(),
    ]);
    assert!(extract.status.success());
    assert_eq!(std::fs::read(&extracted).unwrap(), b"sea payload bytes");

    let verify = run(&["verify", output.to_str().unwrap(), "sea"]);
    assert!(verify.status.success());

    let verify_vfs = run(&["verify", output.to_str().unwrap(), "vfs"]);
    assert_eq!(verify_vfs.status.code(), Some(5), "SECTION_NOT_FOUND exit code");
}

#[test]
fn inject_vfs_without_sea_is_rejected() {
    let dir = tempdir().unwrap();
    let host = write_fixture(&dir, "host.elf", common::fake_elf64(None));
    let vfs_blob = write_fixture(&dir, "vfs.blob", b"vfs bytes".to_vec());
    let output = dir.path().join("host.out.elf");

    let inject = run(&[
        "inject",
        "-e",
        host.to_str().unwrap(),
        "-o",
        output.to_str().unwrap(),
        "--vfs",
        vfs_blob.to_str().unwrap(),
    ]);
    assert!(!inject.status.success());
    assert_eq!(inject.status.code(), Some(1), "BAD_ARGS exit code");
    assert!(String::from_utf8_lossy(&inject.stderr).contains("--sea"));
    assert!(!output.exists(), "a rejected inject must not write any output file");
}

#[test]
fn inject_vfs_compat_writes_zero_byte_slot() {
    let dir = tempdir().unwrap();
    let host = write_fixture(&dir, "host.elf", common::fake_elf64(None));
    let sea_blob = write_fixture(&dir, "app.blob", b"sea payload".to_vec());
    let output = dir.path().join("host.out.elf");

    let inject = run(&[
        "inject",
        "-e",
        host.to_str().unwrap(),
        "-o",
        output.to_str().unwrap(),
        "--sea",
        sea_blob.to_str().unwrap(),
        "--vfs-compat",
    ]);
    assert!(inject.status.success());

    let verify = run(&["verify", output.to_str().unwrap(), "vfs"]);
    assert!(verify.status.success(), "vfs-compat slot must verify present");
    assert!(String::from_utf8_lossy(&verify.stdout).contains("present"));
}

#[test]
fn inject_on_missing_executable_reports_file_not_found() {
    let dir = tempdir().unwrap();
    let missing = dir.path().join("does-not-exist.elf");
    let sea_blob = write_fixture(&dir, "app.blob", b"sea".to_vec());
    let output = dir.path().join("out.elf");

    let inject = run(&[
        "inject",
        "-e",
        missing.to_str().unwrap(),
        "-o",
        output.to_str().unwrap(),
        "--sea",
        sea_blob.to_str().unwrap(),
    ]);
    assert!(!inject.status.success());
    assert_eq!(inject.status.code(), Some(2), "FILE_NOT_FOUND exit code");
}

#[test]
fn list_json_format_is_valid_json() {
    let dir = tempdir().unwrap();
    let host = write_fixture(&dir, "host.elf", common::fake_elf64(None));
    let sea_blob = write_fixture(&dir, "app.blob", b"sea payload".to_vec());
    let output = dir.path().join("host.out.elf");

    let inject = run(&[
        "inject",
        "-e",
        host.to_str().unwrap(),
        "-o",
        output.to_str().unwrap(),
        "--sea",
        sea_blob.to_str().unwrap(),
    ]);
    assert!(inject.status.success());

    let list = run(&["--format", "json", "list", output.to_str().unwrap()]);
    assert!(list.status.success());
    let stdout = String::from_utf8_lossy(&list.stdout);
    let parsed: serde_json::Value = serde_json::from_str(stdout.trim()).unwrap();
    assert_eq!(parsed["format"], "ELF");
    assert!(parsed["slots"].as_array().unwrap().iter().any(|s| s["name"] == "NODE_SEA_BLOB"));
}

#[test]
fn re_injecting_the_same_slot_overwrites_without_error() {
    let dir = tempdir().unwrap();
    let host = write_fixture(&dir, "host.elf", common::fake_elf64(None));
    let first_blob = write_fixture(&dir, "first.blob", b"first".to_vec());
    let second_blob = write_fixture(&dir, "second.blob", b"second-and-longer".to_vec());
    let output = dir.path().join("host.out.elf");

    let first = run(&[
        "inject",
        "-e",
        host.to_str().unwrap(),
        "-o",
        output.to_str().unwrap(),
        "--sea",
        first_blob.to_str().unwrap(),
    ]);
    assert!(first.status.success());

    let second = run(&[
        "inject",
        "-e",
        output.to_str().unwrap(),
        "-o",
        output.to_str().unwrap(),
        "--sea",
        second_blob.to_str().unwrap(),
    ]);
    assert!(second.status.success());

    let extracted = dir.path().join("extracted.blob");
    let extract = run(&[
        "extract",
        output.to_str().unwrap(),
        "sea",
        "-o",
        extracted.to_str().unwrap(),
    ]);
    assert!(extract.status.success());
    assert_eq!(std::fs::read(&extracted).unwrap(), b"second-and-longer");
}

#[test]
fn unknown_subcommand_prints_help_and_exits_nonzero() {
    let result = run(&["--not-a-real-flag"]);
    assert!(!result.status.success());
}
