//! Atomic write workflow, fsync discipline, and Mach-O re-signing.
//!
//! Every writer in this crate funnels through [`atomic_write`]: write to a
//! sibling temp file, fsync it, verify it's non-empty, set the executable
//! bit on Unix, then rename over the destination. POSIX `rename` is
//! atomic; Windows has no equivalent without reaching for `MoveFileEx`,
//! which this module uses rather than a non-atomic unlink-then-rename
//! fallback.

use std::fs::{self, File};
use std::io::Write as _;
use std::path::Path;
use std::process::Command;

use crate::{Error, Result};

/// Writes `bytes` to `path` atomically: temp file in the same directory,
/// fsync, non-empty verification, optional `0755` permission, then an
/// atomic rename over the destination.
///
/// `make_executable` should be `true` for re-emitted Mach-O/ELF binaries
/// and `false` for PE, whose executable bit is meaningless on the
/// platforms this crate targets for writing (Windows permissions are
/// left unchanged).
pub fn atomic_write(path: &Path, bytes: &[u8], make_executable: bool) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;

    let tmp_path = parent.join(format!(
        "{}.tmp.{}",
        path.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("seastitch-output"),
        std::process::id()
    ));

    {
        let mut tmp = File::create(&tmp_path)?;
        tmp.write_all(bytes)?;
        tmp.sync_all()
            .map_err(|e| Error::WriteFailed(format!("fsync of temp file failed: {e}")))?;
    }

    let written = fs::metadata(&tmp_path)
        .map_err(|e| Error::WriteFailed(format!("temp file vanished before rename: {e}")))?;
    if written.len() == 0 && !bytes.is_empty() {
        let _ = fs::remove_file(&tmp_path);
        return Err(Error::WriteFailed(
            "temp file was empty after write; refusing to publish".into(),
        ));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if make_executable {
            fs::set_permissions(&tmp_path, fs::Permissions::from_mode(0o755))
                .map_err(|e| Error::WriteFailed(format!("setting 0755 on temp file: {e}")))?;
        }
    }
    let _ = make_executable;

    rename_atomic(&tmp_path, path)
}

#[cfg(unix)]
fn rename_atomic(from: &Path, to: &Path) -> Result<()> {
    fs::rename(from, to).map_err(|e| Error::WriteFailed(format!("atomic rename failed: {e}")))
}

#[cfg(windows)]
fn rename_atomic(from: &Path, to: &Path) -> Result<()> {
    use std::os::windows::ffi::OsStrExt;
    use windows_sys::Win32::Storage::FileSystem::{MoveFileExW, MOVEFILE_REPLACE_EXISTING, MOVEFILE_WRITE_THROUGH};

    let wide_from: Vec<u16> = from.as_os_str().encode_wide().chain(Some(0)).collect();
    let wide_to: Vec<u16> = to.as_os_str().encode_wide().chain(Some(0)).collect();

    let ok = unsafe {
        MoveFileExW(
            wide_from.as_ptr(),
            wide_to.as_ptr(),
            MOVEFILE_REPLACE_EXISTING | MOVEFILE_WRITE_THROUGH,
        )
    };
    if ok == 0 {
        return Err(Error::WriteFailed(format!(
            "MoveFileExW failed: {}",
            std::io::Error::last_os_error()
        )));
    }
    Ok(())
}

/// Invokes `/usr/bin/codesign --sign - --force <path>` on macOS. A no-op
/// on every other platform: only Mach-O binaries carry a code signature
/// that mutation can invalidate.
pub fn codesign_adhoc(path: &Path) -> Result<()> {
    if !cfg!(target_os = "macos") {
        return Ok(());
    }
    let codesign_path = "/usr/bin/codesign";
    if !Path::new(codesign_path).exists() {
        log::warn!("codesign not found at {codesign_path}; skipping ad-hoc signature");
        return Ok(());
    }
    let status = Command::new(codesign_path)
        .args(["--sign", "-", "--force"])
        .arg(path)
        .status()
        .map_err(|e| Error::WriteFailed(format!("spawning codesign failed: {e}")))?;
    if !status.success() {
        return Err(Error::WriteFailed(format!(
            "codesign exited with status {status}; the binary was written but will not pass Gatekeeper"
        )));
    }
    Ok(())
}

/// Runs `codesign --verify <path>`, used by the `verify` subcommand and by
/// tests that re-signed Mach-O output still passes Gatekeeper's ad-hoc
/// check.
pub fn codesign_verify(path: &Path) -> Result<bool> {
    if !cfg!(target_os = "macos") {
        return Ok(true);
    }
    let status = Command::new("/usr/bin/codesign")
        .arg("--verify")
        .arg(path)
        .status()
        .map_err(|e| Error::WriteFailed(format!("spawning codesign --verify failed: {e}")))?;
    Ok(status.success())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn atomic_write_roundtrips_bytes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.bin");
        atomic_write(&path, b"hello", false).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"hello");
    }

    #[test]
    fn atomic_write_leaves_no_temp_file_behind() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.bin");
        atomic_write(&path, b"payload", true).unwrap();
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp."))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn atomic_write_overwrites_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.bin");
        atomic_write(&path, b"first", false).unwrap();
        atomic_write(&path, b"second, longer", false).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"second, longer");
    }
}
