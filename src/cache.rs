//! Content-addressed extraction cache and its root resolution.
//!
//! Layout: `<root>/<cache_key>/node` (`node.exe` on Windows). The root is
//! resolved from `SOCKET_DLX_DIR`, then `SOCKET_HOME`, then a platform
//! default under the user's home directory; callers can override the
//! environment lookup for tests via [`resolve_root_from`].

use std::fs::File;
use std::path::{Path, PathBuf};

use crate::{Error, Result};

const ENV_DLX_DIR: &str = "SOCKET_DLX_DIR";
const ENV_SOCKET_HOME: &str = "SOCKET_HOME";

/// Resolves the cache root from the process environment, in priority
/// order: `SOCKET_DLX_DIR`, then `SOCKET_HOME`, then the platform home
/// default (`~/.socket/dlx` equivalent via the `dirs` crate).
pub fn resolve_root() -> Result<PathBuf> {
    resolve_root_from(|name| std::env::var(name).ok())
}

/// Same as [`resolve_root`], but takes an environment lookup function so
/// tests can exercise each priority tier without mutating process-global
/// environment state.
pub fn resolve_root_from(env: impl Fn(&str) -> Option<String>) -> Result<PathBuf> {
    if let Some(dir) = env(ENV_DLX_DIR) {
        return validate_cache_root(PathBuf::from(dir));
    }
    if let Some(dir) = env(ENV_SOCKET_HOME) {
        return validate_cache_root(PathBuf::from(dir).join("dlx"));
    }
    let home = dirs::home_dir()
        .ok_or_else(|| Error::WriteFailed("could not determine home directory for cache root".into()))?;
    validate_cache_root(home.join(".socket").join("dlx"))
}

/// Rejects a cache root that is a symbolic link (a TOCTOU defense):
/// link-stat on Unix, reparse-point attribute check on Windows. A
/// nonexistent root is fine — it is created on first use.
fn validate_cache_root(path: PathBuf) -> Result<PathBuf> {
    match std::fs::symlink_metadata(&path) {
        Ok(meta) if meta.file_type().is_symlink() => Err(Error::WriteFailed(
            "cache directory cannot be a symbolic link".into(),
        )),
        _ => Ok(path),
    }
}

/// The file name of an extracted binary within its cache-key directory.
pub fn extracted_binary_name() -> &'static str {
    if cfg!(windows) {
        "node.exe"
    } else {
        "node"
    }
}

/// The path an extracted binary for `cache_key` would live at under
/// `root`.
pub fn entry_path(root: &Path, cache_key: &str) -> PathBuf {
    root.join(cache_key).join(extracted_binary_name())
}

/// Opens an existing cache entry for reading with the symlink race
/// re-checked at the syscall itself. `validate_cache_root` only checks
/// the root once, at resolution time; a hostile actor with write access
/// to the cache directory could swap a path component for a symlink
/// between that check and the actual read, so the open itself must also
/// refuse to follow one.
#[cfg(unix)]
pub fn open_entry_nofollow(path: &Path) -> Result<File> {
    use std::os::unix::fs::OpenOptionsExt;
    std::fs::OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NOFOLLOW)
        .open(path)
        .map_err(Error::Io)
}

/// Windows has no `O_NOFOLLOW` equivalent on `OpenOptions`; the reparse-point
/// check on the resolved path is the best available substitute, performed
/// immediately before the open.
#[cfg(windows)]
pub fn open_entry_nofollow(path: &Path) -> Result<File> {
    if is_reparse_point(path) {
        return Err(Error::WriteFailed(
            "refusing to open cache entry through a reparse point".into(),
        ));
    }
    File::open(path).map_err(Error::Io)
}

/// Returns `true` if the given path carries a Windows reparse-point
/// attribute (used in place of the Unix symlink check on that platform).
#[cfg(windows)]
pub fn is_reparse_point(path: &Path) -> bool {
    use std::os::windows::fs::MetadataExt;
    const FILE_ATTRIBUTE_REPARSE_POINT: u32 = 0x400;
    std::fs::symlink_metadata(path)
        .map(|m| m.file_attributes() & FILE_ATTRIBUTE_REPARSE_POINT != 0)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dlx_dir_takes_priority() {
        let root = resolve_root_from(|name| match name {
            "SOCKET_DLX_DIR" => Some("/tmp/dlx-override".to_string()),
            "SOCKET_HOME" => Some("/tmp/socket-home".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(root, PathBuf::from("/tmp/dlx-override"));
    }

    #[test]
    fn socket_home_used_when_dlx_dir_unset() {
        let root = resolve_root_from(|name| match name {
            "SOCKET_HOME" => Some("/tmp/socket-home".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(root, PathBuf::from("/tmp/socket-home/dlx"));
    }

    #[test]
    fn entry_path_joins_cache_key_and_binary_name() {
        let root = PathBuf::from("/tmp/dlx");
        let path = entry_path(&root, "abcdef0123456789");
        assert_eq!(path.file_name().unwrap(), extracted_binary_name());
        assert!(path.starts_with(&root));
    }
}
