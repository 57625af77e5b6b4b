//! Delegated SEA blob generation from a `.json` SEA config: when
//! `inject --sea` points at a JSON file rather than a blob, the target
//! host interpreter is spawned with `--experimental-sea-config <path>`
//! and the generated blob's path is read back out of the config's
//! `"output"` field.
//!
//! JSON parsing here is deliberately minimal — a bounded scanner for one
//! key, not a `serde_json::Value` parse of the whole document — because
//! the full document is attacker-influenced input from a build pipeline
//! and a general-purpose parser would otherwise need its own hardening
//! this crate has no other use for.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::{Error, Result};

/// Hard cap on the SEA config file size this scanner will read.
pub const MAX_CONFIG_SIZE: usize = 1024 * 1024;
/// Hard cap on object/array nesting depth while scanning for `"output"`.
pub const MAX_NESTING_DEPTH: usize = 50;

/// Reads the `"output"` field out of a SEA config JSON document.
///
/// Finds the first unescaped `"output"` key at any nesting depth up to
/// [`MAX_NESTING_DEPTH`], skips whitespace and the following `:`, then
/// reads a double-quoted string honoring `\"` escapes. Rejects absolute
/// paths and `..` path-traversal components in the result, and caps the
/// input size at [`MAX_CONFIG_SIZE`].
pub fn read_output_field(json: &str) -> Result<PathBuf> {
    if json.len() > MAX_CONFIG_SIZE {
        return Err(Error::InvalidArgs(format!(
            "SEA config exceeds {MAX_CONFIG_SIZE}-byte cap"
        )));
    }

    let bytes = json.as_bytes();
    let mut depth = 0usize;
    let mut i = 0usize;
    let mut in_string = false;
    let mut escape = false;
    let mut string_start = 0usize;

    while i < bytes.len() {
        let b = bytes[i];
        if in_string {
            if escape {
                escape = false;
            } else if b == b'\\' {
                escape = true;
            } else if b == b'"' {
                in_string = false;
                if &bytes[string_start..i] == b"output" {
                    return parse_output_value(bytes, i + 1);
                }
            }
            i += 1;
            continue;
        }

        match b {
            b'"' => {
                in_string = true;
                string_start = i + 1;
            }
            b'{' | b'[' => {
                depth += 1;
                if depth > MAX_NESTING_DEPTH {
                    return Err(Error::InvalidArgs(format!(
                        "SEA config nesting exceeds {MAX_NESTING_DEPTH} levels"
                    )));
                }
            }
            b'}' | b']' => depth = depth.saturating_sub(1),
            _ => {}
        }
        i += 1;
    }

    Err(Error::InvalidArgs(
        "SEA config has no \"output\" field".into(),
    ))
}

fn parse_output_value(bytes: &[u8], mut i: usize) -> Result<PathBuf> {
    while i < bytes.len() && (bytes[i] as char).is_whitespace() {
        i += 1;
    }
    if i >= bytes.len() || bytes[i] != b':' {
        return Err(Error::InvalidArgs(
            "malformed SEA config: expected ':' after \"output\"".into(),
        ));
    }
    i += 1;
    while i < bytes.len() && (bytes[i] as char).is_whitespace() {
        i += 1;
    }
    if i >= bytes.len() || bytes[i] != b'"' {
        return Err(Error::InvalidArgs(
            "malformed SEA config: \"output\" value must be a string".into(),
        ));
    }
    i += 1;

    let mut value = String::new();
    let mut escape = false;
    while i < bytes.len() {
        let b = bytes[i];
        if escape {
            match b {
                b'"' => value.push('"'),
                b'\\' => value.push('\\'),
                b'/' => value.push('/'),
                other => value.push(other as char),
            }
            escape = false;
            i += 1;
            continue;
        }
        if b == b'\\' {
            escape = true;
            i += 1;
            continue;
        }
        if b == b'"' {
            return validate_output_path(value);
        }
        value.push(b as char);
        i += 1;
    }

    Err(Error::InvalidArgs(
        "malformed SEA config: unterminated \"output\" string".into(),
    ))
}

fn validate_output_path(value: String) -> Result<PathBuf> {
    let path = Path::new(&value);
    if path.is_absolute() {
        return Err(Error::InvalidArgs(
            "SEA config \"output\" must not be an absolute path".into(),
        ));
    }
    if path.components().any(|c| c.as_os_str() == "..") {
        return Err(Error::InvalidArgs(
            "SEA config \"output\" must not contain path-traversal components".into(),
        ));
    }
    Ok(path.to_path_buf())
}

/// Spawns `target` with a single argument `--experimental-sea-config
/// <config_path>`, waits for it to exit successfully, reads the resulting
/// config file, and returns the generated blob's path resolved relative to
/// the config file's directory.
pub fn generate_blob(target: &Path, config_path: &Path) -> Result<PathBuf> {
    let status = Command::new(target)
        .arg("--experimental-sea-config")
        .arg(config_path)
        .status()
        .map_err(|e| Error::InvalidArgs(format!("spawning {} failed: {e}", target.display())))?;
    if !status.success() {
        return Err(Error::InvalidArgs(format!(
            "{} --experimental-sea-config exited with status {status}",
            target.display()
        )));
    }

    let json = std::fs::read_to_string(config_path)?;
    let output = read_output_field(&json)?;
    let base = config_path.parent().unwrap_or_else(|| Path::new("."));
    Ok(base.join(output))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_simple_output_field() {
        let json = r#"{"main": "index.js", "output": "app.blob"}"#;
        assert_eq!(read_output_field(json).unwrap(), PathBuf::from("app.blob"));
    }

    #[test]
    fn reads_output_with_escaped_quote() {
        let json = r#"{"output": "weird\"name.blob"}"#;
        assert_eq!(
            read_output_field(json).unwrap(),
            PathBuf::from("weird\"name.blob")
        );
    }

    #[test]
    fn rejects_absolute_output_path() {
        let json = r#"{"output": "/etc/passwd"}"#;
        assert!(read_output_field(json).is_err());
    }

    #[test]
    fn rejects_path_traversal() {
        let json = r#"{"output": "../../etc/passwd"}"#;
        assert!(read_output_field(json).is_err());
    }

    #[test]
    fn rejects_missing_output_field() {
        let json = r#"{"main": "index.js"}"#;
        assert!(read_output_field(json).is_err());
    }

    #[test]
    fn rejects_oversized_config() {
        let big = "x".repeat(MAX_CONFIG_SIZE + 1);
        assert!(read_output_field(&big).is_err());
    }

    /// Exercises `generate_blob` end to end against a shell-script stand-in
    /// for the host interpreter: it writes `app.blob` next to the config
    /// file, then exits 0, mirroring what `node --experimental-sea-config`
    /// does on success.
    #[cfg(unix)]
    #[test]
    fn generate_blob_spawns_target_and_resolves_output_path() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let target_path = dir.path().join("fake-interpreter.sh");
        std::fs::write(
            &target_path,
            "#!/bin/sh\necho -n 'blob contents' > \"$(dirname \"$2\")/app.blob\"\nexit 0\n",
        )
        .unwrap();
        let mut perms = std::fs::metadata(&target_path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&target_path, perms).unwrap();

        let config_path = dir.path().join("sea-config.json");
        std::fs::write(&config_path, r#"{"main": "index.js", "output": "app.blob"}"#).unwrap();

        let blob_path = generate_blob(&target_path, &config_path).unwrap();
        assert_eq!(blob_path, dir.path().join("app.blob"));
        assert_eq!(std::fs::read_to_string(&blob_path).unwrap(), "blob contents");
    }

    #[cfg(unix)]
    #[test]
    fn generate_blob_fails_when_target_exits_nonzero() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let target_path = dir.path().join("failing-interpreter.sh");
        std::fs::write(&target_path, "#!/bin/sh\nexit 1\n").unwrap();
        let mut perms = std::fs::metadata(&target_path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&target_path, perms).unwrap();

        let config_path = dir.path().join("sea-config.json");
        std::fs::write(&config_path, r#"{"output": "app.blob"}"#).unwrap();

        assert!(generate_blob(&target_path, &config_path).is_err());
    }
}
