//! Error types for binary resource injection.
//!
//! This module provides the [`Error`] enum representing every failure mode
//! that can occur while detecting, parsing, mutating, or re-emitting a
//! Mach-O, ELF, or PE executable, along with the [`Result<T>`] alias used
//! throughout the crate.
//!
//! # Error Handling
//!
//! All fallible operations return `Result<T, Error>` and are meant to be
//! propagated with `?`; the core never retries an operation.
//!
//! ```rust,no_run
//! use seastitch::{Container, PayloadName, Result};
//! use seastitch::container::open;
//!
//! fn read_sea_blob(path: &str) -> Result<Vec<u8>> {
//!     let container = open(path)?;
//!     container.get(PayloadName::Sea)
//! }
//! ```

use std::io;
use std::path::PathBuf;

/// The error taxonomy for binary resource injection.
///
/// Every variant here corresponds to one of the caller-visible error
/// categories a command-line invocation can fail with: each is mapped to a
/// numeric exit code by the CLI (`bin/cli/exit_codes.rs`).
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// An I/O error occurred during a file or process operation.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Command-line arguments were missing, contradictory, or malformed.
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    /// A named input file does not exist or could not be opened for reading.
    #[error("file not found: {0}")]
    FileNotFound(PathBuf),

    /// The executable does not match any supported container format, or its
    /// structure is truncated, out of bounds, or an unsupported class (e.g.
    /// 32-bit ELF where only 64-bit is handled).
    #[error("invalid executable format: {0}")]
    InvalidFormat(String),

    /// A `put` targeting an occupied payload slot was requested with
    /// overwrite disabled. The core always overwrites by default, so this
    /// is reserved for callers that explicitly opt out.
    #[error("payload slot already exists: {0}")]
    SectionExists(String),

    /// `extract` or `verify` was requested against a payload slot that is
    /// absent from the container.
    #[error("payload slot not found: {0}")]
    SectionNotFound(String),

    /// The LZFSE encoder returned an error.
    #[error("compression failed: {0}")]
    CompressionFailed(String),

    /// The LZFSE decoder returned an error, or the decompressed size did
    /// not match the size recorded in the stub payload header.
    #[error("decompression failed: {0}")]
    DecompressionFailed(String),

    /// A temp-file write, fsync, rename, or permission-set operation
    /// failed, or the written temp file was found empty on verification.
    /// On macOS this also covers a `codesign` failure after a successful
    /// content rewrite: the binary was written but will not run under
    /// Gatekeeper.
    #[error("write failed: {0}")]
    WriteFailed(String),

    /// A defensive catch-all for conditions that should not occur in
    /// practice (e.g. a structural invariant the parser itself should have
    /// rejected).
    #[error("unknown error: {0}")]
    Unknown(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
