//! Exit codes for the CLI tool.
//!
//! Process exit codes are an unsigned byte on every platform Rust
//! targets, so negative codes would wrap unpredictably; this crate
//! instead assigns one small positive code per error taxonomy variant
//! (see `DESIGN.md` for the reasoning).

use seastitch::Error;

/// Operation completed successfully.
pub const SUCCESS: i32 = 0;
/// Command-line arguments were missing, contradictory, or malformed.
pub const BAD_ARGS: i32 = 1;
/// A named input file does not exist or could not be opened.
pub const FILE_NOT_FOUND: i32 = 2;
/// The executable does not match a supported format, or is structurally
/// invalid.
pub const INVALID_FORMAT: i32 = 3;
/// A checked `put` targeted an already-occupied payload slot.
pub const SECTION_EXISTS: i32 = 4;
/// `extract`/`verify` targeted an absent payload slot.
pub const SECTION_NOT_FOUND: i32 = 5;
/// LZFSE compression or decompression failed.
pub const COMPRESSION_ERROR: i32 = 6;
/// A temp-file write, fsync, rename, permission-set, or codesign step
/// failed.
pub const WRITE_FAILED: i32 = 7;
/// An underlying I/O error not otherwise classified.
pub const IO_ERROR: i32 = 8;
/// A defensive catch-all.
pub const UNKNOWN_ERROR: i32 = 9;
/// Ctrl+C (128 + SIGINT).
pub const USER_INTERRUPT: i32 = 130;

/// Exit code enum for structured handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success,
    BadArgs,
    FileNotFound,
    InvalidFormat,
    SectionExists,
    SectionNotFound,
    CompressionError,
    WriteFailed,
    IoError,
    UnknownError,
}

impl ExitCode {
    /// Returns the numeric exit code.
    pub fn code(self) -> i32 {
        match self {
            Self::Success => SUCCESS,
            Self::BadArgs => BAD_ARGS,
            Self::FileNotFound => FILE_NOT_FOUND,
            Self::InvalidFormat => INVALID_FORMAT,
            Self::SectionExists => SECTION_EXISTS,
            Self::SectionNotFound => SECTION_NOT_FOUND,
            Self::CompressionError => COMPRESSION_ERROR,
            Self::WriteFailed => WRITE_FAILED,
            Self::IoError => IO_ERROR,
            Self::UnknownError => UNKNOWN_ERROR,
        }
    }
}

/// Converts a `seastitch` error to an exit code.
pub fn error_to_exit_code(error: &Error) -> ExitCode {
    match error {
        Error::Io(_) => ExitCode::IoError,
        Error::InvalidArgs(_) => ExitCode::BadArgs,
        Error::FileNotFound(_) => ExitCode::FileNotFound,
        Error::InvalidFormat(_) => ExitCode::InvalidFormat,
        Error::SectionExists(_) => ExitCode::SectionExists,
        Error::SectionNotFound(_) => ExitCode::SectionNotFound,
        Error::CompressionFailed(_) | Error::DecompressionFailed(_) => ExitCode::CompressionError,
        Error::WriteFailed(_) => ExitCode::WriteFailed,
        // Future error variants - required by #[non_exhaustive]
        _ => ExitCode::UnknownError,
    }
}
