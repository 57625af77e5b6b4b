//! `seastitch` embeds and extracts opaque resource payloads — SEA blobs,
//! VFS blobs, and compressed self-extracting stub payloads — inside
//! Mach-O, ELF, and PE executables.
//!
//! The crate is organized leaves-first, the same layering the design this
//! crate follows uses:
//!
//! - [`format`] detects which of the three container formats a file is.
//! - [`payload`] frames the compressed-stub payload's on-disk byte layout.
//! - [`container`] is the per-format put/get/remove/write abstraction.
//! - [`compress`] wraps LZFSE compression with a hard size cap.
//! - [`cache`] resolves and validates the extraction cache root.
//! - [`stub`] detects compressed stubs and orchestrates extract/repack.
//! - [`integrity`] performs atomic writes and Mach-O re-signing.
//! - [`sea_config`] delegates SEA blob generation to a `.json` config.
//!
//! # Example
//!
//! ```rust,no_run
//! use seastitch::{container, format::PayloadName, Container};
//!
//! # fn main() -> seastitch::Result<()> {
//! let mut c = container::open("host")?;
//! c.put(PayloadName::Sea, std::fs::read("app.blob")?)?;
//! c.flip_fuse()?;
//! c.write(std::path::Path::new("host.out"))?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod compress;
pub mod container;
pub mod error;
pub mod format;
pub mod integrity;
pub mod payload;
pub mod sea_config;
pub mod stub;

pub use error::{Error, Result};
pub use format::{ExecFormat, PayloadName};
pub use container::Container;
