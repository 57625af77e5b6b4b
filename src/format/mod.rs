//! Executable container format detection and payload slot identifiers.

pub(crate) mod detect;

pub use detect::{detect_format, ExecFormat};

/// Canonical names for the payload slots this crate knows how to read and
/// write, and their per-format spellings.
///
/// Mach-O and PE uppercase or namespace these names differently than the
/// logical identifier used on the command line; centralizing the mapping
/// here means every driver and the stub manager reference one source of
/// truth instead of duplicating string literals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadName {
    /// The Single Executable Application blob.
    Sea,
    /// The Virtual File System blob.
    Vfs,
    /// The compressed self-extracting stub's inner payload.
    PressedData,
}

impl PayloadName {
    /// The logical identifier used in diagnostics and the CLI.
    pub fn as_str(&self) -> &'static str {
        match self {
            PayloadName::Sea => "NODE_SEA_BLOB",
            PayloadName::Vfs => "SMOL_VFS_BLOB",
            PayloadName::PressedData => "PRESSED_DATA",
        }
    }

    /// Mach-O segment name that contains this payload's section.
    pub fn macho_segment(&self) -> &'static str {
        match self {
            PayloadName::Sea | PayloadName::Vfs => "NODE_SEA",
            PayloadName::PressedData => "SMOL",
        }
    }

    /// Mach-O section name within [`Self::macho_segment`].
    pub fn macho_section(&self) -> &'static str {
        match self {
            PayloadName::Sea => "__NODE_SEA_BLOB",
            PayloadName::Vfs => "__SMOL_VFS_BLOB",
            PayloadName::PressedData => "__PRESSED_DATA",
        }
    }

    /// ELF `PT_NOTE` owner name.
    pub fn elf_owner(&self) -> &'static str {
        match self {
            PayloadName::Sea => "NODE_SEA_BLOB",
            PayloadName::Vfs => "SMOL_VFS_BLOB",
            PayloadName::PressedData => "PRESSED_DATA",
        }
    }

    /// PE resource name (already uppercased, as Windows resource lookup
    /// requires) for the `RT_RCDATA` payloads. Returns `None` for
    /// [`PayloadName::PressedData`], which uses a section rather than a
    /// resource on PE.
    pub fn pe_resource_name(&self) -> Option<&'static str> {
        match self {
            PayloadName::Sea => Some("NODE_SEA_BLOB"),
            PayloadName::Vfs => Some("SMOL_VFS_BLOB"),
            PayloadName::PressedData => None,
        }
    }

    /// PE section name used for the compressed-stub payload.
    pub fn pe_section_name(&self) -> &'static str {
        ".pressed_data"
    }
}
