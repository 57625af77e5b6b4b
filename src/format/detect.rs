//! Container format detection by magic bytes.

use std::io::Read;

/// The container format a file was detected as, by magic bytes alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecFormat {
    /// Mach-O (thin or fat), macOS.
    MachO,
    /// ELF, Linux and other Unix-likes.
    Elf,
    /// PE/COFF, Windows.
    Pe,
    /// No known signature matched.
    Unknown,
}

impl ExecFormat {
    /// A human-readable name for this format.
    pub fn name(&self) -> &'static str {
        match self {
            ExecFormat::MachO => "Mach-O",
            ExecFormat::Elf => "ELF",
            ExecFormat::Pe => "PE",
            ExecFormat::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ExecFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

const ELF_MAGIC: [u8; 4] = [0x7F, 0x45, 0x4C, 0x46];

// Mach-O thin, 32/64-bit, both endiannesses.
const MACHO_THIN_MAGIC_32: u32 = 0xFEED_FACE;
const MACHO_THIN_MAGIC_64: u32 = 0xFEED_FACF;
const MACHO_THIN_CIGAM_32: u32 = 0xCEFA_EDFE;
const MACHO_THIN_CIGAM_64: u32 = 0xCFFA_EDFE;

// Mach-O fat, 32/64-bit, both endiannesses.
const MACHO_FAT_MAGIC: u32 = 0xCAFE_BABE;
const MACHO_FAT_CIGAM: u32 = 0xBEBA_FECA;
const MACHO_FAT_MAGIC_64: u32 = 0xCAFE_BABF;
const MACHO_FAT_CIGAM_64: u32 = 0xBFBA_FECA;

const PE_DOS_MAGIC: [u8; 2] = [0x4D, 0x5A];

/// Detects the container format of a file by reading its first 4 bytes.
///
/// Returns [`ExecFormat::Unknown`] for an inaccessible file, a file shorter
/// than 4 bytes, or any byte pattern that matches none of the known
/// signatures. Detection never fails with an error: an unreadable or
/// unrecognized file is simply not one of the three supported formats.
pub fn detect_format(path: impl AsRef<std::path::Path>) -> ExecFormat {
    let mut file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(_) => return ExecFormat::Unknown,
    };

    let mut header = [0u8; 4];
    let mut read_total = 0usize;
    while read_total < 4 {
        match file.read(&mut header[read_total..]) {
            Ok(0) => break,
            Ok(n) => read_total += n,
            Err(_) => return ExecFormat::Unknown,
        }
    }
    if read_total < 4 {
        return ExecFormat::Unknown;
    }

    detect_format_bytes(&header)
}

/// Detects the container format from an already-read 4-byte header.
pub fn detect_format_bytes(header: &[u8; 4]) -> ExecFormat {
    if *header == ELF_MAGIC {
        return ExecFormat::Elf;
    }
    if header[0] == PE_DOS_MAGIC[0] && header[1] == PE_DOS_MAGIC[1] {
        return ExecFormat::Pe;
    }

    let as_u32 = u32::from_be_bytes(*header);
    match as_u32 {
        MACHO_THIN_MAGIC_32
        | MACHO_THIN_MAGIC_64
        | MACHO_THIN_CIGAM_32
        | MACHO_THIN_CIGAM_64
        | MACHO_FAT_MAGIC
        | MACHO_FAT_CIGAM
        | MACHO_FAT_MAGIC_64
        | MACHO_FAT_CIGAM_64 => ExecFormat::MachO,
        _ => ExecFormat::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_elf() {
        assert_eq!(
            detect_format_bytes(&[0x7F, 0x45, 0x4C, 0x46]),
            ExecFormat::Elf
        );
    }

    #[test]
    fn detect_macho_thin_64() {
        assert_eq!(
            detect_format_bytes(&[0xFE, 0xED, 0xFA, 0xCF]),
            ExecFormat::MachO
        );
    }

    #[test]
    fn detect_macho_thin_32_swapped() {
        assert_eq!(
            detect_format_bytes(&[0xCE, 0xFA, 0xED, 0xFE]),
            ExecFormat::MachO
        );
    }

    #[test]
    fn detect_macho_fat() {
        assert_eq!(
            detect_format_bytes(&[0xCA, 0xFE, 0xBA, 0xBE]),
            ExecFormat::MachO
        );
        assert_eq!(
            detect_format_bytes(&[0xBE, 0xBA, 0xFE, 0xCA]),
            ExecFormat::MachO
        );
        assert_eq!(
            detect_format_bytes(&[0xCA, 0xFE, 0xBA, 0xBF]),
            ExecFormat::MachO
        );
        assert_eq!(
            detect_format_bytes(&[0xBF, 0xBA, 0xFE, 0xCA]),
            ExecFormat::MachO
        );
    }

    #[test]
    fn detect_pe() {
        assert_eq!(
            detect_format_bytes(&[0x4D, 0x5A, 0x90, 0x00]),
            ExecFormat::Pe
        );
    }

    #[test]
    fn detect_unknown() {
        assert_eq!(
            detect_format_bytes(&[0x00, 0x00, 0x00, 0x00]),
            ExecFormat::Unknown
        );
    }

    #[test]
    fn detect_missing_file() {
        assert_eq!(detect_format("/nonexistent/path/does-not-exist"), ExecFormat::Unknown);
    }
}
