//! ELF container driver.
//!
//! Payloads live as `PT_NOTE` program-header notes rather than ordinary
//! sections, because that is what the host interpreter's runtime resource
//! finder reads. `goblin::elf::Elf` parses the header, program headers, and
//! existing notes; mutation rebuilds the note segment from scratch
//! (remove-then-recreate), except for the compressed-stub repack path,
//! which instead overwrites a note's descriptor bytes in place to hold
//! the Program Header Table at its original file offset — moving it
//! segfaults any statically linked host that reads `phoff` directly out
//! of the loaded image.

use std::collections::HashMap;
use std::path::Path;

use goblin::elf::Elf;
use scroll::{Pread, Pwrite, LE};

use crate::format::{ExecFormat, PayloadName};
use crate::integrity;
use crate::{Error, Result};

use super::{flip_fuse_in_place, Container};

const PT_NOTE: u32 = 4;
const NOTE_TYPE_CUSTOM: u32 = 0;
const MAX_SECTION_COUNT: usize = 65_535;

#[derive(Debug, Clone)]
struct Note {
    owner: String,
    note_type: u32,
    descriptor: Vec<u8>,
}

/// The ELF container driver.
pub struct ElfContainer {
    original: Vec<u8>,
    is_64: bool,
    entry: u64,
    phoff: u64,
    notes: Vec<Note>,
    pending: HashMap<PayloadName, Option<Vec<u8>>>,
    is_statically_linked: bool,
}

impl ElfContainer {
    pub fn parse(bytes: Vec<u8>) -> Result<Self> {
        let elf = Elf::parse(&bytes)
            .map_err(|e| Error::InvalidFormat(format!("parsing ELF: {e}")))?;

        if !elf.is_64 {
            return Err(Error::InvalidFormat("32-bit ELF is not supported".into()));
        }
        if elf.header.e_shnum as usize > MAX_SECTION_COUNT {
            return Err(Error::InvalidFormat(format!(
                "section count {} exceeds sanity bound",
                elf.header.e_shnum
            )));
        }

        let mut notes = Vec::new();
        for ph in elf.program_headers.iter().filter(|ph| ph.p_type == PT_NOTE) {
            notes.extend(Self::parse_notes_from_segment(&bytes, ph.p_offset as usize, ph.p_filesz as usize)?);
        }

        let is_statically_linked = elf
            .program_headers
            .iter()
            .all(|ph| ph.p_type != goblin::elf::program_header::PT_DYNAMIC);

        Ok(ElfContainer {
            phoff: elf.header.e_phoff,
            entry: elf.header.e_entry,
            is_64: elf.is_64,
            notes,
            pending: HashMap::new(),
            is_statically_linked,
            original: bytes,
        })
    }

    /// Parses every note record out of one `PT_NOTE` segment's raw bytes.
    /// Notes are packed `namesz, descsz, type, name (padded to 4), desc
    /// (padded to 4)`.
    fn parse_notes_from_segment(bytes: &[u8], offset: usize, size: usize) -> Result<Vec<Note>> {
        if offset + size > bytes.len() {
            return Err(Error::InvalidFormat(
                "PT_NOTE segment runs past end of file".into(),
            ));
        }
        let seg = &bytes[offset..offset + size];
        let mut out = Vec::new();
        let mut cursor = 0usize;
        while cursor + 12 <= seg.len() {
            let namesz: u32 = seg
                .pread_with(cursor, LE)
                .map_err(|e| Error::InvalidFormat(format!("reading note namesz: {e}")))?;
            let descsz: u32 = seg
                .pread_with(cursor + 4, LE)
                .map_err(|e| Error::InvalidFormat(format!("reading note descsz: {e}")))?;
            let note_type: u32 = seg
                .pread_with(cursor + 8, LE)
                .map_err(|e| Error::InvalidFormat(format!("reading note type: {e}")))?;
            cursor += 12;

            let name_end = cursor + namesz as usize;
            if name_end > seg.len() {
                break;
            }
            let owner = String::from_utf8_lossy(&seg[cursor..name_end.saturating_sub(1).max(cursor)])
                .trim_end_matches('\0')
                .to_string();
            cursor += align4(namesz as usize);

            let desc_end = cursor + descsz as usize;
            if desc_end > seg.len() {
                break;
            }
            let descriptor = seg[cursor..desc_end].to_vec();
            cursor += align4(descsz as usize);

            out.push(Note {
                owner,
                note_type,
                descriptor,
            });
        }
        Ok(out)
    }

    fn existing(&self, name: PayloadName) -> Option<&Note> {
        self.notes.iter().find(|n| n.owner == name.elf_owner())
    }

    fn effective_notes(&self) -> Vec<Note> {
        let mut result: Vec<Note> = self
            .notes
            .iter()
            .filter(|n| {
                ![PayloadName::Sea, PayloadName::Vfs, PayloadName::PressedData]
                    .iter()
                    .any(|p| p.elf_owner() == n.owner)
            })
            .cloned()
            .collect();

        for name in [PayloadName::Sea, PayloadName::Vfs, PayloadName::PressedData] {
            let bytes = if let Some(p) = self.pending.get(&name) {
                p.clone()
            } else {
                self.existing(name).map(|n| n.descriptor.clone())
            };
            if let Some(descriptor) = bytes {
                result.push(Note {
                    owner: name.elf_owner().to_string(),
                    note_type: NOTE_TYPE_CUSTOM,
                    descriptor,
                });
            }
        }
        result
    }

    /// In-place overwrite of an existing note's descriptor, used for the
    /// compressed-stub repack path. Fails rather than relaying out if the
    /// new payload does not fit in the existing slot, preserving `phoff`
    /// exactly.
    pub fn overwrite_note_in_place(&mut self, name: PayloadName, bytes: &[u8]) -> Result<Vec<u8>> {
        let note = self
            .notes
            .iter()
            .find(|n| n.owner == name.elf_owner())
            .ok_or_else(|| Error::SectionNotFound(name.as_str().to_string()))?;
        if bytes.len() > note.descriptor.len() {
            return Err(Error::WriteFailed(format!(
                "new {} payload ({} bytes) does not fit in existing note slot ({} bytes); relayout is refused to preserve phoff",
                name.as_str(),
                bytes.len(),
                note.descriptor.len()
            )));
        }

        let mut out = self.original.clone();
        // Locate the PT_NOTE segment containing this note's descriptor and
        // patch bytes in place, zero-padding the remainder.
        let elf = Elf::parse(&out).map_err(|e| Error::InvalidFormat(format!("re-parsing ELF: {e}")))?;
        for ph in elf.program_headers.iter().filter(|ph| ph.p_type == PT_NOTE) {
            let seg_off = ph.p_offset as usize;
            let seg_size = ph.p_filesz as usize;
            if let Some(pos) = Self::find_note_descriptor_offset(&out, seg_off, seg_size, &name)? {
                let slot_len = note.descriptor.len();
                out[pos..pos + bytes.len()].copy_from_slice(bytes);
                for b in &mut out[pos + bytes.len()..pos + slot_len] {
                    *b = 0;
                }
                if out.pread_with::<u64>(0x20, LE).unwrap_or(0) != self.phoff {
                    return Err(Error::WriteFailed(
                        "phoff shifted unexpectedly during in-place note overwrite".into(),
                    ));
                }
                return Ok(out);
            }
        }
        Err(Error::SectionNotFound(name.as_str().to_string()))
    }

    fn find_note_descriptor_offset(
        bytes: &[u8],
        seg_off: usize,
        seg_size: usize,
        name: &PayloadName,
    ) -> Result<Option<usize>> {
        let seg = &bytes[seg_off..seg_off + seg_size];
        let mut cursor = 0usize;
        while cursor + 12 <= seg.len() {
            let namesz: u32 = seg.pread_with(cursor, LE).unwrap_or(0);
            let descsz: u32 = seg.pread_with(cursor + 4, LE).unwrap_or(0);
            cursor += 12;
            let name_end = cursor + namesz as usize;
            if name_end > seg.len() {
                break;
            }
            let owner = String::from_utf8_lossy(&seg[cursor..name_end.saturating_sub(1).max(cursor)])
                .trim_end_matches('\0')
                .to_string();
            cursor += align4(namesz as usize);
            let desc_start = cursor;
            let desc_end = cursor + descsz as usize;
            if desc_end > seg.len() {
                break;
            }
            if owner == name.elf_owner() {
                return Ok(Some(seg_off + desc_start));
            }
            cursor += align4(descsz as usize);
        }
        Ok(None)
    }

    pub fn is_statically_linked(&self) -> bool {
        self.is_statically_linked
    }

    pub fn phoff(&self) -> u64 {
        self.phoff
    }
}

fn align4(n: usize) -> usize {
    (n + 3) / 4 * 4
}

fn encode_note(name: &str, note_type: u32, descriptor: &[u8]) -> Vec<u8> {
    let namesz = name.len() as u32 + 1; // NUL-terminated, per ELF note convention
    let descsz = descriptor.len() as u32;
    let name_field_len = align4(namesz as usize);
    let desc_field_len = align4(descsz as usize);
    let total = 12 + name_field_len + desc_field_len;

    let mut out = vec![0u8; total];
    out.pwrite_with(namesz, 0, LE).ok();
    out.pwrite_with(descsz, 4, LE).ok();
    out.pwrite_with(note_type, 8, LE).ok();
    out[12..12 + name.len()].copy_from_slice(name.as_bytes());
    // out[12 + name.len()] is the NUL terminator; padding bytes stay zero.
    let desc_start = 12 + name_field_len;
    out[desc_start..desc_start + descriptor.len()].copy_from_slice(descriptor);
    out
}

impl Container for ElfContainer {
    fn has(&self, name: PayloadName) -> bool {
        if let Some(p) = self.pending.get(&name) {
            return p.is_some();
        }
        self.existing(name).is_some()
    }

    fn get(&self, name: PayloadName) -> Result<Vec<u8>> {
        if let Some(p) = self.pending.get(&name) {
            return p
                .clone()
                .ok_or_else(|| Error::SectionNotFound(name.as_str().to_string()));
        }
        self.existing(name)
            .map(|n| n.descriptor.clone())
            .ok_or_else(|| Error::SectionNotFound(name.as_str().to_string()))
    }

    fn put(&mut self, name: PayloadName, bytes: Vec<u8>) -> Result<()> {
        self.pending.insert(name, Some(bytes));
        Ok(())
    }

    fn remove(&mut self, name: PayloadName) -> Result<()> {
        self.pending.insert(name, None);
        Ok(())
    }

    fn list(&self) -> Vec<(PayloadName, usize)> {
        [PayloadName::Sea, PayloadName::Vfs, PayloadName::PressedData]
            .into_iter()
            .filter_map(|name| {
                let len = if let Some(p) = self.pending.get(&name) {
                    p.as_ref().map(|b| b.len())
                } else {
                    self.existing(name).map(|n| n.descriptor.len())
                };
                len.map(|l| (name, l))
            })
            .collect()
    }

    fn flip_fuse(&mut self) -> Result<bool> {
        if let Some(Some(bytes)) = self.pending.get_mut(&PayloadName::Sea) {
            if flip_fuse_in_place(bytes) {
                return Ok(true);
            }
        }
        for note in &mut self.notes {
            if flip_fuse_in_place(&mut note.descriptor) {
                return Ok(true);
            }
        }
        log::warn!("fuse literal not found in any ELF note; SEA mode may be unsupported by this host");
        Ok(false)
    }

    fn write(&mut self, path: &Path) -> Result<()> {
        let notes = self.effective_notes();

        let mut note_bytes = Vec::new();
        for n in &notes {
            note_bytes.extend_from_slice(&encode_note(&n.owner, n.note_type, &n.descriptor));
        }

        // Append the new PT_NOTE segment's content at the end of the file
        // and patch (or append) its program header entry; every other
        // byte of the original image — including the PHT at `self.phoff`
        // — is left untouched, satisfying the PHT-offset-preservation
        // requirement for the common case (growing the note segment,
        // rather than the stub in-place overwrite handled separately by
        // `overwrite_note_in_place`).
        let mut out = self.original.clone();
        let note_file_off = out.len();
        out.extend_from_slice(&note_bytes);

        let mut patched_existing = false;
        let phoff = self.phoff as usize;
        let phentsize = 56usize; // Elf64_Phdr
        let phnum: u16 = out.pread_with(0x38, LE).unwrap_or(0);
        for i in 0..phnum as usize {
            let entry_off = phoff + i * phentsize;
            let p_type: u32 = out.pread_with(entry_off, LE).unwrap_or(u32::MAX);
            if p_type == PT_NOTE {
                out.pwrite_with(note_file_off as u64, entry_off + 8, LE).ok();
                out.pwrite_with(note_file_off as u64, entry_off + 16, LE).ok(); // p_vaddr best-effort
                out.pwrite_with(note_file_off as u64, entry_off + 24, LE).ok(); // p_paddr best-effort
                out.pwrite_with(note_bytes.len() as u64, entry_off + 32, LE).ok();
                out.pwrite_with(note_bytes.len() as u64, entry_off + 40, LE).ok();
                patched_existing = true;
                break;
            }
        }

        if !patched_existing {
            return Err(Error::WriteFailed(
                "no PT_NOTE program header present to host a new note segment; \
                 synthesizing a brand new program header would relocate the PHT \
                 and is refused"
                    .into(),
            ));
        }

        if out.pread_with::<u64>(0x20, LE).unwrap_or(0) != self.phoff {
            return Err(Error::WriteFailed(
                "phoff shifted unexpectedly while writing ELF output".into(),
            ));
        }
        let _ = self.entry;
        let _ = self.is_64;

        integrity::atomic_write(path, &out, true)
    }

    fn format(&self) -> ExecFormat {
        ExecFormat::Elf
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}
