//! Mach-O container driver.
//!
//! Mach-O mutation is a load-command surgery problem: adding a payload
//! means appending a `LC_SEGMENT_64` (or growing an existing one) and its
//! section content, and removing a code signature means dropping its load
//! command and shrinking `sizeofcmds`. `goblin::mach` has no write-side API
//! for any of this, so this driver parses the header and load commands
//! itself with `scroll`, directly over the struct layouts Apple documents
//! in `<mach-o/loader.h>` — the same raw-byte-writer approach the ELF
//! stub-repack path needs, generalized here because Mach-O load-command
//! mutation has no safe round-trip through a read-then-fully-reserialize
//! parser either.

use std::collections::HashMap;
use std::path::Path;

use scroll::{Pread, Pwrite, LE};

use crate::format::{ExecFormat, PayloadName};
use crate::integrity;
use crate::{Error, Result};

use super::{flip_fuse_in_place, Container};

const MH_MAGIC_64: u32 = 0xFEED_FACF;
const MH_CIGAM_64: u32 = 0xCFFA_EDFE;
const MH_MAGIC_32: u32 = 0xFEED_FACE;
const MH_CIGAM_32: u32 = 0xCEFA_EDFE;
const FAT_MAGIC: u32 = 0xCAFE_BABE;
const FAT_CIGAM: u32 = 0xBEBA_FECA;

const LC_SEGMENT: u32 = 0x01;
const LC_SEGMENT_64: u32 = 0x19;
const LC_CODE_SIGNATURE: u32 = 0x1d;

const VM_PROT_READ: i32 = 0x1;
const VM_PROT_WRITE: i32 = 0x2;
const VM_PROT_EXECUTE: i32 = 0x4;

const SEG_NODE_SEA: &str = "NODE_SEA";
const SEG_SMOL: &str = "SMOL";

#[derive(Debug, Clone)]
struct LoadCommand {
    cmd: u32,
    raw: Vec<u8>,
}

#[derive(Debug, Clone)]
struct Section {
    sectname: [u8; 16],
    segname: [u8; 16],
    addr: u64,
    size: u64,
    offset: u32,
    align: u32,
    reloff: u32,
    nreloc: u32,
    flags: u32,
}

fn fixed_name(bytes: &[u8; 16]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(16);
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

fn pack_name(name: &str) -> [u8; 16] {
    let mut out = [0u8; 16];
    let src = name.as_bytes();
    let n = src.len().min(16);
    out[..n].copy_from_slice(&src[..n]);
    out
}

/// The Mach-O container driver. Holds the whole file buffer; fat binaries
/// record every slice's offset and length but only slice 0 is mutated — an
/// acknowledged simplification, since a multi-arch-aware `inject` would need
/// to decide what "the SEA blob" means per architecture slice.
pub struct MachoContainer {
    original: Vec<u8>,
    /// Byte offset of the Mach-O slice this driver operates on (0 for a
    /// thin binary; slice 0's offset for a fat binary).
    slice_offset: usize,
    slice_size: usize,
    is_64: bool,
    big_endian: bool,
    cputype: u32,
    cpusubtype: u32,
    filetype: u32,
    header_flags: u32,
    load_commands: Vec<LoadCommand>,
    /// `(segment, section)` content already present on disk, keyed by
    /// section name within its segment, so `get`/`has` work before write.
    sections: HashMap<(String, String), Section>,
    /// The underlying payload bytes for each known section, read eagerly
    /// at parse time since sections referenced by this crate are small
    /// relative to the whole binary.
    section_bytes: HashMap<(String, String), Vec<u8>>,
    /// Slots queued for this write cycle: `None` means "remove", `Some`
    /// means "set to these bytes".
    pending: HashMap<PayloadName, Option<Vec<u8>>>,
    fat_slices: Vec<(usize, usize)>,
    had_code_signature: bool,
}

impl MachoContainer {
    pub fn parse(bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() < 4 {
            return Err(Error::InvalidFormat("Mach-O file too short".into()));
        }
        let magic_be: u32 = bytes
            .pread_with(0, scroll::BE)
            .map_err(|e| Error::InvalidFormat(format!("reading Mach-O magic: {e}")))?;

        let (slice_offset, slice_size, fat_slices) = if magic_be == FAT_MAGIC || magic_be == FAT_CIGAM {
            Self::parse_fat_header(&bytes)?
        } else {
            (0usize, bytes.len(), vec![(0usize, bytes.len())])
        };

        let slice = &bytes[slice_offset..slice_offset + slice_size];
        let magic: u32 = slice
            .pread_with(0, scroll::BE)
            .map_err(|e| Error::InvalidFormat(format!("reading Mach-O slice magic: {e}")))?;
        // `magic` is read with a fixed big-endian probe regardless of host
        // byte order, so the real-world case (a little-endian file, the
        // overwhelming majority of targets) comes back as the CIGAM
        // constant, not the MAGIC one: the probe had to swap the bytes to
        // recognize it. MAGIC coming back directly means the probe needed
        // no swap, i.e. the file itself is big-endian.
        let (is_64, big_endian) = match magic {
            MH_MAGIC_64 => (true, true),
            MH_CIGAM_64 => (true, false),
            MH_MAGIC_32 => (false, true),
            MH_CIGAM_32 => (false, false),
            other => {
                return Err(Error::InvalidFormat(format!(
                    "unrecognized Mach-O slice magic {other:#x}"
                )))
            }
        };
        if big_endian {
            return Err(Error::InvalidFormat(
                "big-endian Mach-O is not supported".into(),
            ));
        }
        if !is_64 {
            return Err(Error::InvalidFormat(
                "32-bit Mach-O is not supported".into(),
            ));
        }

        // mach_header_64: magic, cputype, cpusubtype, filetype, ncmds,
        // sizeofcmds, flags, reserved — 32 bytes.
        let cputype: u32 = slice
            .pread_with(4, LE)
            .map_err(|e| Error::InvalidFormat(format!("reading cputype: {e}")))?;
        let cpusubtype: u32 = slice
            .pread_with(8, LE)
            .map_err(|e| Error::InvalidFormat(format!("reading cpusubtype: {e}")))?;
        let filetype: u32 = slice
            .pread_with(12, LE)
            .map_err(|e| Error::InvalidFormat(format!("reading filetype: {e}")))?;
        let header_flags: u32 = slice
            .pread_with(24, LE)
            .map_err(|e| Error::InvalidFormat(format!("reading header flags: {e}")))?;
        let ncmds: u32 = slice
            .pread_with(16, LE)
            .map_err(|e| Error::InvalidFormat(format!("reading ncmds: {e}")))?;
        let sizeofcmds: u32 = slice
            .pread_with(20, LE)
            .map_err(|e| Error::InvalidFormat(format!("reading sizeofcmds: {e}")))?;
        if ncmds > 10_000 {
            return Err(Error::InvalidFormat(format!(
                "load command count {ncmds} exceeds sanity bound"
            )));
        }

        let header_len = 32usize;
        let mut cursor = header_len;
        let mut load_commands = Vec::with_capacity(ncmds as usize);
        let mut sections = HashMap::new();
        let mut section_bytes = HashMap::new();
        let mut had_code_signature = false;

        for _ in 0..ncmds {
            if cursor + 8 > slice.len() {
                return Err(Error::InvalidFormat(
                    "load command table runs past end of slice".into(),
                ));
            }
            let cmd: u32 = slice
                .pread_with(cursor, LE)
                .map_err(|e| Error::InvalidFormat(format!("reading load command tag: {e}")))?;
            let cmdsize: u32 = slice
                .pread_with(cursor + 4, LE)
                .map_err(|e| Error::InvalidFormat(format!("reading load command size: {e}")))?;
            if cmdsize < 8 || cursor + cmdsize as usize > slice.len() {
                return Err(Error::InvalidFormat(
                    "load command size out of bounds".into(),
                ));
            }
            let raw = slice[cursor..cursor + cmdsize as usize].to_vec();

            if cmd == LC_CODE_SIGNATURE {
                had_code_signature = true;
            }

            if cmd == LC_SEGMENT_64 {
                Self::index_segment_sections(&raw, slice, &mut sections, &mut section_bytes)?;
            } else if cmd == LC_SEGMENT {
                return Err(Error::InvalidFormat(
                    "32-bit LC_SEGMENT in a 64-bit Mach-O is unsupported".into(),
                ));
            }

            load_commands.push(LoadCommand { cmd, raw });
            cursor += cmdsize as usize;
        }
        if cursor > header_len + sizeofcmds as usize {
            return Err(Error::InvalidFormat(
                "load commands overran declared sizeofcmds".into(),
            ));
        }

        Ok(MachoContainer {
            original: bytes,
            slice_offset,
            slice_size,
            is_64,
            big_endian,
            cputype,
            cpusubtype,
            filetype,
            header_flags,
            load_commands,
            sections,
            section_bytes,
            pending: HashMap::new(),
            fat_slices,
            had_code_signature,
        })
    }

    fn parse_fat_header(bytes: &[u8]) -> Result<(usize, usize, Vec<(usize, usize)>)> {
        let nfat_arch: u32 = bytes
            .pread_with(4, scroll::BE)
            .map_err(|e| Error::InvalidFormat(format!("reading fat_header.nfat_arch: {e}")))?;
        if nfat_arch == 0 || nfat_arch > 64 {
            return Err(Error::InvalidFormat(format!(
                "fat_header.nfat_arch {nfat_arch} out of sane bounds"
            )));
        }
        let mut slices = Vec::with_capacity(nfat_arch as usize);
        let mut cursor = 8usize;
        for _ in 0..nfat_arch {
            // fat_arch: cputype, cpusubtype, offset, size, align — 20 bytes.
            let offset: u32 = bytes
                .pread_with(cursor + 8, scroll::BE)
                .map_err(|e| Error::InvalidFormat(format!("reading fat_arch.offset: {e}")))?;
            let size: u32 = bytes
                .pread_with(cursor + 12, scroll::BE)
                .map_err(|e| Error::InvalidFormat(format!("reading fat_arch.size: {e}")))?;
            let offset = offset as usize;
            let size = size as usize;
            if offset + size > bytes.len() {
                return Err(Error::InvalidFormat(
                    "fat_arch slice runs past end of file".into(),
                ));
            }
            slices.push((offset, size));
            cursor += 20;
        }
        let (first_off, first_size) = slices[0];
        Ok((first_off, first_size, slices))
    }

    fn index_segment_sections(
        raw: &[u8],
        slice: &[u8],
        sections: &mut HashMap<(String, String), Section>,
        section_bytes: &mut HashMap<(String, String), Vec<u8>>,
    ) -> Result<()> {
        // segment_command_64: cmd, cmdsize, segname[16], vmaddr, vmsize,
        // fileoff, filesize, maxprot, initprot, nsects, flags — 72 bytes.
        let segname_bytes: [u8; 16] = raw
            .pread_with(8, ())
            .map_err(|e| Error::InvalidFormat(format!("reading segname: {e}")))?;
        let segname = fixed_name(&segname_bytes);
        let nsects: u32 = raw
            .pread_with(64, LE)
            .map_err(|e| Error::InvalidFormat(format!("reading nsects: {e}")))?;

        let mut cursor = 72usize;
        for _ in 0..nsects {
            if cursor + 80 > raw.len() {
                return Err(Error::InvalidFormat(
                    "section_64 table runs past segment command".into(),
                ));
            }
            let sectname_bytes: [u8; 16] = raw
                .pread_with(cursor, ())
                .map_err(|e| Error::InvalidFormat(format!("reading sectname: {e}")))?;
            let section_segname: [u8; 16] = raw
                .pread_with(cursor + 16, ())
                .map_err(|e| Error::InvalidFormat(format!("reading section segname: {e}")))?;
            let addr: u64 = raw
                .pread_with(cursor + 32, LE)
                .map_err(|e| Error::InvalidFormat(format!("reading section addr: {e}")))?;
            let size: u64 = raw
                .pread_with(cursor + 40, LE)
                .map_err(|e| Error::InvalidFormat(format!("reading section size: {e}")))?;
            let offset: u32 = raw
                .pread_with(cursor + 48, LE)
                .map_err(|e| Error::InvalidFormat(format!("reading section offset: {e}")))?;
            let align: u32 = raw
                .pread_with(cursor + 52, LE)
                .map_err(|e| Error::InvalidFormat(format!("reading section align: {e}")))?;
            let reloff: u32 = raw
                .pread_with(cursor + 56, LE)
                .map_err(|e| Error::InvalidFormat(format!("reading section reloff: {e}")))?;
            let nreloc: u32 = raw
                .pread_with(cursor + 60, LE)
                .map_err(|e| Error::InvalidFormat(format!("reading section nreloc: {e}")))?;
            let flags: u32 = raw
                .pread_with(cursor + 64, LE)
                .map_err(|e| Error::InvalidFormat(format!("reading section flags: {e}")))?;

            let sectname = fixed_name(&sectname_bytes);
            let key = (segname.clone(), sectname.clone());

            if offset != 0 && size > 0 {
                let start = offset as usize;
                let end = start + size as usize;
                if end > slice.len() {
                    return Err(Error::InvalidFormat(format!(
                        "section {segname}/{sectname} content runs past end of slice"
                    )));
                }
                section_bytes.insert(key.clone(), slice[start..end].to_vec());
            } else {
                section_bytes.insert(key.clone(), Vec::new());
            }

            sections.insert(
                key,
                Section {
                    sectname: sectname_bytes,
                    segname: section_segname,
                    addr,
                    size,
                    offset,
                    align,
                    reloff,
                    nreloc,
                    flags,
                },
            );
            cursor += 80;
        }
        Ok(())
    }

    fn existing_bytes(&self, name: PayloadName) -> Option<&Vec<u8>> {
        let key = (name.macho_segment().to_string(), name.macho_section().to_string());
        self.section_bytes.get(&key)
    }

    fn segment_protection(name: PayloadName) -> (i32, i32) {
        match name {
            PayloadName::Sea | PayloadName::Vfs => (
                VM_PROT_READ | VM_PROT_WRITE | VM_PROT_EXECUTE,
                VM_PROT_READ | VM_PROT_WRITE | VM_PROT_EXECUTE,
            ),
            PayloadName::PressedData => (VM_PROT_READ, VM_PROT_READ),
        }
    }

    /// The Mach-O slice this driver was parsed from, as a borrowed view into
    /// `self.original`.
    fn slice(&self) -> &[u8] {
        &self.original[self.slice_offset..self.slice_offset + self.slice_size]
    }

    /// Rebuilds the slice the way the ELF and PE drivers do: the original
    /// bytes are kept verbatim everywhere except the load-command table
    /// (patched in place, within whatever padding already separates it from
    /// the first real section) and the payload segments themselves, which
    /// are dropped from their old location (if any) and re-appended at the
    /// end of the file. Every other segment, section and load command keeps
    /// its original file offset and address untouched.
    fn rebuild_slice(&self) -> Result<Vec<u8>> {
        let slice = self.slice();
        let header_len = 32usize;

        // `drop_floor`: truncate the original slice here, discarding stale
        // payload-segment content and the old code signature blob (both of
        // which always live at or after this point). Everything before it —
        // every other segment, section and load command's referenced data —
        // is preserved byte-for-byte.
        let mut drop_floor = slice.len();
        let mut code_sig_dataoff: Option<usize> = None;
        for lc in &self.load_commands {
            if lc.cmd == LC_CODE_SIGNATURE {
                let dataoff: u32 = lc
                    .raw
                    .pread_with(8, LE)
                    .map_err(|e| Error::Unknown(format!("reading code signature dataoff: {e}")))?;
                code_sig_dataoff = Some(dataoff as usize);
                drop_floor = drop_floor.min(dataoff as usize);
            }
            if lc.cmd == LC_SEGMENT_64 {
                let segname_bytes: [u8; 16] = lc
                    .raw
                    .pread_with(8, ())
                    .map_err(|e| Error::Unknown(format!("re-reading segname: {e}")))?;
                let segname = fixed_name(&segname_bytes);
                if segname == SEG_NODE_SEA || segname == SEG_SMOL {
                    let fileoff: u64 = lc
                        .raw
                        .pread_with(40, LE)
                        .map_err(|e| Error::Unknown(format!("re-reading fileoff: {e}")))?;
                    drop_floor = drop_floor.min(fileoff as usize);
                }
            }
        }

        // `header_room`: if set, the load-command table (and any new
        // commands we insert) must fit before this offset — the first byte
        // of real, non-payload section content — since that's the boundary
        // we must never write past without actually moving that content,
        // which this driver refuses to do. `None` means no such section
        // exists, so there's nothing downstream of the header to protect.
        let header_room: Option<usize> = self
            .sections
            .iter()
            .filter(|((segname, _), s)| segname != SEG_NODE_SEA && segname != SEG_SMOL && s.offset > 0)
            .map(|(_, s)| s.offset as usize)
            .min();

        let mut out = slice[..drop_floor].to_vec();

        // Keep every non-payload, non-signature load command exactly as it
        // was. The one exception is __LINKEDIT: if we're about to drop a
        // trailing code signature blob that lived inside it, shrink its
        // recorded size so it doesn't claim bytes that no longer exist.
        let mut kept: Vec<Vec<u8>> = Vec::with_capacity(self.load_commands.len());
        for lc in &self.load_commands {
            if lc.cmd == LC_CODE_SIGNATURE {
                continue;
            }
            if lc.cmd == LC_SEGMENT_64 {
                let segname_bytes: [u8; 16] = lc
                    .raw
                    .pread_with(8, ())
                    .map_err(|e| Error::Unknown(format!("re-reading segname: {e}")))?;
                let segname = fixed_name(&segname_bytes);
                if segname == SEG_NODE_SEA || segname == SEG_SMOL {
                    continue;
                }
                if segname == "__LINKEDIT" {
                    if let Some(dataoff) = code_sig_dataoff {
                        let fileoff: u64 = lc.raw.pread_with(40, LE).unwrap_or(0);
                        let filesize: u64 = lc.raw.pread_with(48, LE).unwrap_or(0);
                        if (dataoff as u64) > fileoff && (dataoff as u64) < fileoff + filesize {
                            let mut raw = lc.raw.clone();
                            let shrunk = dataoff as u64 - fileoff;
                            raw.pwrite_with(shrunk, 48, LE).ok(); // filesize
                            raw.pwrite_with(shrunk, 32, LE).ok(); // vmsize
                            kept.push(raw);
                            continue;
                        }
                    }
                }
            }
            kept.push(lc.raw.clone());
        }

        // Where new payload segments get mapped in memory: right after the
        // highest address any existing segment already claims.
        let mut next_vmaddr: u64 = self
            .load_commands
            .iter()
            .filter(|lc| lc.cmd == LC_SEGMENT_64)
            .map(|lc| {
                let vmaddr: u64 = lc.raw.pread_with(24, LE).unwrap_or(0);
                let vmsize: u64 = lc.raw.pread_with(32, LE).unwrap_or(0);
                vmaddr + vmsize
            })
            .max()
            .unwrap_or(0x1_0000_0000);
        next_vmaddr = (next_vmaddr + 0x3FFF) / 0x4000 * 0x4000;

        // Resolve which payload sections should exist after this write:
        // whatever was already on disk for NODE_SEA/SMOL, overlaid with
        // this cycle's pending puts/removes.
        let mut resolved: HashMap<(String, String), Vec<u8>> = HashMap::new();
        for (key, bytes) in &self.section_bytes {
            if key.0 == SEG_NODE_SEA || key.0 == SEG_SMOL {
                resolved.insert(key.clone(), bytes.clone());
            }
        }
        for (name, pending) in &self.pending {
            let key = (name.macho_segment().to_string(), name.macho_section().to_string());
            match pending {
                Some(bytes) => {
                    resolved.insert(key, bytes.clone());
                }
                None => {
                    resolved.remove(&key);
                }
            }
        }
        let mut by_segment: HashMap<String, Vec<(String, Vec<u8>)>> = HashMap::new();
        for (key, bytes) in resolved {
            by_segment.entry(key.0).or_default().push((key.1, bytes));
        }
        let mut ordered_segments: Vec<String> = by_segment.keys().cloned().collect();
        ordered_segments.sort();
        for segname in &ordered_segments {
            by_segment.get_mut(segname).unwrap().sort_by(|a, b| a.0.cmp(&b.0));
        }

        // Command sizes are fixed by section counts alone, so the total
        // load-command footprint can be known before any content is placed.
        let new_cmd_sizes: Vec<usize> = ordered_segments
            .iter()
            .map(|s| 72 + 80 * by_segment[s].len())
            .collect();
        let total_cmds_bytes: usize =
            kept.iter().map(Vec::len).sum::<usize>() + new_cmd_sizes.iter().sum::<usize>();
        let total_ncmds = kept.len() + ordered_segments.len();

        // `fill_to`: everything in `[header_len + total_cmds_bytes, fill_to)`
        // is zeroed once the command table is written. When real content
        // follows the header (`header_room` is `Some`), that boundary is
        // fixed — we may never write past it — and an overflow is a hard
        // error. When nothing follows (`None`), there's nothing to protect
        // and `out` can simply grow to fit.
        let fill_to = match header_room {
            Some(room) => {
                if header_len + total_cmds_bytes > room {
                    return Err(Error::WriteFailed(format!(
                        "Mach-O header has no room for {total_cmds_bytes} bytes of load \
                         commands before the first section at offset {room:#x}; re-link the \
                         host binary with additional header padding \
                         (e.g. -headerpad_max_install_names)"
                    )));
                }
                room
            }
            None => {
                let needed = header_len + total_cmds_bytes;
                if needed > out.len() {
                    // Nothing of substance separates the command table from
                    // `drop_floor` here, so it's safe to grow the file to
                    // fit — `out` is resized now, before any payload content
                    // is appended, so new commands and the content they
                    // describe never overlap.
                    out.resize(needed, 0);
                }
                out.len()
            }
        };

        // Lay out payload segment content at the tail of `out`, which now
        // ends at or beyond `fill_to`.
        let mut new_segment_cmds: Vec<Vec<u8>> = Vec::with_capacity(ordered_segments.len());
        for segname in &ordered_segments {
            let sects = by_segment.remove(segname).unwrap();
            let (maxprot, initprot) = if segname == SEG_NODE_SEA {
                Self::segment_protection(PayloadName::Sea)
            } else {
                Self::segment_protection(PayloadName::PressedData)
            };

            let seg_fileoff = out.len();
            let seg_vmaddr = next_vmaddr;
            let mut section_cmds = Vec::new();
            for (sectname, bytes) in &sects {
                let aligned_off = (out.len() + 3) / 4 * 4;
                out.resize(aligned_off, 0);
                let file_off = aligned_off;
                let addr = seg_vmaddr + (file_off - seg_fileoff) as u64;
                out.extend_from_slice(bytes);

                section_cmds.push(Section {
                    sectname: pack_name(sectname),
                    segname: pack_name(segname),
                    addr,
                    size: bytes.len() as u64,
                    offset: file_off as u32,
                    align: 2,
                    reloff: 0,
                    nreloc: 0,
                    flags: 0,
                });
            }
            let seg_filesize = (out.len() - seg_fileoff) as u64;
            next_vmaddr = (seg_vmaddr + seg_filesize + 0x3FFF) / 0x4000 * 0x4000;

            let cmdsize = 72 + 80 * section_cmds.len();
            let mut raw = vec![0u8; cmdsize];
            raw.pwrite_with(LC_SEGMENT_64, 0, LE).ok();
            raw.pwrite_with(cmdsize as u32, 4, LE).ok();
            raw[8..24].copy_from_slice(&pack_name(segname));
            raw.pwrite_with(seg_vmaddr, 24, LE).ok();
            raw.pwrite_with(seg_filesize, 32, LE).ok();
            raw.pwrite_with(seg_fileoff as u64, 40, LE).ok();
            raw.pwrite_with(seg_filesize, 48, LE).ok();
            raw.pwrite_with(maxprot, 56, LE).ok();
            raw.pwrite_with(initprot, 60, LE).ok();
            raw.pwrite_with(section_cmds.len() as u32, 64, LE).ok();
            raw.pwrite_with(0u32, 68, LE).ok();

            let mut off = 72;
            for s in &section_cmds {
                raw[off..off + 16].copy_from_slice(&s.sectname);
                raw[off + 16..off + 32].copy_from_slice(&s.segname);
                raw.pwrite_with(s.addr, off + 32, LE).ok();
                raw.pwrite_with(s.size, off + 40, LE).ok();
                raw.pwrite_with(s.offset, off + 48, LE).ok();
                raw.pwrite_with(s.align, off + 52, LE).ok();
                raw.pwrite_with(s.reloff, off + 56, LE).ok();
                raw.pwrite_with(s.nreloc, off + 60, LE).ok();
                raw.pwrite_with(s.flags, off + 64, LE).ok();
                off += 80;
            }
            new_segment_cmds.push(raw);
        }

        // Note: `out` may already extend past `fill_to` (preserved section
        // content from the original file, followed by whatever payload
        // content was just appended beyond it); only `[0, fill_to)` is ours
        // to rewrite for the header and command table.
        out.pwrite_with(MH_CIGAM_64, 0, scroll::BE).ok();
        out.pwrite_with(self.cputype, 4, LE).ok();
        out.pwrite_with(self.cpusubtype, 8, LE).ok();
        out.pwrite_with(self.filetype, 12, LE).ok();
        out.pwrite_with(total_ncmds as u32, 16, LE).ok();
        out.pwrite_with(total_cmds_bytes as u32, 20, LE).ok();
        out.pwrite_with(self.header_flags, 24, LE).ok();

        let mut cursor = header_len;
        for raw in kept.iter().chain(new_segment_cmds.iter()) {
            out[cursor..cursor + raw.len()].copy_from_slice(raw);
            cursor += raw.len();
        }
        for b in &mut out[cursor..fill_to] {
            *b = 0;
        }

        Ok(out)
    }
}

impl Container for MachoContainer {
    fn has(&self, name: PayloadName) -> bool {
        if let Some(p) = self.pending.get(&name) {
            return p.is_some();
        }
        self.existing_bytes(name).is_some()
    }

    fn get(&self, name: PayloadName) -> Result<Vec<u8>> {
        if let Some(p) = self.pending.get(&name) {
            return p
                .clone()
                .ok_or_else(|| Error::SectionNotFound(name.as_str().to_string()));
        }
        self.existing_bytes(name)
            .cloned()
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
                    self.existing_bytes(name).map(|b| b.len())
                };
                len.map(|l| (name, l))
            })
            .collect()
    }

    fn flip_fuse(&mut self) -> Result<bool> {
        // Flip in the already-pending SEA bytes if present, else scan every
        // known section in turn. Sections are patched directly in
        // `self.original`, not in the `section_bytes` cache, because `write`
        // now copies non-payload section content straight out of
        // `self.original` rather than re-serializing it from that cache.
        if let Some(Some(bytes)) = self.pending.get_mut(&PayloadName::Sea) {
            if flip_fuse_in_place(bytes) {
                return Ok(true);
            }
        }
        let slice_offset = self.slice_offset;
        let keys: Vec<(String, String)> = self.sections.keys().cloned().collect();
        for key in keys {
            let Some(section) = self.sections.get(&key) else {
                continue;
            };
            if section.offset == 0 || section.size == 0 {
                continue;
            }
            let start = slice_offset + section.offset as usize;
            let end = start + section.size as usize;
            if end > self.original.len() {
                continue;
            }
            if flip_fuse_in_place(&mut self.original[start..end]) {
                if let Some(cached) = self.section_bytes.get_mut(&key) {
                    cached.copy_from_slice(&self.original[start..end]);
                }
                return Ok(true);
            }
        }
        log::warn!("fuse literal not found in any Mach-O section; SEA mode may be unsupported by this host");
        Ok(false)
    }

    fn write(&mut self, path: &Path) -> Result<()> {
        let new_slice = self.rebuild_slice()?;

        let final_bytes = if self.fat_slices.len() > 1 {
            self.rebuild_fat(new_slice)?
        } else {
            new_slice
        };

        integrity::atomic_write(path, &final_bytes, true)?;

        if cfg!(target_os = "macos") {
            integrity::codesign_adhoc(path)?;
        }
        Ok(())
    }

    fn format(&self) -> ExecFormat {
        ExecFormat::MachO
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

impl MachoContainer {
    /// Rewrites a fat binary, replacing slice 0 with `new_slice` and
    /// copying every other slice's bytes verbatim.
    fn rebuild_fat(&self, new_slice: Vec<u8>) -> Result<Vec<u8>> {
        let mut out = self.original[..8 + 20 * self.fat_slices.len()].to_vec();
        let mut cursor = out.len();
        let mut bodies = Vec::new();

        for (i, (off, size)) in self.fat_slices.iter().enumerate() {
            let body = if i == 0 {
                new_slice.clone()
            } else {
                self.original[*off..*off + *size].to_vec()
            };
            let aligned = (cursor + 0xFFF) / 0x1000 * 0x1000;
            out.resize(aligned, 0);
            cursor = aligned;
            out.pwrite_with(cursor as u32, 8 + 20 * i + 8, scroll::BE)
                .map_err(|e| Error::Unknown(format!("patching fat_arch.offset: {e}")))?;
            out.pwrite_with(body.len() as u32, 8 + 20 * i + 12, scroll::BE)
                .map_err(|e| Error::Unknown(format!("patching fat_arch.size: {e}")))?;
            cursor += body.len();
            bodies.push((aligned, body));
        }

        let total = bodies
            .last()
            .map(|(off, body)| off + body.len())
            .unwrap_or(out.len());
        out.resize(total, 0);
        for (off, body) in bodies {
            out[off..off + body.len()].copy_from_slice(&body);
        }
        Ok(out)
    }

    pub fn is_64(&self) -> bool {
        self.is_64
    }

    pub fn had_code_signature(&self) -> bool {
        self.had_code_signature
    }
}
