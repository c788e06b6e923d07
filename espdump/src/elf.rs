//! Minimal ELF images built from application images
//!
//! The result only carries what a disassembler or loader needs: a file
//! header, one `PT_LOAD` program header per segment, and the segment data.
//! There are no sections, symbols or relocations.

use std::mem::size_of;

use bytemuck::{bytes_of, Pod, Zeroable};

use crate::{image_format::AppImage, targets::Chip};

const ELFCLASS32: u8 = 1;
const ELFDATA2LSB: u8 = 1;
const EV_CURRENT: u8 = 1;
const ET_EXEC: u16 = 2;
const PT_LOAD: u32 = 1;
/// PF_X | PF_W | PF_R
const PF_RWX: u32 = 0x7;
const SECTION_HEADER_SIZE: u16 = 0x28;

#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C, packed)]
#[doc(alias = "Elf32_Ehdr")]
struct FileHeader {
    e_ident: [u8; 16],
    e_type: u16,
    e_machine: u16,
    e_version: u32,
    e_entry: u32,
    e_phoff: u32,
    e_shoff: u32,
    e_flags: u32,
    e_ehsize: u16,
    e_phentsize: u16,
    e_phnum: u16,
    e_shentsize: u16,
    e_shnum: u16,
    e_shstrndx: u16,
}

#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C, packed)]
#[doc(alias = "Elf32_Phdr")]
struct ProgramHeader {
    p_type: u32,
    p_offset: u32,
    p_vaddr: u32,
    p_paddr: u32,
    p_filesz: u32,
    p_memsz: u32,
    p_flags: u32,
    p_align: u32,
}

/// A loadable segment of the synthesized ELF
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElfSegment<'a> {
    pub vaddr: u32,
    pub data: &'a [u8],
}

/// An ELF executable reconstructed from an [AppImage]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesizedElf<'a> {
    chip: Chip,
    entry: u32,
    segments: Vec<ElfSegment<'a>>,
    omitted_segments: usize,
}

impl<'a> SynthesizedElf<'a> {
    /// Build an ELF for `chip` from the segments of `image`.
    ///
    /// Segments are ordered by load address, keeping the image order for
    /// segments sharing an address. Segments lost to truncation are counted
    /// in [SynthesizedElf::omitted_segments].
    pub fn new(image: AppImage<'a>, chip: Chip) -> Self {
        let mut segments: Vec<_> = image
            .segments
            .iter()
            .map(|segment| ElfSegment {
                vaddr: segment.load_address,
                data: segment.data,
            })
            .collect();
        // stable sort, so equal addresses stay in image order
        segments.sort_by_key(|segment| segment.vaddr);

        Self {
            chip,
            entry: image.entry_point,
            segments,
            omitted_segments: image.abandoned_segments,
        }
    }

    pub fn chip(&self) -> Chip {
        self.chip
    }

    pub fn entry(&self) -> u32 {
        self.entry
    }

    pub fn segments(&self) -> &[ElfSegment<'a>] {
        &self.segments
    }

    /// Number of segments announced by the image that could not be recovered
    pub fn omitted_segments(&self) -> usize {
        self.omitted_segments
    }

    /// Serialize the ELF file
    pub fn to_bytes(&self) -> Vec<u8> {
        let header_size = size_of::<FileHeader>();
        let ph_size = size_of::<ProgramHeader>();
        let data_start = header_size + ph_size * self.segments.len();
        let data_size: usize = self.segments.iter().map(|s| s.data.len()).sum();

        let mut e_ident = [0u8; 16];
        e_ident[..4].copy_from_slice(b"\x7fELF");
        e_ident[4] = ELFCLASS32;
        e_ident[5] = ELFDATA2LSB;
        e_ident[6] = EV_CURRENT;

        let header = FileHeader {
            e_ident,
            e_type: ET_EXEC.to_le(),
            e_machine: self.chip.elf_machine().to_le(),
            e_version: (EV_CURRENT as u32).to_le(),
            e_entry: self.entry.to_le(),
            e_phoff: (header_size as u32).to_le(),
            e_shoff: 0,
            e_flags: self.chip.elf_flags().to_le(),
            e_ehsize: (header_size as u16).to_le(),
            e_phentsize: (ph_size as u16).to_le(),
            e_phnum: (self.segments.len() as u16).to_le(),
            e_shentsize: SECTION_HEADER_SIZE.to_le(),
            e_shnum: 0,
            e_shstrndx: 0,
        };

        let mut data = Vec::with_capacity(data_start + data_size);
        data.extend_from_slice(bytes_of(&header));

        let mut offset = data_start as u32;
        for segment in &self.segments {
            let size = segment.data.len() as u32;
            let program_header = ProgramHeader {
                p_type: PT_LOAD.to_le(),
                p_offset: offset.to_le(),
                p_vaddr: segment.vaddr.to_le(),
                p_paddr: segment.vaddr.to_le(),
                p_filesz: size.to_le(),
                p_memsz: size.to_le(),
                p_flags: PF_RWX.to_le(),
                p_align: 1u32.to_le(),
            };
            data.extend_from_slice(bytes_of(&program_header));
            offset += size;
        }

        for segment in &self.segments {
            data.extend_from_slice(segment.data);
        }

        data
    }
}
