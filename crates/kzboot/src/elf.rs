//! ELF32 executable loader.
//!
//! Accepts big-endian, version 1 executables for H8/300 (46) or H8/300H (47).
//! Every header is checked before the first byte is copied, so a rejected
//! image leaves the target untouched.

use alloc::vec::Vec;

use log::{debug, info};
use thiserror::Error;

pub const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];

pub const ELFCLASS32: u8 = 1;
pub const ELFDATA2MSB: u8 = 2;
pub const EV_CURRENT: u8 = 1;
pub const ET_EXEC: u16 = 2;
pub const EM_H8_300: u16 = 46;
pub const EM_H8_300H: u16 = 47;
pub const PT_LOAD: u32 = 1;

/// Size of the ELF32 file header.
pub const EHDR_SIZE: usize = 52;
/// Size of one ELF32 program header.
pub const PHDR_SIZE: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ElfError {
    #[error("image truncated: {needed} bytes needed, {len} present")]
    Truncated { needed: usize, len: usize },
    #[error("bad magic")]
    BadMagic,
    #[error("unsupported class {0}")]
    UnsupportedClass(u8),
    #[error("unsupported data encoding {0}")]
    UnsupportedEncoding(u8),
    #[error("unsupported version {0}")]
    UnsupportedVersion(u32),
    #[error("not an executable (type {0})")]
    NotExecutable(u16),
    #[error("unsupported machine {0}")]
    UnsupportedMachine(u16),
    #[error("program header entry size {0} too small")]
    ProgramHeaderSize(u16),
    #[error("segment {index} lies outside the image")]
    SegmentOutsideImage { index: usize },
    #[error("segment {index} file size exceeds its memory size")]
    SegmentSize { index: usize },
    #[error("{len} bytes at {addr:#010x} are outside the load target")]
    OutOfRange { addr: u32, len: usize },
}

/// Memory an image is loaded into.
pub trait LoadTarget {
    /// Whether `len` bytes at `addr` may be written.
    fn accepts(&self, addr: u32, len: usize) -> bool;

    fn write(&mut self, addr: u32, data: &[u8]) -> Result<(), ElfError>;

    fn fill(&mut self, addr: u32, len: usize, byte: u8) -> Result<(), ElfError>;
}

/// A flat RAM window starting at `base`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RamImage {
    base: u32,
    bytes: Vec<u8>,
}

impl RamImage {
    pub fn new(base: u32, size: usize) -> Self {
        Self {
            base,
            bytes: alloc::vec![0; size],
        }
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// `len` bytes at `addr`, if the window holds them.
    pub fn read(&self, addr: u32, len: usize) -> Option<&[u8]> {
        let start = addr.checked_sub(self.base)? as usize;
        self.bytes.get(start..start.checked_add(len)?)
    }

    fn window(&mut self, addr: u32, len: usize) -> Result<&mut [u8], ElfError> {
        let range = addr
            .checked_sub(self.base)
            .map(|start| start as usize)
            .and_then(|start| Some(start..start.checked_add(len)?));
        range
            .and_then(|range| self.bytes.get_mut(range))
            .ok_or(ElfError::OutOfRange { addr, len })
    }
}

impl LoadTarget for RamImage {
    fn accepts(&self, addr: u32, len: usize) -> bool {
        self.read(addr, len).is_some()
    }

    fn write(&mut self, addr: u32, data: &[u8]) -> Result<(), ElfError> {
        self.window(addr, data.len())?.copy_from_slice(data);
        Ok(())
    }

    fn fill(&mut self, addr: u32, len: usize, byte: u8) -> Result<(), ElfError> {
        self.window(addr, len)?.fill(byte);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramHeader {
    pub p_type: u32,
    pub offset: u32,
    pub vaddr: u32,
    pub paddr: u32,
    pub filesz: u32,
    pub memsz: u32,
    pub flags: u32,
    pub align: u32,
}

impl ProgramHeader {
    fn parse(raw: &[u8]) -> Self {
        Self {
            p_type: be32(raw, 0),
            offset: be32(raw, 4),
            vaddr: be32(raw, 8),
            paddr: be32(raw, 12),
            filesz: be32(raw, 16),
            memsz: be32(raw, 20),
            flags: be32(raw, 24),
            align: be32(raw, 28),
        }
    }

    pub fn is_load(&self) -> bool {
        self.p_type == PT_LOAD
    }
}

fn be16(raw: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([raw[at], raw[at + 1]])
}

fn be32(raw: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([raw[at], raw[at + 1], raw[at + 2], raw[at + 3]])
}

/// A validated image.
#[derive(Debug)]
pub struct ElfImage<'a> {
    data: &'a [u8],
    machine: u16,
    entry: u32,
    segments: Vec<ProgramHeader>,
}

impl<'a> ElfImage<'a> {
    /// Checks the file header and every program header.
    pub fn parse(data: &'a [u8]) -> Result<Self, ElfError> {
        if data.len() < EHDR_SIZE {
            return Err(ElfError::Truncated {
                needed: EHDR_SIZE,
                len: data.len(),
            });
        }
        if data[..4] != ELF_MAGIC {
            return Err(ElfError::BadMagic);
        }
        if data[4] != ELFCLASS32 {
            return Err(ElfError::UnsupportedClass(data[4]));
        }
        if data[5] != ELFDATA2MSB {
            return Err(ElfError::UnsupportedEncoding(data[5]));
        }
        if data[6] != EV_CURRENT {
            return Err(ElfError::UnsupportedVersion(u32::from(data[6])));
        }

        let e_type = be16(data, 16);
        if e_type != ET_EXEC {
            return Err(ElfError::NotExecutable(e_type));
        }
        let machine = be16(data, 18);
        if machine != EM_H8_300 && machine != EM_H8_300H {
            return Err(ElfError::UnsupportedMachine(machine));
        }
        let version = be32(data, 20);
        if version != u32::from(EV_CURRENT) {
            return Err(ElfError::UnsupportedVersion(version));
        }

        let entry = be32(data, 24);
        let phoff = be32(data, 28) as usize;
        let phentsize = be16(data, 42);
        let phnum = usize::from(be16(data, 44));
        if phnum > 0 && usize::from(phentsize) < PHDR_SIZE {
            return Err(ElfError::ProgramHeaderSize(phentsize));
        }

        let table_end = phoff.saturating_add(phnum * usize::from(phentsize));
        if table_end > data.len() {
            return Err(ElfError::Truncated {
                needed: table_end,
                len: data.len(),
            });
        }

        let mut segments = Vec::with_capacity(phnum);
        for index in 0..phnum {
            let at = phoff + index * usize::from(phentsize);
            let header = ProgramHeader::parse(&data[at..at + PHDR_SIZE]);
            if header.is_load() {
                let end = (header.offset as usize).saturating_add(header.filesz as usize);
                if end > data.len() {
                    return Err(ElfError::SegmentOutsideImage { index });
                }
                if header.filesz > header.memsz {
                    return Err(ElfError::SegmentSize { index });
                }
            }
            segments.push(header);
        }

        Ok(Self {
            data,
            machine,
            entry,
            segments,
        })
    }

    pub fn entry_point(&self) -> u32 {
        self.entry
    }

    pub fn machine(&self) -> u16 {
        self.machine
    }

    pub fn program_headers(&self) -> &[ProgramHeader] {
        &self.segments
    }

    /// Copies every loadable segment to its physical address and zero-fills
    /// the part of it not backed by the file.
    pub fn load_into<T: LoadTarget>(&self, target: &mut T) -> Result<(), ElfError> {
        let loadable = || self.segments.iter().filter(|ph| ph.is_load());

        for ph in loadable() {
            if !target.accepts(ph.paddr, ph.memsz as usize) {
                return Err(ElfError::OutOfRange {
                    addr: ph.paddr,
                    len: ph.memsz as usize,
                });
            }
        }

        for ph in loadable() {
            let start = ph.offset as usize;
            let file = &self.data[start..start + ph.filesz as usize];
            target.write(ph.paddr, file)?;
            let bss = (ph.memsz - ph.filesz) as usize;
            if bss > 0 {
                let tail = ph.paddr.checked_add(ph.filesz).ok_or(ElfError::OutOfRange {
                    addr: ph.paddr,
                    len: ph.memsz as usize,
                })?;
                target.fill(tail, bss, 0)?;
            }
            debug!(
                "elf: {:#010x} <- {} bytes (+{bss} zeroed)",
                ph.paddr, ph.filesz
            );
        }
        Ok(())
    }
}

/// Validates `image`, loads it into `target` and returns its entry point.
pub fn load<T: LoadTarget>(image: &[u8], target: &mut T) -> Result<u32, ElfError> {
    let elf = ElfImage::parse(image)?;
    elf.load_into(target)?;
    info!("elf: entry point {:#010x}", elf.entry_point());
    Ok(elf.entry_point())
}
