#![allow(dead_code)]

use kzboot::elf::{EHDR_SIZE, PHDR_SIZE};
use kzboot::xmodem::{frame_block, BLOCK_SIZE, EOT};

/// One program header for [`build_elf`].
pub struct Segment {
    pub p_type: u32,
    pub paddr: u32,
    pub data: Vec<u8>,
    pub memsz: u32,
}

impl Segment {
    pub fn load(paddr: u32, data: &[u8], memsz: u32) -> Self {
        Self {
            p_type: 1,
            paddr,
            data: data.to_vec(),
            memsz,
        }
    }
}

/// Builds a big-endian ELF32 executable for the H8/300H.
pub fn build_elf(entry: u32, segments: &[Segment]) -> Vec<u8> {
    let phoff = EHDR_SIZE;
    let mut offset = phoff + PHDR_SIZE * segments.len();

    let mut image = Vec::new();
    image.extend_from_slice(&[0x7F, b'E', b'L', b'F', 1, 2, 1, 0]);
    image.resize(16, 0);
    image.extend_from_slice(&2u16.to_be_bytes());
    image.extend_from_slice(&47u16.to_be_bytes());
    image.extend_from_slice(&1u32.to_be_bytes());
    image.extend_from_slice(&entry.to_be_bytes());
    image.extend_from_slice(&(phoff as u32).to_be_bytes());
    image.extend_from_slice(&0u32.to_be_bytes()); // shoff
    image.extend_from_slice(&0u32.to_be_bytes()); // flags
    image.extend_from_slice(&(EHDR_SIZE as u16).to_be_bytes());
    image.extend_from_slice(&(PHDR_SIZE as u16).to_be_bytes());
    image.extend_from_slice(&(segments.len() as u16).to_be_bytes());
    image.extend_from_slice(&[0; 6]); // shentsize, shnum, shstrndx
    assert_eq!(image.len(), EHDR_SIZE);

    for segment in segments {
        let fields = [
            segment.p_type,
            offset as u32,
            segment.paddr,
            segment.paddr,
            segment.data.len() as u32,
            segment.memsz,
            5,
            4,
        ];
        for field in fields {
            image.extend_from_slice(&field.to_be_bytes());
        }
        offset += segment.data.len();
    }
    for segment in segments {
        image.extend_from_slice(&segment.data);
    }
    image
}

/// The byte stream a sender puts on the line for `image`, ending with EOT.
pub fn xmodem_stream(image: &[u8]) -> Vec<u8> {
    let mut stream = Vec::new();
    for (i, chunk) in image.chunks(BLOCK_SIZE).enumerate() {
        stream.extend_from_slice(&frame_block((i + 1) as u8, chunk));
    }
    stream.push(EOT);
    stream
}
