use crate::types::{umem, PageProtection};

use super::pe::put;
use super::DummyImage;

const PT_LOAD: u32 = 1;
const PF_X: u32 = 1;
const PF_W: u32 = 2;
const PF_R: u32 = 4;

#[derive(Clone, Debug)]
pub struct DummySegment {
    /// Offset of the segment relative to the first loaded page.
    pub offset: u32,
    pub memsz: u32,
    pub flags: u32,
}

impl DummySegment {
    pub fn protection(&self) -> PageProtection {
        PageProtection::from_rwx(
            self.flags & PF_R != 0,
            self.flags & PF_W != 0,
            self.flags & PF_X != 0,
        )
    }
}

/// Builds the in-memory header page of an ELF image.
///
/// Every image starts with a read-only segment covering the header page.
#[derive(Clone, Debug)]
pub struct ElfBuilder {
    bits: u8,
    image_base: umem,
    segments: Vec<DummySegment>,
}

impl ElfBuilder {
    /// Creates a builder for a position independent ELF32 or ELF64 image.
    pub fn new(bits: u8) -> Self {
        Self {
            bits,
            image_base: 0,
            segments: vec![DummySegment {
                offset: 0,
                memsz: 0x1000,
                flags: PF_R,
            }],
        }
    }

    /// Links the image at a fixed address.
    pub fn image_base(mut self, image_base: umem) -> Self {
        self.image_base = image_base;
        self
    }

    pub fn segment(mut self, offset: u32, memsz: u32, flags: u32) -> Self {
        self.segments.push(DummySegment {
            offset,
            memsz,
            flags,
        });
        self
    }

    pub fn code_segment(self, offset: u32, memsz: u32) -> Self {
        self.segment(offset, memsz, PF_R | PF_X)
    }

    pub fn rodata_segment(self, offset: u32, memsz: u32) -> Self {
        self.segment(offset, memsz, PF_R)
    }

    pub fn data_segment(self, offset: u32, memsz: u32) -> Self {
        self.segment(offset, memsz, PF_R | PF_W)
    }

    pub fn segments(&self) -> &[DummySegment] {
        &self.segments
    }

    fn ehdr_size(&self) -> usize {
        if self.bits == 64 {
            64
        } else {
            52
        }
    }

    fn phdr_size(&self) -> usize {
        if self.bits == 64 {
            56
        } else {
            32
        }
    }
}

impl DummyImage for ElfBuilder {
    fn build(&self) -> Vec<u8> {
        let phoff = self.ehdr_size();
        let len = std::cmp::max(0x1000, phoff + self.segments.len() * self.phdr_size());
        let mut buf = vec![0u8; len];

        put(&mut buf, 0, b"\x7fELF");
        buf[4] = if self.bits == 64 { 2 } else { 1 };
        // little endian, current version
        buf[5] = 1;
        buf[6] = 1;

        let e_type: u16 = if self.image_base == 0 { 3 } else { 2 };
        put(&mut buf, 16, &e_type.to_le_bytes());
        put(&mut buf, 20, &1_u32.to_le_bytes());

        let phnum = self.segments.len() as u16;
        if self.bits == 64 {
            put(&mut buf, 18, &0x3e_u16.to_le_bytes());
            put(&mut buf, 32, &(phoff as u64).to_le_bytes());
            put(&mut buf, 52, &(self.ehdr_size() as u16).to_le_bytes());
            put(&mut buf, 54, &(self.phdr_size() as u16).to_le_bytes());
            put(&mut buf, 56, &phnum.to_le_bytes());
            put(&mut buf, 58, &64_u16.to_le_bytes());
        } else {
            put(&mut buf, 18, &0x3_u16.to_le_bytes());
            put(&mut buf, 28, &(phoff as u32).to_le_bytes());
            put(&mut buf, 40, &(self.ehdr_size() as u16).to_le_bytes());
            put(&mut buf, 42, &(self.phdr_size() as u16).to_le_bytes());
            put(&mut buf, 44, &phnum.to_le_bytes());
            put(&mut buf, 46, &40_u16.to_le_bytes());
        }

        for (i, segment) in self.segments.iter().enumerate() {
            let off = phoff + i * self.phdr_size();
            let vaddr = self.image_base + segment.offset as umem;
            put(&mut buf, off, &PT_LOAD.to_le_bytes());
            if self.bits == 64 {
                put(&mut buf, off + 4, &segment.flags.to_le_bytes());
                put(&mut buf, off + 8, &(segment.offset as u64).to_le_bytes());
                put(&mut buf, off + 16, &vaddr.to_le_bytes());
                put(&mut buf, off + 24, &vaddr.to_le_bytes());
                put(&mut buf, off + 32, &(segment.memsz as u64).to_le_bytes());
                put(&mut buf, off + 40, &(segment.memsz as u64).to_le_bytes());
                put(&mut buf, off + 48, &0x1000_u64.to_le_bytes());
            } else {
                put(&mut buf, off + 4, &segment.offset.to_le_bytes());
                put(&mut buf, off + 8, &(vaddr as u32).to_le_bytes());
                put(&mut buf, off + 12, &(vaddr as u32).to_le_bytes());
                put(&mut buf, off + 16, &segment.memsz.to_le_bytes());
                put(&mut buf, off + 20, &segment.memsz.to_le_bytes());
                put(&mut buf, off + 24, &segment.flags.to_le_bytes());
                put(&mut buf, off + 28, &0x1000_u32.to_le_bytes());
            }
        }

        buf
    }

    fn regions(&self) -> Vec<(u32, u32, PageProtection)> {
        self.segments
            .iter()
            .map(|s| {
                let start = s.offset & !0xfff;
                let end = (s.offset + s.memsz + 0xfff) & !0xfff;
                (start, end - start, s.protection())
            })
            .collect()
    }

    fn size_of_image(&self) -> u32 {
        self.regions()
            .iter()
            .map(|(start, size, _)| start + size)
            .max()
            .unwrap_or(0x1000)
    }
}
