use pelite::image::{
    IMAGE_NT_OPTIONAL_HDR32_MAGIC, IMAGE_NT_OPTIONAL_HDR64_MAGIC, IMAGE_SCN_CNT_CODE,
    IMAGE_SCN_CNT_INITIALIZED_DATA, IMAGE_SCN_MEM_EXECUTE, IMAGE_SCN_MEM_READ,
    IMAGE_SCN_MEM_WRITE,
};

use crate::types::{umem, PageProtection};

use super::DummyImage;

const E_LFANEW: usize = 0x80;
const FILE_HEADER: usize = E_LFANEW + 4;
const OPTIONAL_HEADER: usize = FILE_HEADER + 20;
const SECTION_HEADER_SIZE: usize = 40;

#[derive(Clone, Debug)]
pub struct DummySection {
    pub name: String,
    pub virtual_address: u32,
    pub virtual_size: u32,
    pub characteristics: u32,
}

impl DummySection {
    /// Protection the loader would apply to this section.
    pub fn protection(&self) -> PageProtection {
        PageProtection::from_rwx(
            self.characteristics & IMAGE_SCN_MEM_READ != 0,
            self.characteristics & IMAGE_SCN_MEM_WRITE != 0,
            self.characteristics & IMAGE_SCN_MEM_EXECUTE != 0,
        )
    }
}

/// Builds the in-memory header page of a PE image.
#[derive(Clone, Debug)]
pub struct PeBuilder {
    bits: u8,
    timestamp: u32,
    image_base: umem,
    sections: Vec<DummySection>,
}

impl PeBuilder {
    /// Creates a builder for a 32-bit (PE32) or 64-bit (PE32+) image.
    pub fn new(bits: u8) -> Self {
        Self {
            bits,
            timestamp: 0,
            image_base: if bits == 64 { 0x1_4000_0000 } else { 0x40_0000 },
            sections: Vec::new(),
        }
    }

    pub fn timestamp(mut self, timestamp: u32) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn image_base(mut self, image_base: umem) -> Self {
        self.image_base = image_base;
        self
    }

    pub fn section_with(
        mut self,
        name: &str,
        virtual_address: u32,
        virtual_size: u32,
        characteristics: u32,
    ) -> Self {
        self.sections.push(DummySection {
            name: name.to_string(),
            virtual_address,
            virtual_size,
            characteristics,
        });
        self
    }

    /// Adds a read-only data section.
    pub fn section(self, name: &str, virtual_address: u32, virtual_size: u32) -> Self {
        self.section_with(
            name,
            virtual_address,
            virtual_size,
            IMAGE_SCN_CNT_INITIALIZED_DATA | IMAGE_SCN_MEM_READ,
        )
    }

    pub fn code_section(self, name: &str, virtual_address: u32, virtual_size: u32) -> Self {
        self.section_with(
            name,
            virtual_address,
            virtual_size,
            IMAGE_SCN_CNT_CODE | IMAGE_SCN_MEM_READ | IMAGE_SCN_MEM_EXECUTE,
        )
    }

    pub fn data_section(self, name: &str, virtual_address: u32, virtual_size: u32) -> Self {
        self.section_with(
            name,
            virtual_address,
            virtual_size,
            IMAGE_SCN_CNT_INITIALIZED_DATA | IMAGE_SCN_MEM_READ | IMAGE_SCN_MEM_WRITE,
        )
    }

    pub fn sections(&self) -> &[DummySection] {
        &self.sections
    }

    pub fn size_of_optional_header(&self) -> u16 {
        if self.bits == 64 {
            0xf0
        } else {
            0xe0
        }
    }

}

impl DummyImage for PeBuilder {
    fn size_of_image(&self) -> u32 {
        let end = self
            .sections
            .iter()
            .map(|s| s.virtual_address + s.virtual_size)
            .max()
            .unwrap_or(0x1000);
        (end + 0xfff) & !0xfff
    }

    fn regions(&self) -> Vec<(u32, u32, PageProtection)> {
        self.sections
            .iter()
            .map(|s| (s.virtual_address, s.virtual_size, s.protection()))
            .collect()
    }

    fn build(&self) -> Vec<u8> {
        let table = OPTIONAL_HEADER + self.size_of_optional_header() as usize;
        let len = std::cmp::max(0x1000, table + self.sections.len() * SECTION_HEADER_SIZE);
        let mut buf = vec![0u8; len];

        put(&mut buf, 0, b"MZ");
        put(&mut buf, 0x3c, &(E_LFANEW as u32).to_le_bytes());
        put(&mut buf, E_LFANEW, b"PE\0\0");

        let machine: u16 = if self.bits == 64 { 0x8664 } else { 0x14c };
        put(&mut buf, FILE_HEADER, &machine.to_le_bytes());
        put(&mut buf, FILE_HEADER + 2, &(self.sections.len() as u16).to_le_bytes());
        put(&mut buf, FILE_HEADER + 4, &self.timestamp.to_le_bytes());
        put(&mut buf, FILE_HEADER + 16, &self.size_of_optional_header().to_le_bytes());

        if self.bits == 64 {
            put(&mut buf, OPTIONAL_HEADER, &IMAGE_NT_OPTIONAL_HDR64_MAGIC.to_le_bytes());
            put(&mut buf, OPTIONAL_HEADER + 24, &self.image_base.to_le_bytes());
        } else {
            put(&mut buf, OPTIONAL_HEADER, &IMAGE_NT_OPTIONAL_HDR32_MAGIC.to_le_bytes());
            put(&mut buf, OPTIONAL_HEADER + 28, &(self.image_base as u32).to_le_bytes());
        }
        put(&mut buf, OPTIONAL_HEADER + 56, &self.size_of_image().to_le_bytes());

        for (i, section) in self.sections.iter().enumerate() {
            let off = table + i * SECTION_HEADER_SIZE;
            let name = section.name.as_bytes();
            put(&mut buf, off, &name[..std::cmp::min(name.len(), 8)]);
            put(&mut buf, off + 8, &section.virtual_size.to_le_bytes());
            put(&mut buf, off + 12, &section.virtual_address.to_le_bytes());
            put(&mut buf, off + 36, &section.characteristics.to_le_bytes());
        }

        buf
    }
}

pub(super) fn put(buf: &mut [u8], offset: usize, data: &[u8]) {
    buf[offset..offset + data.len()].copy_from_slice(data);
}
