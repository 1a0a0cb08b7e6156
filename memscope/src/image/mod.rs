/*!
Reader for the executable image header of a loaded module.

Two formats are understood. PE images are walked through their DOS and NT headers
and section table. ELF images are described by their loadable segments, since the
section header table is usually not mapped at runtime.

The format is picked from the magic at the module base, anything that is not ELF
goes through the PE reader.
*/

use std::fmt;

use log::debug;
use pelite::image::{IMAGE_SCN_MEM_EXECUTE, IMAGE_SCN_MEM_READ, IMAGE_SCN_MEM_WRITE};

use crate::error::{Error, ErrorOrigin, Result};
use crate::mem::MemoryView;
use crate::types::Address;

pub mod elf;
pub mod pe;

pub use pe::{DOS_LFANEW_OFFSET, MAX_SECTIONS, SECTION_NAME_LEN};

/// Format of the image.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ImageKind {
    Pe32,
    Pe32Plus,
    Elf32,
    Elf64,
    /// A PE image with an unrecognised optional header magic.
    Unknown(u16),
}

impl ImageKind {
    /// Pointer width of code running in this image, if known.
    pub fn pointer_bits(self) -> Option<u8> {
        match self {
            ImageKind::Pe32 | ImageKind::Elf32 => Some(32),
            ImageKind::Pe32Plus | ImageKind::Elf64 => Some(64),
            ImageKind::Unknown(_) => None,
        }
    }

    pub fn is_elf(self) -> bool {
        matches!(self, ImageKind::Elf32 | ImageKind::Elf64)
    }
}

/// The parts of the image header memscope cares about.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ImageHeader {
    /// Offset of the NT headers relative to the module base, PE only.
    pub e_lfanew: Option<u32>,
    pub machine: u16,
    pub section_count: u16,
    /// Build timestamp used to identify the binary.
    ///
    /// ELF has no equivalent, such images can not be matched against a version list.
    pub timestamp: Option<u32>,
    pub kind: ImageKind,
    /// Preferred load address, only known for recognised headers.
    pub image_base: Option<Address>,
    pub size_of_image: Option<u32>,
}

/// A contiguous part of the loaded image: a PE section or an ELF load segment.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Section {
    /// Section name, truncated at the first null byte.
    pub name: String,
    /// Offset of the section relative to the module base.
    pub virtual_address: u32,
    pub virtual_size: u32,
    /// `IMAGE_SCN_*` flags. ELF segment flags are translated into them.
    pub characteristics: u32,
}

impl Section {
    pub fn is_executable(&self) -> bool {
        self.characteristics & IMAGE_SCN_MEM_EXECUTE != 0
    }

    pub fn is_readable(&self) -> bool {
        self.characteristics & IMAGE_SCN_MEM_READ != 0
    }

    pub fn is_writable(&self) -> bool {
        self.characteristics & IMAGE_SCN_MEM_WRITE != 0
    }

    /// Checks whether the relative address lies inside of this section.
    pub fn contains(&self, rva: u32) -> bool {
        rva >= self.virtual_address && (rva - self.virtual_address) < self.virtual_size
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{:<8} {:08x} {:08x}",
            self.name, self.virtual_address, self.virtual_size
        )
    }
}

/// The parsed header and section table of a loaded module.
#[derive(Clone, Debug)]
pub struct ModuleImage {
    pub base: Address,
    pub header: ImageHeader,
    pub sections: Vec<Section>,
}

impl ModuleImage {
    /// Parses the image mapped at `base`.
    ///
    /// Fails if the header or the section table is unreadable.
    pub fn parse<T: MemoryView>(mem: &mut T, base: Address) -> Result<Self> {
        let magic: u32 = mem.read(base).map_err(|err| {
            Error(ErrorOrigin::Image, err.kind())
                .log_debug(format!("unable to read image magic at {:x}", base))
        })?;

        if magic.to_le_bytes() == elf::ELF_MAGIC {
            debug!("image at {:x} is an elf image", base);
            elf::parse(mem, base)
        } else {
            pe::parse(mem, base)
        }
    }

    pub fn kind(&self) -> ImageKind {
        self.header.kind
    }

    pub fn timestamp(&self) -> Option<u32> {
        self.header.timestamp
    }

    pub fn section_by_name(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    pub fn section_for_rva(&self, rva: u32) -> Option<&Section> {
        self.sections.iter().find(|s| s.contains(rva))
    }

    /// Absolute address of a section inside of the loaded module.
    pub fn section_address(&self, section: &Section) -> Address {
        self.base.wrapping_add(Address::from(section.virtual_address))
    }
}
