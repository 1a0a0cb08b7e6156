/*!
PE header walker.

The DOS header at the module base points to the NT headers, which are followed by
the section table. Signatures are checked but a mismatch never rejects an otherwise
readable layout.
*/

use dataview::Pod;
use log::{debug, warn};
use pelite::image::{
    IMAGE_DOS_SIGNATURE, IMAGE_NT_HEADERS_SIGNATURE, IMAGE_NT_OPTIONAL_HDR32_MAGIC,
    IMAGE_NT_OPTIONAL_HDR64_MAGIC,
};

use super::{ImageHeader, ImageKind, ModuleImage, Section};
use crate::error::{Error, ErrorOrigin, Result};
use crate::mem::MemoryView;
use crate::types::{umem, Address};

/// Offset of `e_lfanew` inside of the DOS header.
pub const DOS_LFANEW_OFFSET: umem = 0x3c;

/// Width of a raw section name.
pub const SECTION_NAME_LEN: usize = 8;

/// The windows loader refuses images with more sections than this.
pub const MAX_SECTIONS: u16 = 96;

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod)]
pub struct FileHeader {
    pub machine: u16,
    pub number_of_sections: u16,
    pub time_date_stamp: u32,
    pub pointer_to_symbol_table: u32,
    pub number_of_symbols: u32,
    pub size_of_optional_header: u16,
    pub characteristics: u16,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod)]
pub struct NtHeaderPrefix {
    pub signature: u32,
    pub file_header: FileHeader,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod)]
pub struct SectionHeader {
    pub name: [u8; SECTION_NAME_LEN],
    pub virtual_size: u32,
    pub virtual_address: u32,
    pub size_of_raw_data: u32,
    pub pointer_to_raw_data: u32,
    pub pointer_to_relocations: u32,
    pub pointer_to_linenumbers: u32,
    pub number_of_relocations: u16,
    pub number_of_linenumbers: u16,
    pub characteristics: u32,
}

const SIZE_OF_SIGNATURE: umem = 4;
const SIZE_OF_FILE_HEADER: umem = std::mem::size_of::<FileHeader>() as umem;
const SIZE_OF_SECTION_HEADER: usize = std::mem::size_of::<SectionHeader>();

impl ImageKind {
    /// Decodes the magic of a PE optional header.
    pub fn from_magic(magic: u16) -> Self {
        match magic {
            IMAGE_NT_OPTIONAL_HDR32_MAGIC => ImageKind::Pe32,
            IMAGE_NT_OPTIONAL_HDR64_MAGIC => ImageKind::Pe32Plus,
            other => ImageKind::Unknown(other),
        }
    }
}

impl From<&SectionHeader> for Section {
    fn from(raw: &SectionHeader) -> Self {
        let len = raw
            .name
            .iter()
            .position(|c| *c == 0)
            .unwrap_or(SECTION_NAME_LEN);
        Self {
            name: String::from_utf8_lossy(&raw.name[..len]).to_string(),
            virtual_address: raw.virtual_address,
            virtual_size: raw.virtual_size,
            characteristics: raw.characteristics,
        }
    }
}

fn header_fail(err: Error) -> Error {
    Error(ErrorOrigin::Image, err.kind())
}

pub(super) fn parse<T: MemoryView>(mem: &mut T, base: Address) -> Result<ModuleImage> {
    let e_magic: u16 = mem.read(base).map_err(|err| {
        header_fail(err).log_debug(format!("unable to read dos header at {:x}", base))
    })?;
    if e_magic != IMAGE_DOS_SIGNATURE {
        warn!(
            "image at {:x} has an unexpected dos signature: {:x}",
            base, e_magic
        );
    }

    let e_lfanew: u32 = mem.read(base + DOS_LFANEW_OFFSET).map_err(|err| {
        header_fail(err).log_debug(format!("unable to read e_lfanew at {:x}", base))
    })?;

    let nt_addr = base.wrapping_add(Address::from(e_lfanew));
    let nt: NtHeaderPrefix = mem.read(nt_addr).map_err(|err| {
        header_fail(err).log_debug(format!("unable to read nt headers at {:x}", nt_addr))
    })?;
    if nt.signature != IMAGE_NT_HEADERS_SIGNATURE {
        warn!(
            "image at {:x} has an unexpected nt signature: {:x}",
            base, nt.signature
        );
    }

    let file = nt.file_header;
    let optional_addr =
        nt_addr.wrapping_add(Address::from(SIZE_OF_SIGNATURE + SIZE_OF_FILE_HEADER));
    let kind = match file.size_of_optional_header {
        0 => ImageKind::Unknown(0),
        _ => ImageKind::from_magic(mem.read(optional_addr).map_err(|err| {
            header_fail(err)
                .log_debug(format!("unable to read optional header at {:x}", optional_addr))
        })?),
    };
    let (image_base, size_of_image) = read_optional(mem, optional_addr, kind);

    let header = ImageHeader {
        e_lfanew: Some(e_lfanew),
        machine: file.machine,
        section_count: file.number_of_sections,
        timestamp: Some(file.time_date_stamp),
        kind,
        image_base,
        size_of_image,
    };
    debug!("pe header at {:x}: {:?}", base, header);

    if header.section_count > MAX_SECTIONS {
        warn!(
            "image at {:x} declares {} sections which exceeds the loader limit",
            base, header.section_count
        );
    }

    let table_addr =
        optional_addr.wrapping_add(Address::from(file.size_of_optional_header as u32));
    let mut raw = vec![0u8; header.section_count as usize * SIZE_OF_SECTION_HEADER];
    mem.read_raw_into(table_addr, &mut raw).map_err(|err| {
        header_fail(err).log_debug(format!("unable to read section table at {:x}", table_addr))
    })?;

    let sections = raw
        .chunks_exact(SIZE_OF_SECTION_HEADER)
        .map(|chunk| {
            let view = Pod::as_data_view(chunk);
            Section::from(view.read::<SectionHeader>(0))
        })
        .collect::<Vec<_>>();

    Ok(ModuleImage {
        base,
        header,
        sections,
    })
}

fn read_optional<T: MemoryView>(
    mem: &mut T,
    optional_addr: Address,
    kind: ImageKind,
) -> (Option<Address>, Option<u32>) {
    match kind {
        ImageKind::Pe32 => (
            mem.read_addr32(optional_addr + 28u64).ok(),
            mem.read::<u32>(optional_addr + 56u64).ok(),
        ),
        ImageKind::Pe32Plus => (
            mem.read_addr64(optional_addr + 24u64).ok(),
            mem.read::<u32>(optional_addr + 56u64).ok(),
        ),
        _ => (None, None),
    }
}
