/*!
ELF header walker.

The section header table of an ELF file is not part of any loadable segment, so the
loaded image is described by its `PT_LOAD` program headers instead. Each segment
becomes one [`Section`] starting at the page the loader mapped it to, named after
its permissions: `.text` for executable, `.data` for writable and `.rodata` for
read-only segments.

ELF carries no build timestamp.
*/

use goblin::container::{Container, Ctx};
use goblin::elf::header::ELFMAG;
use goblin::elf::program_header::{PF_R, PF_W, PF_X, PT_LOAD};
use goblin::elf::{Elf, ProgramHeader};
use log::{debug, warn};
use pelite::image::{IMAGE_SCN_MEM_EXECUTE, IMAGE_SCN_MEM_READ, IMAGE_SCN_MEM_WRITE};

use super::{ImageHeader, ImageKind, ModuleImage, Section};
use crate::error::{Error, ErrorKind, ErrorOrigin, Result};
use crate::mem::MemoryView;
use crate::types::{size, umem, Address};

pub const ELF_MAGIC: [u8; 4] = *ELFMAG;

/// Size of an ELF64 file header, ELF32 headers are shorter.
const EHDR_LEN: usize = 64;

/// Segments are placed at this granularity by the loader.
pub const SEGMENT_ALIGNMENT: umem = size::kb(4);

/// Upper bound for the program header count of a sane image.
pub const MAX_PROGRAM_HEADERS: u16 = 0x100;

fn invalid(err: impl std::fmt::Display, base: Address) -> Error {
    Error(ErrorOrigin::Image, ErrorKind::InvalidExeFile)
        .log_debug(format!("elf image at {:x}: {}", base, err))
}

fn segment_name(flags: u32) -> &'static str {
    if flags & PF_X != 0 {
        ".text"
    } else if flags & PF_W != 0 {
        ".data"
    } else {
        ".rodata"
    }
}

fn segment_characteristics(flags: u32) -> u32 {
    let mut characteristics = 0;
    if flags & PF_R != 0 {
        characteristics |= IMAGE_SCN_MEM_READ;
    }
    if flags & PF_W != 0 {
        characteristics |= IMAGE_SCN_MEM_WRITE;
    }
    if flags & PF_X != 0 {
        characteristics |= IMAGE_SCN_MEM_EXECUTE;
    }
    characteristics
}

fn align_down(addr: umem) -> umem {
    addr & !(SEGMENT_ALIGNMENT - 1)
}

pub(super) fn parse<T: MemoryView>(mem: &mut T, base: Address) -> Result<ModuleImage> {
    let mut ehdr = [0u8; EHDR_LEN];
    mem.read_raw_into(base, &mut ehdr).map_err(|err| {
        Error(ErrorOrigin::Image, err.kind())
            .log_debug(format!("unable to read elf header at {:x}", base))
    })?;

    let header = Elf::parse_header(&ehdr).map_err(|err| invalid(err, base))?;
    let ctx = Ctx {
        container: header.container().map_err(|err| invalid(err, base))?,
        le: header.endianness().map_err(|err| invalid(err, base))?,
    };
    let kind = match ctx.container {
        Container::Big => ImageKind::Elf64,
        Container::Little => ImageKind::Elf32,
    };

    if header.e_phnum > MAX_PROGRAM_HEADERS {
        return Err(invalid(
            format!("{} program headers", header.e_phnum),
            base,
        ));
    }

    let table_addr = base.wrapping_add(Address::from(header.e_phoff));
    let mut table = vec![0u8; header.e_phnum as usize * ProgramHeader::size(ctx)];
    mem.read_raw_into(table_addr, &mut table).map_err(|err| {
        Error(ErrorOrigin::Image, err.kind())
            .log_debug(format!("unable to read program headers at {:x}", table_addr))
    })?;
    let program_headers = ProgramHeader::parse(&table, 0, header.e_phnum as usize, ctx)
        .map_err(|err| invalid(err, base))?;

    let loads = program_headers
        .iter()
        .filter(|ph| ph.p_type == PT_LOAD)
        .collect::<Vec<_>>();
    let first = loads
        .iter()
        .map(|ph| align_down(ph.p_vaddr))
        .min()
        .ok_or_else(|| invalid("no loadable segments", base))?;

    let mut sections = Vec::with_capacity(loads.len());
    for ph in loads {
        let start = align_down(ph.p_vaddr) - first;
        let end = ph
            .p_vaddr
            .checked_add(ph.p_memsz)
            .and_then(|end| end.checked_add(SEGMENT_ALIGNMENT - 1))
            .map(|end| align_down(end) - first)
            .unwrap_or(umem::MAX);
        match (u32::try_from(start), u32::try_from(end - start)) {
            (Ok(virtual_address), Ok(virtual_size)) => sections.push(Section {
                name: segment_name(ph.p_flags).to_string(),
                virtual_address,
                virtual_size,
                characteristics: segment_characteristics(ph.p_flags),
            }),
            _ => warn!(
                "elf image at {:x}: skipping segment at {:x} which lies too far from the base",
                base, ph.p_vaddr
            ),
        }
    }

    let header = ImageHeader {
        e_lfanew: None,
        machine: header.e_machine,
        section_count: sections.len() as u16,
        timestamp: None,
        kind,
        image_base: Some(Address::from(first)),
        size_of_image: sections
            .iter()
            .map(|s| s.virtual_address.saturating_add(s.virtual_size))
            .max(),
    };
    debug!("elf header at {:x}: {:?}", base, header);

    Ok(ModuleImage {
        base,
        header,
        sections,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dummy::{DummyImage, DummyMemory, ElfBuilder};

    const BASE: u64 = 0x5555_5555_4000;

    fn mapped(image: &[u8]) -> DummyMemory {
        let mut mem = DummyMemory::new();
        mem.map(Address::from(BASE), size::kb(4) as usize);
        mem.write_raw(Address::from(BASE), image).unwrap();
        mem
    }

    fn pie() -> ElfBuilder {
        ElfBuilder::new(64)
            .code_segment(0x1000, 0x2345)
            .rodata_segment(0x4000, 0x800)
            .data_segment(0x5d48, 0x3b8)
    }

    #[test]
    fn load_segments_become_sections() {
        let mut mem = mapped(&pie().build());
        let image = parse(&mut mem, Address::from(BASE)).unwrap();

        assert_eq!(image.kind(), ImageKind::Elf64);
        assert_eq!(image.header.machine, 0x3e);
        assert_eq!(image.header.e_lfanew, None);
        assert_eq!(image.timestamp(), None);
        assert_eq!(image.header.image_base, Some(Address::NULL));

        let layout = image
            .sections
            .iter()
            .map(|s| (s.name.as_str(), s.virtual_address, s.virtual_size))
            .collect::<Vec<_>>();
        assert_eq!(
            layout,
            vec![
                (".rodata", 0, 0x1000),
                (".text", 0x1000, 0x3000),
                (".rodata", 0x4000, 0x1000),
                (".data", 0x5000, 0x2000),
            ]
        );
        assert_eq!(image.header.size_of_image, Some(0x7000));

        let text = image.section_by_name(".text").unwrap();
        assert!(text.is_readable() && text.is_executable() && !text.is_writable());
        let data = image.section_for_rva(0x5d48).unwrap();
        assert!(data.is_writable() && !data.is_executable());
    }

    #[test]
    fn fixed_address_executable() {
        let elf = ElfBuilder::new(64)
            .image_base(0x40_0000)
            .code_segment(0x1000, 0x100)
            .build();
        let mut mem = mapped(&elf);
        let image = parse(&mut mem, Address::from(BASE)).unwrap();

        assert_eq!(image.header.image_base, Some(Address::from(0x40_0000_u64)));
        let vas = image.sections.iter().map(|s| s.virtual_address).collect::<Vec<_>>();
        assert_eq!(vas, vec![0, 0x1000]);
    }

    #[test]
    fn elf32() {
        let elf = ElfBuilder::new(32).code_segment(0x1000, 0x100).build();
        let mut mem = mapped(&elf);
        let image = parse(&mut mem, Address::from(BASE)).unwrap();

        assert_eq!(image.kind(), ImageKind::Elf32);
        assert_eq!(image.kind().pointer_bits(), Some(32));
        assert_eq!(image.header.machine, 0x3);
        assert_eq!(image.sections.len(), 2);
    }

    #[test]
    fn broken_headers_are_rejected() {
        let mut elf = pie().build();
        // unknown class
        elf[4] = 9;
        let err = parse(&mut mapped(&elf), Address::from(BASE)).unwrap_err();
        assert_eq!(err.origin(), ErrorOrigin::Image);
        assert_eq!(err.kind(), ErrorKind::InvalidExeFile);

        let mut elf = pie().build();
        // e_phnum
        elf[56..58].copy_from_slice(&0xffff_u16.to_le_bytes());
        let err = parse(&mut mapped(&elf), Address::from(BASE)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidExeFile);
    }

    #[test]
    fn unreadable_program_headers() {
        let mut elf = pie().build();
        // e_phoff far past the mapped header page
        elf[32..40].copy_from_slice(&0x10_0000_u64.to_le_bytes());
        let err = parse(&mut mapped(&elf), Address::from(BASE)).unwrap_err();
        assert_eq!(err.origin(), ErrorOrigin::Image);
        assert_eq!(err.kind(), ErrorKind::UnableToReadMemory);
    }
}
