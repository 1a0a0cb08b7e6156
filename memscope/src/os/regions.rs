/*!
Address space walker producing classified memory ranges.
*/

use hashbrown::HashMap;
use log::{debug, trace};

use super::{HeapIndex, OsBackend, RegionInfo};
use crate::image::Section;
use crate::types::{Address, MemoryRange, RegionState};

/// Walks the whole address space of a process and classifies all committed regions.
///
/// Only the primary module is inspected in depth: its base region is named after the
/// module and every section start is named `"module : section"`. Regions of other
/// modules and unnamed shared mappings are left out, anonymous private regions
/// are kept and named after their heap if they start at one.
pub struct RegionScanner<'a> {
    primary_base: Address,
    sections: &'a [Section],
    heaps: HeapIndex,
}

impl<'a> RegionScanner<'a> {
    pub fn new(primary_base: Address, sections: &'a [Section]) -> Self {
        Self {
            primary_base,
            sections,
            heaps: HeapIndex::empty(),
        }
    }

    /// Uses the given heap index for naming private regions.
    pub fn heaps(mut self, heaps: HeapIndex) -> Self {
        self.heaps = heaps;
        self
    }

    /// Scans the address space starting at address zero.
    ///
    /// The returned ranges are non-empty, sorted by address and never overlap.
    pub fn scan<B: OsBackend>(&self, os: &mut B) -> Vec<MemoryRange> {
        let page_size = std::cmp::max(os.page_size(), 1);
        let mut section_names = HashMap::new();
        let mut ranges: Vec<MemoryRange> = Vec::new();
        let mut cursor = Address::NULL;

        while let Some(info) = os.query_region(cursor) {
            let next = Self::advance(cursor, &info, page_size);

            if let Some(mut range) = self.classify(os, &info, &mut section_names) {
                if let Some(last) = ranges.last() {
                    if range.start < last.end {
                        trace!(
                            "region {:x} overlaps previous range ending at {:x}",
                            range.start,
                            last.end
                        );
                        range.start = last.end;
                    }
                }
                if range.start < range.end {
                    ranges.push(range);
                }
            }

            match next {
                Some(next) => cursor = next,
                None => {
                    debug!("region scan reached the top of the address space");
                    break;
                }
            }
        }

        debug!("region scan produced {} ranges", ranges.len());
        ranges
    }

    /// Computes the next query address, always at least one page past `cursor`.
    fn advance(cursor: Address, info: &RegionInfo, page_size: u64) -> Option<Address> {
        let next = info
            .base
            .checked_add(info.size)?
            .checked_page_align_up(page_size)?;
        if next > cursor {
            Some(next)
        } else {
            cursor
                .checked_page_align_up(page_size)
                .filter(|aligned| *aligned > cursor)
                .or_else(|| cursor.checked_add(page_size))
        }
    }

    fn classify<B: OsBackend>(
        &self,
        os: &mut B,
        info: &RegionInfo,
        section_names: &mut HashMap<Address, String>,
    ) -> Option<MemoryRange> {
        if info.state != RegionState::Commit {
            return None;
        }

        let name = match os.module_base_name(info.base) {
            Some(module) => {
                if info.base != self.primary_base {
                    trace!("skipping region {:x} of module {}", info.base, module);
                    return None;
                }
                for section in self.sections.iter() {
                    let start = self
                        .primary_base
                        .wrapping_add(Address::from(section.virtual_address));
                    section_names.insert(start, format!("{} : {}", module, section.name));
                }
                module
            }
            None => {
                if let Some(name) = section_names.get(&info.base) {
                    name.clone()
                } else if !info.kind.is_private() {
                    trace!("skipping unnamed shared region {:x}", info.base);
                    return None;
                } else if let Some(name) = self.heaps.name(info.base) {
                    name
                } else {
                    String::new()
                }
            }
        };

        trace!("region {:x}+{:x}: '{}'", info.base, info.size, name);

        Some(MemoryRange {
            start: info.base,
            end: info.end(),
            read: info.protection.is_readable(),
            write: info.protection.is_writable(),
            execute: info.protection.is_executable(),
            valid: true,
            name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dummy::{DummyOs, PeBuilder};
    use crate::image::ModuleImage;
    use crate::types::{size, umem, PageProtection, RegionKind};

    use rand::{Rng, SeedableRng};
    use rand_xorshift::XorShiftRng;

    const BASE: u64 = 0x0040_0000;

    fn module_os() -> (DummyOs, ModuleImage) {
        let mut os = DummyOs::new(1);
        let pe = PeBuilder::new(32)
            .code_section("TEXT", 0x1000, 0x4000)
            .data_section("DATA", 0x5000, 0x4000)
            .section("RDATA", 0x9000, 0x1000);
        os.map_image("game.exe", "C:\\games\\df\\game.exe", Address::from(BASE), &pe);
        let image = ModuleImage::parse(&mut os, Address::from(BASE)).unwrap();
        (os, image)
    }

    fn named<'a>(ranges: &'a [MemoryRange], start: u64) -> Option<&'a str> {
        ranges
            .iter()
            .find(|r| r.start == Address::from(start))
            .map(|r| r.name.as_str())
    }

    #[test]
    fn module_sections() {
        let (mut os, image) = module_os();
        let ranges = RegionScanner::new(image.base, &image.sections).scan(&mut os);

        assert_eq!(named(&ranges, BASE), Some("game.exe"));
        assert_eq!(named(&ranges, 0x0040_1000), Some("game.exe : TEXT"));
        assert_eq!(named(&ranges, 0x0040_5000), Some("game.exe : DATA"));
        assert_eq!(named(&ranges, 0x0040_9000), Some("game.exe : RDATA"));

        let text = ranges.iter().find(|r| r.name.ends_with("TEXT")).unwrap();
        assert!(text.read && !text.write && text.execute);
        let data = ranges.iter().find(|r| r.name.ends_with(": DATA")).unwrap();
        assert!(data.read && data.write && !data.execute);
    }

    #[test]
    fn heap_names() {
        let (mut os, image) = module_os();
        os.add_heap(Address::from(0xA0000_u64), size::kb(64));
        os.add_heap(Address::from(0xB0000_u64), size::kb(64));

        let heaps = HeapIndex::query(&mut os);
        let ranges = RegionScanner::new(image.base, &image.sections)
            .heaps(heaps)
            .scan(&mut os);

        assert_eq!(named(&ranges, 0xA0000), Some("HEAP 0"));
        assert_eq!(named(&ranges, 0xB0000), Some("HEAP 1"));
    }

    #[test]
    fn shared_and_foreign_regions_are_skipped() {
        let (mut os, image) = module_os();
        os.map_region(
            Address::from(0x0020_0000_u64),
            size::kb(64),
            PageProtection::READONLY,
            RegionKind::Mapped,
        );
        os.map_region(
            Address::from(0x0030_0000_u64),
            size::kb(16),
            PageProtection::READWRITE,
            RegionKind::Private,
        );
        let lib = PeBuilder::new(32).code_section(".text", 0x1000, 0x1000);
        os.map_image("kernel32.dll", "C:\\windows\\kernel32.dll", Address::from(0x7000_0000_u64), &lib);
        os.reserve_region(Address::from(0x0050_0000_u64), size::kb(64));

        let ranges = RegionScanner::new(image.base, &image.sections).scan(&mut os);

        assert_eq!(named(&ranges, 0x0020_0000), None);
        assert_eq!(named(&ranges, 0x0030_0000), Some(""));
        assert_eq!(named(&ranges, 0x7000_0000), None);
        assert_eq!(named(&ranges, 0x7000_1000), None);
        assert_eq!(named(&ranges, 0x0050_0000), None);
        assert!(ranges.iter().all(|r| !r.name.is_empty() || r.start == Address::from(0x0030_0000_u64)));
    }

    #[test]
    fn unresolved_primary_module() {
        let (mut os, image) = module_os();
        // the module at BASE is not the primary one, so none of its sections get named
        let ranges = RegionScanner::new(Address::from(0x1000_0000_u64), &image.sections).scan(&mut os);
        assert!(ranges.is_empty());
    }

    fn info(base: u64, size: u64, protection: PageProtection) -> RegionInfo {
        RegionInfo {
            base: Address::from(base),
            size,
            state: RegionState::Commit,
            protection,
            kind: RegionKind::Private,
        }
    }

    #[test]
    fn zero_sized_region_advances() {
        let mut os = DummyOs::new(1);
        os.script_regions(vec![
            info(0x0, 0x1000, PageProtection::READWRITE),
            info(0x1000, 0, PageProtection::READWRITE),
            info(0x1000, 0, PageProtection::READWRITE),
            info(0x3000, 0x1000, PageProtection::READONLY),
        ]);

        let ranges = RegionScanner::new(Address::NULL, &[]).scan(&mut os);
        assert_eq!(ranges.len(), 2);
        assert_eq!(
            os.queried(),
            &[
                Address::from(0x0_u64),
                Address::from(0x1000_u64),
                Address::from(0x2000_u64),
                Address::from(0x3000_u64),
                Address::from(0x4000_u64),
            ]
        );
    }

    #[test]
    fn unaligned_region_end_rounds_up() {
        let mut os = DummyOs::new(1);
        os.script_regions(vec![
            info(0x0, 0x1234, PageProtection::READWRITE),
            info(0x2000, 0x1000, PageProtection::READWRITE),
        ]);

        let ranges = RegionScanner::new(Address::NULL, &[]).scan(&mut os);
        assert_eq!(ranges[0].end, Address::from(0x1234_u64));
        assert_eq!(os.queried()[1], Address::from(0x2000_u64));
    }

    #[test]
    fn overlapping_regions_are_clamped() {
        let mut os = DummyOs::new(1);
        os.script_regions(vec![
            info(0x1000, 0x3000, PageProtection::READWRITE),
            info(0x2000, 0x4000, PageProtection::READONLY),
            info(0x5000, 0x1000, PageProtection::READONLY),
        ]);

        let ranges = RegionScanner::new(Address::NULL, &[]).scan(&mut os);
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[1].start, Address::from(0x4000_u64));
        assert_eq!(ranges[1].end, Address::from(0x6000_u64));
    }

    #[test]
    fn top_of_address_space_terminates() {
        let mut os = DummyOs::new(1);
        os.script_regions(vec![
            info(0x0, 0x1000, PageProtection::READWRITE),
            info(0xFFFF_FFFF_FFFF_F000, 0x1000, PageProtection::READWRITE),
            info(0x2000, 0x1000, PageProtection::READWRITE),
        ]);

        let ranges = RegionScanner::new(Address::NULL, &[]).scan(&mut os);
        assert_eq!(ranges.len(), 2);
        assert_eq!(os.queried().len(), 2);
    }

    #[test]
    fn random_layouts_are_ordered() {
        let mut rng = XorShiftRng::seed_from_u64(0x4d45_4d53);

        for _ in 0..32 {
            let mut os = DummyOs::new(1);
            let mut addr: umem = size::kb(64);
            let mut heap_bases = Vec::new();

            for _ in 0..rng.gen_range(1..64) {
                addr += rng.gen_range(0..16) * size::kb(4);
                let len = rng.gen_range(1..32) * size::kb(4);
                match rng.gen_range(0..4) {
                    0 => {
                        os.add_heap(Address::from(addr), len);
                        heap_bases.push(addr);
                    }
                    1 => os.reserve_region(Address::from(addr), len),
                    2 => os.map_region(
                        Address::from(addr),
                        len,
                        PageProtection::READONLY,
                        RegionKind::Mapped,
                    ),
                    _ => os.map_region(
                        Address::from(addr),
                        len,
                        PageProtection::EXECUTE_READWRITE,
                        RegionKind::Private,
                    ),
                }
                addr += len;
            }

            let heaps = HeapIndex::query(&mut os);
            let ranges = RegionScanner::new(Address::NULL, &[]).heaps(heaps).scan(&mut os);

            for pair in ranges.windows(2) {
                assert!(pair[0].end <= pair[1].start);
            }
            for r in ranges.iter() {
                assert!(r.start < r.end);
            }
            for (i, base) in heap_bases.iter().enumerate() {
                assert_eq!(
                    named(&ranges, *base).map(str::to_string),
                    Some(format!("HEAP {}", i))
                );
            }
        }
    }
}
