/*!
Classified memory ranges as produced by a region scan.
*/

use std::fmt;

use super::{umem, Address};

/// Name prefix of ranges that were identified as heaps.
pub const HEAP_NAME_PREFIX: &str = "HEAP ";

/// A committed range of the address space together with its access rights and display name.
///
/// `end` is exclusive. Ranges are a snapshot of a live address space and may be stale
/// as soon as they are returned.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
pub struct MemoryRange {
    pub start: Address,
    pub end: Address,
    pub read: bool,
    pub write: bool,
    pub execute: bool,
    pub valid: bool,
    /// Module name, `"module : section"`, `"HEAP n"` or empty for anonymous private memory.
    pub name: String,
}

impl MemoryRange {
    pub fn size(&self) -> umem {
        self.end.to_umem() - self.start.to_umem()
    }

    /// Checks whether `addr` lies inside of this range.
    pub fn contains(&self, addr: Address) -> bool {
        addr >= self.start && addr < self.end
    }

    pub fn is_heap(&self) -> bool {
        self.name.starts_with(HEAP_NAME_PREFIX)
    }

    pub fn is_anonymous(&self) -> bool {
        self.name.is_empty()
    }
}

impl fmt::Display for MemoryRange {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{:016x}-{:016x} {}{}{} {}",
            self.start,
            self.end,
            if self.read { 'r' } else { '-' },
            if self.write { 'w' } else { '-' },
            if self.execute { 'x' } else { '-' },
            self.name
        )
    }
}

/// Returns the range containing `addr`.
///
/// `ranges` has to be sorted by address, which is always the case for the output of a scan.
pub fn find_range(ranges: &[MemoryRange], addr: Address) -> Option<&MemoryRange> {
    let idx = ranges.partition_point(|r| r.end <= addr);
    ranges.get(idx).filter(|r| r.contains(addr))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(start: u64, end: u64, name: &str) -> MemoryRange {
        MemoryRange {
            start: Address::from(start),
            end: Address::from(end),
            read: true,
            write: false,
            execute: true,
            valid: true,
            name: name.to_string(),
        }
    }

    #[test]
    fn lookup() {
        let ranges = vec![
            range(0x1000, 0x2000, "a"),
            range(0x3000, 0x5000, "HEAP 0"),
            range(0x5000, 0x6000, ""),
        ];

        assert_eq!(find_range(&ranges, Address::from(0x1fff_u64)).unwrap().name, "a");
        assert!(find_range(&ranges, Address::from(0x2000_u64)).is_none());
        assert!(find_range(&ranges, Address::from(0x4000_u64)).unwrap().is_heap());
        assert!(find_range(&ranges, Address::from(0x5000_u64)).unwrap().is_anonymous());
        assert!(find_range(&ranges, Address::from(0x6000_u64)).is_none());
        assert!(find_range(&[], Address::from(0x6000_u64)).is_none());
    }

    #[test]
    fn display() {
        let r = range(0x400000, 0x401000, "game.exe");
        assert_eq!(r.size(), 0x1000);
        assert_eq!(
            r.to_string(),
            "0000000000400000-0000000000401000 r-x game.exe"
        );
    }
}
