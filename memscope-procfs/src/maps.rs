/*!
A snapshot of the memory mappings of a process.

Linux has no region query comparable to `VirtualQueryEx`, the snapshot answers the same
question from the parsed `maps` file: the mapping containing an address, or the gap
in front of the next mapping.
*/

use std::path::{Path, PathBuf};

use log::trace;

use memscope::os::RegionInfo;
use memscope::types::{umem, Address, PageProtection, RegionKind, RegionState};

/// A single line of a `maps` file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mapping {
    pub start: Address,
    pub end: Address,
    pub read: bool,
    pub write: bool,
    pub execute: bool,
    pub shared: bool,
    /// Offset into the mapped file.
    pub offset: u64,
    /// Backing file, if any.
    pub path: Option<PathBuf>,
    /// The mapping is the program break heap (`[heap]`).
    pub heap: bool,
}

impl Mapping {
    pub fn protection(&self) -> PageProtection {
        PageProtection::from_rwx(self.read, self.write, self.execute)
    }

    /// File backed mappings are reported as images, anonymous shared memory as mapped.
    pub fn kind(&self) -> RegionKind {
        if self.path.is_some() {
            RegionKind::Image
        } else if self.shared {
            RegionKind::Mapped
        } else {
            RegionKind::Private
        }
    }

    /// Whether this mapping is the first mapping of a loaded file.
    pub fn is_module_base(&self) -> bool {
        self.offset == 0 && self.path.is_some()
    }

    pub fn file_name(&self) -> Option<String> {
        self.path
            .as_ref()?
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
    }
}

#[derive(Clone, Debug, Default)]
pub struct MapSnapshot {
    mappings: Vec<Mapping>,
}

impl MapSnapshot {
    pub fn new(mut mappings: Vec<Mapping>) -> Self {
        mappings.sort_by_key(|m| m.start);
        Self { mappings }
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Mapping> {
        self.mappings.iter()
    }

    /// Describes the region containing `addr`.
    ///
    /// Unmapped gaps are reported as free regions reaching up to the next mapping.
    /// Returns `None` past the last mapping.
    pub fn query(&self, addr: Address, page_size: umem) -> Option<RegionInfo> {
        let base = addr.as_page_aligned(page_size);
        let idx = self.mappings.partition_point(|m| m.end <= base);
        let mapping = self.mappings.get(idx)?;

        if mapping.start <= base {
            Some(RegionInfo {
                base,
                size: mapping.end.to_umem() - base.to_umem(),
                state: RegionState::Commit,
                protection: mapping.protection(),
                kind: mapping.kind(),
            })
        } else {
            trace!("{:x} is unmapped up to {:x}", base, mapping.start);
            Some(RegionInfo {
                base,
                size: mapping.start.to_umem() - base.to_umem(),
                state: RegionState::Free,
                protection: PageProtection::NOACCESS,
                kind: RegionKind::Private,
            })
        }
    }

    /// Returns the file mapped with offset zero exactly at `base`.
    pub fn module_at(&self, base: Address) -> Option<&Mapping> {
        let idx = self.mappings.partition_point(|m| m.start < base);
        self.mappings
            .get(idx)
            .filter(|m| m.start == base && m.is_module_base())
    }

    /// Returns the lowest offset zero mapping of `path`.
    pub fn module_by_path(&self, path: &Path) -> Option<&Mapping> {
        self.mappings
            .iter()
            .find(|m| m.is_module_base() && m.path.as_deref() == Some(path))
    }

    /// Start addresses of all heap mappings.
    pub fn heaps(&self) -> impl Iterator<Item = Address> + '_ {
        self.mappings.iter().filter(|m| m.heap).map(|m| m.start)
    }
}
