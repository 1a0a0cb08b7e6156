/*!
The operating system seam.

Everything the core needs from the operating system is expressed through [`OsBackend`].
A backend exposes the byte level [`MemoryView`] of the inspected process together with
module, region, heap and thread queries. The primitives deliberately mirror what the
native process introspection APIs offer, the higher level logic (region classification,
thread filtering, heap indexing) lives in this crate and is shared by all backends.

All scoped OS resources (heap query buffers, thread snapshots, thread handles) are
returned as owned values which release the resource when dropped.
*/

pub mod heaps;
#[doc(hidden)]
pub use heaps::HeapIndex;

pub mod threads;
#[doc(hidden)]
pub use threads::{open_threads, thread_ids};

pub mod regions;
#[doc(hidden)]
pub use regions::RegionScanner;

use crate::error::Result;
use crate::mem::MemoryView;
use crate::types::{umem, Address, PageProtection, Pid, RegionKind, RegionState, ThreadId};

/// Information about a single region of the address space as reported by the OS.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RegionInfo {
    /// Base of the queried region (the page containing the queried address).
    pub base: Address,
    /// Size of the region starting at `base`, may be zero.
    pub size: umem,
    pub state: RegionState,
    pub protection: PageProtection,
    pub kind: RegionKind,
}

impl RegionInfo {
    /// Exclusive end of the region, saturated at the top of the address space.
    pub fn end(&self) -> Address {
        self.base
            .checked_add(self.size)
            .unwrap_or_else(|| Address::from(umem::MAX))
    }
}

/// An entry of a system wide thread snapshot.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct ThreadEntry {
    pub id: ThreadId,
    /// Process owning this thread.
    pub owner: Pid,
}

/// A point-in-time list of all threads in the system.
///
/// Mirrors the first/next protocol of native snapshot APIs.
/// The snapshot is released when this object is dropped.
pub trait ThreadSnapshot {
    /// Rewinds the snapshot and returns its first entry.
    fn first_entry(&mut self) -> Result<ThreadEntry>;

    /// Returns the next entry or `None` once the snapshot is exhausted.
    fn next_entry(&mut self) -> Option<ThreadEntry>;
}

/// An open control handle to a thread. The handle is closed when this object is dropped.
pub trait ThreadHandle {
    fn id(&self) -> ThreadId;
}

/// OS specific primitives of an attached process.
pub trait OsBackend: MemoryView {
    /// Iterator over heap base addresses. Releases the OS query buffer on drop.
    type HeapList: Iterator<Item = Address>;
    type ThreadSnapshot: ThreadSnapshot;
    type Thread: ThreadHandle;

    /// Identifier of the attached process.
    fn pid(&self) -> Pid;

    fn page_size(&self) -> umem;

    /// Returns the base address of the first loaded module of the process.
    fn primary_module(&mut self) -> Result<Address>;

    /// Queries the region containing `addr`.
    ///
    /// Returns `None` once the end of the address space is reached or the query is denied.
    fn query_region(&mut self, addr: Address) -> Option<RegionInfo>;

    /// Returns the name of the module loaded exactly at `base`.
    fn module_base_name(&mut self, base: Address) -> Option<String>;

    /// Returns the full path of the module loaded at `base`.
    fn module_file_name(&mut self, base: Address) -> Result<String>;

    fn heap_list(&mut self) -> Result<Self::HeapList>;

    fn thread_snapshot(&mut self) -> Result<Self::ThreadSnapshot>;

    fn open_thread(&mut self, id: ThreadId) -> Result<Self::Thread>;
}
