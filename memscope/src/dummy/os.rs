use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use log::trace;

use super::mem::DummyMemory;
use super::DummyImage;

use crate::error::{Error, ErrorKind, ErrorOrigin, Result};
use crate::mem::MemoryView;
use crate::os::{OsBackend, RegionInfo, ThreadEntry, ThreadHandle, ThreadSnapshot};
use crate::types::{
    size, umem, Address, PageProtection, Pid, RegionKind, RegionState, ThreadId,
};

/// Default upper end of the user address space.
pub const DUMMY_ADDRESS_LIMIT: umem = 0x8000_0000;

#[derive(Clone, Debug)]
pub struct DummyModule {
    pub base: Address,
    pub size: umem,
    pub name: String,
    pub path: String,
}

/// Failures the dummy backend can be told to produce.
#[derive(Clone, Debug, Default)]
pub struct DummyFaults {
    /// Module enumeration fails, no primary module can be found.
    pub modules: bool,
    pub module_file_name: bool,
    pub heap_query: bool,
    pub thread_snapshot: bool,
    pub thread_first: bool,
    /// Threads which can not be opened.
    pub open_thread: Vec<ThreadId>,
}

/// Live counters of OS resources handed out by a [`DummyOs`].
#[derive(Debug, Default)]
pub struct DummyCounters {
    open_threads: AtomicUsize,
    snapshots: AtomicUsize,
    heap_buffers: AtomicUsize,
    heap_buffers_acquired: AtomicUsize,
}

impl DummyCounters {
    pub fn open_threads(&self) -> usize {
        self.open_threads.load(Ordering::SeqCst)
    }

    pub fn snapshots(&self) -> usize {
        self.snapshots.load(Ordering::SeqCst)
    }

    pub fn heap_buffers(&self) -> usize {
        self.heap_buffers.load(Ordering::SeqCst)
    }

    /// Total number of heap buffers ever acquired.
    pub fn heap_buffers_acquired(&self) -> usize {
        self.heap_buffers_acquired.load(Ordering::SeqCst)
    }

    /// Number of resources which have not been released yet.
    pub fn outstanding(&self) -> usize {
        self.open_threads() + self.snapshots() + self.heap_buffers()
    }
}

/// A scriptable stand-in for a real operating system.
///
/// The dummy holds the memory of a single process together with its region layout,
/// loaded modules, heaps and the system wide thread list.
pub struct DummyOs {
    mem: DummyMemory,
    pid: Pid,
    page_size: umem,
    limit: Address,
    regions: Vec<RegionInfo>,
    modules: Vec<DummyModule>,
    heaps: Vec<Address>,
    threads: Vec<ThreadEntry>,
    script: Option<VecDeque<RegionInfo>>,
    queried: Vec<Address>,
    counters: Arc<DummyCounters>,
    pub faults: DummyFaults,
}

impl DummyOs {
    pub fn new(pid: Pid) -> Self {
        Self {
            mem: DummyMemory::new(),
            pid,
            page_size: size::kb(4),
            limit: Address::from(DUMMY_ADDRESS_LIMIT),
            regions: Vec::new(),
            modules: Vec::new(),
            heaps: Vec::new(),
            threads: Vec::new(),
            script: None,
            queried: Vec::new(),
            counters: Arc::new(DummyCounters::default()),
            faults: DummyFaults::default(),
        }
    }

    pub fn counters(&self) -> Arc<DummyCounters> {
        self.counters.clone()
    }

    pub fn memory(&mut self) -> &mut DummyMemory {
        &mut self.mem
    }

    /// Addresses passed to `query_region` so far.
    pub fn queried(&self) -> &[Address] {
        &self.queried
    }

    fn insert_region(&mut self, region: RegionInfo) {
        let idx = self.regions.partition_point(|r| r.base < region.base);
        self.regions.insert(idx, region);
    }

    /// Commits a region and backs it with zeroed memory.
    pub fn map_region(
        &mut self,
        base: Address,
        size: umem,
        protection: PageProtection,
        kind: RegionKind,
    ) {
        self.mem.map(base, size as usize);
        self.insert_region(RegionInfo {
            base,
            size,
            state: RegionState::Commit,
            protection,
            kind,
        });
    }

    /// Reserves address space without backing it.
    pub fn reserve_region(&mut self, base: Address, size: umem) {
        self.insert_region(RegionInfo {
            base,
            size,
            state: RegionState::Reserve,
            protection: PageProtection::NOACCESS,
            kind: RegionKind::Private,
        });
    }

    /// Loads an image: registers the module and maps its header page and sections.
    ///
    /// The first loaded image becomes the primary module.
    pub fn map_image<I: DummyImage>(&mut self, name: &str, path: &str, base: Address, image: &I) {
        let header = image.build();
        let header_size = size::page_align_up(header.len() as umem, self.page_size);
        self.map_region(base, header_size, PageProtection::READONLY, RegionKind::Image);
        // the header page is always mapped, so this can not fail
        let _ = self.mem.write_raw(base, &header);

        for (rva, len, protection) in image.regions() {
            if (rva as umem) < header_size {
                continue;
            }
            let size = size::page_align_up(len as umem, self.page_size);
            self.map_region(base + rva, size, protection, RegionKind::Image);
        }

        self.modules.push(DummyModule {
            base,
            size: image.size_of_image() as umem,
            name: name.to_string(),
            path: path.to_string(),
        });
    }

    /// Registers a module without mapping anything.
    pub fn add_module(&mut self, module: DummyModule) {
        self.modules.push(module);
    }

    /// Commits a private read-write region and registers it as a heap.
    pub fn add_heap(&mut self, base: Address, size: umem) {
        self.map_region(base, size, PageProtection::READWRITE, RegionKind::Private);
        self.heaps.push(base);
    }

    /// Adds a thread to the system wide thread list.
    pub fn add_thread(&mut self, id: ThreadId, owner: Pid) {
        self.threads.push(ThreadEntry { id, owner });
    }

    /// Makes `query_region` return the given regions in order, regardless of the queried address.
    pub fn script_regions(&mut self, regions: Vec<RegionInfo>) {
        self.script = Some(regions.into());
    }

    fn region_at(&self, addr: Address) -> Option<RegionInfo> {
        if addr >= self.limit {
            return None;
        }
        let page = addr.as_page_aligned(self.page_size);

        let idx = self.regions.partition_point(|r| r.end() <= addr);
        match self.regions.get(idx) {
            Some(r) if r.base <= addr => Some(RegionInfo {
                base: page,
                size: (r.end() - page) as umem,
                ..r.clone()
            }),
            next => {
                let end = next.map(|r| r.base).unwrap_or(self.limit);
                Some(RegionInfo {
                    base: page,
                    size: (end - page) as umem,
                    state: RegionState::Free,
                    protection: PageProtection::NOACCESS,
                    kind: RegionKind::Private,
                })
            }
        }
    }
}

impl MemoryView for DummyOs {
    fn read_raw_into(&mut self, addr: Address, out: &mut [u8]) -> Result<()> {
        self.mem.read_raw_into(addr, out)
    }

    fn write_raw(&mut self, addr: Address, data: &[u8]) -> Result<()> {
        self.mem.write_raw(addr, data)
    }
}

pub struct DummyHeapList {
    bases: std::vec::IntoIter<Address>,
    counters: Arc<DummyCounters>,
}

impl DummyHeapList {
    fn new(bases: Vec<Address>, counters: Arc<DummyCounters>) -> Self {
        counters.heap_buffers.fetch_add(1, Ordering::SeqCst);
        counters.heap_buffers_acquired.fetch_add(1, Ordering::SeqCst);
        Self {
            bases: bases.into_iter(),
            counters,
        }
    }
}

impl Iterator for DummyHeapList {
    type Item = Address;

    fn next(&mut self) -> Option<Address> {
        self.bases.next()
    }
}

impl Drop for DummyHeapList {
    fn drop(&mut self) {
        self.counters.heap_buffers.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct DummyThreadSnapshot {
    entries: Vec<ThreadEntry>,
    pos: usize,
    fail_first: bool,
    counters: Arc<DummyCounters>,
}

impl ThreadSnapshot for DummyThreadSnapshot {
    fn first_entry(&mut self) -> Result<ThreadEntry> {
        if self.fail_first {
            return Err(Error(ErrorOrigin::Threads, ErrorKind::ThreadNotFound));
        }
        self.pos = 0;
        let entry = self
            .entries
            .first()
            .copied()
            .ok_or(Error(ErrorOrigin::Threads, ErrorKind::ThreadNotFound))?;
        self.pos = 1;
        Ok(entry)
    }

    fn next_entry(&mut self) -> Option<ThreadEntry> {
        let entry = self.entries.get(self.pos).copied();
        self.pos += 1;
        entry
    }
}

impl Drop for DummyThreadSnapshot {
    fn drop(&mut self) {
        self.counters.snapshots.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub struct DummyThread {
    id: ThreadId,
    counters: Arc<DummyCounters>,
}

impl ThreadHandle for DummyThread {
    fn id(&self) -> ThreadId {
        self.id
    }
}

impl Drop for DummyThread {
    fn drop(&mut self) {
        self.counters.open_threads.fetch_sub(1, Ordering::SeqCst);
    }
}

impl OsBackend for DummyOs {
    type HeapList = DummyHeapList;
    type ThreadSnapshot = DummyThreadSnapshot;
    type Thread = DummyThread;

    fn pid(&self) -> Pid {
        self.pid
    }

    fn page_size(&self) -> umem {
        self.page_size
    }

    fn primary_module(&mut self) -> Result<Address> {
        if self.faults.modules {
            return Err(Error(ErrorOrigin::OsLayer, ErrorKind::ModuleNotFound));
        }
        self.modules
            .first()
            .map(|m| m.base)
            .ok_or(Error(ErrorOrigin::OsLayer, ErrorKind::ModuleNotFound))
    }

    fn query_region(&mut self, addr: Address) -> Option<RegionInfo> {
        self.queried.push(addr);
        let region = match self.script.as_mut() {
            Some(script) => script.pop_front(),
            None => self.region_at(addr),
        };
        trace!("dummy query_region({:x}) = {:?}", addr, region);
        region
    }

    fn module_base_name(&mut self, base: Address) -> Option<String> {
        self.modules
            .iter()
            .find(|m| m.base == base)
            .map(|m| m.name.clone())
    }

    fn module_file_name(&mut self, base: Address) -> Result<String> {
        if self.faults.module_file_name {
            return Err(Error(ErrorOrigin::OsLayer, ErrorKind::ModuleNotFound));
        }
        self.modules
            .iter()
            .find(|m| m.base == base)
            .map(|m| m.path.clone())
            .ok_or(Error(ErrorOrigin::OsLayer, ErrorKind::ModuleNotFound))
    }

    fn heap_list(&mut self) -> Result<DummyHeapList> {
        let list = DummyHeapList::new(self.heaps.clone(), self.counters.clone());
        if self.faults.heap_query {
            // the buffer was acquired but the query itself failed
            drop(list);
            return Err(Error(ErrorOrigin::Heaps, ErrorKind::UnableToQueryHeaps));
        }
        Ok(list)
    }

    fn thread_snapshot(&mut self) -> Result<DummyThreadSnapshot> {
        if self.faults.thread_snapshot {
            return Err(Error(ErrorOrigin::Threads, ErrorKind::UnableToCreateSnapshot));
        }
        self.counters.snapshots.fetch_add(1, Ordering::SeqCst);
        Ok(DummyThreadSnapshot {
            entries: self.threads.clone(),
            pos: 0,
            fail_first: self.faults.thread_first,
            counters: self.counters.clone(),
        })
    }

    fn open_thread(&mut self, id: ThreadId) -> Result<DummyThread> {
        let exists = self
            .threads
            .iter()
            .any(|t| t.id == id && t.owner == self.pid);
        if !exists || self.faults.open_thread.contains(&id) {
            return Err(Error(ErrorOrigin::Threads, ErrorKind::UnableToOpenThread));
        }
        self.counters.open_threads.fetch_add(1, Ordering::SeqCst);
        Ok(DummyThread {
            id,
            counters: self.counters.clone(),
        })
    }
}
