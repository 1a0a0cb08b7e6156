use std::mem::size_of;

use log::trace;

use windows::Win32::System::Diagnostics::ToolHelp::{
    CreateToolhelp32Snapshot, Heap32ListFirst, Heap32ListNext, Thread32First, Thread32Next,
    HEAPLIST32, TH32CS_SNAPHEAPLIST, TH32CS_SNAPTHREAD, THREADENTRY32,
};

use memscope::error::{Error, ErrorKind, ErrorOrigin, Result};
use memscope::os::{ThreadEntry, ThreadSnapshot};
use memscope::types::{Address, Pid};

use super::handle::OwnedHandle;

/// The heaps of a process as captured by a toolhelp snapshot.
///
/// Yields the heap ids, which are the base addresses of the heaps.
pub struct Win32HeapList {
    snapshot: OwnedHandle,
    entry: HEAPLIST32,
    started: bool,
}

impl Win32HeapList {
    pub(crate) fn new(pid: Pid) -> Result<Self> {
        // SAFETY: plain snapshot creation, the returned handle is owned below.
        let handle = unsafe { CreateToolhelp32Snapshot(TH32CS_SNAPHEAPLIST, pid) }.map_err(|err| {
            Error(ErrorOrigin::Heaps, ErrorKind::UnableToQueryHeaps)
                .log_warn(format!("unable to snapshot heaps of process {}: {}", pid, err))
        })?;

        Ok(Self {
            // SAFETY: the snapshot was just created and is not shared.
            snapshot: unsafe { OwnedHandle::new(handle) },
            entry: HEAPLIST32 {
                dwSize: size_of::<HEAPLIST32>(),
                ..Default::default()
            },
            started: false,
        })
    }
}

impl Iterator for Win32HeapList {
    type Item = Address;

    fn next(&mut self) -> Option<Self::Item> {
        // SAFETY: the entry is a properly sized HEAPLIST32 owned by self.
        let res = if self.started {
            unsafe { Heap32ListNext(self.snapshot.raw(), &mut self.entry) }
        } else {
            self.started = true;
            unsafe { Heap32ListFirst(self.snapshot.raw(), &mut self.entry) }
        };
        res.ok()?;
        trace!("heap at {:x}", self.entry.th32HeapID);
        Some(Address::from(self.entry.th32HeapID))
    }
}

/// A system wide toolhelp thread snapshot.
pub struct Win32ThreadSnapshot {
    snapshot: OwnedHandle,
    entry: THREADENTRY32,
}

impl Win32ThreadSnapshot {
    pub(crate) fn new() -> Result<Self> {
        // SAFETY: plain snapshot creation, the returned handle is owned below.
        let handle = unsafe { CreateToolhelp32Snapshot(TH32CS_SNAPTHREAD, 0) }.map_err(|err| {
            Error(ErrorOrigin::Threads, ErrorKind::UnableToCreateSnapshot)
                .log_warn(format!("unable to snapshot threads: {}", err))
        })?;

        Ok(Self {
            // SAFETY: the snapshot was just created and is not shared.
            snapshot: unsafe { OwnedHandle::new(handle) },
            entry: THREADENTRY32 {
                dwSize: size_of::<THREADENTRY32>() as u32,
                ..Default::default()
            },
        })
    }

    fn current(&self) -> ThreadEntry {
        ThreadEntry {
            id: self.entry.th32ThreadID,
            owner: self.entry.th32OwnerProcessID,
        }
    }
}

impl ThreadSnapshot for Win32ThreadSnapshot {
    fn first_entry(&mut self) -> Result<ThreadEntry> {
        // SAFETY: the entry is a properly sized THREADENTRY32 owned by self.
        unsafe { Thread32First(self.snapshot.raw(), &mut self.entry) }.map_err(|err| {
            Error(ErrorOrigin::Threads, ErrorKind::ThreadNotFound)
                .log_warn(format!("unable to read the first thread entry: {}", err))
        })?;
        Ok(self.current())
    }

    fn next_entry(&mut self) -> Option<ThreadEntry> {
        // SAFETY: see first_entry.
        unsafe { Thread32Next(self.snapshot.raw(), &mut self.entry) }.ok()?;
        Some(self.current())
    }
}
