use std::ffi::c_void;
use std::io;

use libc::{c_ulong, iovec, pid_t};
use log::{debug, info, trace};
use procfs::process::{MMPermissions, MMapPath, MemoryMap, Process, Task};

use memscope::context::{ContextConfig, ProcessContext};
use memscope::error::{Error, ErrorKind, ErrorOrigin, Result};
use memscope::mem::MemoryView;
use memscope::os::{OsBackend, RegionInfo, ThreadEntry, ThreadHandle, ThreadSnapshot};
use memscope::types::{size, umem, Address, Pid, ThreadId};
use memscope::version::VersionMatcher;

use crate::maps::{MapSnapshot, Mapping};

/// Attaches to the current process with the default configuration.
pub fn attach<V: VersionMatcher>(versions: &V) -> Result<ProcessContext<ProcfsOs>> {
    Ok(ProcessContext::new(ProcfsOs::new()?, versions))
}

pub fn attach_with_config<V: VersionMatcher>(
    versions: &V,
    config: ContextConfig,
) -> Result<ProcessContext<ProcfsOs>> {
    Ok(ProcessContext::with_config(ProcfsOs::new()?, versions, config))
}

impl From<&MemoryMap> for Mapping {
    fn from(map: &MemoryMap) -> Self {
        let path = match &map.pathname {
            MMapPath::Path(path) => Some(path.clone()),
            _ => None,
        };
        Self {
            start: Address::from(map.address.0),
            end: Address::from(map.address.1),
            read: map.perms.contains(MMPermissions::READ),
            write: map.perms.contains(MMPermissions::WRITE),
            execute: map.perms.contains(MMPermissions::EXECUTE),
            shared: map.perms.contains(MMPermissions::SHARED),
            offset: map.offset,
            path,
            heap: matches!(map.pathname, MMapPath::Heap),
        }
    }
}

/// The current process as seen through `/proc/self`.
pub struct ProcfsOs {
    process: Process,
    pid: Pid,
    page_size: umem,
    maps: Option<MapSnapshot>,
}

impl ProcfsOs {
    pub fn new() -> Result<Self> {
        let process = Process::myself().map_err(|err| {
            Error(ErrorOrigin::OsLayer, ErrorKind::ProcessNotFound)
                .log_error(format!("unable to open /proc/self: {}", err))
        })?;
        let pid = process.pid() as Pid;

        // SAFETY: sysconf has no preconditions.
        let page_size = match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
            n if n > 0 => n as umem,
            _ => size::kb(4),
        };
        debug!("process {}: page size is {:x}", pid, page_size);

        Ok(Self {
            process,
            pid,
            page_size,
            maps: None,
        })
    }

    pub fn process(&self) -> &Process {
        &self.process
    }

    /// Re-reads the memory mappings of the process.
    pub fn refresh_maps(&mut self) -> Result<&MapSnapshot> {
        let maps = self.process.maps().map_err(|err| {
            Error(ErrorOrigin::Regions, ErrorKind::UnableToReadFile)
                .log_warn(format!("unable to read /proc/{}/maps: {}", self.pid, err))
        })?;
        let snapshot = MapSnapshot::new(
            maps.into_iter().map(|map| Mapping::from(&map)).collect(),
        );
        trace!("process {}: {} mappings", self.pid, snapshot.len());
        Ok(self.maps.insert(snapshot))
    }

    fn maps(&mut self) -> Result<&MapSnapshot> {
        if self.maps.is_none() {
            self.refresh_maps()?;
        }
        self.maps.as_ref().ok_or(Error(ErrorOrigin::Regions, ErrorKind::Uninitialized))
    }

    fn fill_iovec(addr: Address, ptr: *mut c_void, len: usize) -> (iovec, iovec) {
        let local = iovec {
            iov_base: ptr,
            iov_len: len,
        };
        let remote = iovec {
            iov_base: addr.to_umem() as usize as *mut c_void,
            iov_len: len,
        };
        (local, remote)
    }

    fn vm_error(kind: ErrorKind, addr: Address) -> Error {
        let err = io::Error::last_os_error();
        let reason = match err.raw_os_error() {
            Some(libc::EFAULT) => "remote memory address is invalid",
            Some(libc::ENOMEM) => "unable to allocate memory for internal copies",
            Some(libc::EPERM) => "insufficient permissions to access the address space",
            Some(libc::ESRCH) => "process not found",
            Some(libc::EINVAL) => "invalid value",
            _ => "unknown error",
        };
        Error(ErrorOrigin::Memory, kind).log_trace(format!("{:x}: {} ({})", addr, reason, err))
    }
}

impl MemoryView for ProcfsOs {
    fn read_raw_into(&mut self, addr: Address, out: &mut [u8]) -> Result<()> {
        if out.is_empty() {
            return Ok(());
        }
        let (local, remote) = Self::fill_iovec(addr, out.as_mut_ptr() as *mut c_void, out.len());
        // SAFETY: local points into out which lives for the duration of the call.
        let read = unsafe {
            libc::process_vm_readv(self.pid as pid_t, &local, 1 as c_ulong, &remote, 1, 0)
        };
        if read < 0 {
            return Err(Self::vm_error(ErrorKind::UnableToReadMemory, addr));
        }
        if read as usize != out.len() {
            return Err(Error(ErrorOrigin::Memory, ErrorKind::UnableToReadMemory)
                .log_trace(format!("partial read at {:x}: {} of {}", addr, read, out.len())));
        }
        Ok(())
    }

    fn write_raw(&mut self, addr: Address, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let (local, remote) = Self::fill_iovec(addr, data.as_ptr() as *mut c_void, data.len());
        // SAFETY: local points into data which is only read by the kernel.
        let written = unsafe {
            libc::process_vm_writev(self.pid as pid_t, &local, 1 as c_ulong, &remote, 1, 0)
        };
        if written < 0 {
            return Err(Self::vm_error(ErrorKind::UnableToWriteMemory, addr));
        }
        if written as usize != data.len() {
            return Err(Error(ErrorOrigin::Memory, ErrorKind::UnableToWriteMemory)
                .log_trace(format!("partial write at {:x}: {} of {}", addr, written, data.len())));
        }
        Ok(())
    }
}

/// The tasks of the current process captured at creation.
///
/// Only threads of the attached process are listed, other processes are not visible
/// to a self-introspecting backend.
pub struct ProcfsThreadSnapshot {
    entries: Vec<ThreadEntry>,
    next: usize,
}

impl ThreadSnapshot for ProcfsThreadSnapshot {
    fn first_entry(&mut self) -> Result<ThreadEntry> {
        self.next = 1;
        self.entries.first().copied().ok_or_else(|| {
            Error(ErrorOrigin::Threads, ErrorKind::ThreadNotFound).log_warn("task list is empty")
        })
    }

    fn next_entry(&mut self) -> Option<ThreadEntry> {
        let entry = self.entries.get(self.next).copied()?;
        self.next += 1;
        Some(entry)
    }
}

/// An open `/proc/self/task/<tid>` directory.
pub struct ProcfsThread {
    task: Task,
}

impl ProcfsThread {
    pub fn task(&self) -> &Task {
        &self.task
    }
}

impl ThreadHandle for ProcfsThread {
    fn id(&self) -> ThreadId {
        self.task.tid as ThreadId
    }
}

impl OsBackend for ProcfsOs {
    type HeapList = std::vec::IntoIter<Address>;
    type ThreadSnapshot = ProcfsThreadSnapshot;
    type Thread = ProcfsThread;

    fn pid(&self) -> Pid {
        self.pid
    }

    fn page_size(&self) -> umem {
        self.page_size
    }

    fn primary_module(&mut self) -> Result<Address> {
        let exe = self.process.exe().map_err(|err| {
            Error(ErrorOrigin::OsLayer, ErrorKind::ModuleNotFound)
                .log_warn(format!("unable to resolve /proc/{}/exe: {}", self.pid, err))
        })?;
        let base = self
            .refresh_maps()?
            .module_by_path(&exe)
            .map(|m| m.start)
            .ok_or_else(|| {
                Error(ErrorOrigin::OsLayer, ErrorKind::ModuleNotFound)
                    .log_warn(format!("{} is not mapped", exe.display()))
            })?;
        info!("process {}: {} mapped at {:x}", self.pid, exe.display(), base);
        Ok(base)
    }

    fn query_region(&mut self, addr: Address) -> Option<RegionInfo> {
        // a walk always starts at zero, take a fresh snapshot for it
        if addr.is_null() {
            self.refresh_maps().ok()?;
        }
        let page_size = self.page_size;
        self.maps().ok()?.query(addr, page_size)
    }

    fn module_base_name(&mut self, base: Address) -> Option<String> {
        self.maps().ok()?.module_at(base)?.file_name()
    }

    fn module_file_name(&mut self, base: Address) -> Result<String> {
        let pid = self.pid;
        self.maps()?
            .module_at(base)
            .and_then(|m| m.path.as_ref())
            .map(|path| path.to_string_lossy().to_string())
            .ok_or_else(|| {
                Error(ErrorOrigin::OsLayer, ErrorKind::ModuleNotFound)
                    .log_debug(format!("process {}: no module at {:x}", pid, base))
            })
    }

    fn heap_list(&mut self) -> Result<Self::HeapList> {
        let heaps = self
            .refresh_maps()
            .map_err(|err| Error(ErrorOrigin::Heaps, ErrorKind::UnableToQueryHeaps).log_debug(err))?
            .heaps()
            .collect::<Vec<_>>();
        Ok(heaps.into_iter())
    }

    fn thread_snapshot(&mut self) -> Result<Self::ThreadSnapshot> {
        let pid = self.pid;
        let tasks = self.process.tasks().map_err(|err| {
            Error(ErrorOrigin::Threads, ErrorKind::UnableToCreateSnapshot)
                .log_warn(format!("unable to list /proc/{}/task: {}", pid, err))
        })?;
        let entries = tasks
            .filter_map(|task| task.ok())
            .map(|task| ThreadEntry {
                id: task.tid as ThreadId,
                owner: task.pid as Pid,
            })
            .collect();
        Ok(ProcfsThreadSnapshot { entries, next: 0 })
    }

    fn open_thread(&mut self, id: ThreadId) -> Result<Self::Thread> {
        let task = self.process.task_from_tid(id as pid_t).map_err(|err| {
            Error(ErrorOrigin::Threads, ErrorKind::UnableToOpenThread)
                .log_debug(format!("unable to open task {}: {}", id, err))
        })?;
        Ok(ProcfsThread { task })
    }
}
