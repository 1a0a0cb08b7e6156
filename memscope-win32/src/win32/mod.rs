pub mod handle;
pub use handle::OwnedHandle;

pub mod snapshot;
pub use snapshot::{Win32HeapList, Win32ThreadSnapshot};

use std::ffi::c_void;
use std::mem::size_of;

use log::{debug, info, trace};

use windows::Win32::Foundation::{HANDLE, HMODULE, MAX_PATH};
use windows::Win32::System::Diagnostics::Debug::{ReadProcessMemory, WriteProcessMemory};
use windows::Win32::System::Memory::{VirtualQueryEx, MEMORY_BASIC_INFORMATION};
use windows::Win32::System::ProcessStatus::{
    EnumProcessModules, GetModuleBaseNameA, GetModuleFileNameExA,
};
use windows::Win32::System::SystemInformation::{GetSystemInfo, SYSTEM_INFO};
use windows::Win32::System::Threading::{
    GetCurrentProcess, GetCurrentProcessId, OpenThread, THREAD_ACCESS_RIGHTS, THREAD_ALL_ACCESS,
};

use memscope::context::{ContextConfig, ProcessContext};
use memscope::error::{Error, ErrorKind, ErrorOrigin, Result};
use memscope::mem::MemoryView;
use memscope::os::{OsBackend, RegionInfo, ThreadHandle};
use memscope::types::{umem, Address, Pid, ThreadId};
use memscope::version::VersionMatcher;

use crate::convert;

/// Attaches to the current process with the default configuration.
pub fn attach<V: VersionMatcher>(versions: &V) -> ProcessContext<Win32Os> {
    ProcessContext::new(Win32Os::new(), versions)
}

pub fn attach_with_config<V: VersionMatcher>(
    versions: &V,
    config: ContextConfig,
) -> ProcessContext<Win32Os> {
    ProcessContext::with_config(Win32Os::new(), versions, config)
}

/// Builder for a [`Win32Os`].
///
/// # Examples
///
/// ```ignore
/// use memscope_win32::Win32Os;
/// use windows::Win32::System::Threading::{THREAD_GET_CONTEXT, THREAD_SUSPEND_RESUME};
///
/// let os = Win32Os::builder()
///     .thread_access(THREAD_SUSPEND_RESUME | THREAD_GET_CONTEXT)
///     .build();
/// ```
#[derive(Copy, Clone, Debug)]
pub struct Win32OsBuilder {
    thread_access: THREAD_ACCESS_RIGHTS,
}

impl Default for Win32OsBuilder {
    fn default() -> Self {
        Self {
            thread_access: THREAD_ALL_ACCESS,
        }
    }
}

impl Win32OsBuilder {
    /// Access rights requested when opening threads.
    pub fn thread_access(mut self, access: THREAD_ACCESS_RIGHTS) -> Self {
        self.thread_access = access;
        self
    }

    pub fn build(self) -> Win32Os {
        // SAFETY: these calls have no preconditions.
        let (process, pid) = unsafe { (GetCurrentProcess(), GetCurrentProcessId()) };

        let mut info = SYSTEM_INFO::default();
        // SAFETY: info is a properly sized SYSTEM_INFO.
        unsafe { GetSystemInfo(&mut info) };
        debug!("process {}: page size is {:x}", pid, info.dwPageSize);

        Win32Os {
            process,
            pid,
            page_size: info.dwPageSize as umem,
            thread_access: self.thread_access,
        }
    }
}

/// The current process as seen through the Win32 API.
pub struct Win32Os {
    // pseudo handle, never closed
    process: HANDLE,
    pid: Pid,
    page_size: umem,
    thread_access: THREAD_ACCESS_RIGHTS,
}

impl Default for Win32Os {
    fn default() -> Self {
        Self::new()
    }
}

impl Win32Os {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> Win32OsBuilder {
        Win32OsBuilder::default()
    }

    fn module(base: Address) -> HMODULE {
        HMODULE(base.to_umem() as usize as *mut c_void)
    }
}

impl MemoryView for Win32Os {
    fn read_raw_into(&mut self, addr: Address, out: &mut [u8]) -> Result<()> {
        let mut read = 0usize;
        // SAFETY: out is a valid buffer of out.len() bytes.
        unsafe {
            ReadProcessMemory(
                self.process,
                addr.to_umem() as usize as *const c_void,
                out.as_mut_ptr() as *mut c_void,
                out.len(),
                Some(&mut read),
            )
        }
        .map_err(|err| {
            Error(ErrorOrigin::Memory, ErrorKind::UnableToReadMemory)
                .log_trace(format!("ReadProcessMemory at {:x} failed: {}", addr, err))
        })?;

        if read != out.len() {
            return Err(Error(ErrorOrigin::Memory, ErrorKind::UnableToReadMemory)
                .log_trace(format!("partial read at {:x}: {} of {}", addr, read, out.len())));
        }
        Ok(())
    }

    fn write_raw(&mut self, addr: Address, data: &[u8]) -> Result<()> {
        let mut written = 0usize;
        // SAFETY: data is a valid buffer of data.len() bytes.
        unsafe {
            WriteProcessMemory(
                self.process,
                addr.to_umem() as usize as *const c_void,
                data.as_ptr() as *const c_void,
                data.len(),
                Some(&mut written),
            )
        }
        .map_err(|err| {
            Error(ErrorOrigin::Memory, ErrorKind::UnableToWriteMemory)
                .log_trace(format!("WriteProcessMemory at {:x} failed: {}", addr, err))
        })?;

        if written != data.len() {
            return Err(Error(ErrorOrigin::Memory, ErrorKind::UnableToWriteMemory)
                .log_trace(format!("partial write at {:x}: {} of {}", addr, written, data.len())));
        }
        Ok(())
    }
}

/// An open thread handle.
pub struct Win32Thread {
    id: ThreadId,
    handle: OwnedHandle,
}

impl Win32Thread {
    pub fn handle(&self) -> HANDLE {
        self.handle.raw()
    }
}

impl ThreadHandle for Win32Thread {
    fn id(&self) -> ThreadId {
        self.id
    }
}

impl OsBackend for Win32Os {
    type HeapList = Win32HeapList;
    type ThreadSnapshot = Win32ThreadSnapshot;
    type Thread = Win32Thread;

    fn pid(&self) -> Pid {
        self.pid
    }

    fn page_size(&self) -> umem {
        self.page_size
    }

    fn primary_module(&mut self) -> Result<Address> {
        let mut module = HMODULE::default();
        let mut needed = 0u32;
        // SAFETY: room for exactly one module handle is passed.
        unsafe {
            EnumProcessModules(
                self.process,
                &mut module,
                size_of::<HMODULE>() as u32,
                &mut needed,
            )
        }
        .map_err(|err| {
            Error(ErrorOrigin::OsLayer, ErrorKind::ModuleNotFound)
                .log_warn(format!("EnumProcessModules failed: {}", err))
        })?;

        if needed == 0 || module.0.is_null() {
            return Err(Error(ErrorOrigin::OsLayer, ErrorKind::ModuleNotFound)
                .log_warn("process has no modules loaded"));
        }
        let base = Address::from(module.0 as usize);
        info!("process {}: first module at {:x}", self.pid, base);
        Ok(base)
    }

    fn query_region(&mut self, addr: Address) -> Option<RegionInfo> {
        let mut mbi = MEMORY_BASIC_INFORMATION::default();
        // SAFETY: mbi is a properly sized MEMORY_BASIC_INFORMATION.
        let len = unsafe {
            VirtualQueryEx(
                self.process,
                Some(addr.to_umem() as usize as *const c_void),
                &mut mbi,
                size_of::<MEMORY_BASIC_INFORMATION>(),
            )
        };
        if len == 0 {
            trace!("VirtualQueryEx at {:x} failed", addr);
            return None;
        }

        Some(RegionInfo {
            base: Address::from(mbi.BaseAddress as usize),
            size: mbi.RegionSize as umem,
            state: convert::region_state(mbi.State.0),
            protection: convert::region_protection(mbi.Protect.0),
            kind: convert::region_kind(mbi.Type.0),
        })
    }

    fn module_base_name(&mut self, base: Address) -> Option<String> {
        let mut buf = [0u8; MAX_PATH as usize];
        // SAFETY: the buffer length is passed along with the slice.
        let len = unsafe { GetModuleBaseNameA(self.process, Self::module(base), &mut buf) };
        if len == 0 {
            return None;
        }
        Some(convert::ansi_string(&buf, len))
    }

    fn module_file_name(&mut self, base: Address) -> Result<String> {
        let mut buf = [0u8; MAX_PATH as usize];
        // SAFETY: the buffer length is passed along with the slice.
        let len = unsafe { GetModuleFileNameExA(self.process, Self::module(base), &mut buf) };
        if len == 0 {
            return Err(Error(ErrorOrigin::OsLayer, ErrorKind::ModuleNotFound)
                .log_debug(format!("no module file at {:x}", base)));
        }
        Ok(convert::ansi_string(&buf, len))
    }

    fn heap_list(&mut self) -> Result<Self::HeapList> {
        Win32HeapList::new(self.pid)
    }

    fn thread_snapshot(&mut self) -> Result<Self::ThreadSnapshot> {
        Win32ThreadSnapshot::new()
    }

    fn open_thread(&mut self, id: ThreadId) -> Result<Self::Thread> {
        // SAFETY: the returned handle is owned by the Win32Thread below.
        let handle = unsafe { OpenThread(self.thread_access, false, id) }.map_err(|err| {
            Error(ErrorOrigin::Threads, ErrorKind::UnableToOpenThread)
                .log_debug(format!("OpenThread({}) failed: {}", id, err))
        })?;
        Ok(Win32Thread {
            id,
            // SAFETY: the handle was just opened and is not shared.
            handle: unsafe { OwnedHandle::new(handle) },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memscope::context::ContextState;
    use memscope::os::thread_ids;
    use memscope::version::VersionList;

    #[test]
    fn primary_module_is_pe() {
        let mut os = Win32Os::new();
        let base = os.primary_module().unwrap();
        assert_eq!(os.read::<u16>(base).unwrap(), 0x5a4d);
        assert!(os.module_base_name(base).unwrap().ends_with(".exe"));
        assert!(os.module_base_name(base + 0x1000u64).is_none());
    }

    #[test]
    fn read_write_self() {
        let mut os = Win32Os::new();
        let mut value = 0x1234_5678_u32;
        let addr = Address::from(&mut value as *mut u32 as usize);

        assert_eq!(os.read::<u32>(addr).unwrap(), 0x1234_5678);
        os.write(addr, &0xdead_beef_u32).unwrap();
        assert_eq!(os.read::<u32>(addr).unwrap(), 0xdead_beef);

        assert!(os.read::<u32>(Address::NULL).is_err());
    }

    #[test]
    fn current_thread_is_listed() {
        let mut os = Win32Os::new();
        let pid = os.pid();
        let ids = thread_ids(&mut os, pid).unwrap();
        let current = unsafe { windows::Win32::System::Threading::GetCurrentThreadId() };
        assert!(ids.contains(&current));

        let thread = os.open_thread(current).unwrap();
        assert_eq!(thread.id(), current);
    }

    #[test]
    fn attach_self() {
        let mut ctx = attach(&VersionList::new());
        assert_eq!(ctx.state(), ContextState::AttachedUnidentified);
        assert!(ctx.image().is_some());

        let ranges = ctx.list_memory_ranges();
        assert!(ranges.iter().any(|r| r.name.contains(" : ")));
        assert!(ranges.windows(2).all(|w| w[0].end <= w[1].start));

        let path = ctx.primary_module_path().unwrap();
        assert!(ctx.primary_module_file().unwrap().starts_with(&path));
    }
}
