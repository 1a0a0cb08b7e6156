/*!
The process context ties all components together.

A context is created once per attached process. Construction never fails, instead the
outcome is tracked in [`ContextState`]:

- `Uninitialized`: the primary module could not be found, only raw memory access works.
- `AttachedUnidentified`: the primary module is known, but its header could not be parsed,
  no version descriptor matched its build or the threads could not be enumerated.
- `Identified`: all of the above succeeded.

Nothing is retried automatically, a failed identification is final for the lifetime of the context.
The error that stopped it is kept and available through `identify_error`.
*/

use std::fmt;

use hashbrown::HashMap;
use log::{debug, info};

use crate::error::{Error, ErrorKind, ErrorOrigin, Result};
use crate::image::ModuleImage;
use crate::mem::MemoryView;
use crate::os::{open_threads, thread_ids, HeapIndex, OsBackend, RegionScanner};
use crate::rtti::RttiLayout;
use crate::types::{find_range, Address, MemoryRange, Pid, ThreadId};
use crate::version::{VersionDescriptor, VersionMatcher};

#[cfg(test)]
mod tests;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ContextState {
    Uninitialized,
    AttachedUnidentified,
    Identified,
}

impl fmt::Display for ContextState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            ContextState::Uninitialized => "uninitialized",
            ContextState::AttachedUnidentified => "attached (unidentified)",
            ContextState::Identified => "identified",
        };
        f.write_str(s)
    }
}

/// Runtime options of a [`ProcessContext`].
///
/// # Examples
///
/// ```
/// use memscope::context::ContextConfig;
/// use memscope::rtti::MSVC_X86;
///
/// let config = ContextConfig::new()
///     .rtti(MSVC_X86)
///     .enumerate_heaps(false);
/// ```
#[derive(Copy, Clone, Debug)]
pub struct ContextConfig {
    rtti: Option<RttiLayout>,
    enumerate_heaps: bool,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            rtti: None,
            enumerate_heaps: true,
        }
    }
}

impl ContextConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forces the given RTTI layout instead of deriving it from the image.
    pub fn rtti(mut self, layout: RttiLayout) -> Self {
        self.rtti = Some(layout);
        self
    }

    /// Enables or disables the heap query during region scans.
    pub fn enumerate_heaps(mut self, enumerate: bool) -> Self {
        self.enumerate_heaps = enumerate;
        self
    }
}

/// An attached process.
pub struct ProcessContext<B: OsBackend> {
    descriptor: Option<VersionDescriptor>,
    threads: Vec<B::Thread>,
    image: Option<ModuleImage>,
    os: B,

    pid: Pid,
    base: Option<Address>,
    thread_ids: Vec<ThreadId>,
    state: ContextState,
    config: ContextConfig,
    rtti: RttiLayout,
    class_names: HashMap<Address, String>,
    failure: Option<Error>,
}

impl<B: OsBackend> ProcessContext<B> {
    /// Attaches to the process behind `os` with the default configuration.
    pub fn new<V: VersionMatcher>(os: B, versions: &V) -> Self {
        Self::with_config(os, versions, ContextConfig::default())
    }

    pub fn with_config<V: VersionMatcher>(os: B, versions: &V, config: ContextConfig) -> Self {
        let mut ctx = Self {
            descriptor: None,
            threads: Vec::new(),
            image: None,
            pid: os.pid(),
            os,
            base: None,
            thread_ids: Vec::new(),
            state: ContextState::Uninitialized,
            config,
            rtti: config.rtti.unwrap_or_else(RttiLayout::host),
            class_names: HashMap::new(),
            failure: None,
        };
        ctx.identify(versions);
        ctx
    }

    fn identify<V: VersionMatcher>(&mut self, versions: &V) {
        if let Err(err) = self.try_identify(versions) {
            self.failure = Some(err);
        }
    }

    fn try_identify<V: VersionMatcher>(&mut self, versions: &V) -> Result<()> {
        let pid = self.pid;
        let base = self.os.primary_module().map_err(|err| {
            err.log_warn(format!("unable to find the primary module of process {}", pid))
        })?;
        info!("process {}: primary module at {:x}", pid, base);
        self.base = Some(base);
        self.state = ContextState::AttachedUnidentified;

        let image = ModuleImage::parse(&mut self.os, base).map_err(|err| {
            err.log_warn(format!("unable to parse the image header at {:x}", base))
        })?;
        debug!(
            "image at {:x} is {:?} with {} sections",
            base,
            image.kind(),
            image.sections.len()
        );
        if self.config.rtti.is_none() {
            self.rtti = RttiLayout::for_image(Some(image.kind()));
        }
        let timestamp = image.timestamp();
        self.image = Some(image);

        let descriptor = timestamp
            .and_then(|timestamp| versions.lookup_by_timestamp(timestamp))
            .map(|template| template.adopt(base, pid))
            .ok_or_else(|| {
                Error(ErrorOrigin::Version, ErrorKind::NotFound).log_warn(match timestamp {
                    Some(timestamp) => {
                        format!("no version descriptor matches build timestamp {:x}", timestamp)
                    }
                    None => "the image carries no build timestamp".to_string(),
                })
            })?;
        info!("process {}: identified as {}", pid, descriptor.name);
        self.descriptor = Some(descriptor);

        let ids = thread_ids(&mut self.os, pid).map_err(|err| {
            err.log_warn(format!("unable to enumerate threads of process {}", pid))
        })?;
        self.threads = open_threads(&mut self.os, &ids);
        info!(
            "process {}: opened {} of {} threads",
            pid,
            self.threads.len(),
            ids.len()
        );
        self.thread_ids = ids;
        self.state = ContextState::Identified;
        Ok(())
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    /// Returns true if the header was parsed, a version matched and the threads were enumerated.
    ///
    /// Symbolic lookups through [`descriptor`](Self::descriptor) are only meaningful in this state.
    pub fn is_identified(&self) -> bool {
        self.state == ContextState::Identified
    }

    /// The error which stopped identification, `None` once identified.
    pub fn identify_error(&self) -> Option<Error> {
        self.failure
    }

    /// Base address of the primary module.
    pub fn base(&self) -> Option<Address> {
        self.base
    }

    pub fn image(&self) -> Option<&ModuleImage> {
        self.image.as_ref()
    }

    /// The rebased version descriptor owned by this context.
    ///
    /// It is retained even when thread enumeration failed afterwards.
    pub fn descriptor(&self) -> Option<&VersionDescriptor> {
        self.descriptor.as_ref()
    }

    /// Thread ids captured at attach time. They are not refreshed.
    pub fn thread_ids(&self) -> &[ThreadId] {
        &self.thread_ids
    }

    /// Control handles of all threads that could be opened.
    pub fn threads(&self) -> &[B::Thread] {
        &self.threads
    }

    pub fn rtti_layout(&self) -> RttiLayout {
        self.rtti
    }

    pub fn os(&self) -> &B {
        &self.os
    }

    pub fn os_mut(&mut self) -> &mut B {
        &mut self.os
    }

    /// Scans the address space and returns all ranges of interest.
    ///
    /// The result is a snapshot and is never cached.
    pub fn list_memory_ranges(&mut self) -> Vec<MemoryRange> {
        let heaps = if self.config.enumerate_heaps {
            HeapIndex::query(&mut self.os)
        } else {
            HeapIndex::empty()
        };
        let sections = self
            .image
            .as_ref()
            .map(|image| &image.sections[..])
            .unwrap_or(&[]);

        RegionScanner::new(self.base.unwrap_or_default(), sections)
            .heaps(heaps)
            .scan(&mut self.os)
    }

    /// Checks whether `addr` lies in a range reported by a fresh scan.
    pub fn is_valid_address(&mut self, addr: Address) -> bool {
        find_range(&self.list_memory_ranges(), addr).is_some()
    }

    /// Reads the class name of the given vtable.
    ///
    /// The vtable must belong to a polymorphic class of the inspected image, this is not checked.
    /// Successful lookups are cached per vtable.
    pub fn read_class_name(&mut self, vtable: Address) -> Result<String> {
        if let Some(name) = self.class_names.get(&vtable) {
            return Ok(name.clone());
        }
        let name = self.rtti.read_class_name(&mut self.os, vtable)?;
        self.class_names.insert(vtable, name.clone());
        Ok(name)
    }

    /// Reads the class name of the polymorphic object at `object`.
    pub fn resolve_class_name(&mut self, object: Address) -> Result<String> {
        let vtable = self.rtti.read_vtable(&mut self.os, object)?;
        self.read_class_name(vtable)
    }

    pub fn clear_class_names(&mut self) {
        self.class_names.clear();
    }

    /// Full path of the primary module.
    pub fn primary_module_file(&mut self) -> Result<String> {
        let base = self.base.ok_or_else(|| {
            Error(ErrorOrigin::Context, ErrorKind::Uninitialized)
                .log_debug("no primary module to resolve the path of")
        })?;
        self.os.module_file_name(base)
    }

    /// Directory containing the primary module.
    pub fn primary_module_path(&mut self) -> Result<String> {
        let file = self.primary_module_file()?;
        Ok(match file.rfind(|c| c == '\\' || c == '/') {
            Some(idx) => file[..idx].to_string(),
            None => file,
        })
    }
}

impl<B: OsBackend> MemoryView for ProcessContext<B> {
    fn read_raw_into(&mut self, addr: Address, out: &mut [u8]) -> Result<()> {
        self.os.read_raw_into(addr, out)
    }

    fn write_raw(&mut self, addr: Address, data: &[u8]) -> Result<()> {
        self.os.write_raw(addr, data)
    }
}

impl<B: OsBackend> Drop for ProcessContext<B> {
    fn drop(&mut self) {
        self.descriptor = None;
        self.threads.clear();
        self.image = None;
        debug!("process {}: context released", self.pid);
    }
}
