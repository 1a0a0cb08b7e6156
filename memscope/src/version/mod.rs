/*!
Version descriptors and the matcher interface used to identify a binary.

A descriptor holds the symbolic layout of one build of the inspected program: named
absolute addresses (which move with the load address) and named structure offsets
(which do not). Builds are told apart by the timestamp embedded in their image header.

The descriptor database itself is not part of this crate, it is provided by the caller
through the [`VersionMatcher`] trait. [`VersionList`] is a simple in-memory matcher which
can be loaded from a TOML file when the `serde_derive` feature is enabled:

```toml
[[version]]
name = "v0.34.11 SDL"
timestamp = 0x4f3b1a2c
image_base = 0x400000

[version.addresses]
world = 0x013c2d60
cursor = 0x00b0d0a0

[version.offsets]
unit_pos = 0x48
```
*/

use std::collections::BTreeMap;

use log::debug;

use crate::types::{umem, Address, Pid};

#[cfg(feature = "serde_derive")]
use crate::error::{Error, ErrorKind, ErrorOrigin, Result};

/// Symbolic memory layout of a single build.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
pub struct VersionDescriptor {
    pub name: String,
    /// Build timestamp found in the image header.
    pub timestamp: u32,
    /// Load address the addresses of this descriptor are relative to.
    pub image_base: Address,
    /// Absolute addresses, shifted on rebase.
    #[cfg_attr(feature = "serde", serde(default))]
    pub addresses: BTreeMap<String, Address>,
    /// Structure offsets, never rebased.
    #[cfg_attr(feature = "serde", serde(default))]
    pub offsets: BTreeMap<String, umem>,
    /// Process that owns this copy of the descriptor.
    #[cfg_attr(feature = "serde", serde(skip))]
    owner: Option<Pid>,
}

impl VersionDescriptor {
    pub fn new(name: &str, timestamp: u32, image_base: Address) -> Self {
        Self {
            name: name.to_string(),
            timestamp,
            image_base,
            addresses: BTreeMap::new(),
            offsets: BTreeMap::new(),
            owner: None,
        }
    }

    pub fn address(mut self, name: &str, addr: Address) -> Self {
        self.addresses.insert(name.to_string(), addr);
        self
    }

    pub fn offset(mut self, name: &str, offset: umem) -> Self {
        self.offsets.insert(name.to_string(), offset);
        self
    }

    pub fn get_address(&self, name: &str) -> Option<Address> {
        self.addresses.get(name).copied()
    }

    pub fn get_offset(&self, name: &str) -> Option<umem> {
        self.offsets.get(name).copied()
    }

    /// Shifts all addresses so they are relative to `new_base` instead of the current image base.
    pub fn rebase(&mut self, new_base: Address) {
        let delta = new_base.wrapping_sub(self.image_base);
        debug!(
            "rebasing version {} from {:x} to {:x}",
            self.name, self.image_base, new_base
        );
        for addr in self.addresses.values_mut() {
            *addr = addr.wrapping_add(delta);
        }
        self.image_base = new_base;
    }

    /// Returns a private, rebased copy owned by the process `owner`.
    pub fn adopt(&self, new_base: Address, owner: Pid) -> Self {
        let mut copy = self.clone();
        copy.rebase(new_base);
        copy.owner = Some(owner);
        copy
    }

    /// The process owning this copy, `None` for shared templates.
    pub fn owner(&self) -> Option<Pid> {
        self.owner
    }
}

/// Looks up the descriptor of a build.
pub trait VersionMatcher {
    fn lookup_by_timestamp(&self, timestamp: u32) -> Option<&VersionDescriptor>;
}

impl<T: VersionMatcher + ?Sized> VersionMatcher for &T {
    fn lookup_by_timestamp(&self, timestamp: u32) -> Option<&VersionDescriptor> {
        (**self).lookup_by_timestamp(timestamp)
    }
}

/// An in-memory list of known builds.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
pub struct VersionList {
    #[cfg_attr(feature = "serde", serde(rename = "version", default))]
    versions: Vec<VersionDescriptor>,
}

impl VersionList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, descriptor: VersionDescriptor) -> &mut Self {
        self.versions.push(descriptor);
        self
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &VersionDescriptor> {
        self.versions.iter()
    }

    /// Parses a list of descriptors from a TOML document.
    #[cfg(feature = "serde_derive")]
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        ::toml::from_str(contents).map_err(|err| {
            Error(ErrorOrigin::Version, ErrorKind::Configuration)
                .log_warn(format!("unable to parse version list: {}", err))
        })
    }

    /// Reads a list of descriptors from a TOML file.
    #[cfg(feature = "serde_derive")]
    pub fn from_toml_file<P: AsRef<::std::path::Path>>(path: P) -> Result<Self> {
        let contents = ::std::fs::read_to_string(path.as_ref()).map_err(|err| {
            Error(ErrorOrigin::Version, ErrorKind::UnableToReadFile).log_warn(format!(
                "unable to read {}: {}",
                path.as_ref().display(),
                err
            ))
        })?;
        Self::from_toml_str(&contents)
    }
}

impl From<Vec<VersionDescriptor>> for VersionList {
    fn from(versions: Vec<VersionDescriptor>) -> Self {
        Self { versions }
    }
}

impl VersionMatcher for VersionList {
    fn lookup_by_timestamp(&self, timestamp: u32) -> Option<&VersionDescriptor> {
        self.versions.iter().find(|v| v.timestamp == timestamp)
    }
}
