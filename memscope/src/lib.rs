//!
//! # memscope
//!
//! Self-process introspection for reverse engineering tooling.
//!
//! ## Introduction
//!
//! memscope attaches to the address space of the running process, locates its primary module,
//! parses the executable headers of that module (PE or ELF), enumerates threads, heaps and
//! memory regions, and resolves human readable names for arbitrary addresses (module sections,
//! heaps and MSVC or Itanium RTTI class names).
//!
//! The crate is split into a platform-neutral core (this crate) and per-OS backends:
//!
//! ```text
//! +--------------------+      +-----------------------+
//! |   ProcessContext   |----->|  OsBackend (per OS)   |
//! +-+------------------+      +-+---------------------+
//!   |                           |
//!   |  +----------------+       |  +------------------+
//!   +->|  image reader  |       +->|    MemoryView    |
//!   |  +----------------+          +------------------+
//!   |
//!   |  +----------------+      +-----------------------+
//!   +->| region scanner |----->|      heap index       |
//!   |  +----------------+      +-----------------------+
//!   |
//!   |  +----------------+      +-----------------------+
//!   +->| thread listing |      |    VersionMatcher     |
//!      +----------------+      +-----------------------+
//! ```
//!
//! The Windows backend lives in `memscope-win32`, the Linux backend in `memscope-procfs`.
//! Everything in this crate only talks to the [`OsBackend`](crate::os::OsBackend) trait,
//! which makes it possible to drive all of it from the [`dummy`](crate::dummy) backend in tests.
//!
//! ## Getting started
//!
//! ```
//! use memscope::prelude::v1::*;
//! ```
//!
//! A context is created from a backend and a version matcher. Construction never fails, the
//! outcome of the attach is reflected in [`ContextState`](crate::context::ContextState):
//!
//! ```ignore
//! let versions = VersionList::from_toml_str(&std::fs::read_to_string("versions.toml")?)?;
//! let mut ctx = ProcessContext::new(backend, &versions);
//! if ctx.is_identified() {
//!     let descriptor = ctx.descriptor().unwrap();
//!     println!("running {}", descriptor.name);
//! }
//! for range in ctx.list_memory_ranges() {
//!     println!("{}", range);
//! }
//! ```

#[macro_use]
extern crate bitflags;

pub mod error;

#[macro_use]
pub mod types;

pub mod mem;

pub mod image;

pub mod os;

pub mod rtti;

pub mod version;

pub mod context;

#[doc(hidden)]
#[cfg(any(feature = "dummy_os", test))]
pub mod dummy;

#[doc(hidden)]
pub mod dataview {
    pub use ::dataview::*;
}

#[doc(hidden)]
pub mod prelude {
    pub mod v1 {
        pub use crate::context::*;
        pub use crate::dataview::Pod;
        pub use crate::error::*;
        pub use crate::image::*;
        pub use crate::mem::*;
        pub use crate::os::*;
        pub use crate::rtti::*;
        pub use crate::types::*;
        pub use crate::version::*;
    }
    pub use v1::*;
}
