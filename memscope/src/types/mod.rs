/*!
Module with basic types used in memscope.

This module contains the address type, page protection flags
and the memory range type produced by region scans.
It also exposes different size helpers.
*/

pub mod address;
#[doc(hidden)]
pub use address::{imem, umem, Address};

pub mod size;

pub mod protection;
#[doc(hidden)]
pub use protection::{PageProtection, RegionKind, RegionState};

pub mod range;
#[doc(hidden)]
pub use range::{find_range, MemoryRange};

/// Identifier of a process.
pub type Pid = u32;

/// Identifier of a thread.
pub type ThreadId = u32;
