/*!
Scriptable in-memory backend used to exercise the crate without a real operating system.
*/

pub mod elf;
pub mod mem;
pub mod os;
pub mod pe;

pub use elf::{DummySegment, ElfBuilder};
pub use mem::DummyMemory;
pub use os::{
    DummyCounters, DummyFaults, DummyHeapList, DummyModule, DummyOs, DummyThread,
    DummyThreadSnapshot, DUMMY_ADDRESS_LIMIT,
};
pub use pe::{DummySection, PeBuilder};

use crate::types::PageProtection;

/// An image the dummy os can load.
pub trait DummyImage {
    /// Serializes the headers into a buffer of at least one page.
    fn build(&self) -> Vec<u8>;

    /// Relative address, size and protection of every part mapped behind the headers.
    fn regions(&self) -> Vec<(u32, u32, PageProtection)>;

    fn size_of_image(&self) -> u32;
}
