/*!
Protection, state and kind of a memory region as reported by the OS.
*/

bitflags! {
    /// Raw protection of a memory region.
    ///
    /// The bit values mirror the Win32 `PAGE_*` constants. Backends for other
    /// operating systems translate their permission bits into this encoding
    /// (see [`PageProtection::from_rwx`]).
    #[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
    #[repr(transparent)]
    pub struct PageProtection: u32 {
        const NOACCESS = 0x01;
        const READONLY = 0x02;
        const READWRITE = 0x04;
        const WRITECOPY = 0x08;
        const EXECUTE = 0x10;
        const EXECUTE_READ = 0x20;
        const EXECUTE_READWRITE = 0x40;
        const EXECUTE_WRITECOPY = 0x80;
        const GUARD = 0x100;
        const NOCACHE = 0x200;
        const WRITECOMBINE = 0x400;
    }
}

impl PageProtection {
    /// Returns true if the protection permits reading.
    ///
    /// Copy-on-write pages are not considered readable.
    pub fn is_readable(self) -> bool {
        self.intersects(
            PageProtection::EXECUTE_READ
                | PageProtection::EXECUTE_READWRITE
                | PageProtection::READONLY
                | PageProtection::READWRITE,
        )
    }

    /// Returns true if the protection permits writing.
    pub fn is_writable(self) -> bool {
        self.intersects(PageProtection::EXECUTE_READWRITE | PageProtection::READWRITE)
    }

    /// Returns true if the protection permits execution.
    pub fn is_executable(self) -> bool {
        self.intersects(
            PageProtection::EXECUTE_READ
                | PageProtection::EXECUTE_READWRITE
                | PageProtection::EXECUTE,
        )
    }

    /// Translates a plain read/write/execute triple into the win32 encoding.
    ///
    /// Write-only pages do not exist on win32 and are reported as read-write.
    pub fn from_rwx(read: bool, write: bool, execute: bool) -> Self {
        match (read, write, execute) {
            (false, false, false) => PageProtection::NOACCESS,
            (true, false, false) => PageProtection::READONLY,
            (_, true, false) => PageProtection::READWRITE,
            (false, false, true) => PageProtection::EXECUTE,
            (true, false, true) => PageProtection::EXECUTE_READ,
            (_, true, true) => PageProtection::EXECUTE_READWRITE,
        }
    }
}

impl Default for PageProtection {
    fn default() -> Self {
        PageProtection::NOACCESS
    }
}

/// Allocation state of a region.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
pub enum RegionState {
    /// Backed by actual memory.
    Commit,
    /// Address space is reserved but not backed.
    Reserve,
    /// Unused address space.
    Free,
}

/// Kind of mapping a region belongs to.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
pub enum RegionKind {
    /// Memory private to the process (heaps, stacks, anonymous allocations).
    Private,
    /// Memory mapped from an executable image.
    Image,
    /// Memory mapped from a section or file which may be shared with other processes.
    Mapped,
}

impl RegionKind {
    pub fn is_private(self) -> bool {
        self == RegionKind::Private
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_policy() {
        let p = PageProtection::EXECUTE_READ;
        assert!(p.is_readable() && !p.is_writable() && p.is_executable());

        let p = PageProtection::EXECUTE_READWRITE;
        assert!(p.is_readable() && p.is_writable() && p.is_executable());

        let p = PageProtection::READONLY;
        assert!(p.is_readable() && !p.is_writable() && !p.is_executable());

        let p = PageProtection::READWRITE | PageProtection::GUARD;
        assert!(p.is_readable() && p.is_writable() && !p.is_executable());

        let p = PageProtection::EXECUTE;
        assert!(!p.is_readable() && !p.is_writable() && p.is_executable());

        let p = PageProtection::WRITECOPY;
        assert!(!p.is_readable() && !p.is_writable() && !p.is_executable());

        let p = PageProtection::NOACCESS;
        assert!(!p.is_readable() && !p.is_writable() && !p.is_executable());
    }

    #[test]
    fn rwx_roundtrip() {
        for &(r, w, x) in &[
            (true, false, false),
            (true, true, false),
            (true, false, true),
            (true, true, true),
            (false, false, true),
            (false, false, false),
        ] {
            let p = PageProtection::from_rwx(r, w, x);
            assert_eq!((p.is_readable(), p.is_writable(), p.is_executable()), (r, w, x));
        }
    }
}
