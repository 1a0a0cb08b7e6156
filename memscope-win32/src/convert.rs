/*!
Translation of raw Win32 values into the platform-neutral memscope types.
*/

use memscope::types::{PageProtection, RegionKind, RegionState};

pub const MEM_COMMIT: u32 = 0x0000_1000;
pub const MEM_RESERVE: u32 = 0x0000_2000;
pub const MEM_FREE: u32 = 0x0001_0000;

pub const MEM_PRIVATE: u32 = 0x0002_0000;
pub const MEM_MAPPED: u32 = 0x0004_0000;
pub const MEM_IMAGE: u32 = 0x0100_0000;

/// Translates the `State` member of `MEMORY_BASIC_INFORMATION`.
pub fn region_state(state: u32) -> RegionState {
    match state {
        MEM_COMMIT => RegionState::Commit,
        MEM_RESERVE => RegionState::Reserve,
        _ => RegionState::Free,
    }
}

/// Translates the `Type` member of `MEMORY_BASIC_INFORMATION`.
///
/// Free regions carry no type and are reported as private.
pub fn region_kind(kind: u32) -> RegionKind {
    match kind {
        MEM_IMAGE => RegionKind::Image,
        MEM_MAPPED => RegionKind::Mapped,
        _ => RegionKind::Private,
    }
}

/// Translates the `Protect` member of `MEMORY_BASIC_INFORMATION`.
pub fn region_protection(protect: u32) -> PageProtection {
    PageProtection::from_bits_truncate(protect)
}

/// Decodes an ANSI string returned by one of the `*A` functions.
///
/// `len` is the number of characters the function reported, it is clamped to the buffer.
pub fn ansi_string(buf: &[u8], len: u32) -> String {
    let len = (len as usize).min(buf.len());
    let end = buf[..len].iter().position(|&b| b == 0).unwrap_or(len);
    String::from_utf8_lossy(&buf[..end]).to_string()
}
