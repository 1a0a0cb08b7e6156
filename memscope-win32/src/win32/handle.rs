use log::warn;

use windows::Win32::Foundation::{CloseHandle, HANDLE};

/// An owned kernel object handle which is closed on drop.
#[derive(Debug)]
pub struct OwnedHandle(HANDLE);

impl OwnedHandle {
    /// Takes ownership of `handle`.
    ///
    /// # Safety
    ///
    /// The handle must be valid and must not be closed by anyone else.
    pub unsafe fn new(handle: HANDLE) -> Self {
        Self(handle)
    }

    pub fn raw(&self) -> HANDLE {
        self.0
    }
}

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        // SAFETY: the handle is owned by this object and closed exactly once.
        if let Err(err) = unsafe { CloseHandle(self.0) } {
            warn!("unable to close handle {:?}: {}", self.0, err);
        }
    }
}
