/*!
This crate contains the Windows backend of memscope.

It implements [`OsBackend`](memscope::os::OsBackend) for the current process on top of
the documented Win32 APIs: `EnumProcessModules` for the primary module, `VirtualQueryEx`
for the region walk, toolhelp snapshots for heaps and threads and `ReadProcessMemory` /
`WriteProcessMemory` for raw memory access.

# Examples

```ignore
use memscope::prelude::v1::*;

let versions = VersionList::from_toml_file("versions.toml")?;
let mut ctx = memscope_win32::attach(&versions);
println!("{}", ctx.state());
```
*/

pub mod convert;

#[cfg(windows)]
pub mod win32;
#[cfg(windows)]
#[doc(hidden)]
pub use win32::*;

#[doc(hidden)]
pub mod prelude {
    pub mod v1 {
        #[cfg(windows)]
        pub use crate::win32::*;
    }
    pub use v1::*;
}
