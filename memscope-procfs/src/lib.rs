/*!
This crate contains the Linux backend of memscope.

The current process is inspected through `/proc/self`: the `maps` file stands in for the
region query, the `exe` link identifies the primary module, the `task` directory lists
threads, and memory is accessed with `process_vm_readv` / `process_vm_writev`.

The executable is an ELF image. Its load segments stand in for the PE section table, so
the regions of the executable are named `"<exe> : .text"`, `"<exe> : .rodata"` and
`"<exe> : .data"`. ELF images carry no build timestamp and are never matched against a
version list.

Linux has no heap list comparable to the Win32 toolhelp heap snapshot, the program
break heap (`[heap]`) is reported as the only heap.

# Examples

```ignore
use memscope::prelude::v1::*;

let mut ctx = memscope_procfs::attach(&VersionList::new())?;
for range in ctx.list_memory_ranges() {
    println!("{}", range);
}
```
*/

pub mod maps;
pub use maps::{MapSnapshot, Mapping};

#[cfg(target_os = "linux")]
pub mod process;
#[cfg(target_os = "linux")]
#[doc(hidden)]
pub use process::*;
