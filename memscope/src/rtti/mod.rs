/*!
Recovery of C++ class names from run time type information.

A polymorphic object starts with a pointer to its vtable. Right in front of the vtable
lies a pointer to the type information of the class:

- MSVC: the complete object locator, which references the type descriptor holding the
  decorated class name (e.g. `.?AVunit@df@@`).
- Itanium (gcc, clang): the `std::type_info` object, whose second word points to the
  mangled class name (e.g. `N2df4unitE`).

None of the pointers in this chain are validated. Callers must only pass addresses
they believe to hold a polymorphic object (or its vtable), anything else either fails
with an error or yields garbage.
*/

use log::trace;

use crate::error::{Error, ErrorKind, ErrorOrigin, Result};
use crate::image::ImageKind;
use crate::mem::MemoryView;
use crate::types::{imem, umem, Address};

/// Encoding of the class name at the end of the chain.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum NameScheme {
    /// A fixed prefix and suffix around the scoped name, `.?AVunit@df@@` becomes `unit@df`.
    Msvc,
    /// Itanium C++ ABI mangling, `N2df4unitE` becomes `df::unit`.
    Itanium,
}

/// Describes where the pieces of the RTTI pointer chain live.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RttiLayout {
    /// Width of pointers in the inspected image.
    pub pointer_bits: u8,
    /// Displacement of the locator pointer relative to the vtable.
    pub locator_offset: imem,
    /// Offset of the type descriptor reference inside of the locator.
    pub type_descriptor_offset: umem,
    /// The type descriptor reference is relative to the image base.
    pub image_relative: bool,
    /// Offset of the locator's own image relative address, used to recover the image base.
    pub self_offset: umem,
    /// Offset of the decorated name inside of the type descriptor.
    pub name_offset: umem,
    pub scheme: NameScheme,
    /// Length of the decoration in front of the name (`.?AV`).
    pub prefix_len: usize,
    /// Length of the decoration after the name (`@@`).
    pub suffix_len: usize,
}

/// Layout of 32-bit MSVC binaries.
pub const MSVC_X86: RttiLayout = RttiLayout {
    pointer_bits: 32,
    locator_offset: -4,
    type_descriptor_offset: 0xc,
    image_relative: false,
    self_offset: 0,
    name_offset: 0x8,
    scheme: NameScheme::Msvc,
    prefix_len: 4,
    suffix_len: 2,
};

/// Layout of 64-bit MSVC binaries.
pub const MSVC_X64: RttiLayout = RttiLayout {
    pointer_bits: 64,
    locator_offset: -8,
    type_descriptor_offset: 0xc,
    image_relative: true,
    self_offset: 0x14,
    name_offset: 0x10,
    scheme: NameScheme::Msvc,
    prefix_len: 4,
    suffix_len: 2,
};

/// Layout of 32-bit Itanium ABI binaries.
///
/// The "locator" is the `type_info` object and the "type descriptor" its name pointer.
pub const ITANIUM_X86: RttiLayout = RttiLayout {
    pointer_bits: 32,
    locator_offset: -4,
    type_descriptor_offset: 4,
    image_relative: false,
    self_offset: 0,
    name_offset: 0,
    scheme: NameScheme::Itanium,
    prefix_len: 0,
    suffix_len: 0,
};

/// Layout of 64-bit Itanium ABI binaries.
pub const ITANIUM_X64: RttiLayout = RttiLayout {
    pointer_bits: 64,
    locator_offset: -8,
    type_descriptor_offset: 8,
    image_relative: false,
    self_offset: 0,
    name_offset: 0,
    scheme: NameScheme::Itanium,
    prefix_len: 0,
    suffix_len: 0,
};

impl RttiLayout {
    /// Picks the layout matching the image, or the host default if the image is unknown.
    pub fn for_image(kind: Option<ImageKind>) -> Self {
        match kind {
            Some(ImageKind::Pe32) => MSVC_X86,
            Some(ImageKind::Pe32Plus) => MSVC_X64,
            Some(ImageKind::Elf32) => ITANIUM_X86,
            Some(ImageKind::Elf64) => ITANIUM_X64,
            Some(ImageKind::Unknown(_)) | None => Self::host(),
        }
    }

    /// The layout of code built for the host.
    pub fn host() -> Self {
        match (cfg!(windows), cfg!(target_pointer_width = "64")) {
            (true, true) => MSVC_X64,
            (true, false) => MSVC_X86,
            (false, true) => ITANIUM_X64,
            (false, false) => ITANIUM_X86,
        }
    }

    fn chain_fail(err: Error, what: &str, addr: Address) -> Error {
        Error(ErrorOrigin::Rtti, err.kind())
            .log_debug(format!("unable to read {} at {:x}", what, addr))
    }

    /// Reads the vtable pointer of the polymorphic object at `object`.
    pub fn read_vtable<T: MemoryView>(&self, mem: &mut T, object: Address) -> Result<Address> {
        mem.read_addr_arch(self.pointer_bits, object)
            .map_err(|err| Self::chain_fail(err, "vtable pointer", object))
    }

    /// Reads the class name belonging to the given vtable.
    pub fn read_class_name<T: MemoryView>(&self, mem: &mut T, vtable: Address) -> Result<String> {
        let locator_ptr = vtable.checked_offset(self.locator_offset).ok_or_else(|| {
            Error(ErrorOrigin::Rtti, ErrorKind::InvalidRttiChain)
                .log_debug(format!("vtable {:x} is too low", vtable))
        })?;
        let locator = mem
            .read_addr_arch(self.pointer_bits, locator_ptr)
            .map_err(|err| Self::chain_fail(err, "locator pointer", locator_ptr))?;

        let descriptor = self.type_descriptor(mem, locator)?;
        let name_addr = descriptor.wrapping_add(Address::from(self.name_offset));
        let raw = mem
            .read_char_string(name_addr)
            .map_err(|err| Self::chain_fail(err, "decorated name", name_addr))?;
        trace!("vtable {:x}: decorated name '{}'", vtable, raw);

        self.undecorate(&raw)
    }

    /// Reads the vtable pointer out of the object and resolves its class name.
    pub fn resolve_class_name<T: MemoryView>(
        &self,
        mem: &mut T,
        object: Address,
    ) -> Result<String> {
        let vtable = self.read_vtable(mem, object)?;
        self.read_class_name(mem, vtable)
    }

    fn type_descriptor<T: MemoryView>(&self, mem: &mut T, locator: Address) -> Result<Address> {
        let field = locator.wrapping_add(Address::from(self.type_descriptor_offset));
        if !self.image_relative {
            return mem
                .read_addr_arch(self.pointer_bits, field)
                .map_err(|err| Self::chain_fail(err, "type descriptor pointer", field));
        }

        let rva = mem
            .read::<u32>(field)
            .map_err(|err| Self::chain_fail(err, "type descriptor rva", field))?;
        let self_field = locator.wrapping_add(Address::from(self.self_offset));
        let self_rva = mem
            .read::<u32>(self_field)
            .map_err(|err| Self::chain_fail(err, "locator rva", self_field))?;

        let image_base = locator.wrapping_sub(Address::from(self_rva));
        Ok(image_base.wrapping_add(Address::from(rva)))
    }

    /// Turns the raw name found at the end of the chain into a class name.
    pub fn undecorate(&self, raw: &str) -> Result<String> {
        match self.scheme {
            NameScheme::Msvc => self.strip_decoration(raw),
            NameScheme::Itanium => demangle_itanium(raw).ok_or_else(|| {
                Error(ErrorOrigin::Rtti, ErrorKind::Encoding)
                    .log_debug(format!("unsupported mangled name '{}'", raw))
            }),
        }
    }

    fn strip_decoration(&self, raw: &str) -> Result<String> {
        if raw.len() < self.prefix_len + self.suffix_len {
            return Err(Error(ErrorOrigin::Rtti, ErrorKind::Encoding)
                .log_debug(format!("decorated name '{}' is too short", raw)));
        }
        raw.get(self.prefix_len..raw.len() - self.suffix_len)
            .map(str::to_string)
            .ok_or_else(|| {
                Error(ErrorOrigin::Rtti, ErrorKind::Encoding)
                    .log_debug(format!("decorated name '{}' is not ascii", raw))
            })
    }
}

/// Demangles a plain or nested class name.
///
/// Template arguments and substitutions are not supported.
fn demangle_itanium(raw: &str) -> Option<String> {
    // a leading '*' marks names that must be compared by address
    let raw = raw.strip_prefix('*').unwrap_or(raw);
    let (nested, mut rest) = match raw.strip_prefix('N') {
        Some(rest) => (true, rest),
        None => (false, raw),
    };

    let mut parts = Vec::new();
    loop {
        let digits = rest.bytes().take_while(|c| c.is_ascii_digit()).count();
        if digits == 0 {
            break;
        }
        let len: usize = rest[..digits].parse().ok()?;
        let end = digits.checked_add(len)?;
        parts.push(rest.get(digits..end)?);
        rest = &rest[end..];
        if !nested {
            break;
        }
    }

    let rest = if nested { rest.strip_prefix('E')? } else { rest };
    if parts.is_empty() || !rest.is_empty() {
        return None;
    }
    Some(parts.join("::"))
}
