/*!
Byte level access to the memory of the inspected process.

Every component of this crate reads the target through the [`MemoryView`] trait,
which only requires a raw read and a raw write primitive. All typed helpers are
derived from those two.
*/

use std::mem::MaybeUninit;

use crate::dataview::Pod;
use crate::error::{Error, ErrorKind, ErrorOrigin, Result};
use crate::types::{umem, Address};

/// Upper bound for strings read through [`MemoryView::read_char_string`].
pub const MAX_CHAR_STRING: usize = 4096;

/// Granularity used when scanning for a string terminator.
///
/// Reads never cross one of these boundaries so a terminator located right before
/// an unmapped page does not cause the whole read to fail.
const STRING_CHUNK: umem = 0x100;

/// The `MemoryView` trait implements byte level access to the inspected process.
///
/// Implementors only provide [`read_raw_into`](MemoryView::read_raw_into) and
/// [`write_raw`](MemoryView::write_raw). A failed access must be reported as an
/// error, partial reads are not supported.
///
/// # Examples
///
/// ```
/// use memscope::types::Address;
/// use memscope::mem::MemoryView;
///
/// fn read(mem: &mut impl MemoryView, addr: Address) {
///     let value: u32 = mem.read(addr).unwrap();
///     println!("value: {:x}", value);
/// }
/// ```
pub trait MemoryView {
    /// Reads `out.len()` bytes starting at `addr`.
    fn read_raw_into(&mut self, addr: Address, out: &mut [u8]) -> Result<()>;

    /// Writes `data` starting at `addr`.
    fn write_raw(&mut self, addr: Address, data: &[u8]) -> Result<()>;

    fn read_raw(&mut self, addr: Address, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_raw_into(addr, &mut buf)?;
        Ok(buf)
    }

    fn read_into<T: Pod + ?Sized>(&mut self, addr: Address, out: &mut T) -> Result<()>
    where
        Self: Sized,
    {
        self.read_raw_into(addr, out.as_bytes_mut())
    }

    fn read<T: Pod + Sized>(&mut self, addr: Address) -> Result<T>
    where
        Self: Sized,
    {
        // all-zero is a valid bit pattern for any Pod type
        let mut obj: T = unsafe { MaybeUninit::zeroed().assume_init() };
        self.read_into(addr, &mut obj)?;
        Ok(obj)
    }

    fn read_addr32(&mut self, addr: Address) -> Result<Address>
    where
        Self: Sized,
    {
        self.read::<u32>(addr).map(Address::from)
    }

    fn read_addr64(&mut self, addr: Address) -> Result<Address>
    where
        Self: Sized,
    {
        self.read::<u64>(addr).map(Address::from)
    }

    /// Reads a pointer sized word for an image of the given bitness.
    fn read_addr_arch(&mut self, bits: u8, addr: Address) -> Result<Address>
    where
        Self: Sized,
    {
        match bits {
            64 => self.read_addr64(addr),
            32 => self.read_addr32(addr),
            _ => Err(Error(ErrorOrigin::Memory, ErrorKind::NotSupported)
                .log_debug(format!("unsupported pointer width: {}", bits))),
        }
    }

    /// Reads a fixed length string from the target.
    ///
    /// # Remarks:
    ///
    /// The string does not have to be null-terminated.
    /// If a null terminator is found the string is truncated to the terminator.
    /// Invalid utf8 sequences are replaced.
    fn read_char_array(&mut self, addr: Address, len: usize) -> Result<String> {
        let mut buf = vec![0; len];
        self.read_raw_into(addr, &mut buf)?;
        if let Some(n) = buf.iter().position(|c| *c == 0_u8) {
            buf.truncate(n);
        }
        Ok(String::from_utf8_lossy(&buf).to_string())
    }

    /// Reads a null-terminated string with up to 4kb length from the target.
    ///
    /// The string is read in small chunks until the terminator is found, a failing read
    /// of any chunk before that point fails the whole call.
    /// Strings without a terminator are cut off at [`MAX_CHAR_STRING`] bytes.
    fn read_char_string(&mut self, addr: Address) -> Result<String> {
        let mut buf = Vec::new();
        let mut cursor = addr;

        while buf.len() < MAX_CHAR_STRING {
            let to_boundary = STRING_CHUNK - cursor.to_umem() % STRING_CHUNK;
            let len = std::cmp::min(to_boundary as usize, MAX_CHAR_STRING - buf.len());

            let start = buf.len();
            buf.resize(start + len, 0);
            self.read_raw_into(cursor, &mut buf[start..])?;

            if let Some(n) = buf[start..].iter().position(|c| *c == 0_u8) {
                buf.truncate(start + n);
                return Ok(String::from_utf8_lossy(&buf).to_string());
            }

            cursor = cursor.checked_add(len as umem).ok_or_else(|| {
                Error(ErrorOrigin::Memory, ErrorKind::OutOfBounds)
                    .log_debug("string runs past the end of the address space")
            })?;
        }

        Ok(String::from_utf8_lossy(&buf).to_string())
    }

    fn write<T: Pod + ?Sized>(&mut self, addr: Address, data: &T) -> Result<()>
    where
        Self: Sized,
    {
        self.write_raw(addr, data.as_bytes())
    }
}

impl<T: MemoryView + ?Sized> MemoryView for &mut T {
    fn read_raw_into(&mut self, addr: Address, out: &mut [u8]) -> Result<()> {
        (**self).read_raw_into(addr, out)
    }

    fn write_raw(&mut self, addr: Address, data: &[u8]) -> Result<()> {
        (**self).write_raw(addr, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dummy::DummyMemory;
    use crate::types::size;

    fn memory() -> DummyMemory {
        let mut mem = DummyMemory::new();
        mem.map(Address::from(0x10000_u64), size::kb(8) as usize);
        mem
    }

    #[test]
    fn typed_reads() {
        let mut mem = memory();
        let addr = Address::from(0x10010_u64);
        mem.write(addr, &0x1122_3344_5566_7788_u64).unwrap();

        assert_eq!(mem.read::<u64>(addr).unwrap(), 0x1122_3344_5566_7788);
        assert_eq!(mem.read_addr32(addr).unwrap(), Address::from(0x5566_7788_u32));
        assert_eq!(
            mem.read_addr_arch(64, addr).unwrap(),
            Address::from(0x1122_3344_5566_7788_u64)
        );
        assert_eq!(
            mem.read_addr_arch(16, addr).unwrap_err().kind(),
            ErrorKind::NotSupported
        );
    }

    #[test]
    fn unmapped_read_fails() {
        let mut mem = memory();
        let err = mem.read::<u32>(Address::from(0x4000_u64)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnableToReadMemory);

        // straddles the end of the mapping
        let err = mem.read::<u64>(Address::from(0x11ffc_u64)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnableToReadMemory);
    }

    #[test]
    fn char_string_near_unmapped_page() {
        let mut mem = memory();
        let addr = Address::from(0x11ff8_u64);
        mem.write_raw(addr, b"Gnome@@\0").unwrap();
        assert_eq!(mem.read_char_string(addr).unwrap(), "Gnome@@");
    }

    #[test]
    fn char_string_without_terminator_fails_at_unmapped() {
        let mut mem = memory();
        let addr = Address::from(0x11ff0_u64);
        mem.write_raw(addr, &[b'a'; 16]).unwrap();
        assert!(mem.read_char_string(addr).is_err());
    }

    #[test]
    fn char_string_is_bounded() {
        let mut mem = memory();
        let addr = Address::from(0x10000_u64);
        mem.write_raw(addr, &[b'x'; 0x2000]).unwrap();
        assert_eq!(mem.read_char_string(addr).unwrap().len(), MAX_CHAR_STRING);
    }

    #[test]
    fn char_array() {
        let mut mem = memory();
        let addr = Address::from(0x10100_u64);
        mem.write_raw(addr, b".text\0\0\0").unwrap();
        assert_eq!(mem.read_char_array(addr, 8).unwrap(), ".text");
        mem.write_raw(addr, b"ABCDEFGH").unwrap();
        assert_eq!(mem.read_char_array(addr, 8).unwrap(), "ABCDEFGH");
    }
}
