use std::collections::BTreeMap;

use crate::error::{Error, ErrorKind, ErrorOrigin, Result};
use crate::mem::MemoryView;
use crate::types::{umem, Address};

/// Sparse byte addressable memory made up of independently mapped chunks.
///
/// Accesses touching any unmapped byte fail like a real out of process read would.
#[derive(Clone, Debug, Default)]
pub struct DummyMemory {
    chunks: BTreeMap<umem, Vec<u8>>,
}

impl DummyMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps `len` zeroed bytes at `addr`. Existing mappings at the same address are replaced.
    pub fn map(&mut self, addr: Address, len: usize) {
        self.chunks.insert(addr.to_umem(), vec![0; len]);
    }

    pub fn unmap(&mut self, addr: Address) -> bool {
        self.chunks.remove(&addr.to_umem()).is_some()
    }

    pub fn is_mapped(&self, addr: Address) -> bool {
        self.chunk_offset(addr.to_umem()).is_some()
    }

    /// Returns the chunk base and the offset of `addr` inside of it.
    fn chunk_offset(&self, addr: umem) -> Option<(umem, usize)> {
        let (&base, chunk) = self.chunks.range(..=addr).next_back()?;
        let offset = (addr - base) as usize;
        if offset < chunk.len() {
            Some((base, offset))
        } else {
            None
        }
    }

    /// Calls `f` with each mapped piece of `[addr, addr + len)`, fails on the first hole.
    fn for_each_piece<F>(&mut self, addr: Address, len: usize, mut f: F) -> Result<()>
    where
        F: FnMut(&mut [u8], usize),
    {
        let mut done = 0;
        while done < len {
            let cur = addr
                .to_umem()
                .checked_add(done as umem)
                .ok_or(Error(ErrorOrigin::Memory, ErrorKind::OutOfBounds))?;
            let (base, offset) = self
                .chunk_offset(cur)
                .ok_or(Error(ErrorOrigin::Memory, ErrorKind::OutOfBounds))?;
            let chunk = self
                .chunks
                .get_mut(&base)
                .ok_or(Error(ErrorOrigin::Memory, ErrorKind::OutOfBounds))?;
            let n = std::cmp::min(chunk.len() - offset, len - done);
            f(&mut chunk[offset..offset + n], done);
            done += n;
        }
        Ok(())
    }
}

impl MemoryView for DummyMemory {
    fn read_raw_into(&mut self, addr: Address, out: &mut [u8]) -> Result<()> {
        let len = out.len();
        self.for_each_piece(addr, len, |piece, done| {
            out[done..done + piece.len()].copy_from_slice(piece)
        })
        .map_err(|_| Error(ErrorOrigin::Memory, ErrorKind::UnableToReadMemory))
    }

    fn write_raw(&mut self, addr: Address, data: &[u8]) -> Result<()> {
        self.for_each_piece(addr, data.len(), |piece, done| {
            let n = piece.len();
            piece.copy_from_slice(&data[done..done + n])
        })
        .map_err(|_| Error(ErrorOrigin::Memory, ErrorKind::UnableToWriteMemory))
    }
}
