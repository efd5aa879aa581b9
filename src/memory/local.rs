//! Process-private memory region.

use super::{MemoryRegion, RegionKind};
use crate::error::{Error, Result};
use std::cell::UnsafeCell;

/// Allocation unit. Its alignment is the alignment of the whole region.
#[repr(C, align(64))]
struct Block(UnsafeCell<[u8; 64]>);

/// A memory region backed by the global allocator.
///
/// This is the simplest backend, suitable for a single-process session or
/// for exercising heap strategies without shared memory. It cannot be
/// shared across processes.
///
/// # Example
///
/// ```rust
/// use crossheap::memory::{LocalRegion, MemoryRegion};
///
/// let region = LocalRegion::new(4096).unwrap();
/// assert_eq!(region.len(), 4096);
/// assert_eq!(region.as_ptr() as usize % 64, 0);
/// ```
pub struct LocalRegion {
    /// Boxed so the memory is never moved or reallocated.
    blocks: Box<[Block]>,
    len: usize,
}

impl LocalRegion {
    /// Create a zeroed region of `size` bytes, aligned to 64 bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if size is 0.
    pub fn new(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::InvalidConfig("region size must be greater than 0".into()));
        }

        let count = size.div_ceil(std::mem::size_of::<Block>());
        let blocks = (0..count)
            .map(|_| Block(UnsafeCell::new([0; 64])))
            .collect();

        Ok(Self { blocks, len: size })
    }
}

impl MemoryRegion for LocalRegion {
    fn as_ptr(&self) -> *const u8 {
        self.blocks.as_ptr().cast()
    }

    fn as_mut_ptr(&self) -> *mut u8 {
        // Blocks are UnsafeCells; the heap built on top enforces exclusive
        // use.
        self.blocks.as_ptr().cast::<u8>().cast_mut()
    }

    fn len(&self) -> usize {
        self.len
    }

    fn kind(&self) -> RegionKind {
        RegionKind::Local
    }
}
