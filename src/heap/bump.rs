//! Bump allocator over the heap region.

use super::{HeapStrategy, HeapUsage, StrategyKind, block_size};
use crate::error::{Error, Result};
use std::ptr::NonNull;

/// Monotonic cursor allocator.
///
/// Allocation advances a cursor; free does nothing, so every allocation is
/// leaked until the arena is destroyed. Only suitable for diagnostics and
/// short sessions.
#[derive(Debug)]
#[repr(C)]
pub struct BumpHeap {
    start: usize,
    cursor: usize,
    end: usize,
}

impl BumpHeap {
    /// Create a bump allocator over `len` bytes at `start`.
    ///
    /// # Safety
    ///
    /// `start..start + len` must be writable memory aligned to
    /// [`super::HEAP_ALIGN`] that nothing else manages.
    pub unsafe fn new(start: *mut u8, len: usize) -> Self {
        let start = start as usize;
        Self {
            start,
            cursor: start,
            end: start + len,
        }
    }
}

impl HeapStrategy for BumpHeap {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Bump
    }

    fn allocate(&mut self, size: usize) -> Result<NonNull<u8>> {
        let rounded = block_size(size).ok_or(Error::OutOfMemory { requested: size })?;
        if self.end - self.cursor < rounded {
            return Err(Error::OutOfMemory { requested: size });
        }

        let ptr = self.cursor as *mut u8;
        self.cursor += rounded;
        NonNull::new(ptr).ok_or(Error::OutOfMemory { requested: size })
    }

    unsafe fn free(&mut self, _ptr: NonNull<u8>) -> Result<()> {
        Ok(())
    }

    fn usage(&self) -> HeapUsage {
        HeapUsage {
            capacity: self.end - self.start,
            used: self.cursor - self.start,
        }
    }
}
