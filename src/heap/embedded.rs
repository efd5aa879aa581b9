//! General-purpose allocator confined to the heap region.

use super::{HEAP_ALIGN, HeapStrategy, HeapUsage, StrategyKind};
use crate::error::{Error, Result};
use linked_list_allocator::Heap;
use std::alloc::Layout;
use std::fmt;
use std::mem::size_of;
use std::ptr::NonNull;

/// Bytes in front of every block: the block's total size at the start and a
/// liveness tag in the last word. The allocator's own hole header, written
/// on free, covers only the first two words, so the tag survives.
const PREFIX: usize = 32;

const TAG_OFFSET: usize = PREFIX - size_of::<usize>();
const TAG_LIVE: usize = 0x4c49_5645; // "LIVE"
const TAG_FREED: usize = 0x4445_4144; // "DEAD"

const _: () = assert!(PREFIX % HEAP_ALIGN == 0);

/// `linked_list_allocator::Heap` over a single pre-committed region.
///
/// The heap is created once over the whole region and never extended, so it
/// never asks for memory the arena does not already provide. Because the
/// `Heap` value itself lives in the shared header, its hole list is
/// reachable from both processes.
pub struct EmbeddedHeap {
    heap: Heap,
}

impl fmt::Debug for EmbeddedHeap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbeddedHeap")
            .field("bottom", &self.heap.bottom())
            .field("size", &self.heap.size())
            .field("used", &self.heap.used())
            .finish()
    }
}

impl EmbeddedHeap {
    /// Hand `len` bytes at `start` to the allocator.
    ///
    /// # Safety
    ///
    /// `start..start + len` must be writable memory that nothing else
    /// manages, large enough for the allocator's bookkeeping.
    pub unsafe fn new(start: *mut u8, len: usize) -> Self {
        Self {
            heap: unsafe { Heap::new(start, len) },
        }
    }

    fn layout(total: usize) -> Option<Layout> {
        Layout::from_size_align(total, HEAP_ALIGN).ok()
    }
}

impl HeapStrategy for EmbeddedHeap {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Embedded
    }

    fn allocate(&mut self, size: usize) -> Result<NonNull<u8>> {
        let oom = Error::OutOfMemory { requested: size };
        let Some(layout) = size.checked_add(PREFIX).and_then(Self::layout) else {
            return Err(oom);
        };

        let block = self.heap.allocate_first_fit(layout).map_err(|()| oom)?;
        // SAFETY: the block is at least PREFIX bytes and 16-byte aligned.
        unsafe {
            let words = block.as_ptr().cast::<usize>();
            words.write(layout.size());
            block.as_ptr().add(TAG_OFFSET).cast::<usize>().write(TAG_LIVE);
            Ok(block.add(PREFIX))
        }
    }

    unsafe fn free(&mut self, ptr: NonNull<u8>) -> Result<()> {
        let address = ptr.as_ptr() as usize;
        let bottom = self.heap.bottom() as usize;
        let top = self.heap.top() as usize;
        if address < bottom + PREFIX || address >= top || address % HEAP_ALIGN != 0 {
            return Err(Error::InvalidPointer { address });
        }

        // SAFETY: the prefix lies inside the region.
        unsafe {
            let block = ptr.sub(PREFIX);
            let tag = block.as_ptr().add(TAG_OFFSET).cast::<usize>();
            match tag.read() {
                TAG_LIVE => {}
                TAG_FREED => return Err(Error::DoubleFree { address }),
                _ => return Err(Error::InvalidPointer { address }),
            }

            let total = block.as_ptr().cast::<usize>().read();
            let layout = match Self::layout(total) {
                Some(layout) if total >= PREFIX && total <= top - bottom => layout,
                _ => return Err(Error::InvalidPointer { address }),
            };

            tag.write(TAG_FREED);
            self.heap.deallocate(block, layout);
        }
        Ok(())
    }

    fn usage(&self) -> HeapUsage {
        HeapUsage {
            capacity: self.heap.size(),
            used: self.heap.used(),
        }
    }
}
