//! First-fit free-list allocator.
//!
//! The heap region is partitioned into chunks, each a `Chunk` header
//! followed by its payload. Chunks are linked in address order through raw
//! `prev`/`next` pointers, which stay valid across processes because the
//! arena is mapped at the same address everywhere.
//!
//! ```text
//! start                                                              end
//! ┌───────┬──────────┬───────┬────────────────┬───────┬──────────────┐
//! │ Chunk │ payload  │ Chunk │ payload        │ Chunk │ payload      │
//! │ used  │          │ free  │                │ used  │              │
//! └───────┴──────────┴───────┴────────────────┴───────┴──────────────┘
//! ```
//!
//! Invariants, restored by every call:
//! - the chunks cover `start..end` with no gaps or overlaps
//! - no two neighbouring chunks are both free

use super::{HEAP_ALIGN, HeapStrategy, HeapUsage, StrategyKind, block_size};
use crate::error::{Error, Result};
use std::ptr::{self, NonNull};

/// Per-chunk bookkeeping, stored in front of every payload.
#[repr(C, align(16))]
struct Chunk {
    /// Payload size, excluding this header.
    size: usize,
    /// [`FLAG_FREE`] or [`FLAG_USED`]. Anything else is not a chunk header.
    flag: usize,
    prev: *mut Chunk,
    next: *mut Chunk,
}

const FLAG_FREE: usize = 0x4652_4545; // "FREE"
const FLAG_USED: usize = 0x5553_4544; // "USED"

impl Chunk {
    fn is_free(&self) -> bool {
        self.flag == FLAG_FREE
    }
}

/// Size of the header in front of every chunk.
pub const CHUNK_HEADER_SIZE: usize = std::mem::size_of::<Chunk>();

const _: () = assert!(CHUNK_HEADER_SIZE % HEAP_ALIGN == 0);

/// Description of one chunk, as returned by [`FreeListHeap::chunks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkInfo {
    /// Offset of the chunk header from the start of the heap region.
    pub offset: usize,
    /// Payload size.
    pub size: usize,
    /// Whether the chunk is free.
    pub free: bool,
}

/// First-fit allocator over an address-ordered chunk chain.
///
/// Allocation scans the chain for the first free chunk that fits and splits
/// off the remainder when it can hold another chunk header; otherwise the
/// whole chunk is granted. Free merges the chunk with free neighbours
/// immediately. Allocation is O(n) in the number of chunks.
#[derive(Debug)]
#[repr(C)]
pub struct FreeListHeap {
    head: *mut Chunk,
    start: usize,
    end: usize,
}

impl FreeListHeap {
    /// Lay out a single free chunk covering `len` bytes at `start`.
    ///
    /// # Safety
    ///
    /// `start..start + len` must be writable memory aligned to
    /// [`HEAP_ALIGN`] that nothing else manages, and `len` must exceed
    /// [`CHUNK_HEADER_SIZE`].
    pub unsafe fn new(start: *mut u8, len: usize) -> Self {
        debug_assert!(len > CHUNK_HEADER_SIZE);
        debug_assert_eq!(start as usize % HEAP_ALIGN, 0);

        let head = start.cast::<Chunk>();
        unsafe {
            head.write(Chunk {
                size: len - CHUNK_HEADER_SIZE,
                flag: FLAG_FREE,
                prev: ptr::null_mut(),
                next: ptr::null_mut(),
            });
        }

        Self {
            head,
            start: start as usize,
            end: start as usize + len,
        }
    }

    /// Walk the chain in address order.
    pub fn chunks(&self) -> Vec<ChunkInfo> {
        let mut chunks = Vec::new();
        let mut chunk = self.head;
        while !chunk.is_null() {
            // SAFETY: every link in the chain points at a header we wrote.
            unsafe {
                chunks.push(ChunkInfo {
                    offset: chunk as usize - self.start,
                    size: (*chunk).size,
                    free: (*chunk).is_free(),
                });
                chunk = (*chunk).next;
            }
        }
        chunks
    }

    /// Number of free chunks.
    pub fn free_chunks(&self) -> usize {
        self.chunks().iter().filter(|c| c.free).count()
    }

    /// Find the chunk header for a payload pointer, rejecting pointers that
    /// cannot be one of ours.
    fn chunk_for(&self, ptr: NonNull<u8>) -> Result<*mut Chunk> {
        let address = ptr.as_ptr() as usize;
        if address < self.start + CHUNK_HEADER_SIZE
            || address >= self.end
            || (address - self.start) % HEAP_ALIGN != 0
        {
            return Err(Error::InvalidPointer { address });
        }

        let chunk = (address - CHUNK_HEADER_SIZE) as *mut Chunk;
        // SAFETY: in bounds and aligned; the header may be stale but is
        // readable memory inside the region.
        unsafe {
            match (*chunk).flag {
                FLAG_USED => {}
                FLAG_FREE => return Err(Error::DoubleFree { address }),
                _ => return Err(Error::InvalidPointer { address }),
            }

            let prev = (*chunk).prev;
            let next = (*chunk).next;
            let linked_from_prev = if prev.is_null() {
                chunk == self.head
            } else {
                self.in_bounds(prev) && (*prev).next == chunk
            };
            let linked_from_next =
                next.is_null() || (self.in_bounds(next) && (*next).prev == chunk);
            if !linked_from_prev || !linked_from_next {
                return Err(Error::InvalidPointer { address });
            }
        }

        Ok(chunk)
    }

    fn in_bounds(&self, chunk: *mut Chunk) -> bool {
        let address = chunk as usize;
        address >= self.start && address + CHUNK_HEADER_SIZE <= self.end
    }
}

impl HeapStrategy for FreeListHeap {
    fn kind(&self) -> StrategyKind {
        StrategyKind::FreeList
    }

    fn allocate(&mut self, size: usize) -> Result<NonNull<u8>> {
        let wanted = block_size(size).ok_or(Error::OutOfMemory { requested: size })?;

        let mut chunk = self.head;
        // SAFETY: the chain only links headers inside the region, and the
        // turn protocol guarantees nobody else is walking it.
        unsafe {
            while !chunk.is_null() && !((*chunk).is_free() && (*chunk).size >= wanted) {
                chunk = (*chunk).next;
            }
            if chunk.is_null() {
                return Err(Error::OutOfMemory { requested: size });
            }

            let remaining = (*chunk).size - wanted;
            if remaining > CHUNK_HEADER_SIZE {
                let payload = chunk.cast::<u8>().add(CHUNK_HEADER_SIZE);
                let split = payload.add(wanted).cast::<Chunk>();
                split.write(Chunk {
                    size: remaining - CHUNK_HEADER_SIZE,
                    flag: FLAG_FREE,
                    prev: chunk,
                    next: (*chunk).next,
                });
                if !(*split).next.is_null() {
                    (*(*split).next).prev = split;
                }
                (*chunk).next = split;
                (*chunk).size = wanted;
            }

            (*chunk).flag = FLAG_USED;
            Ok(NonNull::new_unchecked(chunk.cast::<u8>().add(CHUNK_HEADER_SIZE)))
        }
    }

    unsafe fn free(&mut self, ptr: NonNull<u8>) -> Result<()> {
        let mut chunk = self.chunk_for(ptr)?;

        // SAFETY: `chunk_for` checked the header is linked into the chain.
        unsafe {
            (*chunk).flag = FLAG_FREE;

            // Grow a free predecessor over this chunk.
            let prev = (*chunk).prev;
            if !prev.is_null() && (*prev).is_free() {
                (*prev).size += (*chunk).size + CHUNK_HEADER_SIZE;
                (*prev).next = (*chunk).next;
                if !(*chunk).next.is_null() {
                    (*(*chunk).next).prev = prev;
                }
                chunk = prev;
            }

            // Absorb a free successor.
            let next = (*chunk).next;
            if !next.is_null() && (*next).is_free() {
                (*chunk).size += (*next).size + CHUNK_HEADER_SIZE;
                (*chunk).next = (*next).next;
                if !(*next).next.is_null() {
                    (*(*next).next).prev = chunk;
                }
            }
        }

        Ok(())
    }

    fn usage(&self) -> HeapUsage {
        let capacity = self.end - self.start;
        let free: usize = self
            .chunks()
            .iter()
            .filter(|c| c.free)
            .map(|c| c.size)
            .sum();
        HeapUsage {
            capacity,
            used: capacity - free,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{LocalRegion, MemoryRegion};

    fn free_list(len: usize) -> (LocalRegion, FreeListHeap) {
        let region = LocalRegion::new(len).unwrap();
        let heap = unsafe { FreeListHeap::new(region.as_mut_ptr(), region.len()) };
        (region, heap)
    }

    fn assert_invariants(heap: &FreeListHeap, len: usize) {
        let chunks = heap.chunks();
        let total: usize = chunks.iter().map(|c| c.size + CHUNK_HEADER_SIZE).sum();
        assert_eq!(total, len, "chunks must cover the region: {chunks:?}");

        let mut expected_offset = 0;
        for chunk in &chunks {
            assert_eq!(chunk.offset, expected_offset, "gap or overlap: {chunks:?}");
            expected_offset += CHUNK_HEADER_SIZE + chunk.size;
        }

        for pair in chunks.windows(2) {
            assert!(
                !(pair[0].free && pair[1].free),
                "adjacent free chunks: {chunks:?}"
            );
        }
    }

    #[test]
    fn test_chunk_header_size() {
        assert_eq!(CHUNK_HEADER_SIZE % HEAP_ALIGN, 0);
        #[cfg(target_pointer_width = "64")]
        assert_eq!(CHUNK_HEADER_SIZE, 32);
    }

    #[test]
    fn test_fresh_heap_is_one_free_chunk() {
        let (_region, heap) = free_list(1024);
        assert_eq!(
            heap.chunks(),
            vec![ChunkInfo {
                offset: 0,
                size: 1024 - CHUNK_HEADER_SIZE,
                free: true
            }]
        );
        assert_eq!(heap.usage().used, CHUNK_HEADER_SIZE);
    }

    #[test]
    fn test_allocate_splits() {
        let (region, mut heap) = free_list(1024);
        let a = heap.allocate(100).unwrap();
        assert_eq!(
            a.as_ptr() as usize,
            region.as_ptr() as usize + CHUNK_HEADER_SIZE
        );

        let chunks = heap.chunks();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].size, 112);
        assert!(!chunks[0].free);
        assert!(chunks[1].free);
        assert_invariants(&heap, 1024);
    }

    #[test]
    fn test_small_remainder_is_not_split() {
        // 48 bytes of payload: a 16-byte request leaves exactly one header's
        // worth, which is not enough for a new chunk.
        let (_region, mut heap) = free_list(CHUNK_HEADER_SIZE + 48);
        heap.allocate(16).unwrap();
        let chunks = heap.chunks();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].size, 48);
        assert!(!chunks[0].free);
    }

    #[test]
    fn test_exact_capacity_scenario() {
        // 256 usable bytes: two 100-byte blocks fit, a third does not.
        let (_region, mut heap) = free_list(CHUNK_HEADER_SIZE + 256);
        heap.allocate(100).unwrap();
        heap.allocate(100).unwrap();
        assert!(matches!(
            heap.allocate(100),
            Err(Error::OutOfMemory { requested: 100 })
        ));
    }

    #[test]
    fn test_free_coalesces_with_previous() {
        let (_region, mut heap) = free_list(1024);
        let a = heap.allocate(32).unwrap();
        let b = heap.allocate(32).unwrap();
        let _c = heap.allocate(32).unwrap();

        unsafe {
            heap.free(a).unwrap();
            heap.free(b).unwrap();
        }
        let chunks = heap.chunks();
        assert!(chunks[0].free);
        assert_eq!(chunks[0].size, 32 + CHUNK_HEADER_SIZE + 32);
        assert_invariants(&heap, 1024);
    }

    #[test]
    fn test_free_coalesces_both_sides() {
        let (_region, mut heap) = free_list(1024);
        let a = heap.allocate(32).unwrap();
        let b = heap.allocate(32).unwrap();
        let c = heap.allocate(32).unwrap();
        let _d = heap.allocate(32).unwrap();

        unsafe {
            heap.free(a).unwrap();
            heap.free(c).unwrap();
            assert_eq!(heap.free_chunks(), 3);
            heap.free(b).unwrap();
        }
        assert_eq!(heap.free_chunks(), 2);
        assert_invariants(&heap, 1024);
    }

    #[test]
    fn test_free_everything_restores_single_chunk() {
        let (_region, mut heap) = free_list(4096);
        let blocks: Vec<_> = (1..=10).map(|i| heap.allocate(i * 24).unwrap()).collect();
        for (i, block) in blocks.into_iter().enumerate().rev() {
            unsafe { heap.free(block).unwrap() };
            if i % 3 == 0 {
                assert_invariants(&heap, 4096);
            }
        }
        assert_eq!(heap.chunks().len(), 1);
        assert_eq!(heap.usage().used, CHUNK_HEADER_SIZE);
    }

    #[test]
    fn test_invariants_hold_for_interleaved_sequence() {
        let len = 8192;
        let (_region, mut heap) = free_list(len);
        let mut live = Vec::new();

        // Deterministic mix of sizes and free orders.
        for step in 0..200usize {
            let size = (step * 37) % 180 + 1;
            if step % 3 == 2 && !live.is_empty() {
                let victim = live.swap_remove((step * 7) % live.len());
                unsafe { heap.free(victim).unwrap() };
                assert_invariants(&heap, len);
            } else if let Ok(ptr) = heap.allocate(size) {
                live.push(ptr);
            }
        }

        for ptr in live {
            unsafe { heap.free(ptr).unwrap() };
            assert_invariants(&heap, len);
        }
        assert_eq!(heap.chunks().len(), 1);
    }

    #[test]
    fn test_allocate_free_allocate_reuses_offset() {
        let (_region, mut heap) = free_list(1024);
        let _guard = heap.allocate(64).unwrap();
        let a = heap.allocate(40).unwrap();
        unsafe { heap.free(a).unwrap() };
        let b = heap.allocate(40).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_first_fit_picks_earliest_hole() {
        let (_region, mut heap) = free_list(2048);
        let a = heap.allocate(64).unwrap();
        let _b = heap.allocate(16).unwrap();
        let c = heap.allocate(64).unwrap();
        let _d = heap.allocate(16).unwrap();
        unsafe {
            heap.free(c).unwrap();
            heap.free(a).unwrap();
        }
        assert_eq!(heap.allocate(48).unwrap(), a);
    }

    #[test]
    fn test_double_free_rejected() {
        let (_region, mut heap) = free_list(1024);
        let a = heap.allocate(32).unwrap();
        let _b = heap.allocate(32).unwrap();
        unsafe {
            heap.free(a).unwrap();
            assert!(matches!(heap.free(a), Err(Error::DoubleFree { .. })));
        }
        assert_invariants(&heap, 1024);
    }

    #[test]
    fn test_double_free_after_merge_rejected() {
        let (_region, mut heap) = free_list(1024);
        let a = heap.allocate(32).unwrap();
        let b = heap.allocate(32).unwrap();
        unsafe {
            heap.free(a).unwrap();
            // b merges into a; its stale header still says free.
            heap.free(b).unwrap();
            assert!(matches!(heap.free(b), Err(Error::DoubleFree { .. })));
        }
        assert_invariants(&heap, 1024);
    }

    #[test]
    fn test_foreign_pointer_rejected() {
        let (region, mut heap) = free_list(1024);
        let _a = heap.allocate(64).unwrap();

        let outside = NonNull::new(region.as_mut_ptr().wrapping_add(4096)).unwrap();
        let base = region.as_mut_ptr();
        let misaligned = NonNull::new(base.wrapping_add(CHUNK_HEADER_SIZE + 4)).unwrap();
        let interior = NonNull::new(base.wrapping_add(CHUNK_HEADER_SIZE + 32)).unwrap();
        unsafe {
            assert!(matches!(heap.free(outside), Err(Error::InvalidPointer { .. })));
            assert!(matches!(heap.free(misaligned), Err(Error::InvalidPointer { .. })));
            assert!(matches!(heap.free(interior), Err(Error::InvalidPointer { .. })));
        }
        assert_invariants(&heap, 1024);
    }
}
