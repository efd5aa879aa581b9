//! Process-local view of the heap inside an arena.

use super::header::HEADER_VERSION;
use super::{ChunkInfo, HEAP_ALIGN, HEAP_HEADER_SIZE, HeapHeader, HeapUsage, StrategyKind};
use crate::context::AllocatorHooks;
use crate::error::{Error, Result};
use crate::memory::MemoryRegion;
use std::ffi::c_void;
use std::ptr::NonNull;
use std::sync::atomic::Ordering;

/// Smallest heap region (after the header) we agree to manage.
const MIN_HEAP_REGION: usize = 256;

/// Handle on the [`HeapHeader`] at the start of a region.
///
/// The handle holds a raw pointer; the region it was created from must
/// outlive it. Sessions guarantee this by owning both and dropping the heap
/// first.
///
/// # Example
///
/// ```rust
/// use crossheap::heap::{SharedHeap, StrategyKind};
/// use crossheap::memory::LocalRegion;
///
/// let region = LocalRegion::new(64 * 1024).unwrap();
/// let mut heap = unsafe { SharedHeap::initialize(&region, StrategyKind::FreeList).unwrap() };
///
/// let block = heap.allocate(128).unwrap();
/// assert!(heap.contains(block.as_ptr()));
/// unsafe { heap.free(block.as_ptr()).unwrap() };
/// ```
#[derive(Debug)]
pub struct SharedHeap {
    header: NonNull<HeapHeader>,
    len: usize,
}

impl SharedHeap {
    /// Write a new header and heap into `region` (owner side).
    ///
    /// The header starts unpublished; see [`SharedHeap::publish`].
    ///
    /// # Safety
    ///
    /// `region` must outlive the returned heap, and no other process may be
    /// using it yet.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the region is too small or misaligned.
    pub unsafe fn initialize<R: MemoryRegion + ?Sized>(
        region: &R,
        kind: StrategyKind,
    ) -> Result<Self> {
        let header = Self::header_of(region)?;
        if region.len() < HEAP_HEADER_SIZE + MIN_HEAP_REGION {
            return Err(Error::InvalidConfig(format!(
                "region of {} bytes cannot hold a heap (minimum {})",
                region.len(),
                HEAP_HEADER_SIZE + MIN_HEAP_REGION
            )));
        }

        unsafe { HeapHeader::init(header, region.len(), kind) };
        tracing::debug!(
            kind = %kind,
            capacity = region.len(),
            shared = region.kind().shares_pointers(),
            "initialised shared heap"
        );

        Ok(Self {
            header,
            len: region.len(),
        })
    }

    /// Use the header an owner published in `region` (joiner side).
    ///
    /// # Safety
    ///
    /// `region` must outlive the returned heap.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the owner has not published the header yet and
    /// `InvalidConfig` if it was written by an incompatible build, for a
    /// different size, or for a different base address.
    pub unsafe fn attach<R: MemoryRegion + ?Sized>(region: &R) -> Result<Self> {
        let header = Self::header_of(region)?;
        if region.len() < HEAP_HEADER_SIZE {
            return Err(Error::InvalidConfig("region is smaller than a heap header".into()));
        }

        let heap = Self {
            header,
            len: region.len(),
        };
        let header = heap.header();
        if !header.is_published() {
            return Err(Error::NotFound("shared heap header (owner not ready)".into()));
        }

        let stamp = header.stamp();
        if stamp.version != HEADER_VERSION {
            return Err(Error::InvalidConfig(format!(
                "heap header version {} (expected {HEADER_VERSION})",
                stamp.version
            )));
        }
        if stamp.header_size != HEAP_HEADER_SIZE {
            return Err(Error::InvalidConfig(format!(
                "heap header is {} bytes in the owner's build, {HEAP_HEADER_SIZE} in this one",
                stamp.header_size
            )));
        }
        if stamp.capacity != region.len() {
            return Err(Error::InvalidConfig(format!(
                "heap was created for {} bytes but {} are mapped",
                stamp.capacity,
                region.len()
            )));
        }
        if stamp.base != region.as_ptr() as usize {
            return Err(Error::InvalidConfig(format!(
                "arena mapped at {:#x} but the owner uses {:#x}",
                region.as_ptr() as usize,
                stamp.base
            )));
        }

        Ok(heap)
    }

    fn header_of<R: MemoryRegion + ?Sized>(region: &R) -> Result<NonNull<HeapHeader>> {
        let ptr = region.as_mut_ptr();
        if ptr as usize % HEAP_ALIGN != 0 {
            return Err(Error::InvalidConfig(format!(
                "region at {:#x} is not {HEAP_ALIGN}-byte aligned",
                ptr as usize
            )));
        }
        NonNull::new(ptr.cast::<HeapHeader>())
            .ok_or_else(|| Error::InvalidConfig("region pointer is null".into()))
    }

    fn header(&self) -> &HeapHeader {
        // SAFETY: the region outlives self (constructor contract).
        unsafe { self.header.as_ref() }
    }

    fn header_mut(&mut self) -> &mut HeapHeader {
        // SAFETY: as above; &mut self keeps this process to one user.
        unsafe { self.header.as_mut() }
    }

    /// Make the header visible to joiners.
    pub fn publish(&self) {
        self.header().publish();
    }

    /// Whether the owner has published the header.
    pub fn is_published(&self) -> bool {
        self.header().is_published()
    }

    /// The active strategy.
    pub fn kind(&self) -> StrategyKind {
        self.header().kind()
    }

    /// Allocate `size` bytes from the shared heap.
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` if no block is large enough.
    pub fn allocate(&mut self, size: usize) -> Result<NonNull<u8>> {
        self.header_mut().allocate(size)
    }

    /// Return a block to the shared heap. Null is a no-op on every strategy.
    ///
    /// # Safety
    ///
    /// A non-null `ptr` must have come from [`SharedHeap::allocate`] on this
    /// arena (in either process) and not have been freed since.
    ///
    /// # Errors
    ///
    /// Returns `DoubleFree` or `InvalidPointer` when the strategy can tell
    /// the pointer is bad. Both are fatal; see [`Error::is_fatal`].
    pub unsafe fn free(&mut self, ptr: *mut u8) -> Result<()> {
        unsafe { self.header_mut().free(ptr) }
    }

    /// Current heap occupancy.
    pub fn usage(&self) -> HeapUsage {
        self.header().usage()
    }

    /// Size of the whole region, header included.
    pub fn capacity(&self) -> usize {
        self.len
    }

    /// Whether `ptr` points into the heap region behind the header.
    pub fn contains(&self, ptr: *const u8) -> bool {
        let start = self.header.as_ptr() as usize + HEAP_HEADER_SIZE;
        let end = self.header.as_ptr() as usize + self.len;
        let address = ptr as usize;
        address >= start && address < end
    }

    /// The chunk chain, when the free-list strategy is active.
    pub fn chunks(&self) -> Option<Vec<ChunkInfo>> {
        self.header().free_list().map(|heap| heap.chunks())
    }

    /// The shared UI context pointer, if the owner installed one.
    pub fn context(&self) -> Option<NonNull<c_void>> {
        NonNull::new(self.header().context())
    }

    /// Install the shared UI context pointer (owner side).
    pub fn set_context(&mut self, context: NonNull<c_void>) {
        self.header_mut().set_context(context.as_ptr());
    }

    /// Whether a joiner has ever attached.
    pub fn is_joiner_connected(&self) -> bool {
        self.header().joiner_connected().load(Ordering::Acquire)
    }

    /// Record that a joiner attached.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolViolation` if a joiner is already recorded; the flag
    /// is left untouched.
    pub fn mark_connected(&self) -> Result<()> {
        self.header()
            .joiner_connected()
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| {
                tracing::error!("second joiner tried to attach");
                Error::ProtocolViolation("a joiner is already attached to this arena".into())
            })
    }

    /// Address of the header, valid in every process mapping the arena.
    pub fn header_ptr(&self) -> NonNull<HeapHeader> {
        self.header
    }

    /// Allocator hooks for a UI library, routed to this heap.
    pub fn hooks(&self) -> AllocatorHooks {
        AllocatorHooks::for_header(self.header)
    }
}
