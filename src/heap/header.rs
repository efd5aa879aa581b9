//! The record at offset 0 of every arena.

use super::{BumpHeap, EmbeddedHeap, FreeListHeap, HeapStrategy, HeapUsage, StrategyKind};
use crate::error::Result;
use std::ffi::c_void;
use std::fmt;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Identifies an initialised header ("XHEAPUI1").
const HEADER_MAGIC: u64 = u64::from_be_bytes(*b"XHEAPUI1");

/// Bumped whenever the header layout changes.
pub(crate) const HEADER_VERSION: u32 = 1;

/// Strategy state, stored inline in the header.
#[repr(C)]
pub(crate) enum StrategyState {
    Bump(BumpHeap),
    FreeList(FreeListHeap),
    Embedded(EmbeddedHeap),
}

impl StrategyState {
    /// Lay out `kind` over `len` bytes at `start`.
    ///
    /// # Safety
    ///
    /// `start..start + len` must be writable, 16-byte aligned and unused.
    unsafe fn new(kind: StrategyKind, start: *mut u8, len: usize) -> Self {
        unsafe {
            match kind {
                StrategyKind::Bump => StrategyState::Bump(BumpHeap::new(start, len)),
                StrategyKind::FreeList => StrategyState::FreeList(FreeListHeap::new(start, len)),
                StrategyKind::Embedded => StrategyState::Embedded(EmbeddedHeap::new(start, len)),
            }
        }
    }

    fn as_strategy(&self) -> &dyn HeapStrategy {
        match self {
            StrategyState::Bump(heap) => heap,
            StrategyState::FreeList(heap) => heap,
            StrategyState::Embedded(heap) => heap,
        }
    }

    fn as_strategy_mut(&mut self) -> &mut dyn HeapStrategy {
        match self {
            StrategyState::Bump(heap) => heap,
            StrategyState::FreeList(heap) => heap,
            StrategyState::Embedded(heap) => heap,
        }
    }
}

/// Lets the joiner check it is looking at a header the owner finished.
#[repr(C)]
pub(crate) struct ArenaStamp {
    /// Zero until the owner has finished setting up the session.
    pub(crate) magic: AtomicU64,
    pub(crate) version: u32,
    /// `HEAP_HEADER_SIZE` of the build that wrote the header.
    pub(crate) header_size: usize,
    /// Total arena size, header included.
    pub(crate) capacity: usize,
    /// Address the owner mapped the arena at.
    pub(crate) base: usize,
}

/// Singleton record at arena offset 0.
///
/// Field order is part of the arena layout: the UI context pointer, the
/// joiner connection flag, the strategy state, then the stamp. Both
/// processes run the same binary, so Rust-layout fields inside the strategy
/// state agree on both sides.
#[repr(C, align(16))]
pub struct HeapHeader {
    context: *mut c_void,
    joiner_connected: AtomicBool,
    state: StrategyState,
    stamp: ArenaStamp,
}

/// Bytes taken by the header at the start of the arena.
pub const HEAP_HEADER_SIZE: usize = std::mem::size_of::<HeapHeader>();

impl HeapHeader {
    /// Write a fresh, unpublished header at `header` and lay out the heap
    /// region behind it.
    ///
    /// # Safety
    ///
    /// `header` must point at `capacity` writable bytes, 16-byte aligned,
    /// that no other process is using yet. `capacity` must exceed
    /// [`HEAP_HEADER_SIZE`] by enough for the strategy's bookkeeping.
    pub(crate) unsafe fn init(header: NonNull<HeapHeader>, capacity: usize, kind: StrategyKind) {
        let start = unsafe { header.as_ptr().cast::<u8>().add(HEAP_HEADER_SIZE) };
        let state = unsafe { StrategyState::new(kind, start, capacity - HEAP_HEADER_SIZE) };

        unsafe {
            ptr::write(
                header.as_ptr(),
                HeapHeader {
                    context: ptr::null_mut(),
                    joiner_connected: AtomicBool::new(false),
                    state,
                    stamp: ArenaStamp {
                        magic: AtomicU64::new(0),
                        version: HEADER_VERSION,
                        header_size: HEAP_HEADER_SIZE,
                        capacity,
                        base: header.as_ptr() as usize,
                    },
                },
            );
        }
    }

    /// Make the header visible to a joiner. Everything written before this
    /// call is visible to a joiner that observed the magic.
    pub(crate) fn publish(&self) {
        self.stamp.magic.store(HEADER_MAGIC, Ordering::Release);
    }

    /// Whether the owner has published this header.
    pub(crate) fn is_published(&self) -> bool {
        self.stamp.magic.load(Ordering::Acquire) == HEADER_MAGIC
    }

    pub(crate) fn stamp(&self) -> &ArenaStamp {
        &self.stamp
    }

    #[cfg(test)]
    pub(crate) fn stamp_mut(&mut self) -> &mut ArenaStamp {
        &mut self.stamp
    }

    /// The strategy managing the heap region.
    pub fn kind(&self) -> StrategyKind {
        self.state.as_strategy().kind()
    }

    /// Allocate from the heap region.
    pub fn allocate(&mut self, size: usize) -> Result<NonNull<u8>> {
        let ptr = self.state.as_strategy_mut().allocate(size)?;
        tracing::trace!(size, ptr = ?ptr, "shared allocate");
        Ok(ptr)
    }

    /// Free a block; null is ignored.
    ///
    /// # Safety
    ///
    /// A non-null `ptr` must have come from `allocate` on this heap and not
    /// have been freed since.
    pub unsafe fn free(&mut self, ptr: *mut u8) -> Result<()> {
        let Some(ptr) = NonNull::new(ptr) else {
            return Ok(());
        };
        unsafe { self.state.as_strategy_mut().free(ptr)? };
        tracing::trace!(ptr = ?ptr, "shared free");
        Ok(())
    }

    /// Current heap occupancy.
    pub fn usage(&self) -> HeapUsage {
        self.state.as_strategy().usage()
    }

    pub(crate) fn free_list(&self) -> Option<&FreeListHeap> {
        match &self.state {
            StrategyState::FreeList(heap) => Some(heap),
            _ => None,
        }
    }

    pub(crate) fn context(&self) -> *mut c_void {
        self.context
    }

    pub(crate) fn set_context(&mut self, context: *mut c_void) {
        self.context = context;
    }

    pub(crate) fn joiner_connected(&self) -> &AtomicBool {
        &self.joiner_connected
    }
}

impl fmt::Debug for HeapHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeapHeader")
            .field("context", &self.context)
            .field(
                "joiner_connected",
                &self.joiner_connected.load(Ordering::Relaxed),
            )
            .field("kind", &self.kind())
            .field("capacity", &self.stamp.capacity)
            .finish()
    }
}
