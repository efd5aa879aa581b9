//! Allocators that live inside a shared arena.
//!
//! All allocator state, including the strategy's own bookkeeping, is stored
//! in the arena itself: the [`HeapHeader`] at offset 0 and the strategy's
//! metadata inside the heap region that follows it. Either process can
//! allocate or free while it holds the turn, and a block allocated by one
//! process can be freed by the other.
//!
//! # Strategies
//!
//! | Strategy | Allocate | Free | Use |
//! |----------|----------|------|-----|
//! | [`StrategyKind::Bump`] | O(1) | no-op | diagnostics, short sessions |
//! | [`StrategyKind::FreeList`] | O(chunks) first fit | O(1) with coalescing | simple, inspectable |
//! | [`StrategyKind::Embedded`] | `linked_list_allocator` | `linked_list_allocator` | default |
//!
//! None of them lock. Exclusive access comes from the turn protocol in
//! [`crate::handshake`].
//!
//! # Layout
//!
//! ```text
//! base                                                    base + capacity
//! ┌────────────┬───────────────────────────────────────────────────────┐
//! │ HeapHeader │ heap region (strategy-managed)                        │
//! └────────────┴───────────────────────────────────────────────────────┘
//! ```

mod bump;
mod embedded;
mod free_list;
mod header;
mod shared;

pub use bump::BumpHeap;
pub use embedded::EmbeddedHeap;
pub use free_list::{CHUNK_HEADER_SIZE, ChunkInfo, FreeListHeap};
pub use header::{HEAP_HEADER_SIZE, HeapHeader};
pub use shared::SharedHeap;

use crate::error::{Error, Result};
use std::fmt;
use std::ptr::NonNull;
use std::str::FromStr;

/// Alignment of every block handed out, and granularity of block sizes.
pub const HEAP_ALIGN: usize = 16;

/// Which allocator manages the heap region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u32)]
pub enum StrategyKind {
    /// Monotonic cursor. Free does nothing.
    Bump = 0,
    /// First-fit address-ordered chunk list with eager coalescing.
    FreeList = 1,
    /// `linked_list_allocator` confined to the heap region.
    #[default]
    Embedded = 2,
}

impl StrategyKind {
    /// Every strategy, in declaration order.
    pub const ALL: [StrategyKind; 3] = [
        StrategyKind::Bump,
        StrategyKind::FreeList,
        StrategyKind::Embedded,
    ];

    /// Configuration name of the strategy.
    pub fn name(&self) -> &'static str {
        match self {
            StrategyKind::Bump => "bump",
            StrategyKind::FreeList => "free-list",
            StrategyKind::Embedded => "embedded",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StrategyKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bump" => Ok(StrategyKind::Bump),
            "free-list" | "freelist" | "free_list" => Ok(StrategyKind::FreeList),
            "embedded" | "default" => Ok(StrategyKind::Embedded),
            other => Err(Error::InvalidConfig(format!("unknown heap strategy {other:?}"))),
        }
    }
}

/// Snapshot of heap occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapUsage {
    /// Bytes in the heap region (excludes the `HeapHeader`).
    pub capacity: usize,
    /// Bytes not available for allocation, bookkeeping included.
    pub used: usize,
}

impl HeapUsage {
    /// Bytes still available. Fragmentation may prevent using all of them in
    /// one allocation.
    pub fn available(&self) -> usize {
        self.capacity.saturating_sub(self.used)
    }

    /// Percentage of the region in use (0.0 to 100.0).
    pub fn utilization(&self) -> f64 {
        if self.capacity == 0 {
            return 0.0;
        }
        self.used as f64 / self.capacity as f64 * 100.0
    }
}

/// The contract every heap strategy implements.
///
/// Implementations keep all of their state inside the arena (the strategy
/// value itself is stored in the [`HeapHeader`]), so a strategy initialised
/// by the owner can be driven by the joiner.
pub trait HeapStrategy {
    /// Which strategy this is.
    fn kind(&self) -> StrategyKind;

    /// Allocate `size` bytes aligned to [`HEAP_ALIGN`].
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` if no block is large enough. The heap never
    /// grows.
    fn allocate(&mut self, size: usize) -> Result<NonNull<u8>>;

    /// Return a block to the heap.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by `allocate` on this heap. Strategies
    /// detect the double frees and foreign pointers they can, but cannot
    /// catch every misuse.
    unsafe fn free(&mut self, ptr: NonNull<u8>) -> Result<()>;

    /// Current occupancy.
    fn usage(&self) -> HeapUsage;
}

/// Round `size` up to the block granularity. Zero-sized requests still get
/// a distinct block.
pub(crate) fn block_size(size: usize) -> Option<usize> {
    size.max(1).checked_next_multiple_of(HEAP_ALIGN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_names_round_trip() {
        for kind in StrategyKind::ALL {
            assert_eq!(kind.name().parse::<StrategyKind>().unwrap(), kind);
            assert_eq!(kind.to_string(), kind.name());
        }
    }

    #[test]
    fn test_strategy_parse_aliases() {
        assert_eq!("FreeList".parse::<StrategyKind>().unwrap(), StrategyKind::FreeList);
        assert_eq!(" free_list ".parse::<StrategyKind>().unwrap(), StrategyKind::FreeList);
        assert_eq!("default".parse::<StrategyKind>().unwrap(), StrategyKind::Embedded);
        assert!("slab".parse::<StrategyKind>().is_err());
    }

    #[test]
    fn test_default_strategy_is_embedded() {
        assert_eq!(StrategyKind::default(), StrategyKind::Embedded);
    }

    #[test]
    fn test_block_size() {
        assert_eq!(block_size(0), Some(16));
        assert_eq!(block_size(1), Some(16));
        assert_eq!(block_size(16), Some(16));
        assert_eq!(block_size(100), Some(112));
        assert_eq!(block_size(usize::MAX), None);
    }

    #[test]
    fn test_usage_math() {
        let usage = HeapUsage {
            capacity: 200,
            used: 50,
        };
        assert_eq!(usage.available(), 150);
        assert!((usage.utilization() - 25.0).abs() < 0.01);
        let empty = HeapUsage {
            capacity: 0,
            used: 0,
        };
        assert_eq!(empty.utilization(), 0.0);
    }
}
