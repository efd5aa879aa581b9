//! Memory regions a shared heap can live in.
//!
//! # Architecture
//!
//! - [`MemoryRegion`]: trait for a contiguous byte range the heap manages
//! - [`MappedArena`]: named shared memory mapped at a fixed address
//! - [`LocalRegion`]: process-private memory for single-process use and tests
//!
//! # Example
//!
//! ```rust,no_run
//! use crossheap::memory::{ArenaHandle, MemoryRegion, fixed_base_address};
//!
//! let handle = ArenaHandle::create("/ui-arena", 1024 * 1024)?;
//! let arena = handle.map_fixed(fixed_base_address(), 1024 * 1024)?;
//! assert_eq!(arena.as_ptr() as usize, fixed_base_address());
//! # Ok::<(), crossheap::Error>(())
//! ```

mod arena;
mod local;
mod region;

pub use arena::{ArenaHandle, MappedArena, Role, fixed_base_address};
pub use local::LocalRegion;
pub use region::{MemoryRegion, RegionKind};
