//! # crossheap
//!
//! Share one mutable UI-state tree between two processes.
//!
//! An arena of shared memory is mapped at the same virtual address in both
//! processes, so pointers stored in it are valid on both sides without any
//! translation. A heap inside the arena serves allocations for the UI
//! library, and a two-token turn handshake makes sure only one process
//! touches the arena at a time.
//!
//! ## Features
//!
//! - **Fixed-address arena**: POSIX shared memory mapped with
//!   `MAP_FIXED_NOREPLACE`
//! - **Three heap strategies**: bump, free-list with coalescing, and an
//!   embedded general-purpose allocator
//! - **Turn handshake**: named auto-reset tokens, no locks in shared memory
//! - **C allocator hooks**: plug the shared heap into a UI library
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use crossheap::prelude::*;
//!
//! #[repr(C)]
//! struct Counter {
//!     value: u64,
//! }
//!
//! // Owner process
//! let mut owner = OwnerSession::with_state(SessionConfig::new("demo"), Counter { value: 0 })?;
//! owner.handoff()?;
//!
//! // Joiner process
//! let mut joiner = JoinerSession::attach(SessionConfig::new("demo"))?;
//! let frame = joiner.begin_frame()?;
//! unsafe { frame.context().as_mut::<Counter>().value += 1 };
//! frame.finish()?;
//! # Ok::<(), crossheap::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod config;
pub mod context;
pub mod error;
pub mod handshake;
pub mod heap;
pub mod memory;
pub mod session;

#[cfg(test)]
mod test_util;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::SessionConfig;
    pub use crate::context::{AllocatorHooks, SharedContext};
    pub use crate::error::{Error, Result};
    pub use crate::handshake::{Handoff, TurnState};
    pub use crate::heap::{SharedHeap, StrategyKind};
    pub use crate::memory::Role;
    pub use crate::session::{Frame, JoinerSession, OwnerSession};
}

pub use error::{Error, Result};
pub use memory::Role;
