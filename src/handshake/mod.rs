//! Turn handshake between the owner and the joiner.
//!
//! The arena holds no locks. Instead, two named auto-reset tokens pass a
//! single turn back and forth: the owner raises Produce and waits on
//! Finished, the joiner waits on Produce and raises Finished. Whoever holds
//! the turn has exclusive use of the arena, the shared heap and the context.
//!
//! Semaphore post and wait are synchronisation points, so every write made
//! during a turn is visible to the other process once it holds the turn.

mod coordinator;
mod token;

pub use coordinator::{Handoff, Handshake, TurnState};
pub use token::TurnToken;
