//! Session lifecycle: one owner, at most one joiner.
//!
//! ```text
//! owner                                  joiner
//! ─────                                  ──────
//! OwnerSession::create
//!   create + map arena
//!   init heap, build context
//!   create tokens, publish header
//!                                        JoinerSession::attach
//!                                          open + map arena (same address)
//!                                          validate header, read context
//!                                          open tokens, mark connected
//! loop {                                 loop {
//!   consume shared state                   let frame = begin_frame()?
//!   handoff() ────── Produce ───────────►  mutate through frame
//!             ◄───── Finished ───────────  frame.finish()?
//! }                                      }
//! drop: tokens, heap, unmap, unlink      drop: tokens, heap, unmap
//! ```
//!
//! Both session types own their arena mapping, heap view and tokens.
//! There is no process-wide state; dropping a session releases everything
//! it created, on success and error paths alike.

mod joiner;
mod owner;

pub use joiner::{Frame, JoinerSession};
pub use owner::OwnerSession;
