//! Default session parameters.
//!
//! Both participants must agree on every value here that shapes the shared
//! arena (name, size, base address). Changing one side only produces
//! `NotFound` or `MappingConflict` at attach time.

use std::time::Duration;

/// Session name used when none is given. Shared memory and turn tokens are
/// named after it.
pub const SESSION_NAME: &str = "crossheap";

/// Default arena size (10 MiB).
pub const ARENA_SIZE: usize = 10 * 1024 * 1024;

/// Smallest arena we accept. One page holds the header and a usable heap.
pub const MIN_ARENA_SIZE: usize = 4096;

/// Constant the fixed base address is derived from.
///
/// The final address is this value rounded down to the allocation
/// granularity, see [`crate::memory::fixed_base_address`].
pub const FIXED_BASE_HINT: usize = 0x0000_00FF_0000_0000;

/// Longest session name accepted. POSIX semaphore names get a `sem.` prefix
/// and a token suffix, and the whole must fit in `NAME_MAX`.
pub const MAX_NAME_LEN: usize = 200;

/// Handoff timeout used by [`super::SessionConfig::with_default_timeout`].
pub const HANDOFF_TIMEOUT: Duration = Duration::from_secs(5);
