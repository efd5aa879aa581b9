//! Helpers shared by unit tests.

use std::sync::atomic::{AtomicU32, Ordering};

static NEXT_ID: AtomicU32 = AtomicU32::new(0);

/// A shared memory name no other test (or test run) uses.
pub fn unique_name(tag: &str) -> String {
    format!(
        "/crossheap-unit-{}-{}-{}",
        std::process::id(),
        tag,
        NEXT_ID.fetch_add(1, Ordering::Relaxed)
    )
}

/// A session name (no leading slash) no other test uses.
pub fn unique_session(tag: &str) -> String {
    unique_name(tag).trim_start_matches('/').to_string()
}

/// Base address reserved for one test.
///
/// Tests run in parallel inside one process, so each one that maps an
/// arena needs its own slot. Slots are 1 GiB apart, well below where the
/// loader and the global allocator place mappings.
pub fn test_base(slot: usize) -> usize {
    0x0000_00F0_0000_0000 + slot * 0x4000_0000
}
