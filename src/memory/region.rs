//! Memory region trait and types.

/// What kind of memory backs a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegionKind {
    /// Process-private memory from the global allocator.
    ///
    /// Pointers into it mean nothing to another process. Used for
    /// single-process sessions and allocator tests.
    Local,
    /// Shared memory mapped at the same fixed address in every participant.
    ///
    /// Pointers into it are valid, unmodified, in every process that maps it.
    SharedFixed,
}

impl RegionKind {
    /// Can pointers into this region be handed to another process?
    #[inline]
    pub fn shares_pointers(&self) -> bool {
        matches!(self, RegionKind::SharedFixed)
    }
}

/// A contiguous byte range a shared heap can be laid out in.
///
/// # Safety
///
/// Implementations must ensure that:
/// - `as_mut_ptr()..as_mut_ptr() + len()` stays valid and writable for the
///   lifetime of the region
/// - the start is aligned to at least 16 bytes
pub trait MemoryRegion {
    /// Pointer to the start of the region.
    fn as_ptr(&self) -> *const u8;

    /// Mutable pointer to the start of the region.
    ///
    /// The region is writable even through a shared handle; exclusive access
    /// is the caller's responsibility (the turn protocol, for shared arenas).
    fn as_mut_ptr(&self) -> *mut u8;

    /// Total size of the region in bytes.
    fn len(&self) -> usize;

    /// Returns true if the region has zero length.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The kind of memory backing this region.
    fn kind(&self) -> RegionKind;

    /// Whether `address` falls inside the region.
    fn contains(&self, address: usize) -> bool {
        let start = self.as_ptr() as usize;
        address >= start && address < start + self.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shares_pointers() {
        assert!(RegionKind::SharedFixed.shares_pointers());
        assert!(!RegionKind::Local.shares_pointers());
    }
}
