//! Named shared arena mapped at a fixed virtual address.
//!
//! The owner creates a POSIX shared memory object, the joiner opens it by
//! name, and both map it at the same address with `MAP_FIXED_NOREPLACE`.
//! Pointers stored inside the arena are therefore valid, unmodified, in
//! both processes. Nothing in the crate ever translates a pointer; if the
//! address cannot be obtained, mapping fails instead of falling back to a
//! different one.
//!
//! ```text
//! owner                               joiner
//! ArenaHandle::create("/ui", size)    ArenaHandle::open("/ui")
//!        │                                   │
//!        ▼                                   ▼
//! map_fixed(BASE, size) ──── same ──── map_fixed(BASE, size)
//!        │                 physical          │
//!        ▼                  pages            ▼
//! [BASE .. BASE+size]                 [BASE .. BASE+size]
//! ```

use super::{MemoryRegion, RegionKind};
use crate::config::defaults::FIXED_BASE_HINT;
use crate::error::{Error, Result};
use rustix::fd::{AsFd, BorrowedFd, OwnedFd};
use rustix::fs::Mode;
use rustix::io::Errno;
use rustix::mm::{MapFlags, ProtFlags};
use rustix::shm::ShmOFlags;
use std::ffi::c_void;
use std::ptr::NonNull;

/// The address every participant maps the arena at by default.
///
/// Derived from [`FIXED_BASE_HINT`] rounded down to the allocation
/// granularity, so it is identical in every process on the machine.
pub fn fixed_base_address() -> usize {
    let granularity = rustix::param::page_size();
    FIXED_BASE_HINT - FIXED_BASE_HINT % granularity
}

/// Longest object name the kernel accepts, leading slash excluded.
const MAX_NAME_LEN: usize = 255;

/// Reject names `shm_open` would refuse with `EINVAL`.
fn validate_name(name: &str) -> Result<()> {
    let stem = name.trim_start_matches('/');
    if stem.is_empty() {
        return Err(Error::InvalidConfig(format!(
            "shared memory name {name:?} is empty"
        )));
    }
    if stem.contains('/') || stem.contains('\0') {
        return Err(Error::InvalidConfig(format!(
            "shared memory name {name:?} contains '/' or NUL"
        )));
    }
    if stem.len() > MAX_NAME_LEN {
        return Err(Error::InvalidConfig(format!(
            "shared memory name is {} bytes, the limit is {MAX_NAME_LEN}",
            stem.len()
        )));
    }
    Ok(())
}

/// Which side of a session a participant is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Created the backing store and destroys it on drop.
    Owner,
    /// Opened an existing backing store; only closes its descriptor.
    Joiner,
}

/// An open, not yet mapped, shared memory object.
#[derive(Debug)]
pub struct ArenaHandle {
    fd: OwnedFd,
    name: String,
    size: usize,
    role: Role,
}

impl ArenaHandle {
    /// Create a new backing store of `size` bytes.
    ///
    /// # Errors
    ///
    /// Returns `ResourceCreation` if the name is taken or the system is out
    /// of resources, and `InvalidConfig` for a malformed name or a zero size.
    pub fn create(name: &str, size: usize) -> Result<Self> {
        validate_name(name)?;
        if size == 0 {
            return Err(Error::InvalidConfig("arena size must be greater than 0".into()));
        }

        let fd = rustix::shm::shm_open(
            name,
            ShmOFlags::CREATE | ShmOFlags::EXCL | ShmOFlags::RDWR,
            Mode::from_raw_mode(0o600),
        )
        .map_err(|source| {
            if source == Errno::INVAL {
                Error::InvalidConfig(format!("invalid shared memory name {name:?}"))
            } else {
                Error::ResourceCreation {
                    what: format!("shared memory {name}"),
                    source,
                }
            }
        })?;

        // Constructed before ftruncate so a failure below still unlinks.
        let handle = Self {
            fd,
            name: name.to_string(),
            size,
            role: Role::Owner,
        };

        rustix::fs::ftruncate(&handle.fd, size as u64).map_err(|source| {
            Error::ResourceCreation {
                what: format!("shared memory {name} ({size} bytes)"),
                source,
            }
        })?;

        tracing::info!(name, size, "created shared arena");
        Ok(handle)
    }

    /// Open a backing store created by the owner.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the owner has not created it yet, and
    /// `InvalidConfig` for a malformed name.
    pub fn open(name: &str) -> Result<Self> {
        validate_name(name)?;
        let fd = rustix::shm::shm_open(name, ShmOFlags::RDWR, Mode::empty()).map_err(|e| {
            if e == Errno::NOENT {
                Error::NotFound(format!("shared memory {name}"))
            } else if e == Errno::INVAL {
                Error::InvalidConfig(format!("invalid shared memory name {name:?}"))
            } else {
                Error::System(e)
            }
        })?;

        let stat = rustix::fs::fstat(&fd)?;
        let size = stat.st_size as usize;
        if size == 0 {
            // Created but not yet sized by the owner.
            return Err(Error::NotFound(format!("shared memory {name} (not sized yet)")));
        }

        tracing::debug!(name, size, "opened shared arena");
        Ok(Self {
            fd,
            name: name.to_string(),
            size,
            role: Role::Joiner,
        })
    }

    /// Name of the backing store.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Size of the backing store in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Which side of the session this handle belongs to.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Map the first `size` bytes at exactly `base`.
    ///
    /// # Errors
    ///
    /// Returns `MappingConflict` if anything already occupies the range in
    /// this process, and `InvalidConfig` if `base` is not page aligned or
    /// `size` is zero or exceeds the backing store.
    pub fn map_fixed(self, base: usize, size: usize) -> Result<MappedArena> {
        let page = rustix::param::page_size();
        if base % page != 0 {
            return Err(Error::InvalidConfig(format!(
                "base address {base:#x} is not a multiple of the page size {page}"
            )));
        }
        if size == 0 || size > self.size {
            return Err(Error::InvalidConfig(format!(
                "cannot map {size} bytes of a {} byte arena",
                self.size
            )));
        }

        let requested = base as *mut c_void;
        let ptr = unsafe {
            rustix::mm::mmap(
                requested,
                size,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED | MapFlags::FIXED_NOREPLACE,
                &self.fd,
                0,
            )
        }
        .map_err(|e| {
            if e == Errno::EXIST {
                Error::MappingConflict {
                    address: base,
                    len: size,
                }
            } else {
                Error::System(e)
            }
        })?;

        // Kernels older than 4.17 treat the flag as a hint.
        if ptr != requested {
            unsafe {
                let _ = rustix::mm::munmap(ptr, size);
            }
            return Err(Error::MappingConflict {
                address: base,
                len: size,
            });
        }

        let base_ptr = NonNull::new(ptr.cast::<u8>())
            .ok_or_else(|| Error::InvalidConfig("cannot map the arena at address 0".into()))?;

        tracing::debug!(name = %self.name, base = format_args!("{base:#x}"), size, "mapped arena");
        Ok(MappedArena {
            base: base_ptr,
            len: size,
            handle: self,
        })
    }
}

impl AsFd for ArenaHandle {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl Drop for ArenaHandle {
    fn drop(&mut self) {
        if self.role == Role::Owner {
            if let Err(e) = rustix::shm::shm_unlink(self.name.as_str()) {
                tracing::warn!(name = %self.name, error = %e, "failed to unlink shared arena");
            } else {
                tracing::info!(name = %self.name, "destroyed shared arena");
            }
        }
        // fd is closed when OwnedFd is dropped
    }
}

/// A shared arena mapped at its fixed address.
///
/// Dropping it unmaps the region; the owner's handle then unlinks the
/// backing store.
#[derive(Debug)]
pub struct MappedArena {
    base: NonNull<u8>,
    len: usize,
    // Dropped after `Drop::drop` has unmapped the region.
    handle: ArenaHandle,
}

impl MappedArena {
    /// Which side of the session mapped this arena.
    pub fn role(&self) -> Role {
        self.handle.role
    }

    /// Base address of the mapping.
    pub fn base_address(&self) -> usize {
        self.base.as_ptr() as usize
    }
}

impl MemoryRegion for MappedArena {
    fn as_ptr(&self) -> *const u8 {
        self.base.as_ptr()
    }

    fn as_mut_ptr(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    fn len(&self) -> usize {
        self.len
    }

    fn kind(&self) -> RegionKind {
        RegionKind::SharedFixed
    }
}

impl Drop for MappedArena {
    fn drop(&mut self) {
        unsafe {
            let _ = rustix::mm::munmap(self.base.as_ptr().cast(), self.len);
        }
        tracing::debug!(name = %self.handle.name, "unmapped arena");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{test_base, unique_name};

    #[test]
    fn test_fixed_base_is_page_aligned() {
        let base = fixed_base_address();
        assert_eq!(base % rustix::param::page_size(), 0);
        assert!(base <= FIXED_BASE_HINT);
        assert_eq!(base, fixed_base_address());
    }

    #[test]
    fn test_create_and_map() {
        let name = unique_name("arena-create");
        let handle = ArenaHandle::create(&name, 64 * 1024).unwrap();
        assert_eq!(handle.role(), Role::Owner);
        assert_eq!(handle.size(), 64 * 1024);

        let base = test_base(0);
        let arena = handle.map_fixed(base, 64 * 1024).unwrap();
        assert_eq!(arena.base_address(), base);
        assert_eq!(arena.len(), 64 * 1024);
        assert_eq!(arena.kind(), RegionKind::SharedFixed);

        unsafe {
            *arena.as_mut_ptr() = 42;
            *arena.as_mut_ptr().add(64 * 1024 - 1) = 7;
            assert_eq!(*arena.as_ptr(), 42);
        }
    }

    #[test]
    fn test_name_collision_fails() {
        let name = unique_name("arena-collide");
        let _first = ArenaHandle::create(&name, 4096).unwrap();
        let second = ArenaHandle::create(&name, 4096);
        assert!(matches!(second, Err(Error::ResourceCreation { .. })));
    }

    #[test]
    fn test_open_missing_fails() {
        let result = ArenaHandle::open(&unique_name("arena-missing"));
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_zero_size_fails() {
        let result = ArenaHandle::create(&unique_name("arena-zero"), 0);
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_invalid_name_rejected() {
        let long = format!("/{}", "x".repeat(MAX_NAME_LEN + 1));
        for name in ["", "/", "///", "/crossheap/nested", "crossheap\0nul", long.as_str()] {
            assert!(
                matches!(ArenaHandle::create(name, 4096), Err(Error::InvalidConfig(_))),
                "create {name:?}"
            );
            assert!(
                matches!(ArenaHandle::open(name), Err(Error::InvalidConfig(_))),
                "open {name:?}"
            );
        }
    }

    #[test]
    fn test_open_sees_owner_size() {
        let name = unique_name("arena-open");
        let _owner = ArenaHandle::create(&name, 8192).unwrap();
        let joiner = ArenaHandle::open(&name).unwrap();
        assert_eq!(joiner.role(), Role::Joiner);
        assert_eq!(joiner.size(), 8192);
    }

    #[test]
    fn test_owner_drop_unlinks() {
        let name = unique_name("arena-unlink");
        let owner = ArenaHandle::create(&name, 4096).unwrap();
        drop(owner);
        assert!(matches!(ArenaHandle::open(&name), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_joiner_drop_keeps_store() {
        let name = unique_name("arena-joiner-drop");
        let _owner = ArenaHandle::create(&name, 4096).unwrap();
        drop(ArenaHandle::open(&name).unwrap());
        assert!(ArenaHandle::open(&name).is_ok());
    }

    #[test]
    fn test_mapping_conflict() {
        let base = test_base(1);
        let first = ArenaHandle::create(&unique_name("arena-conflict-a"), 4096).unwrap();
        let _mapped = first.map_fixed(base, 4096).unwrap();

        let second = ArenaHandle::create(&unique_name("arena-conflict-b"), 4096).unwrap();
        let result = second.map_fixed(base, 4096);
        assert!(matches!(
            result,
            Err(Error::MappingConflict { address, len: 4096 }) if address == base
        ));
    }

    #[test]
    fn test_unaligned_base_rejected() {
        let handle = ArenaHandle::create(&unique_name("arena-unaligned"), 4096).unwrap();
        let result = handle.map_fixed(test_base(2) + 8, 4096);
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_oversized_mapping_rejected() {
        let handle = ArenaHandle::create(&unique_name("arena-oversized"), 4096).unwrap();
        let result = handle.map_fixed(test_base(3), 8192);
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_unmap_releases_range() {
        let base = test_base(4);
        let first = ArenaHandle::create(&unique_name("arena-remap-a"), 4096).unwrap();
        drop(first.map_fixed(base, 4096).unwrap());

        let second = ArenaHandle::create(&unique_name("arena-remap-b"), 4096).unwrap();
        assert!(second.map_fixed(base, 4096).is_ok());
    }

    #[test]
    fn test_modifications_visible_through_second_mapping() {
        // Two mappings of one store in one process need two addresses; the
        // pages underneath are still the same.
        let name = unique_name("arena-visible");
        let owner = ArenaHandle::create(&name, 4096)
            .unwrap()
            .map_fixed(test_base(5), 4096)
            .unwrap();
        let joiner = ArenaHandle::open(&name)
            .unwrap()
            .map_fixed(test_base(6), 4096)
            .unwrap();

        unsafe {
            *owner.as_mut_ptr().add(100) = 77;
            assert_eq!(*joiner.as_ptr().add(100), 77);

            *joiner.as_mut_ptr().add(200) = 88;
            assert_eq!(*owner.as_ptr().add(200), 88);
        }
    }
}
