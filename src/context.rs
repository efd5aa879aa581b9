//! The shared UI context handle and the allocator hooks.
//!
//! The UI library keeps all of its state behind one opaque context pointer.
//! The owner creates that context inside the shared heap and stores the
//! pointer in the arena header; the joiner reads it back from the header.
//! Because the arena sits at the same address in both processes, the pointer
//! is valid in both without translation.
//!
//! ```text
//!  arena base
//!  ┌──────────────────────────────┬─────────────────────────────────┐
//!  │ HeapHeader                   │ heap region                     │
//!  │  context ───────────────────────────► context object           │
//!  │  joiner_connected            │        (allocated by owner)     │
//!  └──────────────────────────────┴─────────────────────────────────┘
//! ```
//!
//! [`AllocatorHooks`] routes the UI library's own allocations into the same
//! heap, so everything reachable from the context lives in the arena.

use crate::heap::HeapHeader;
use std::ffi::c_void;
use std::ptr::{self, NonNull};

/// Pointer to the shared UI state root.
///
/// Only meaningful while the arena it points into is mapped and while the
/// local process holds the turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SharedContext {
    ptr: NonNull<c_void>,
}

impl SharedContext {
    pub(crate) fn new(ptr: NonNull<c_void>) -> Self {
        Self { ptr }
    }

    /// The raw context pointer, as handed to the UI library.
    pub fn as_ptr(&self) -> *mut c_void {
        self.ptr.as_ptr()
    }

    /// Address of the context inside the arena.
    pub fn address(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    /// View the context as a `T`.
    ///
    /// # Safety
    ///
    /// The context must have been created as a `T` by the owner, and the
    /// caller must hold the turn for the lifetime of the reference.
    pub unsafe fn as_ref<'a, T>(&self) -> &'a T {
        unsafe { self.ptr.cast::<T>().as_ref() }
    }

    /// Mutable view of the context as a `T`.
    ///
    /// # Safety
    ///
    /// As [`SharedContext::as_ref`], and no other reference to the context
    /// may exist for the lifetime of the returned one.
    pub unsafe fn as_mut<'a, T>(&self) -> &'a mut T {
        unsafe { self.ptr.cast::<T>().as_mut() }
    }
}

/// C-ABI allocation callback: `alloc(size, user_data)`.
pub type AllocFn = unsafe extern "C" fn(usize, *mut c_void) -> *mut c_void;

/// C-ABI free callback: `free(ptr, user_data)`.
pub type FreeFn = unsafe extern "C" fn(*mut c_void, *mut c_void);

/// Allocator functions to install into a UI library.
///
/// `user_data` is the address of the arena's [`HeapHeader`], which is the
/// same in both processes, so the hooks can be installed once per process
/// without any global state.
#[derive(Clone, Copy, Debug)]
pub struct AllocatorHooks {
    /// Allocation callback.
    pub alloc: AllocFn,
    /// Free callback.
    pub free: FreeFn,
    /// Opaque pointer passed back to both callbacks.
    pub user_data: *mut c_void,
}

impl AllocatorHooks {
    pub(crate) fn for_header(header: NonNull<HeapHeader>) -> Self {
        Self {
            alloc: shared_alloc,
            free: shared_free,
            user_data: header.as_ptr().cast(),
        }
    }
}

/// Allocate from the shared heap whose header is `user_data`.
///
/// Returns null (after logging) when the heap is exhausted.
///
/// # Safety
///
/// `user_data` must be the header address from [`AllocatorHooks`], the
/// arena must be mapped, and the calling process must hold the turn.
pub unsafe extern "C" fn shared_alloc(size: usize, user_data: *mut c_void) -> *mut c_void {
    let Some(mut header) = NonNull::new(user_data.cast::<HeapHeader>()) else {
        tracing::error!(size, "shared_alloc called without a heap");
        return ptr::null_mut();
    };

    // SAFETY: caller contract.
    match unsafe { header.as_mut() }.allocate(size) {
        Ok(block) => block.as_ptr().cast(),
        Err(err) => {
            tracing::error!(size, error = %err, "shared allocation failed");
            ptr::null_mut()
        }
    }
}

/// Return `ptr` to the shared heap whose header is `user_data`.
///
/// Null is ignored. A free the heap rejects (double free, foreign pointer)
/// means shared state is corrupt; the process is aborted after logging.
///
/// # Safety
///
/// As [`shared_alloc`]; a non-null `ptr` must come from it.
pub unsafe extern "C" fn shared_free(ptr: *mut c_void, user_data: *mut c_void) {
    if ptr.is_null() {
        return;
    }
    let Some(mut header) = NonNull::new(user_data.cast::<HeapHeader>()) else {
        tracing::error!(ptr = ?ptr, "shared_free called without a heap");
        std::process::abort();
    };

    // SAFETY: caller contract.
    if let Err(err) = unsafe { header.as_mut().free(ptr.cast()) } {
        tracing::error!(ptr = ?ptr, error = %err, "shared heap corrupted, aborting");
        std::process::abort();
    }
}
