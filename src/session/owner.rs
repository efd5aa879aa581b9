//! The process that creates the session.

use crate::config::SessionConfig;
use crate::context::{AllocatorHooks, SharedContext};
use crate::error::{Error, Result};
use crate::handshake::{Handoff, Handshake, TurnState};
use crate::heap::{HEAP_ALIGN, SharedHeap};
use crate::memory::{ArenaHandle, MappedArena, MemoryRegion};
use std::ffi::c_void;
use std::ptr::NonNull;

/// Owner side of a session.
///
/// Creates the arena, the heap, the shared context and both turn tokens,
/// and destroys all of them when dropped. Field order is drop order: the
/// tokens go first, the mapping last.
///
/// # Example
///
/// ```rust,no_run
/// use crossheap::config::SessionConfig;
/// use crossheap::session::OwnerSession;
///
/// #[repr(C)]
/// struct Ui {
///     frame: u64,
/// }
///
/// let mut owner = OwnerSession::with_state(SessionConfig::new("editor"), Ui { frame: 0 })?;
/// loop {
///     // Our turn: read or update the shared state.
///     let ui: &mut Ui = unsafe { owner.context().as_mut() };
///     ui.frame += 1;
///     if ui.frame == 1000 {
///         break;
///     }
///     // Let the joiner produce, then take the turn back.
///     owner.handoff()?;
/// }
/// # Ok::<(), crossheap::Error>(())
/// ```
#[derive(Debug)]
pub struct OwnerSession {
    handshake: Handshake,
    heap: SharedHeap,
    context: SharedContext,
    arena: MappedArena,
    config: SessionConfig,
}

impl OwnerSession {
    /// Create a session whose context is built by `factory`.
    ///
    /// `factory` runs once, against the fresh shared heap, and returns the
    /// context pointer. Typically it installs [`SharedHeap::hooks`] into the
    /// UI library and lets the library create its context.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for a bad configuration or a context pointer
    /// outside the shared heap, `ResourceCreation` if the arena or a token
    /// name is taken, `MappingConflict` if the base address is in use, and
    /// whatever `factory` returns.
    pub fn create<F>(config: SessionConfig, factory: F) -> Result<Self>
    where
        F: FnOnce(&mut SharedHeap) -> Result<NonNull<c_void>>,
    {
        config.validate()?;

        let handle = ArenaHandle::create(&config.shm_name(), config.arena_size)?;
        let arena = handle.map_fixed(config.base_address(), config.arena_size)?;

        // SAFETY: the arena is freshly created and outlives the heap (field
        // order in Self).
        let mut heap = unsafe { SharedHeap::initialize(&arena, config.strategy)? };

        let context = factory(&mut heap)?;
        if !heap.contains(context.as_ptr().cast::<u8>()) {
            return Err(Error::InvalidConfig(format!(
                "context {:p} is not inside the shared heap",
                context.as_ptr()
            )));
        }
        heap.set_context(context);

        let handshake = Handshake::create(&config)?;
        heap.publish();

        tracing::info!(
            name = %config.name,
            base = format_args!("{:#x}", arena.as_ptr() as usize),
            size = config.arena_size,
            strategy = %config.strategy,
            "owner session ready"
        );

        Ok(Self {
            handshake,
            heap,
            context: SharedContext::new(context),
            arena,
            config,
        })
    }

    /// Create a session whose context is `value`, moved into the shared
    /// heap.
    ///
    /// `T` must be usable from the other process: no process-local pointers,
    /// file descriptors or heap allocations outside the arena. Its `Drop`
    /// never runs; the arena is simply unmapped.
    ///
    /// # Errors
    ///
    /// As [`OwnerSession::create`]; `InvalidConfig` if `T` needs more than
    /// 16-byte alignment and `OutOfMemory` if it does not fit.
    pub fn with_state<T>(config: SessionConfig, value: T) -> Result<Self> {
        if std::mem::align_of::<T>() > HEAP_ALIGN {
            return Err(Error::InvalidConfig(format!(
                "context type needs {}-byte alignment, the heap provides {HEAP_ALIGN}",
                std::mem::align_of::<T>()
            )));
        }

        Self::create(config, move |heap| {
            let block = heap.allocate(std::mem::size_of::<T>())?;
            let typed = block.cast::<T>();
            // SAFETY: the block is large enough and suitably aligned.
            unsafe { typed.as_ptr().write(value) };
            Ok(typed.cast())
        })
    }

    /// The configuration the session was created with.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Base address of the arena.
    pub fn base_address(&self) -> usize {
        self.arena.as_ptr() as usize
    }

    /// The shared heap, read only.
    pub fn heap(&self) -> &SharedHeap {
        &self.heap
    }

    /// The shared heap, for allocation.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolViolation` while the joiner holds the turn (after a
    /// handoff timed out with the turn still handed over).
    pub fn heap_mut(&mut self) -> Result<&mut SharedHeap> {
        if !self.handshake.state().holds_turn() {
            return Err(Error::ProtocolViolation(
                "owner touched the heap while the joiner holds the turn".into(),
            ));
        }
        Ok(&mut self.heap)
    }

    /// The shared context.
    pub fn context(&self) -> SharedContext {
        self.context
    }

    /// Allocator hooks for the UI library.
    pub fn hooks(&self) -> AllocatorHooks {
        self.heap.hooks()
    }

    /// Whether a joiner has attached.
    pub fn is_joiner_connected(&self) -> bool {
        self.heap.is_joiner_connected()
    }

    /// Local turn state.
    pub fn state(&self) -> TurnState {
        self.handshake.state()
    }

    /// Let the joiner take one turn, then resume.
    ///
    /// Returns [`Handoff::Skipped`] immediately while no joiner is attached.
    /// Blocks until the joiner finishes otherwise; if the joiner has gone
    /// away this blocks forever unless a handoff timeout is configured.
    ///
    /// # Errors
    ///
    /// Returns `Disconnected` on timeout and `ProtocolViolation` if the
    /// token states are inconsistent.
    pub fn handoff(&mut self) -> Result<Handoff> {
        let connected = self.heap.is_joiner_connected();
        self.handshake.handoff(connected)
    }
}

impl Drop for OwnerSession {
    fn drop(&mut self) {
        tracing::info!(name = %self.config.name, "owner session closing");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::StrategyKind;
    use crate::test_util::{test_base, unique_session};
    use std::time::{Duration, Instant};

    fn config(tag: &str, slot: usize) -> SessionConfig {
        SessionConfig::new(unique_session(tag))
            .with_arena_size(1024 * 1024)
            .with_base_address(test_base(slot))
    }

    #[test]
    fn test_handoff_without_joiner_returns_immediately() {
        let mut owner = OwnerSession::with_state(config("owner-solo", 10), [0u8; 64]).unwrap();
        assert!(!owner.is_joiner_connected());

        let start = Instant::now();
        for _ in 0..100 {
            assert_eq!(owner.handoff().unwrap(), Handoff::Skipped);
        }
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(owner.state(), TurnState::OwnerConsuming);
    }

    #[test]
    fn test_context_lives_in_heap() {
        let owner = OwnerSession::with_state(config("owner-context", 11), 42u64).unwrap();
        let context = owner.context();
        assert!(owner.heap().contains(context.as_ptr().cast::<u8>()));
        assert_eq!(unsafe { *context.as_ref::<u64>() }, 42);
        assert_eq!(owner.heap().context(), NonNull::new(context.as_ptr()));
        assert!(owner.heap().is_published());
    }

    #[test]
    fn test_owner_allocates_between_handoffs() {
        let mut owner = OwnerSession::with_state(
            config("owner-alloc", 12).with_strategy(StrategyKind::FreeList),
            0u32,
        )
        .unwrap();
        let heap = owner.heap_mut().unwrap();
        let block = heap.allocate(256).unwrap();
        assert!(heap.contains(block.as_ptr()));
        unsafe { heap.free(block.as_ptr()).unwrap() };
    }

    #[test]
    fn test_factory_error_propagates() {
        let result = OwnerSession::create(config("owner-factory", 13), |heap| {
            heap.allocate(usize::MAX / 2).map(NonNull::cast)
        });
        assert!(matches!(result, Err(Error::OutOfMemory { .. })));
    }

    #[test]
    fn test_foreign_context_rejected() {
        let mut outside = 0u64;
        let result = OwnerSession::create(config("owner-foreign", 14), |_| {
            Ok(NonNull::from(&mut outside).cast())
        });
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_failed_create_releases_names() {
        let config = config("owner-cleanup", 15);
        let failed = OwnerSession::create(config.clone(), |heap| {
            heap.allocate(usize::MAX / 2).map(NonNull::cast)
        });
        assert!(failed.is_err());
        assert!(matches!(
            ArenaHandle::open(&config.shm_name()),
            Err(Error::NotFound(_))
        ));

        // Names and the address range are free again.
        assert!(OwnerSession::with_state(config, 1u8).is_ok());
    }

    #[test]
    fn test_second_owner_collides() {
        let config = config("owner-twice", 16);
        let _first = OwnerSession::with_state(config.clone(), 1u8).unwrap();
        let second = OwnerSession::with_state(config.with_base_address(test_base(17)), 1u8);
        assert!(matches!(second, Err(Error::ResourceCreation { .. })));
    }

    #[test]
    fn test_invalid_config_touches_nothing() {
        let config = config("owner-invalid", 18).with_arena_size(16);
        let result = OwnerSession::with_state(config.clone(), 0u8);
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
        assert!(matches!(
            ArenaHandle::open(&config.shm_name()),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_over_aligned_state_rejected() {
        #[repr(align(64))]
        struct Wide(#[allow(dead_code)] u8);
        let result = OwnerSession::with_state(config("owner-aligned", 19), Wide(0));
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }
}
