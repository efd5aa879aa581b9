//! The process that attaches to an existing session.

use crate::config::SessionConfig;
use crate::context::{AllocatorHooks, SharedContext};
use crate::error::{Error, Result};
use crate::handshake::{Handshake, TurnState};
use crate::heap::SharedHeap;
use crate::memory::{ArenaHandle, MappedArena, MemoryRegion};

/// Joiner side of a session.
///
/// Maps the owner's arena at the same address and takes turns mutating the
/// shared state through [`JoinerSession::begin_frame`]. Dropping it unmaps
/// the arena and closes the tokens but leaves every name in place; the
/// connection flag also stays set, so a second joiner cannot attach to the
/// same session.
#[derive(Debug)]
pub struct JoinerSession {
    handshake: Handshake,
    heap: SharedHeap,
    context: SharedContext,
    arena: MappedArena,
    config: SessionConfig,
}

impl JoinerSession {
    /// Attach to the session the owner created under `config.name`.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the owner has not finished creating the session.
    ///   Callers that race the owner retry on this.
    /// - `MappingConflict` if the base address is taken in this process.
    /// - `InvalidConfig` if the arena size, base address or strategy differ
    ///   from the owner's.
    /// - `ProtocolViolation` if a joiner has already attached.
    pub fn attach(config: SessionConfig) -> Result<Self> {
        config.validate()?;

        let handle = ArenaHandle::open(&config.shm_name())?;
        let arena = handle.map_fixed(config.base_address(), config.arena_size)?;

        // SAFETY: the heap is dropped before the arena (field order in Self).
        let heap = unsafe { SharedHeap::attach(&arena)? };
        if heap.kind() != config.strategy {
            return Err(Error::InvalidConfig(format!(
                "owner uses the {} strategy, joiner configured {}",
                heap.kind(),
                config.strategy
            )));
        }

        let context = heap
            .context()
            .map(SharedContext::new)
            .ok_or_else(|| Error::NotFound("shared context".into()))?;

        let handshake = Handshake::open(&config)?;
        heap.mark_connected()?;

        tracing::info!(
            name = %config.name,
            base = format_args!("{:#x}", arena.as_ptr() as usize),
            context = format_args!("{:#x}", context.address()),
            "joiner attached"
        );

        Ok(Self {
            handshake,
            heap,
            context,
            arena,
            config,
        })
    }

    /// The configuration the session was attached with.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Base address of the arena.
    pub fn base_address(&self) -> usize {
        self.arena.as_ptr() as usize
    }

    /// The shared context pointer, as published by the owner.
    ///
    /// Only dereference it inside a [`Frame`].
    pub fn context(&self) -> SharedContext {
        self.context
    }

    /// Allocator hooks for the UI library. Only call them inside a
    /// [`Frame`].
    pub fn hooks(&self) -> AllocatorHooks {
        self.heap.hooks()
    }

    /// Local turn state.
    pub fn state(&self) -> TurnState {
        self.handshake.state()
    }

    /// Wait for the owner to hand over the turn.
    ///
    /// The returned [`Frame`] is the only way to reach the heap. Finish it
    /// explicitly to see errors; dropping it also hands the turn back.
    ///
    /// # Errors
    ///
    /// Returns `Disconnected` if a timeout is configured and the owner does
    /// not hand over the turn in time.
    pub fn begin_frame(&mut self) -> Result<Frame<'_>> {
        self.handshake.wait_for_turn()?;
        Ok(Frame {
            session: self,
            finished: false,
        })
    }
}

impl Drop for JoinerSession {
    fn drop(&mut self) {
        tracing::info!(name = %self.config.name, "joiner detaching");
    }
}

/// One joiner turn. Holds exclusive use of the arena until finished.
#[derive(Debug)]
pub struct Frame<'a> {
    session: &'a mut JoinerSession,
    finished: bool,
}

impl Frame<'_> {
    /// The shared heap.
    pub fn heap(&mut self) -> &mut SharedHeap {
        &mut self.session.heap
    }

    /// The shared context.
    pub fn context(&self) -> SharedContext {
        self.session.context
    }

    /// Hand the turn back to the owner.
    ///
    /// Dropping an unfinished frame does the same, except that a protocol
    /// violation aborts the process.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolViolation` if the Finished token was already raised.
    pub fn finish(mut self) -> Result<()> {
        self.finished = true;
        self.session.handshake.finish_turn()
    }
}

impl Drop for Frame<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        match self.session.handshake.finish_turn() {
            Ok(()) => {}
            Err(e) if e.is_fatal() => {
                tracing::error!(error = %e, "turn protocol broken, aborting");
                std::process::abort();
            }
            Err(e) => tracing::error!(error = %e, "failed to hand the turn back"),
        }
    }
}
