//! Session configuration.
//!
//! Everything a participant needs to find and interpret the shared arena:
//! the session name, the arena size, the fixed base address, the heap
//! strategy and the optional handoff timeout.
//!
//! # Example
//!
//! ```rust
//! use crossheap::config::SessionConfig;
//! use crossheap::heap::StrategyKind;
//! use std::time::Duration;
//!
//! let config = SessionConfig::new("editor-ui")
//!     .with_arena_size(1024 * 1024)
//!     .with_strategy(StrategyKind::FreeList)
//!     .with_handoff_timeout(Duration::from_secs(2));
//!
//! assert!(config.validate().is_ok());
//! assert_eq!(config.shm_name(), "/editor-ui");
//! ```

pub mod defaults;

use crate::error::{Error, Result};
use crate::heap::StrategyKind;
use crate::memory::fixed_base_address;
use std::time::Duration;

/// Parameters shared by the owner and the joiner of a session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    /// Session name. Shared memory is `/<name>`, turn tokens are
    /// `/<name>-produce` and `/<name>-finished`.
    pub name: String,
    /// Total arena size in bytes, header included.
    pub arena_size: usize,
    /// Explicit base address. `None` uses [`fixed_base_address`].
    pub base_address: Option<usize>,
    /// Heap strategy the owner initialises. The joiner checks it matches.
    pub strategy: StrategyKind,
    /// Give up waiting for the peer after this long. `None` blocks forever.
    pub handoff_timeout: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            name: defaults::SESSION_NAME.to_string(),
            arena_size: defaults::ARENA_SIZE,
            base_address: None,
            strategy: StrategyKind::default(),
            handoff_timeout: None,
        }
    }
}

impl SessionConfig {
    /// Create a configuration with the given session name and defaults for
    /// everything else.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the arena size.
    pub fn with_arena_size(mut self, size: usize) -> Self {
        self.arena_size = size;
        self
    }

    /// Map the arena at an explicit base address instead of the default.
    pub fn with_base_address(mut self, address: usize) -> Self {
        self.base_address = Some(address);
        self
    }

    /// Select the heap strategy.
    pub fn with_strategy(mut self, strategy: StrategyKind) -> Self {
        self.strategy = strategy;
        self
    }

    /// Fail waits on the peer with `Disconnected` after `timeout`.
    pub fn with_handoff_timeout(mut self, timeout: Duration) -> Self {
        self.handoff_timeout = Some(timeout);
        self
    }

    /// Use [`defaults::HANDOFF_TIMEOUT`] as the handoff timeout.
    pub fn with_default_timeout(self) -> Self {
        self.with_handoff_timeout(defaults::HANDOFF_TIMEOUT)
    }

    /// The base address both processes map the arena at.
    pub fn base_address(&self) -> usize {
        self.base_address.unwrap_or_else(fixed_base_address)
    }

    /// Name of the shared memory object.
    pub fn shm_name(&self) -> String {
        format!("/{}", self.name)
    }

    /// Name of the token the owner raises to hand the turn over.
    pub fn produce_token_name(&self) -> String {
        format!("/{}-produce", self.name)
    }

    /// Name of the token the joiner raises to hand the turn back.
    pub fn finished_token_name(&self) -> String {
        format!("/{}-finished", self.name)
    }

    /// Check the configuration before touching any system resource.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::InvalidConfig("session name is empty".into()));
        }
        if self.name.len() > defaults::MAX_NAME_LEN {
            return Err(Error::InvalidConfig(format!(
                "session name longer than {} bytes",
                defaults::MAX_NAME_LEN
            )));
        }
        if self.name.contains('/') || self.name.contains('\0') {
            return Err(Error::InvalidConfig(format!(
                "session name {:?} contains '/' or NUL",
                self.name
            )));
        }
        if self.arena_size < defaults::MIN_ARENA_SIZE {
            return Err(Error::InvalidConfig(format!(
                "arena size {} is below the minimum of {}",
                self.arena_size,
                defaults::MIN_ARENA_SIZE
            )));
        }
        let page = rustix::param::page_size();
        if self.base_address() % page != 0 {
            return Err(Error::InvalidConfig(format!(
                "base address {:#x} is not aligned to the page size {}",
                self.base_address(),
                page
            )));
        }
        if self.handoff_timeout == Some(Duration::ZERO) {
            return Err(Error::InvalidConfig("handoff timeout must be non-zero".into()));
        }
        Ok(())
    }
}
