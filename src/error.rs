//! Error types for crossheap.

use std::time::Duration;
use thiserror::Error;

/// Result type alias using crossheap's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for crossheap operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A named shared resource could not be created (name collision or
    /// resource exhaustion).
    #[error("failed to create {what}: {source}")]
    ResourceCreation {
        /// The resource that was being created.
        what: String,
        /// The underlying system error.
        source: rustix::io::Errno,
    },

    /// A named shared resource does not exist (yet).
    #[error("not found: {0}")]
    NotFound(String),

    /// The fixed virtual address range is unavailable in this process.
    #[error("address range {address:#x}..+{len:#x} is already in use")]
    MappingConflict {
        /// Requested base address.
        address: usize,
        /// Requested mapping length.
        len: usize,
    },

    /// The shared heap has no block large enough.
    #[error("shared heap exhausted: cannot allocate {requested} bytes")]
    OutOfMemory {
        /// Number of bytes requested.
        requested: usize,
    },

    /// The turn protocol or attach protocol was violated.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// The peer did not respond within the configured handoff timeout.
    #[error("peer did not respond within {waited:?}")]
    Disconnected {
        /// How long we waited.
        waited: Duration,
    },

    /// A block was freed twice.
    #[error("double free of block at {address:#x}")]
    DoubleFree {
        /// Address passed to free.
        address: usize,
    },

    /// A pointer passed to free does not belong to the shared heap.
    #[error("pointer {address:#x} is not a shared heap block")]
    InvalidPointer {
        /// Address passed to free.
        address: usize,
    },

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// System call error (via rustix).
    #[error("system error: {0}")]
    System(#[from] rustix::io::Errno),
}

impl Error {
    /// Whether this error means shared state can no longer be trusted.
    ///
    /// Fatal errors are protocol violations and heap corruption. A session
    /// that produced one must not be used further.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::ProtocolViolation(_) | Error::DoubleFree { .. } | Error::InvalidPointer { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(Error::ProtocolViolation("double attach".into()).is_fatal());
        assert!(Error::DoubleFree { address: 0x10 }.is_fatal());
        assert!(Error::InvalidPointer { address: 0x10 }.is_fatal());
        assert!(!Error::OutOfMemory { requested: 8 }.is_fatal());
        assert!(!Error::NotFound("arena".into()).is_fatal());
        assert!(
            !Error::Disconnected {
                waited: Duration::from_millis(5)
            }
            .is_fatal()
        );
    }

    #[test]
    fn test_display_messages() {
        let err = Error::MappingConflict {
            address: 0xff_0000_0000,
            len: 0x1000,
        };
        assert_eq!(
            err.to_string(),
            "address range 0xff00000000..+0x1000 is already in use"
        );

        let err = Error::OutOfMemory { requested: 100 };
        assert_eq!(
            err.to_string(),
            "shared heap exhausted: cannot allocate 100 bytes"
        );
    }
}
