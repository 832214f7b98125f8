//! Error types for PhantomID.
//!
//! Every tree and snapshot operation returns a typed error; nothing is
//! retried internally. Seed material is never included in error messages.

/// Error kinds covering tree mutation, lookup, and snapshot persistence.
#[derive(Debug, thiserror::Error)]
pub enum PhantomError {
    #[error("Invalid topology: {0}")]
    InvalidTopology(String),

    #[error("Parent node not found: {0}")]
    ParentNotFound(String),

    #[error("Parent node full: {id} already has {max_children} children")]
    CapacityExceeded { id: String, max_children: usize },

    #[error("Node not found: {0}")]
    NotFound(String),

    #[error("Cannot delete root with children: {0}")]
    RootHasChildren(String),

    #[error("Allocation failed: {0}")]
    AllocationFailure(String),

    #[error("Incompatible snapshot format: {0}")]
    IncompatibleFormat(String),

    #[error("Corrupt snapshot: {0}")]
    CorruptState(String),

    #[error("Invalid identifier: {0}")]
    InvalidId(String),

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, PhantomError>;
