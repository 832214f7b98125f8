//! PhantomID — a registry of anonymous identities kept in a
//! capacity-bounded tree.
//!
//! Provides the identity tree with orphan redistribution, a quota-limited
//! admin privilege, a checksummed binary snapshot format, and the command
//! facade served by the `phantomd` daemon.

pub mod config;
pub mod crypto;
pub mod daemon;
pub mod error;
pub mod identity;
pub mod quota;
pub mod storage;
pub mod time;
pub mod tree;

// Re-export primary types
pub use config::{DaemonConfig, NetworkConfig, StateConfig, TreeConfig};
pub use crypto::{DigestProvider, Sha256Digest};
pub use daemon::{Command, History, Registry, Status};
pub use error::{PhantomError, Result};
pub use identity::{Account, NodeId};
pub use quota::AdminQuota;
pub use storage::{SnapshotInfo, SnapshotStore};
pub use tree::{
    IdentityNode, IdentityTree, LockedTree, NodeInfo, NodeRef, NodeRoles, Role, TraversalOrder,
    Visit,
};
