//! Tree nodes — immutable identity fields plus lock-guarded role flags.
//!
//! A node's identifier and timestamps never change after creation and
//! are read without locking. The role flags sit behind the node's own
//! mutex, which is the second lock tier: it is only ever taken while the
//! tree lock is held, or on its own for payload updates that cannot
//! change the tree's shape (`set_active`).

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::identity::{Account, NodeId};

/// Privilege requested for a new node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    /// Ordinary participant.
    #[default]
    Member,
    /// Quota-limited admin privilege.
    Admin,
}

/// Role and liveness flags of one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct NodeRoles {
    /// Set on the structural root and on nodes promoted to standalone roots.
    pub is_root: bool,
    /// Admin privilege, counted against the admin quota.
    pub is_admin: bool,
    /// Liveness flag.
    pub is_active: bool,
}

impl NodeRoles {
    /// Display label: admin wins over root.
    pub fn label(&self) -> &'static str {
        if self.is_admin {
            "Admin"
        } else if self.is_root {
            "Root"
        } else {
            "Child"
        }
    }
}

/// One identity stored in the tree.
#[derive(Debug)]
pub struct IdentityNode {
    id: NodeId,
    creation_time: i64,
    expiry_time: i64,
    roles: Mutex<NodeRoles>,
}

/// Shared handle to a node. Stays valid after the node is deleted from
/// the tree, but then no longer reflects tree state.
pub type NodeRef = Arc<IdentityNode>;

impl IdentityNode {
    pub(crate) fn new(account: &Account, roles: NodeRoles) -> Self {
        Self {
            id: account.id.clone(),
            creation_time: account.creation_time,
            expiry_time: account.expiry_time,
            roles: Mutex::new(roles),
        }
    }

    /// The node's identifier.
    pub fn id(&self) -> &NodeId {
        &self.id
    }

    /// Creation timestamp (seconds since Unix epoch).
    pub fn creation_time(&self) -> i64 {
        self.creation_time
    }

    /// Expiry timestamp (seconds since Unix epoch).
    pub fn expiry_time(&self) -> i64 {
        self.expiry_time
    }

    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expiry_time
    }

    /// Copy of the current role flags.
    pub fn roles(&self) -> NodeRoles {
        *self.lock_roles()
    }

    /// Flip the liveness flag. Touches only this node's lock.
    pub fn set_active(&self, active: bool) {
        self.lock_roles().is_active = active;
    }

    pub(crate) fn lock_roles(&self) -> MutexGuard<'_, NodeRoles> {
        self.roles.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Owned, lock-free description of a node and its position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeInfo {
    pub id: NodeId,
    pub parent: Option<NodeId>,
    pub creation_time: i64,
    pub expiry_time: i64,
    pub roles: NodeRoles,
    pub child_count: usize,
    /// Distance from the top of the subtree holding the node (tops are 0).
    pub depth: usize,
}
