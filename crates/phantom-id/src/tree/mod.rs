//! Identity tree — a capacity-bounded tree of anonymous identities.
//!
//! The tree provides:
//! - Insert under a parent (or as the single structural root)
//! - Delete with orphan redistribution and admin inheritance
//! - Breadth-first lookup by identifier
//! - Breadth-first and depth-first traversal with a visitor
//! - Size, depth, and root status queries
//!
//! # Locking
//!
//! Two tiers, always taken in this order:
//!
//! 1. the tree lock, guarding the arena, the root slot, the detached-root
//!    list, and every parent/child link;
//! 2. a node's own lock, guarding its role flags.
//!
//! Every public operation holds the tree lock for its whole duration, so
//! mutations, lookups, and traversals are totally ordered. At most one
//! node lock is held at a time. Locks are not reentrant: a traversal
//! visitor must not call back into the same tree.
//!
//! # Detached roots
//!
//! When a deleted node's children cannot move to its former parent (the
//! node had no parent, or the parent is full) they become standalone
//! root-flagged nodes. They are kept in an ordered list next to the
//! structural root and stay reachable by lookups, traversals, and
//! snapshots. Only the structural root slot decides `has_root`.

pub(crate) mod arena;
pub mod node;

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::config::TreeConfig;
use crate::error::{PhantomError, Result};
use crate::identity::{Account, NodeId};
use crate::quota::AdminQuota;

use arena::{Arena, NodeHandle};
pub use node::{IdentityNode, NodeInfo, NodeRef, NodeRoles, Role};

/// Visiting order for [`IdentityTree::traverse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraversalOrder {
    /// Level by level.
    Bfs,
    /// Depth-first pre-order; every parent precedes its children.
    Dfs,
}

/// What a traversal visitor sees for one node.
///
/// `roles` is read under the node's lock, which stays held while the
/// visitor runs.
#[derive(Debug)]
pub struct Visit<'a> {
    pub node: &'a IdentityNode,
    pub roles: NodeRoles,
    pub parent: Option<&'a NodeId>,
    pub depth: usize,
    pub child_count: usize,
}

impl Visit<'_> {
    pub fn id(&self) -> &NodeId {
        self.node.id()
    }
}

#[derive(Debug)]
struct TreeState {
    arena: Arena,
    /// Identifier index, kept in lock-step with the arena. Used for
    /// duplicate detection and snapshot rebuilds; lookups walk the tree.
    index: HashMap<NodeId, NodeHandle>,
    root: Option<NodeHandle>,
    detached: Vec<NodeHandle>,
    total_nodes: u64,
    admin_nodes: usize,
    revision: u64,
}

impl TreeState {
    fn new() -> Self {
        Self {
            arena: Arena::new(),
            index: HashMap::new(),
            root: None,
            detached: Vec::new(),
            total_nodes: 0,
            admin_nodes: 0,
            revision: 0,
        }
    }

    /// Structural root first, then detached roots in promotion order.
    fn tops(&self) -> impl Iterator<Item = NodeHandle> + '_ {
        self.root.into_iter().chain(self.detached.iter().copied())
    }
}

/// Concurrent identity tree.
#[derive(Debug)]
pub struct IdentityTree {
    state: Mutex<TreeState>,
    config: TreeConfig,
    quota: Arc<AdminQuota>,
}

impl IdentityTree {
    /// Create an empty tree drawing admin slots from `quota`.
    pub fn new(config: TreeConfig, quota: Arc<AdminQuota>) -> Self {
        Self {
            state: Mutex::new(TreeState::new()),
            config,
            quota,
        }
    }

    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    pub fn quota(&self) -> &Arc<AdminQuota> {
        &self.quota
    }

    fn state(&self) -> MutexGuard<'_, TreeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hold the tree lock across several read-only queries.
    pub fn lock(&self) -> LockedTree<'_> {
        LockedTree {
            tree: self,
            state: self.state(),
        }
    }

    // ── Mutation ──────────────────────────────────────────────────────────────

    /// Insert `account` as a member. See [`IdentityTree::insert_with_role`].
    pub fn insert(&self, account: &Account, parent_id: Option<&NodeId>) -> Result<NodeRef> {
        self.insert_with_role(account, parent_id, Role::Member)
    }

    /// Insert `account` under `parent_id`, or under the root when no parent
    /// is given. On an empty tree the node becomes the structural root,
    /// which always requests admin.
    ///
    /// An admin slot is taken only after every structural check passes. If
    /// the quota is exhausted the node is created as a member; the returned
    /// node's roles show what was granted.
    ///
    /// # Errors
    ///
    /// - `InvalidTopology` if the tree is empty and a parent was named, or
    ///   the identifier already exists.
    /// - `ParentNotFound` if the named parent is not in the tree.
    /// - `CapacityExceeded` if the parent already has `max_children` children.
    /// - `AllocationFailure` if storage cannot be reserved. The tree is left
    ///   unchanged in every error case.
    pub fn insert_with_role(
        &self,
        account: &Account,
        parent_id: Option<&NodeId>,
        role: Role,
    ) -> Result<NodeRef> {
        let mut state = self.state();

        let Some(root) = state.root else {
            if let Some(pid) = parent_id {
                return Err(PhantomError::InvalidTopology(format!(
                    "cannot specify parent {pid} for root node"
                )));
            }
            let roles = NodeRoles {
                is_root: true,
                is_admin: false,
                is_active: true,
            };
            let (handle, node) = self.attach(&mut state, account, None, roles, Role::Admin)?;
            state.root = Some(handle);
            log::debug!("created root {}", account.id.short());
            return Ok(node);
        };

        let parent = match parent_id {
            Some(pid) => self
                .locate(&state, pid)
                .ok_or_else(|| PhantomError::ParentNotFound(pid.to_string()))?,
            None => root,
        };

        let roles = NodeRoles {
            is_active: true,
            ..NodeRoles::default()
        };
        let node = self.attach_child(&mut state, account, parent, roles, role)?;
        log::debug!(
            "created {} ({})",
            account.id.short(),
            node.roles().label()
        );
        Ok(node)
    }

    /// Delete a node, redistributing its children.
    ///
    /// Each child moves to the deleted node's former parent while that
    /// parent has room, otherwise it becomes a detached root. Either way
    /// the child inherits the deleted node's admin flag, subject to the
    /// quota.
    ///
    /// # Errors
    ///
    /// - `NotFound` if no node has this identifier.
    /// - `RootHasChildren` if the node is root-flagged and has children.
    pub fn delete(&self, id: &NodeId) -> Result<()> {
        let mut state = self.state();

        let handle = self
            .locate(&state, id)
            .ok_or_else(|| PhantomError::NotFound(id.to_string()))?;
        let (roles, has_children) = {
            let entry = Self::entry(&state, handle)?;
            let roles = entry.node.roles();
            (roles, !entry.children.is_empty())
        };

        if roles.is_root && has_children {
            return Err(PhantomError::RootHasChildren(id.to_string()));
        }

        // Detach from the parent, preserving sibling order.
        let former_parent = Self::entry(&state, handle)?.parent;
        match former_parent {
            Some(parent) => {
                if let Some(entry) = state.arena.get_mut(parent) {
                    if let Some(pos) = entry.children.iter().position(|c| *c == handle) {
                        entry.children.remove(pos);
                    }
                }
            }
            None if state.root == Some(handle) => state.root = None,
            None => state.detached.retain(|h| *h != handle),
        }

        let removed = state
            .arena
            .remove(handle)
            .ok_or_else(|| PhantomError::NotFound(id.to_string()))?;
        state.index.remove(id);

        if roles.is_admin {
            self.quota.release();
            state.admin_nodes -= 1;
        }

        let mut moved = 0usize;
        let mut promoted = 0usize;
        for child in removed.children {
            self.inherit_admin(&mut state, child, roles.is_admin);

            let target = former_parent.filter(|p| {
                state
                    .arena
                    .get(*p)
                    .is_some_and(|e| e.children.len() < self.config.max_children)
            });

            match target {
                Some(parent) => {
                    if let Some(entry) = state.arena.get_mut(child) {
                        entry.parent = Some(parent);
                    }
                    if let Some(entry) = state.arena.get_mut(parent) {
                        entry.children.push(child);
                    }
                    moved += 1;
                }
                None => {
                    if let Some(entry) = state.arena.get_mut(child) {
                        entry.parent = None;
                        entry.node.lock_roles().is_root = true;
                    }
                    state.detached.push(child);
                    promoted += 1;
                }
            }
        }

        state.total_nodes -= 1;
        state.revision += 1;
        log::debug!(
            "deleted {} (re-parented {moved}, promoted {promoted})",
            id.short()
        );
        Ok(())
    }

    /// Set a node's liveness flag.
    pub fn set_active(&self, id: &NodeId, active: bool) -> Result<()> {
        let mut state = self.state();
        let handle = self
            .locate(&state, id)
            .ok_or_else(|| PhantomError::NotFound(id.to_string()))?;
        Self::entry(&state, handle)?.node.set_active(active);
        state.revision += 1;
        Ok(())
    }

    /// Place a node read back from a snapshot.
    ///
    /// A record without a parent fills the structural root slot if it is
    /// empty, otherwise it becomes a detached root. Parents are resolved
    /// through the identifier index; snapshot order guarantees they exist.
    pub(crate) fn restore(
        &self,
        account: &Account,
        parent_id: Option<&NodeId>,
        roles: NodeRoles,
    ) -> Result<NodeRef> {
        let mut state = self.state();
        let wanted = if roles.is_admin {
            Role::Admin
        } else {
            Role::Member
        };
        let granted = NodeRoles {
            is_admin: false,
            ..roles
        };

        let node = match parent_id {
            None => {
                let top = NodeRoles {
                    is_root: true,
                    ..granted
                };
                let (handle, node) = self.attach(&mut state, account, None, top, wanted)?;
                if state.root.is_none() {
                    state.root = Some(handle);
                } else {
                    state.detached.push(handle);
                }
                node
            }
            Some(pid) => {
                let parent = *state
                    .index
                    .get(pid)
                    .ok_or_else(|| PhantomError::ParentNotFound(pid.to_string()))?;
                self.attach_child(&mut state, account, parent, granted, wanted)?
            }
        };
        Ok(node)
    }

    // ── Queries ───────────────────────────────────────────────────────────────

    /// Breadth-first lookup by identifier.
    pub fn find(&self, id: &NodeId) -> Option<NodeRef> {
        let state = self.state();
        let handle = self.locate(&state, id)?;
        state.arena.get(handle).map(|e| Arc::clone(&e.node))
    }

    /// Owned description of one node.
    pub fn describe(&self, id: &NodeId) -> Option<NodeInfo> {
        let state = self.state();
        let handle = self.locate(&state, id)?;
        Self::info(&state, handle)
    }

    /// Identifiers of a node's children, in order.
    pub fn children(&self, id: &NodeId) -> Result<Vec<NodeId>> {
        let state = self.state();
        let handle = self
            .locate(&state, id)
            .ok_or_else(|| PhantomError::NotFound(id.to_string()))?;
        Ok(Self::entry(&state, handle)?
            .children
            .iter()
            .filter_map(|c| state.arena.get(*c))
            .map(|e| e.node.id().clone())
            .collect())
    }

    /// Identifiers from the node's parent up to the top of its subtree.
    pub fn ancestors(&self, id: &NodeId) -> Result<Vec<NodeId>> {
        let state = self.state();
        let handle = self
            .locate(&state, id)
            .ok_or_else(|| PhantomError::NotFound(id.to_string()))?;
        let mut chain = Vec::new();
        let mut current = Self::entry(&state, handle)?.parent;
        while let Some(h) = current {
            let entry = Self::entry(&state, h)?;
            chain.push(entry.node.id().clone());
            current = entry.parent;
        }
        Ok(chain)
    }

    /// Structural root followed by detached roots.
    pub fn roots(&self) -> Vec<NodeId> {
        let state = self.state();
        state
            .tops()
            .filter_map(|h| state.arena.get(h))
            .map(|e| e.node.id().clone())
            .collect()
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.state().index.contains_key(id)
    }

    /// Apply `visitor` to every reachable node.
    ///
    /// The visitor must not call back into this tree.
    pub fn traverse<F>(&self, order: TraversalOrder, visitor: F)
    where
        F: FnMut(&Visit<'_>),
    {
        self.lock().traverse(order, visitor);
    }

    pub fn size(&self) -> u64 {
        self.state().total_nodes
    }

    pub fn depth(&self) -> u64 {
        self.lock().depth()
    }

    pub fn has_root(&self) -> bool {
        self.state().root.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Number of admin-flagged nodes in this tree.
    pub fn admin_count(&self) -> usize {
        self.state().admin_nodes
    }

    /// Counter bumped by every successful mutation.
    pub fn revision(&self) -> u64 {
        self.state().revision
    }

    // ── Internal helpers ──────────────────────────────────────────────────────

    fn entry(state: &TreeState, handle: NodeHandle) -> Result<&arena::Entry> {
        state
            .arena
            .get(handle)
            .ok_or_else(|| PhantomError::NotFound("stale node handle".to_string()))
    }

    fn info(state: &TreeState, handle: NodeHandle) -> Option<NodeInfo> {
        let entry = state.arena.get(handle)?;
        let parent = entry
            .parent
            .and_then(|p| state.arena.get(p))
            .map(|p| p.node.id().clone());
        let mut depth = 0;
        let mut current = entry.parent;
        while let Some(h) = current {
            depth += 1;
            current = state.arena.get(h).and_then(|e| e.parent);
        }
        Some(NodeInfo {
            id: entry.node.id().clone(),
            parent,
            creation_time: entry.node.creation_time(),
            expiry_time: entry.node.expiry_time(),
            roles: entry.node.roles(),
            child_count: entry.children.len(),
            depth,
        })
    }

    /// Breadth-first search over the structural root, then detached roots.
    fn locate(&self, state: &TreeState, id: &NodeId) -> Option<NodeHandle> {
        let mut queue = VecDeque::with_capacity(self.config.queue_capacity);
        queue.extend(state.tops());
        while let Some(handle) = queue.pop_front() {
            let Some(entry) = state.arena.get(handle) else {
                continue;
            };
            if entry.node.id() == id {
                return Some(handle);
            }
            queue.extend(entry.children.iter().copied());
        }
        None
    }

    /// Check capacity and link a new child under `parent`.
    fn attach_child(
        &self,
        state: &mut TreeState,
        account: &Account,
        parent: NodeHandle,
        roles: NodeRoles,
        role: Role,
    ) -> Result<NodeRef> {
        let (parent_id, child_count) = {
            let entry = Self::entry(state, parent)?;
            (entry.node.id().clone(), entry.children.len())
        };
        if child_count >= self.config.max_children {
            return Err(PhantomError::CapacityExceeded {
                id: parent_id.to_string(),
                max_children: self.config.max_children,
            });
        }

        let (handle, node) = self.attach(state, account, Some(parent), roles, role)?;
        if let Some(entry) = state.arena.get_mut(parent) {
            entry.children.push(handle);
        }
        Ok(node)
    }

    /// Allocate and register a node. All fallible work happens before the
    /// tree is touched.
    fn attach(
        &self,
        state: &mut TreeState,
        account: &Account,
        parent: Option<NodeHandle>,
        mut roles: NodeRoles,
        role: Role,
    ) -> Result<(NodeHandle, NodeRef)> {
        if state.index.contains_key(&account.id) {
            return Err(PhantomError::InvalidTopology(format!(
                "duplicate identifier {}",
                account.id
            )));
        }
        state
            .index
            .try_reserve(1)
            .map_err(|e| PhantomError::AllocationFailure(format!("identifier index: {e}")))?;
        state.arena.reserve_one()?;

        if role == Role::Admin {
            if self.quota.try_acquire() {
                roles.is_admin = true;
            } else {
                log::warn!(
                    "admin quota exhausted ({}/{}); {} created without admin",
                    self.quota.current(),
                    self.quota.max(),
                    account.id.short()
                );
            }
        }

        let node = Arc::new(IdentityNode::new(account, roles));
        let entry = match Arena::new_entry(Arc::clone(&node), parent, self.config.max_children) {
            Ok(entry) => entry,
            Err(e) => {
                if roles.is_admin {
                    self.quota.release();
                }
                return Err(e);
            }
        };

        let handle = state.arena.insert(entry);
        state.index.insert(account.id.clone(), handle);
        state.total_nodes += 1;
        state.revision += 1;
        if roles.is_admin {
            state.admin_nodes += 1;
        }
        Ok((handle, node))
    }

    /// Give `child` the admin flag `inherit`, keeping the quota in step.
    fn inherit_admin(&self, state: &mut TreeState, child: NodeHandle, inherit: bool) {
        let Some(node) = state.arena.get(child).map(|e| Arc::clone(&e.node)) else {
            return;
        };
        let mut roles = node.lock_roles();
        if inherit && !roles.is_admin {
            if self.quota.try_acquire() {
                roles.is_admin = true;
                state.admin_nodes += 1;
            } else {
                log::warn!(
                    "admin quota exhausted; {} keeps member role",
                    node.id().short()
                );
            }
        } else if !inherit && roles.is_admin {
            roles.is_admin = false;
            self.quota.release();
            state.admin_nodes -= 1;
        }
    }
}

impl Default for IdentityTree {
    fn default() -> Self {
        let config = TreeConfig::default();
        Self::new(config, Arc::new(AdminQuota::new(config.max_admins)))
    }
}

impl Drop for IdentityTree {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        self.quota.release_many(state.admin_nodes);
        log::debug!(
            "releasing tree with {} nodes ({} arena entries)",
            state.total_nodes,
            state.arena.len()
        );
        state.arena.clear();
        state.index.clear();
        state.detached.clear();
        state.root = None;
    }
}

/// The tree lock held across several read-only queries.
///
/// Obtained from [`IdentityTree::lock`]. Snapshot saves hold one for the
/// whole encode-and-write so no mutation can interleave.
pub struct LockedTree<'a> {
    tree: &'a IdentityTree,
    state: MutexGuard<'a, TreeState>,
}

impl LockedTree<'_> {
    pub fn size(&self) -> u64 {
        self.state.total_nodes
    }

    pub fn has_root(&self) -> bool {
        self.state.root.is_some()
    }

    pub fn revision(&self) -> u64 {
        self.state.revision
    }

    /// Number of levels in the deepest reachable subtree.
    pub fn depth(&self) -> u64 {
        let mut deepest = 0usize;
        self.traverse(TraversalOrder::Dfs, |visit| {
            deepest = deepest.max(visit.depth + 1);
        });
        deepest as u64
    }

    /// Apply `visitor` to every reachable node in `order`.
    pub fn traverse<F>(&self, order: TraversalOrder, mut visitor: F)
    where
        F: FnMut(&Visit<'_>),
    {
        let state = &*self.state;
        match order {
            TraversalOrder::Bfs => {
                let mut queue = VecDeque::with_capacity(self.tree.config.queue_capacity);
                queue.extend(state.tops().map(|h| (h, 0usize)));
                while let Some((handle, depth)) = queue.pop_front() {
                    let Some(entry) = state.arena.get(handle) else {
                        continue;
                    };
                    Self::visit(state, entry, depth, &mut visitor);
                    queue.extend(entry.children.iter().map(|c| (*c, depth + 1)));
                }
            }
            TraversalOrder::Dfs => {
                let mut stack: Vec<(NodeHandle, usize)> =
                    state.tops().map(|h| (h, 0usize)).collect();
                stack.reverse();
                while let Some((handle, depth)) = stack.pop() {
                    let Some(entry) = state.arena.get(handle) else {
                        continue;
                    };
                    Self::visit(state, entry, depth, &mut visitor);
                    stack.extend(entry.children.iter().rev().map(|c| (*c, depth + 1)));
                }
            }
        }
    }

    fn visit<F>(state: &TreeState, entry: &arena::Entry, depth: usize, visitor: &mut F)
    where
        F: FnMut(&Visit<'_>),
    {
        let parent = entry
            .parent
            .and_then(|p| state.arena.get(p))
            .map(|p| p.node.id());
        let roles = entry.node.lock_roles();
        visitor(&Visit {
            node: &entry.node,
            roles: *roles,
            parent,
            depth,
            child_count: entry.children.len(),
        });
        drop(roles);
    }
}
