//! Daemon facade — the state a running PhantomID daemon serves.
//!
//! [`Registry`] owns one identity tree, the admin quota it draws from,
//! the user history, and the snapshot store. Front ends hand it command
//! lines through [`Registry::execute`] and get the response text back.
//!
//! # Responses
//!
//! Every response is one or more non-empty lines. Failures render as
//! `Failed to <action>: <error>`. When history is enabled, responses to
//! `create`, `delete`, and `list` end with the history block.

pub mod command;
pub mod history;
pub mod messaging;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::config::DaemonConfig;
use crate::crypto::{DigestProvider, Sha256Digest};
use crate::error::{PhantomError, Result};
use crate::identity::{Account, NodeId};
use crate::quota::AdminQuota;
use crate::storage::SnapshotStore;
use crate::time;
use crate::tree::{IdentityTree, NodeInfo, NodeRef, Role, TraversalOrder};

pub use command::{Command, USAGE};
pub use history::History;
pub use messaging::Message;

/// Tree summary reported by `status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Status {
    pub nodes: u64,
    pub depth: u64,
    pub has_root: bool,
    pub admins: usize,
    pub max_admins: usize,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Nodes: {}\nDepth: {}\nRoot: {}\nAdmins: {}/{}",
            self.nodes,
            self.depth,
            if self.has_root { "Present" } else { "None" },
            self.admins,
            self.max_admins
        )
    }
}

/// The daemon's shared state. `Send + Sync`; share it with `Arc`.
pub struct Registry {
    config: DaemonConfig,
    tree: IdentityTree,
    quota: Arc<AdminQuota>,
    digest: Box<dyn DigestProvider>,
    history: History,
    store: SnapshotStore,
    saved_revision: AtomicU64,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("config", &self.config)
            .field("tree", &self.tree)
            .field("history", &self.history)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl Registry {
    /// A registry with an empty tree.
    ///
    /// # Errors
    ///
    /// Returns `PhantomError::Config` if the configuration is unusable.
    pub fn new(config: DaemonConfig) -> Result<Self> {
        config.validate()?;
        let quota = Arc::new(AdminQuota::new(config.tree.max_admins));
        let tree = IdentityTree::new(config.tree, Arc::clone(&quota));
        Ok(Self::assemble(config, tree, quota))
    }

    /// A registry restored from the configured state file, or empty if
    /// there is no state file yet.
    ///
    /// # Errors
    ///
    /// Returns the load error if the state file exists but cannot be read
    /// back; the caller decides whether to start fresh instead.
    pub fn open(config: DaemonConfig) -> Result<Self> {
        config.validate()?;
        let store = SnapshotStore::new(&config.state.path);
        if !store.exists() {
            log::info!(
                "no state file at {}, starting empty",
                store.path().display()
            );
            return Self::new(config);
        }
        let quota = Arc::new(AdminQuota::new(config.tree.max_admins));
        let tree = store.load(config.tree, Arc::clone(&quota))?;
        Ok(Self::assemble(config, tree, quota))
    }

    fn assemble(config: DaemonConfig, tree: IdentityTree, quota: Arc<AdminQuota>) -> Self {
        let history = History::new(config.state.history_enabled, config.state.max_history);
        let store = SnapshotStore::new(&config.state.path);
        let saved_revision = AtomicU64::new(tree.revision());
        Self {
            config,
            tree,
            quota,
            digest: Box::new(Sha256Digest),
            history,
            store,
            saved_revision,
        }
    }

    /// Replace the identifier source.
    pub fn with_digest(mut self, digest: Box<dyn DigestProvider>) -> Self {
        self.digest = digest;
        self
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    pub fn tree(&self) -> &IdentityTree {
        &self.tree
    }

    pub fn quota(&self) -> &Arc<AdminQuota> {
        &self.quota
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    // ── Operations ────────────────────────────────────────────────────────────

    /// Create an account under `parent`, or under the root.
    ///
    /// Admin is requested while the quota has room; placement is never
    /// affected by the role.
    pub fn create(&self, parent: Option<&NodeId>) -> Result<NodeRef> {
        let account = Account::generate(self.digest.as_ref());
        let role = if self.quota.has_headroom() {
            Role::Admin
        } else {
            Role::Member
        };
        let node = self.tree.insert_with_role(&account, parent, role)?;
        self.history.user_entered(node.id().as_str());
        Ok(node)
    }

    pub fn delete(&self, id: &NodeId) -> Result<()> {
        self.tree.delete(id)?;
        self.history.user_left(id.as_str());
        Ok(())
    }

    pub fn find(&self, id: &NodeId) -> Result<NodeInfo> {
        self.tree
            .describe(id)
            .ok_or_else(|| PhantomError::NotFound(id.to_string()))
    }

    pub fn send_message(&self, from: &NodeId, to: &NodeId, content: &str) -> Result<Message> {
        messaging::send(&self.tree, from, to, content)
    }

    pub fn broadcast(&self, from: &NodeId, content: &str) -> Result<usize> {
        messaging::broadcast(&self.tree, from, content)
    }

    pub fn status(&self) -> Status {
        let locked = self.tree.lock();
        Status {
            nodes: locked.size(),
            depth: locked.depth(),
            has_root: locked.has_root(),
            admins: self.quota.current(),
            max_admins: self.quota.max(),
        }
    }

    /// Write a snapshot now. Returns the number of nodes saved.
    pub fn save(&self) -> Result<u64> {
        let revision = self.tree.revision();
        let count = self.store.save(&self.tree)?;
        self.saved_revision.fetch_max(revision, Ordering::AcqRel);
        Ok(count)
    }

    /// Whether the tree changed since the last successful save or load.
    pub fn is_dirty(&self) -> bool {
        self.tree.revision() != self.saved_revision.load(Ordering::Acquire)
    }

    /// Save only if the tree changed. Returns the node count when saved.
    pub fn save_if_dirty(&self) -> Result<Option<u64>> {
        if !self.is_dirty() {
            return Ok(None);
        }
        self.save().map(Some)
    }

    /// One `- ID: <id> | Role: <role>` line per node; DFS indents by depth.
    pub fn list(&self, order: TraversalOrder) -> Vec<String> {
        let mut lines = Vec::new();
        self.tree.traverse(order, |visit| {
            let indent = match order {
                TraversalOrder::Bfs => String::new(),
                TraversalOrder::Dfs => "  ".repeat(visit.depth),
            };
            lines.push(format!(
                "{indent}- ID: {} | Role: {}",
                visit.id(),
                visit.roles.label()
            ));
        });
        lines
    }

    // ── Command dispatch ──────────────────────────────────────────────────────

    /// Run one protocol line and render the response.
    pub fn execute(&self, line: &str) -> String {
        let command = match line.parse::<Command>() {
            Ok(command) => command,
            Err(PhantomError::InvalidCommand(reason)) => {
                return format!("{reason}\n{USAGE}");
            }
            Err(e) => return format!("Failed to parse command: {e}"),
        };

        match command {
            Command::Create { parent } => {
                let text = match self.create(parent.as_ref()) {
                    Ok(node) => format!(
                        "Account created:\nID: {}\nRole: {}",
                        node.id(),
                        if node.roles().is_admin { "Admin" } else { "Child" }
                    ),
                    Err(e) => format!("Failed to create account: {e}"),
                };
                self.with_history(text)
            }
            Command::Delete(id) => {
                let text = match self.delete(&id) {
                    Ok(()) => format!("Deleted {id}"),
                    Err(e) => format!("Failed to delete account: {e}"),
                };
                self.with_history(text)
            }
            Command::Find(id) => match self.find(&id) {
                Ok(info) => render_info(&info),
                Err(e) => format!("Failed to find account: {e}"),
            },
            Command::List(order) => {
                let lines = self.list(order);
                let text = if lines.is_empty() {
                    "No accounts".to_string()
                } else {
                    lines.join("\n")
                };
                self.with_history(text)
            }
            Command::Msg { from, to, message } => {
                match self.send_message(&from, &to, &message) {
                    Ok(_) => format!("Message sent successfully from {from} to {to}"),
                    Err(e) => format!("Failed to send message: {e}"),
                }
            }
            Command::Broadcast { from, message } => match self.broadcast(&from, &message) {
                Ok(n) => format!("Message broadcast from {from} to {n} recipients"),
                Err(e) => format!("Failed to broadcast message: {e}"),
            },
            Command::Status => self.status().to_string(),
            Command::Save => match self.save() {
                Ok(n) => format!("Saved {n} nodes to {}", self.store.path().display()),
                Err(e) => format!("Failed to save state: {e}"),
            },
            Command::History => {
                if self.history.is_enabled() {
                    self.history.render()
                } else {
                    "History is disabled".to_string()
                }
            }
            Command::Help => USAGE.to_string(),
        }
    }

    fn with_history(&self, text: String) -> String {
        if self.history.is_enabled() {
            format!("{text}\n{}", self.history.render())
        } else {
            text
        }
    }
}

fn render_info(info: &NodeInfo) -> String {
    format!(
        "ID: {}\nRole: {}\nParent: {}\nChildren: {}\nDepth: {}\nActive: {}\nCreated: {}\nExpires: {}",
        info.id,
        info.roles.label(),
        info.parent
            .as_ref()
            .map_or_else(|| "None".to_string(), |p| p.to_string()),
        info.child_count,
        info.depth,
        if info.roles.is_active { "yes" } else { "no" },
        time::secs_to_datetime(info.creation_time),
        time::secs_to_datetime(info.expiry_time),
    )
}
