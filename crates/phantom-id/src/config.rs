//! Daemon configuration.
//!
//! Every field has a default so a config file only needs to name what it
//! changes. Files are JSON:
//!
//! ```json
//! {
//!     "network": { "port": 9000 },
//!     "state": { "path": "/var/lib/phantomid/phantom.state", "history_enabled": true },
//!     "tree": { "max_admins": 3 }
//! }
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PhantomError, Result};

/// Default TCP port for the command channel.
pub const DEFAULT_PORT: u16 = 8888;

/// Default number of children a node may hold.
pub const DEFAULT_MAX_CHILDREN: usize = 10;

/// Default pre-sized capacity of the traversal work queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Default auto-save interval.
pub const DEFAULT_SAVE_INTERVAL_SECS: u64 = 300;

/// Largest accepted command line, in bytes.
pub const DEFAULT_MAX_LINE_BYTES: usize = 4096;

/// Upper bound accepted for `network.max_connections`.
pub const MAX_CONNECTIONS_LIMIT: usize = 1 << 20;

/// Top-level daemon configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub network: NetworkConfig,
    pub state: StateConfig,
    pub tree: TreeConfig,
}

/// Command channel settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub bind_address: String,
    pub port: u16,
    /// Connections beyond this are accepted and immediately closed.
    pub max_connections: usize,
    /// Base timeout; an idle connection is dropped after 60 of these.
    pub timeout_ms: u64,
    pub max_line_bytes: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            max_connections: 1000,
            timeout_ms: 1000,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }
}

impl NetworkConfig {
    /// `bind_address:port`.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }

    /// How long a connection may stay silent before it is closed.
    pub fn idle_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.timeout_ms.saturating_mul(60))
    }
}

/// Persistence and history settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    pub auto_save: bool,
    pub save_interval_secs: u64,
    pub path: PathBuf,
    pub history_enabled: bool,
    pub max_history: usize,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            auto_save: true,
            save_interval_secs: DEFAULT_SAVE_INTERVAL_SECS,
            path: PathBuf::from("state").join("phantom.state"),
            history_enabled: false,
            max_history: 1000,
        }
    }
}

/// Shape limits for the identity tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeConfig {
    pub max_children: usize,
    pub queue_capacity: usize,
    pub max_admins: usize,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            max_children: DEFAULT_MAX_CHILDREN,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_admins: crate::quota::DEFAULT_MAX_ADMINS,
        }
    }
}

impl DaemonConfig {
    /// Read a JSON config file. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns `PhantomError::Io` if the file cannot be read and
    /// `PhantomError::Config` if it does not parse or fails validation.
    pub fn from_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let config: Self = serde_json::from_slice(&bytes).map_err(|e| {
            PhantomError::Config(format!("failed to parse {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check limits that would make the daemon unusable.
    pub fn validate(&self) -> Result<()> {
        if self.tree.max_children == 0 {
            return Err(PhantomError::Config("tree.max_children must be > 0".into()));
        }
        if self.tree.queue_capacity == 0 {
            return Err(PhantomError::Config("tree.queue_capacity must be > 0".into()));
        }
        if self.state.auto_save && self.state.save_interval_secs == 0 {
            return Err(PhantomError::Config(
                "state.save_interval_secs must be > 0 when auto_save is on".into(),
            ));
        }
        if self.network.max_connections == 0
            || self.network.max_connections > MAX_CONNECTIONS_LIMIT
        {
            return Err(PhantomError::Config(format!(
                "network.max_connections must be between 1 and {MAX_CONNECTIONS_LIMIT}"
            )));
        }
        if self.network.timeout_ms == 0 {
            return Err(PhantomError::Config("network.timeout_ms must be > 0".into()));
        }
        if self.network.max_line_bytes == 0 {
            return Err(PhantomError::Config("network.max_line_bytes must be > 0".into()));
        }
        Ok(())
    }
}
