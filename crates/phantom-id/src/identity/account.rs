//! Account payload — the anonymous identity carried by a tree node.
//!
//! An account is keyed by the fingerprint of a random seed. The seed
//! itself never leaves the process and is zeroized on drop.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::crypto::DigestProvider;
use crate::error::{PhantomError, Result};
use crate::time::{now_secs, ACCOUNT_LIFETIME_SECS};

/// Length of a node identifier in hex characters.
pub const NODE_ID_LEN: usize = 64;

/// Unique identifier for a node.
///
/// Format: 64 lowercase hex characters (a 256-bit digest).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeId(String);

impl NodeId {
    /// Build an identifier from a raw 32-byte digest.
    pub fn from_digest(digest: [u8; 32]) -> Self {
        Self(hex::encode(digest))
    }

    /// Parse and validate an identifier.
    ///
    /// # Errors
    ///
    /// Returns `PhantomError::InvalidId` unless `s` is exactly 64 lowercase
    /// hex characters.
    pub fn parse(s: &str) -> Result<Self> {
        let valid = s.len() == NODE_ID_LEN
            && s
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if !valid {
            return Err(PhantomError::InvalidId(format!(
                "expected {NODE_ID_LEN} lowercase hex characters, got {:?}",
                s
            )));
        }
        Ok(Self(s.to_string()))
    }

    /// Borrow the identifier text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Raw identifier bytes (the ASCII hex text).
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// First 12 characters, for compact log lines.
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NodeId {
    type Err = PhantomError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for NodeId {
    type Error = PhantomError;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<NodeId> for String {
    fn from(id: NodeId) -> Self {
        id.0
    }
}

impl AsRef<str> for NodeId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Identity fields handed to the tree on insert.
pub struct Account {
    /// Fingerprint of the seed.
    pub id: NodeId,
    /// Secret seed. All zeros for accounts rebuilt from a snapshot.
    seed: [u8; 32],
    /// Creation timestamp (seconds since Unix epoch).
    pub creation_time: i64,
    /// Expiry timestamp (seconds since Unix epoch).
    pub expiry_time: i64,
}

impl Account {
    /// Create a new account with a fresh seed from `digest`.
    pub fn generate(digest: &dyn DigestProvider) -> Self {
        let seed = digest.seed();
        let id = digest.fingerprint(&seed);
        let creation_time = now_secs();
        Self {
            id,
            seed,
            creation_time,
            expiry_time: creation_time + ACCOUNT_LIFETIME_SECS,
        }
    }

    /// Rebuild an account from persisted fields. The seed is not persisted.
    pub fn restore(id: NodeId, creation_time: i64) -> Self {
        Self {
            id,
            seed: [0u8; 32],
            creation_time,
            expiry_time: creation_time + ACCOUNT_LIFETIME_SECS,
        }
    }

    /// Whether the account has passed its expiry time at `now`.
    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expiry_time
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("id", &self.id)
            .field("creation_time", &self.creation_time)
            .field("expiry_time", &self.expiry_time)
            .finish_non_exhaustive()
    }
}

impl Drop for Account {
    fn drop(&mut self) {
        self.seed.zeroize();
    }
}
