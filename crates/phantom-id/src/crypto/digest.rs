//! Digest provider — seed generation and node fingerprints.
//!
//! A node identifier is the lowercase hex SHA-256 of a 32-byte random
//! seed. The provider is a trait so the tree can be driven with
//! deterministic identifiers in tests and benchmarks.

use sha2::{Digest, Sha256};

use crate::identity::NodeId;

/// Source of account seeds and their 256-bit fingerprints.
pub trait DigestProvider: Send + Sync {
    /// Produce a fresh 32-byte seed.
    fn seed(&self) -> [u8; 32];

    /// Derive the identifier for a seed.
    fn fingerprint(&self, seed: &[u8; 32]) -> NodeId;
}

/// Default provider: OS randomness and SHA-256.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sha256Digest;

impl DigestProvider for Sha256Digest {
    fn seed(&self) -> [u8; 32] {
        super::random::account_seed()
    }

    fn fingerprint(&self, seed: &[u8; 32]) -> NodeId {
        let hash = Sha256::digest(seed);
        NodeId::from_digest(hash.into())
    }
}
