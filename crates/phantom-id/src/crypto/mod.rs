//! Cryptographic primitives for PhantomID.
//!
//! This module provides:
//! - Cryptographically secure random seed generation
//! - The digest provider that turns a seed into a 256-bit node fingerprint

pub mod digest;
pub mod random;

pub use digest::{DigestProvider, Sha256Digest};
