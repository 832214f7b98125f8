//! Identity payloads — node identifiers and account fields.
//!
//! The identity module provides the `NodeId` newtype and the `Account`
//! payload that the tree stores in each node.

pub mod account;

pub use account::{Account, NodeId, NODE_ID_LEN};
