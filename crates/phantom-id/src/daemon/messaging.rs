//! Best-effort messaging between accounts.
//!
//! Both ends must be in the tree. Delivery is a log record; nothing is
//! queued or persisted.

use serde::Serialize;

use crate::error::{PhantomError, Result};
use crate::identity::NodeId;
use crate::time;
use crate::tree::{IdentityTree, TraversalOrder};

/// A message accepted for delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub from: NodeId,
    pub to: NodeId,
    pub content: String,
    pub sent_at: i64,
}

/// Send `content` from one account to another.
///
/// # Errors
///
/// Returns `PhantomError::NotFound` naming whichever end is missing.
pub fn send(tree: &IdentityTree, from: &NodeId, to: &NodeId, content: &str) -> Result<Message> {
    for id in [from, to] {
        if tree.find(id).is_none() {
            return Err(PhantomError::NotFound(id.to_string()));
        }
    }
    let message = Message {
        from: from.clone(),
        to: to.clone(),
        content: content.to_string(),
        sent_at: time::now_secs(),
    };
    log::info!("message from {} to {}: {}", from, to, message.content);
    Ok(message)
}

/// Send `content` from `from` to every other reachable account.
/// Returns the number of recipients.
pub fn broadcast(tree: &IdentityTree, from: &NodeId, content: &str) -> Result<usize> {
    if tree.find(from).is_none() {
        return Err(PhantomError::NotFound(from.to_string()));
    }
    let mut recipients = Vec::new();
    tree.traverse(TraversalOrder::Bfs, |visit| {
        if visit.id() != from {
            recipients.push(visit.id().clone());
        }
    });
    for to in &recipients {
        log::info!("message from {from} to {to}: {content}");
    }
    Ok(recipients.len())
}
