//! User history — a bounded log of accounts entering and leaving.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

/// Thread-safe, optionally disabled history log. Oldest entries are
/// evicted once `max_entries` is reached.
#[derive(Debug)]
pub struct History {
    enabled: bool,
    max_entries: usize,
    entries: Mutex<VecDeque<String>>,
}

impl History {
    pub fn new(enabled: bool, max_entries: usize) -> Self {
        Self {
            enabled,
            max_entries,
            entries: Mutex::new(VecDeque::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn user_entered(&self, id: &str) {
        self.add(format!("User {id} has entered."));
    }

    pub fn user_left(&self, id: &str) {
        self.add(format!("User {id} has left."));
    }

    /// Append an entry. No-op when disabled.
    pub fn add(&self, entry: String) {
        if !self.enabled || self.max_entries == 0 {
            return;
        }
        log::info!("notify: {entry}");
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        while entries.len() >= self.max_entries {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Copy of the entries, oldest first.
    pub fn entries(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// `User History:` followed by one line per entry.
    pub fn render(&self) -> String {
        let mut out = String::from("User History:");
        for entry in self.entries() {
            out.push('\n');
            out.push_str(&entry);
        }
        out
    }
}
