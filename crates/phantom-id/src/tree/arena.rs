//! Slot arena holding node entries and their structural links.
//!
//! Parent and child links are generational handles into the arena, so a
//! stale handle to a freed slot resolves to `None` instead of to whatever
//! node reuses the slot.

use crate::error::{PhantomError, Result};

use super::node::NodeRef;

/// Index of a live entry in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct NodeHandle {
    index: u32,
    generation: u32,
}

/// A node plus its links. Only reachable through the tree lock.
#[derive(Debug)]
pub(crate) struct Entry {
    pub node: NodeRef,
    pub parent: Option<NodeHandle>,
    /// Reserved to `max_children` up front; pushes never reallocate.
    pub children: Vec<NodeHandle>,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

#[derive(Debug, Default)]
pub(crate) struct Arena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    len: usize,
}

impl Arena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an entry whose child list can hold `max_children` without
    /// further allocation.
    pub fn new_entry(node: NodeRef, parent: Option<NodeHandle>, max_children: usize) -> Result<Entry> {
        let mut children = Vec::new();
        children
            .try_reserve_exact(max_children)
            .map_err(|e| PhantomError::AllocationFailure(format!("children array: {e}")))?;
        Ok(Entry {
            node,
            parent,
            children,
        })
    }

    /// Make sure the next `insert` cannot allocate.
    pub fn reserve_one(&mut self) -> Result<()> {
        if self.free.is_empty() {
            if self.slots.len() >= u32::MAX as usize {
                return Err(PhantomError::AllocationFailure("arena index space exhausted".into()));
            }
            self.slots
                .try_reserve(1)
                .map_err(|e| PhantomError::AllocationFailure(format!("arena slot: {e}")))?;
        }
        Ok(())
    }

    /// Store an entry. Call `reserve_one` first to make this infallible.
    pub fn insert(&mut self, entry: Entry) -> NodeHandle {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.entry = Some(entry);
            return NodeHandle {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            entry: Some(entry),
        });
        NodeHandle {
            index,
            generation: 0,
        }
    }

    /// Take an entry out, retiring its handle.
    pub fn remove(&mut self, handle: NodeHandle) -> Option<Entry> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let entry = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.len -= 1;
        Some(entry)
    }

    pub fn get(&self, handle: NodeHandle) -> Option<&Entry> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.entry.as_ref())
    }

    pub fn get_mut(&mut self, handle: NodeHandle) -> Option<&mut Entry> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.entry.as_mut())
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Drop every entry. The slot vector is flat, so this never recurses.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.len = 0;
    }
}
