//! Slot arena for node graphs.
//!
//! Text and tree nodes are addressed from two independent indexes at once, so
//! neither index may own them. Nodes live here; every link (position tree,
//! identity chain, parent/children) is a `NodeIdx` into the arena. Physical
//! removal is two-phase: callers unlink a slot from every index, then `free` it.

use std::fmt;

/// Index of a slot in an `Arena`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeIdx(u32);

impl NodeIdx {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeIdx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A `Vec`-backed arena with a free list for slot reuse.
///
/// `get`/`get_mut` return `None` for a freed slot. `arena[idx]` is for
/// links the engine keeps live and panics on a freed slot.
#[derive(Clone, Debug)]
pub struct Arena<T> {
    slots: Vec<Option<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Arena {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    /// Store a value, reusing a freed slot when one is available.
    pub fn alloc(&mut self, value: T) -> NodeIdx {
        self.len += 1;
        if let Some(slot) = self.free.pop() {
            self.slots[slot as usize] = Some(value);
            return NodeIdx(slot);
        }
        self.slots.push(Some(value));
        NodeIdx((self.slots.len() - 1) as u32)
    }

    /// Release a slot. The caller must already have unlinked it everywhere.
    pub fn free(&mut self, idx: NodeIdx) -> Option<T> {
        let value = self.slots.get_mut(idx.index())?.take()?;
        self.free.push(idx.0);
        self.len -= 1;
        Some(value)
    }

    pub fn get(&self, idx: NodeIdx) -> Option<&T> {
        self.slots.get(idx.index()).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, idx: NodeIdx) -> Option<&mut T> {
        self.slots.get_mut(idx.index()).and_then(Option::as_mut)
    }

    pub fn contains(&self, idx: NodeIdx) -> bool {
        self.get(idx).is_some()
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Highest slot index ever handed out, plus one.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeIdx, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|v| (NodeIdx(i as u32), v)))
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// # Panics
///
/// Panics if `idx` was freed. Links into freed slots are an engine bug.
impl<T> std::ops::Index<NodeIdx> for Arena<T> {
    type Output = T;

    fn index(&self, idx: NodeIdx) -> &T {
        match self.get(idx) {
            Some(value) => value,
            None => panic!("dangling arena slot {}", idx),
        }
    }
}

/// # Panics
///
/// Panics if `idx` was freed.
impl<T> std::ops::IndexMut<NodeIdx> for Arena<T> {
    fn index_mut(&mut self, idx: NodeIdx) -> &mut T {
        match self.get_mut(idx) {
            Some(value) => value,
            None => panic!("dangling arena slot {}", idx),
        }
    }
}
