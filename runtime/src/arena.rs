//! Generational storage for the node tree.
//!
//! Nodes refer to their parent and children by [`NodeHandle`] rather than by
//! pointer. Torn-down slots are recycled through a free list and their
//! generation bumped, so a handle held by a stale sink or worker message can
//! never reach the node that later reuses the slot.

use std::fmt;

use crate::node::ErasedNode;

/// A handle to a node in a [`NodeStore`].
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeHandle {
    idx: u32,
    generation: u32,
}

impl NodeHandle {
    pub fn index(self) -> u32 {
        self.idx
    }

    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeHandle({}@gen{})", self.idx, self.generation)
    }
}

enum Slot<T> {
    Vacant,
    /// Reserved for a node that is being built or is currently rendering.
    CheckedOut,
    Occupied(T),
}

pub(crate) type NodeStore = Arena<Box<dyn ErasedNode>>;

pub(crate) struct Arena<T> {
    slots: Vec<Slot<T>>,
    generation: Vec<u32>,
    free_list: Vec<u32>,
    live: usize,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            generation: Vec::new(),
            free_list: Vec::new(),
            live: 0,
        }
    }
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a slot. The node is installed later with [`Arena::put_back`].
    pub fn reserve(&mut self) -> NodeHandle {
        self.live += 1;
        if let Some(idx) = self.free_list.pop() {
            self.slots[idx as usize] = Slot::CheckedOut;
            return NodeHandle {
                idx,
                generation: self.generation[idx as usize],
            };
        }
        let idx = u32::try_from(self.slots.len()).unwrap_or(u32::MAX);
        self.slots.push(Slot::CheckedOut);
        self.generation.push(0);
        NodeHandle { idx, generation: 0 }
    }

    pub fn contains(&self, handle: NodeHandle) -> bool {
        self.is_current(handle) && !matches!(self.slots[handle.idx as usize], Slot::Vacant)
    }

    pub fn get(&self, handle: NodeHandle) -> Option<&T> {
        if !self.is_current(handle) {
            return None;
        }
        match &self.slots[handle.idx as usize] {
            Slot::Occupied(node) => Some(node),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, handle: NodeHandle) -> Option<&mut T> {
        if !self.is_current(handle) {
            return None;
        }
        match &mut self.slots[handle.idx as usize] {
            Slot::Occupied(node) => Some(node),
            _ => None,
        }
    }

    /// Check a node out for rendering, leaving its slot reserved.
    pub fn take(&mut self, handle: NodeHandle) -> Option<T> {
        if !self.is_current(handle) {
            return None;
        }
        let slot = &mut self.slots[handle.idx as usize];
        match std::mem::replace(slot, Slot::CheckedOut) {
            Slot::Occupied(node) => Some(node),
            other => {
                *slot = other;
                None
            }
        }
    }

    /// Return a checked-out node. Ignored if the slot was freed meanwhile.
    pub fn put_back(&mut self, handle: NodeHandle, node: T) {
        if !self.is_current(handle) {
            return;
        }
        let slot = &mut self.slots[handle.idx as usize];
        if matches!(slot, Slot::CheckedOut) {
            *slot = Slot::Occupied(node);
        }
    }

    /// Free the slot and invalidate every outstanding handle to it.
    pub fn remove(&mut self, handle: NodeHandle) -> Option<T> {
        if !self.contains(handle) {
            return None;
        }
        let idx = handle.idx as usize;
        let previous = std::mem::replace(&mut self.slots[idx], Slot::Vacant);
        self.generation[idx] = self.generation[idx].wrapping_add(1);
        self.free_list.push(handle.idx);
        self.live -= 1;
        match previous {
            Slot::Occupied(node) => Some(node),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    fn is_current(&self, handle: NodeHandle) -> bool {
        self.generation
            .get(handle.idx as usize)
            .is_some_and(|generation| *generation == handle.generation)
    }
}
