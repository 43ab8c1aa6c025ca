//! # Subtree: Child Reconciliation
//!
//! Each render pass moves the children it requests from the previous pass's
//! `active` list into `staging`, creating new entries for anything not found.
//! Committing swaps the lists; whatever was never claimed is returned so the
//! caller can tear it down.

use workflow_core::{TreeSnapshot, WorkflowNodeId};

use crate::arena::NodeHandle;
use crate::tasks::OutputHandler;

/// The previous pass's entries (`active`) and the current pass's (`staging`).
pub(crate) struct ActiveStagingList<T> {
    active: Vec<T>,
    staging: Vec<T>,
}

impl<T> Default for ActiveStagingList<T> {
    fn default() -> Self {
        Self {
            active: Vec::new(),
            staging: Vec::new(),
        }
    }
}

impl<T> ActiveStagingList<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the first active entry matching `predicate` into staging.
    pub fn claim(&mut self, predicate: impl FnMut(&T) -> bool) -> Option<&mut T> {
        let index = self.active.iter().position(predicate)?;
        let entry = self.active.remove(index);
        Some(self.stage(entry))
    }

    /// Claim a matching entry or stage a freshly created one.
    pub fn retain_or_create(
        &mut self,
        predicate: impl FnMut(&T) -> bool,
        create: impl FnOnce() -> T,
    ) -> &mut T {
        match self.active.iter().position(predicate) {
            Some(index) => {
                let entry = self.active.remove(index);
                self.stage(entry)
            }
            None => self.stage(create()),
        }
    }

    pub fn stage(&mut self, entry: T) -> &mut T {
        self.staging.push(entry);
        let last = self.staging.len() - 1;
        &mut self.staging[last]
    }

    pub fn staging_contains(&self, predicate: impl FnMut(&T) -> bool) -> bool {
        self.staging.iter().any(predicate)
    }

    /// Promote staging to active and return the unclaimed leftovers.
    pub fn commit_staging(&mut self) -> Vec<T> {
        std::mem::replace(&mut self.active, std::mem::take(&mut self.staging))
    }

    /// Everything in both lists, for teardown.
    pub fn drain_all(&mut self) -> Vec<T> {
        let mut all = std::mem::take(&mut self.active);
        all.append(&mut self.staging);
        all
    }

    pub fn active(&self) -> &[T] {
        &self.active
    }

    pub fn active_mut(&mut self) -> &mut [T] {
        &mut self.active
    }
}

pub(crate) struct ChildEntry<P, S, O> {
    pub id: WorkflowNodeId,
    pub handle: NodeHandle,
    pub handler: OutputHandler<P, S, O>,
}

/// A node's children plus the snapshot fragments restored for them.
pub(crate) struct SubtreeManager<P, S, O> {
    pub children: ActiveStagingList<ChildEntry<P, S, O>>,
    snapshot_cache: Vec<(WorkflowNodeId, TreeSnapshot)>,
}

impl<P, S, O> SubtreeManager<P, S, O> {
    pub fn new(restored: Vec<(WorkflowNodeId, TreeSnapshot)>) -> Self {
        Self {
            children: ActiveStagingList::new(),
            snapshot_cache: restored,
        }
    }

    pub fn is_staged(&self, id: &WorkflowNodeId) -> bool {
        self.children.staging_contains(|entry| entry.id == *id)
    }

    /// Claim the previous pass's child with this id, if its node can still
    /// serve the requested workflow type.
    pub fn claim(
        &mut self,
        id: &WorkflowNodeId,
        mut is_compatible: impl FnMut(NodeHandle) -> bool,
    ) -> Option<&mut ChildEntry<P, S, O>> {
        self.children
            .claim(|entry| entry.id == *id && is_compatible(entry.handle))
    }

    /// Take the restored fragment for a newly created child.
    pub fn take_fragment(&mut self, id: &WorkflowNodeId) -> Option<TreeSnapshot> {
        let index = self.snapshot_cache.iter().position(|(key, _)| key == id)?;
        Some(self.snapshot_cache.remove(index).1)
    }

    /// Commit the pass. Fragments nobody claimed during the first pass are
    /// stale (renamed or removed children) and are dropped.
    pub fn commit(&mut self) -> Vec<ChildEntry<P, S, O>> {
        for (id, _) in self.snapshot_cache.drain(..) {
            tracing::debug!(child = %id, "Discarding unclaimed snapshot fragment");
        }
        self.children.commit_staging()
    }

    pub fn find_handler(&self, child: NodeHandle) -> Option<&OutputHandler<P, S, O>> {
        self.children
            .active()
            .iter()
            .find(|entry| entry.handle == child)
            .map(|entry| &entry.handler)
    }
}
