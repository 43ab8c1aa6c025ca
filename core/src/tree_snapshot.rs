//! Snapshot of a whole node tree.
//!
//! Layout (big-endian, depth-first):
//!
//! ```text
//! [i32 len][workflow snapshot bytes][i32 child count]
//!   ( [i32 len][node id bytes][i32 len][child tree bytes] )*
//! ```
//!
//! An empty workflow snapshot means "no snapshot". Children whose identifier
//! cannot be serialized are left out.

use bytes::Bytes;

use crate::identifier::WorkflowNodeId;
use crate::snapshot::{Snapshot, SnapshotError, SnapshotReader, SnapshotWriter};

#[derive(Clone, Default, Debug)]
pub struct TreeSnapshot {
    workflow_snapshot: Option<Snapshot>,
    children: Vec<(WorkflowNodeId, TreeSnapshot)>,
}

impl TreeSnapshot {
    pub fn new(
        workflow_snapshot: Option<Snapshot>,
        children: Vec<(WorkflowNodeId, TreeSnapshot)>,
    ) -> Self {
        Self {
            workflow_snapshot,
            children,
        }
    }

    pub fn for_root_only(snapshot: Snapshot) -> Self {
        Self::new(Some(snapshot), Vec::new())
    }

    pub fn workflow_snapshot(&self) -> Option<&Snapshot> {
        self.workflow_snapshot.as_ref()
    }

    pub fn take_workflow_snapshot(&mut self) -> Option<Snapshot> {
        self.workflow_snapshot.take()
    }

    pub fn child(&self, id: &WorkflowNodeId) -> Option<&TreeSnapshot> {
        self.children
            .iter()
            .find(|(child_id, _)| child_id == id)
            .map(|(_, child)| child)
    }

    pub fn take_child(&mut self, id: &WorkflowNodeId) -> Option<TreeSnapshot> {
        let index = self.children.iter().position(|(child_id, _)| child_id == id)?;
        Some(self.children.remove(index).1)
    }

    pub fn children(&self) -> impl Iterator<Item = (&WorkflowNodeId, &TreeSnapshot)> {
        self.children.iter().map(|(id, child)| (id, child))
    }

    pub fn into_children(self) -> Vec<(WorkflowNodeId, TreeSnapshot)> {
        self.children
    }

    pub fn is_empty(&self) -> bool {
        self.workflow_snapshot.as_ref().is_none_or(Snapshot::is_empty) && self.children.is_empty()
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut writer = SnapshotWriter::new();
        self.write_to(&mut writer);
        writer.finish()
    }

    /// Wrap the serialized tree in a plain [`Snapshot`] for persistence.
    pub fn to_snapshot(&self) -> Snapshot {
        Snapshot::of_bytes(self.to_bytes())
    }

    fn write_to(&self, writer: &mut SnapshotWriter) {
        match &self.workflow_snapshot {
            Some(snapshot) => writer.write_bytes(snapshot.bytes()),
            None => writer.write_bytes(&[]),
        }

        let children: Vec<(Bytes, &TreeSnapshot)> = self
            .children
            .iter()
            .filter_map(|(id, child)| id.to_bytes().map(|bytes| (bytes, child)))
            .collect();
        writer.write_list(&children, |writer, (id, child)| {
            writer.write_bytes(id);
            writer.write_bytes(&child.to_bytes());
        });
    }

    /// Strict parse: malformed or trailing bytes are an error.
    pub fn parse(bytes: &[u8]) -> Result<Self, SnapshotError> {
        if bytes.is_empty() {
            return Ok(Self::default());
        }
        let mut reader = SnapshotReader::new(bytes);
        let root = reader.read_slice()?;
        let workflow_snapshot =
            (!root.is_empty()).then(|| Snapshot::of_bytes(Bytes::copy_from_slice(root)));

        let entries = reader.read_list(|reader| Ok((reader.read_slice()?, reader.read_slice()?)))?;
        reader.finish()?;

        let mut children = Vec::with_capacity(entries.len());
        for (id_bytes, child_bytes) in entries {
            if child_bytes.is_empty() {
                continue;
            }
            let id = WorkflowNodeId::from_bytes(id_bytes)?;
            children.push((id, TreeSnapshot::parse(child_bytes)?));
        }
        Ok(Self {
            workflow_snapshot,
            children,
        })
    }

    pub fn from_snapshot(snapshot: &Snapshot) -> Result<Self, SnapshotError> {
        Self::parse(snapshot.bytes())
    }
}
