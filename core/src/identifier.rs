//! # Identifier: Stable Names for Workflow Kinds
//!
//! Identifiers are explicit values rather than reflection results: every
//! workflow type reports a stable name, and wrapper ("impostor") workflows
//! report a [`WorkflowIdentifier::Delegating`] chain ending in the identity
//! of the workflow they wrap.

use std::any::TypeId;
use std::fmt;
use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use bytes::Bytes;

use crate::compatible::Compatible;
use crate::snapshot::{SnapshotError, SnapshotReader, SnapshotWriter};

const TAG_DIRECT: u8 = 0;
const TAG_PROXY: u8 = 1;

/// Names a workflow's render logic.
///
/// Equality is structural over the whole chain, so two wrappers only match
/// when they wrap the same inner workflow kind.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum WorkflowIdentifier {
    Direct(Arc<str>),
    Delegating {
        wrapper: Arc<str>,
        inner: Arc<WorkflowIdentifier>,
    },
    /// Matches like `Direct` but is never written into a snapshot.
    Unsnapshottable(Arc<str>),
}

impl WorkflowIdentifier {
    pub fn direct(name: impl Into<Arc<str>>) -> Self {
        WorkflowIdentifier::Direct(name.into())
    }

    pub fn delegating(wrapper: impl Into<Arc<str>>, inner: WorkflowIdentifier) -> Self {
        WorkflowIdentifier::Delegating {
            wrapper: wrapper.into(),
            inner: Arc::new(inner),
        }
    }

    /// The outermost name in the chain.
    pub fn name(&self) -> &str {
        match self {
            WorkflowIdentifier::Direct(name) | WorkflowIdentifier::Unsnapshottable(name) => name,
            WorkflowIdentifier::Delegating { wrapper, .. } => wrapper,
        }
    }

    /// The identity at the end of the delegation chain.
    pub fn root(&self) -> &WorkflowIdentifier {
        let mut current = self;
        while let WorkflowIdentifier::Delegating { inner, .. } = current {
            current = inner;
        }
        current
    }

    /// Recursive match over the delegation chain.
    pub fn matches(&self, other: &WorkflowIdentifier) -> bool {
        match (self, other) {
            (
                WorkflowIdentifier::Delegating { wrapper: a, inner: ia },
                WorkflowIdentifier::Delegating { wrapper: b, inner: ib },
            ) => a == b && ia.matches(ib),
            (WorkflowIdentifier::Delegating { .. }, _) | (_, WorkflowIdentifier::Delegating { .. }) => false,
            (a, b) => a.name() == b.name() && a.is_snapshottable() == b.is_snapshottable(),
        }
    }

    pub fn is_snapshottable(&self) -> bool {
        match self {
            WorkflowIdentifier::Direct(_) => true,
            WorkflowIdentifier::Unsnapshottable(_) => false,
            WorkflowIdentifier::Delegating { inner, .. } => inner.is_snapshottable(),
        }
    }

    /// Human-readable chain, e.g. `MapRendering(Counter)`.
    pub fn describe(&self) -> String {
        match self {
            WorkflowIdentifier::Direct(name) => name.to_string(),
            WorkflowIdentifier::Unsnapshottable(name) => format!("{name}(unsnapshottable)"),
            WorkflowIdentifier::Delegating { wrapper, inner } => {
                format!("{wrapper}({})", inner.describe())
            }
        }
    }

    /// Serialized form, or `None` if any link in the chain is unsnapshottable.
    pub fn to_bytes(&self) -> Option<Bytes> {
        let mut writer = SnapshotWriter::new();
        self.write_to(&mut writer).then(|| writer.finish())
    }

    /// Returns false (leaving a partial write) if the chain is unsnapshottable.
    pub fn write_to(&self, writer: &mut SnapshotWriter) -> bool {
        match self {
            WorkflowIdentifier::Direct(name) => {
                writer.write_str(name);
                writer.write_u8(TAG_DIRECT);
                true
            }
            WorkflowIdentifier::Delegating { wrapper, inner } => {
                if !inner.is_snapshottable() {
                    return false;
                }
                writer.write_str(wrapper);
                writer.write_u8(TAG_PROXY);
                inner.write_to(writer)
            }
            WorkflowIdentifier::Unsnapshottable(_) => false,
        }
    }

    pub fn read_from(reader: &mut SnapshotReader<'_>) -> Result<Self, SnapshotError> {
        let name = reader.read_str()?;
        match reader.read_u8()? {
            TAG_DIRECT => Ok(WorkflowIdentifier::direct(name)),
            TAG_PROXY => {
                let inner = WorkflowIdentifier::read_from(reader)?;
                Ok(WorkflowIdentifier::delegating(name, inner))
            }
            other => Err(SnapshotError::InvalidTag(other)),
        }
    }
}

impl fmt::Debug for WorkflowIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WorkflowIdentifier({})", self.describe())
    }
}

impl fmt::Display for WorkflowIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

// ============== Node Id ==============

/// Identity of a child node under its parent: workflow kind plus render key.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct WorkflowNodeId {
    pub identifier: WorkflowIdentifier,
    pub name: String,
}

impl WorkflowNodeId {
    pub fn new(identifier: WorkflowIdentifier, name: impl Into<String>) -> Self {
        Self {
            identifier,
            name: name.into(),
        }
    }

    pub fn to_bytes(&self) -> Option<Bytes> {
        let mut writer = SnapshotWriter::new();
        if !self.identifier.write_to(&mut writer) {
            return None;
        }
        writer.write_str(&self.name);
        Some(writer.finish())
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SnapshotError> {
        let mut reader = SnapshotReader::new(bytes);
        let identifier = WorkflowIdentifier::read_from(&mut reader)?;
        let name = reader.read_str()?;
        reader.finish()?;
        Ok(Self { identifier, name })
    }
}

impl Compatible for WorkflowNodeId {
    fn compatibility_key(&self) -> Option<String> {
        Some(format!("{}-{}", self.identifier.describe(), self.name))
    }
}

impl fmt::Debug for WorkflowNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WorkflowNodeId({}, {:?})", self.identifier, self.name)
    }
}

impl fmt::Display for WorkflowNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() {
            write!(f, "{}", self.identifier)
        } else {
            write!(f, "{}[{}]", self.identifier, self.name)
        }
    }
}

// ============== Registry ==============

/// Per-runtime cache of identifiers and interned names.
///
/// Each runner owns one; there is no process-wide naming table. Identifiers
/// are cached per `(type, name)` pair, so one type reporting several names
/// gets one identifier per name. A name is owned by the first type that
/// registers it; a different type asking for the same name is given its full
/// type path instead.
#[derive(Default, Debug)]
pub struct IdentifierRegistry {
    names: AHashSet<Arc<str>>,
    by_type: AHashMap<(TypeId, Arc<str>), WorkflowIdentifier>,
    owners: AHashMap<Arc<str>, TypeId>,
}

impl IdentifierRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, name: &str) -> Arc<str> {
        if let Some(existing) = self.names.get(name) {
            return existing.clone();
        }
        let name: Arc<str> = Arc::from(name);
        self.names.insert(name.clone());
        name
    }

    /// Direct identifier for `T` reported under `type_name`.
    pub fn identifier_for<T: ?Sized + 'static>(&mut self, type_name: &str) -> WorkflowIdentifier {
        self.cached::<T>(type_name, WorkflowIdentifier::Direct)
    }

    pub fn unsnapshottable_for<T: ?Sized + 'static>(&mut self, type_name: &str) -> WorkflowIdentifier {
        self.cached::<T>(type_name, WorkflowIdentifier::Unsnapshottable)
    }

    fn cached<T: ?Sized + 'static>(
        &mut self,
        type_name: &str,
        build: fn(Arc<str>) -> WorkflowIdentifier,
    ) -> WorkflowIdentifier {
        let type_id = TypeId::of::<T>();
        let name = self.intern(type_name);
        let key = (type_id, name.clone());
        if let Some(cached) = self.by_type.get(&key) {
            return cached.clone();
        }

        let owner = *self.owners.entry(name.clone()).or_insert(type_id);
        let resolved = if owner == type_id {
            name
        } else {
            let full = std::any::type_name::<T>();
            tracing::debug!(name = %name, workflow = full, "Workflow name already taken; using full type path");
            self.intern(full)
        };
        let identifier = build(resolved);
        self.by_type.insert(key, identifier.clone());
        identifier
    }

    pub fn delegating(&mut self, wrapper: &str, inner: WorkflowIdentifier) -> WorkflowIdentifier {
        WorkflowIdentifier::Delegating {
            wrapper: self.intern(wrapper),
            inner: Arc::new(inner),
        }
    }

    pub fn len(&self) -> usize {
        self.by_type.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter;
    struct Clock;

    #[test]
    fn test_registry_is_stable_per_type() {
        let mut registry = IdentifierRegistry::new();
        let a = registry.identifier_for::<Counter>("Counter");
        let b = registry.identifier_for::<Counter>("Counter");
        let c = registry.identifier_for::<Clock>("Clock");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(registry.len(), 2);
        match (&a, &b) {
            (WorkflowIdentifier::Direct(x), WorkflowIdentifier::Direct(y)) => {
                assert!(Arc::ptr_eq(x, y))
            }
            _ => panic!("expected direct identifiers"),
        }
    }

    #[test]
    fn test_one_type_with_several_names() {
        let mut registry = IdentifierRegistry::new();
        let left = registry.identifier_for::<Counter>("Left");
        let right = registry.identifier_for::<Counter>("Right");

        assert_ne!(left, right);
        assert_eq!(left.describe(), "Left");
        assert_eq!(right.describe(), "Right");
        assert_eq!(registry.identifier_for::<Counter>("Left"), left);
    }

    #[test]
    fn test_name_clash_between_types_falls_back_to_type_path() {
        let mut registry = IdentifierRegistry::new();
        let first = registry.identifier_for::<Counter>("Counter");
        let other = registry.identifier_for::<Clock>("Counter");

        assert_eq!(first.describe(), "Counter");
        assert_ne!(first, other);
        assert_eq!(other.describe(), std::any::type_name::<Clock>());
        assert_eq!(registry.identifier_for::<Clock>("Counter"), other);
        assert_eq!(registry.identifier_for::<Counter>("Counter"), first);
    }

    #[test]
    fn test_delegating_chain() {
        let mut registry = IdentifierRegistry::new();
        let counter = registry.identifier_for::<Counter>("Counter");
        let clock = registry.identifier_for::<Clock>("Clock");
        let mapped_counter = registry.delegating("MapRendering", counter.clone());
        let mapped_clock = registry.delegating("MapRendering", clock);

        assert_eq!(mapped_counter.describe(), "MapRendering(Counter)");
        assert_eq!(mapped_counter.root(), &counter);
        assert!(mapped_counter.matches(&registry.delegating("MapRendering", counter.clone())));
        assert!(!mapped_counter.matches(&mapped_clock));
        assert!(!mapped_counter.matches(&counter));
    }

    #[test]
    fn test_identifier_bytes_round_trip() {
        let id = WorkflowIdentifier::delegating(
            "Outer",
            WorkflowIdentifier::delegating("Middle", WorkflowIdentifier::direct("Leaf")),
        );
        let bytes = id.to_bytes().unwrap();
        let mut reader = SnapshotReader::new(&bytes);
        let read = WorkflowIdentifier::read_from(&mut reader).unwrap();
        assert!(reader.is_exhausted());
        assert_eq!(read, id);
    }

    #[test]
    fn test_direct_identifier_layout() {
        let bytes = WorkflowIdentifier::direct("Ab").to_bytes().unwrap();
        assert_eq!(bytes.as_ref(), &[0u8, 0, 0, 2, b'A', b'b', 0][..]);
    }

    #[test]
    fn test_unsnapshottable_has_no_bytes() {
        let id = WorkflowIdentifier::Unsnapshottable("Local".into());
        assert!(id.to_bytes().is_none());
        assert!(WorkflowIdentifier::delegating("Wrap", id.clone()).to_bytes().is_none());
        assert!(WorkflowNodeId::new(id, "k").to_bytes().is_none());
    }

    #[test]
    fn test_node_id_round_trip() {
        let id = WorkflowNodeId::new(WorkflowIdentifier::direct("Counter"), "left");
        let bytes = id.to_bytes().unwrap();
        assert_eq!(WorkflowNodeId::from_bytes(&bytes).unwrap(), id);
        assert_eq!(id.to_string(), "Counter[left]");
    }

    #[test]
    fn test_invalid_tag() {
        let mut writer = SnapshotWriter::new();
        writer.write_str("X");
        writer.write_u8(9);
        let bytes = writer.finish();
        let mut reader = SnapshotReader::new(&bytes);
        assert!(matches!(
            WorkflowIdentifier::read_from(&mut reader),
            Err(SnapshotError::InvalidTag(9))
        ));
    }
}
