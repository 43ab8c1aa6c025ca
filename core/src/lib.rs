//! Core types for the Workflow runtime: identity, snapshots, actions, sinks
//! and the worker contract. Nothing here owns a node tree; see
//! `workflow-runtime` for that.

pub mod action;
pub mod compatible;
pub mod config;
pub mod error;
pub mod identifier;
pub mod sink;
pub mod snapshot;
pub mod tree_snapshot;
pub mod worker;

pub use action::{ActionApplied, Updater, WorkflowAction};
pub use compatible::{Compatible, compatible};
pub use config::{ConfigError, RuntimeConfig, RuntimeOption};
pub use error::{ErrorKind, WorkflowError, WorkflowResult};
pub use identifier::{IdentifierRegistry, WorkflowIdentifier, WorkflowNodeId};
pub use sink::{Contramap, Sink, SinkExt};
pub use snapshot::{Snapshot, SnapshotError, SnapshotReader, SnapshotWriter};
pub use tree_snapshot::TreeSnapshot;
pub use worker::{Worker, WorkerStream, short_type_name};

pub mod prelude {
    pub use crate::action::{ActionApplied, Updater, WorkflowAction};
    pub use crate::compatible::{Compatible, compatible};
    pub use crate::config::{RuntimeConfig, RuntimeOption};
    pub use crate::error::{WorkflowError, WorkflowResult};
    pub use crate::identifier::{WorkflowIdentifier, WorkflowNodeId};
    pub use crate::sink::{Sink, SinkExt};
    pub use crate::snapshot::{Snapshot, SnapshotReader, SnapshotWriter};
    pub use crate::tree_snapshot::TreeSnapshot;
    pub use crate::worker::Worker;
}
