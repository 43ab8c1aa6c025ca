use thiserror::Error;

use crate::snapshot::SnapshotError;

pub type WorkflowResult<T> = Result<T, WorkflowError>;

/// Broad classification of a [`WorkflowError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Programmer error: the tree was driven or declared incorrectly.
    Usage,
    /// Render, action, initial state or worker code failed.
    UserCode,
    /// The runtime itself is no longer usable.
    Runtime,
}

/// Every failure the runtime can surface to the caller of the root loop.
///
/// Nothing is recovered inside the tree: the first error terminates the
/// enclosing render or action step and is returned from the runner.
#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("Expected keys to be unique for {identifier}: key=\"{key}\"")]
    DuplicateChildKey { identifier: String, key: String },

    #[error("Expected worker keys to be unique for {worker}: key=\"{key}\"")]
    DuplicateWorkerKey { worker: String, key: String },

    #[error("Expected side effect keys to be unique: key=\"{key}\"")]
    DuplicateSideEffectKey { key: String },

    #[error("Malformed snapshot: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("Node {node} is stopped")]
    NodeStopped { node: String },

    #[error("Node {node} was created for a different workflow type than {requested}")]
    IncompatibleNode { node: String, requested: String },

    #[error("Render failed in {node}")]
    Render {
        node: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("initial_state failed in {node}")]
    InitialState {
        node: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Action `{action}` failed in {node}")]
    Action {
        node: String,
        action: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Worker {worker} failed in {node}")]
    Worker {
        node: String,
        worker: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Runtime stopped")]
    RuntimeStopped,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl WorkflowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkflowError::DuplicateChildKey { .. }
            | WorkflowError::DuplicateWorkerKey { .. }
            | WorkflowError::DuplicateSideEffectKey { .. }
            | WorkflowError::Snapshot(_)
            | WorkflowError::NodeStopped { .. }
            | WorkflowError::IncompatibleNode { .. } => ErrorKind::Usage,
            WorkflowError::Render { .. }
            | WorkflowError::InitialState { .. }
            | WorkflowError::Action { .. }
            | WorkflowError::Worker { .. }
            | WorkflowError::Other(_) => ErrorKind::UserCode,
            WorkflowError::RuntimeStopped => ErrorKind::Runtime,
        }
    }

    /// Recover a runtime error that user code carried through `anyhow`.
    ///
    /// Usage errors raised by a nested child render keep their identity;
    /// snapshot errors from `initial_state` become [`WorkflowError::Snapshot`];
    /// anything else is handed to `wrap`.
    pub fn from_user(err: anyhow::Error, wrap: impl FnOnce(anyhow::Error) -> WorkflowError) -> Self {
        match err.downcast::<WorkflowError>() {
            Ok(inner) => inner,
            Err(err) => match err.downcast::<SnapshotError>() {
                Ok(snapshot) => WorkflowError::Snapshot(snapshot),
                Err(err) => wrap(err),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_key_message() {
        let err = WorkflowError::DuplicateChildKey {
            identifier: "Counter".into(),
            key: "left".into(),
        };
        assert_eq!(
            err.to_string(),
            "Expected keys to be unique for Counter: key=\"left\""
        );
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn test_from_user_preserves_nested_usage_errors() {
        let nested: anyhow::Error = WorkflowError::DuplicateSideEffectKey { key: "k".into() }.into();
        let recovered = WorkflowError::from_user(nested, |source| WorkflowError::Render {
            node: "Root".into(),
            source,
        });
        assert!(matches!(recovered, WorkflowError::DuplicateSideEffectKey { .. }));

        let plain = anyhow::anyhow!("boom");
        let wrapped = WorkflowError::from_user(plain, |source| WorkflowError::Render {
            node: "Root".into(),
            source,
        });
        assert_eq!(wrapped.kind(), ErrorKind::UserCode);
        assert!(matches!(wrapped, WorkflowError::Render { .. }));
    }

    #[test]
    fn test_from_user_maps_snapshot_errors() {
        let err: anyhow::Error = SnapshotError::UnexpectedEof {
            needed: 4,
            remaining: 1,
        }
        .into();
        let recovered = WorkflowError::from_user(err, WorkflowError::Other);
        assert!(matches!(recovered, WorkflowError::Snapshot(_)));
        assert_eq!(recovered.kind(), ErrorKind::Usage);
    }
}
