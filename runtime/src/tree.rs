use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use workflow_core::{IdentifierRegistry, RuntimeConfig};

use crate::arena::{NodeHandle, NodeStore};
use crate::interceptor::WorkflowInterceptor;
use crate::queue::{QueueSender, TaskId};

/// State shared by every node of one runtime: the arena, the queue and the
/// per-runtime identity registry. Owned by the runner; render contexts and
/// nodes borrow it for the duration of one step.
pub(crate) struct TreeCore {
    pub store: NodeStore,
    pub queue: QueueSender,
    pub registry: IdentifierRegistry,
    pub config: RuntimeConfig,
    pub interceptor: Arc<dyn WorkflowInterceptor>,
    pub runtime_id: Uuid,
    pub root_token: CancellationToken,
    next_task: TaskId,
    next_session: u64,
}

impl TreeCore {
    pub fn new(
        queue: QueueSender,
        config: RuntimeConfig,
        interceptor: Arc<dyn WorkflowInterceptor>,
    ) -> Self {
        Self {
            store: NodeStore::new(),
            queue,
            registry: IdentifierRegistry::new(),
            config,
            interceptor,
            runtime_id: Uuid::new_v4(),
            root_token: CancellationToken::new(),
            next_task: 0,
            next_session: 0,
        }
    }

    pub fn next_task_id(&mut self) -> TaskId {
        let id = self.next_task;
        self.next_task += 1;
        id
    }

    pub fn next_session_id(&mut self) -> u64 {
        let id = self.next_session;
        self.next_session += 1;
        id
    }

    /// Stop a node and its whole subtree, children first, and free their
    /// slots. Unknown or stale handles are ignored.
    pub fn teardown(&mut self, handle: NodeHandle) {
        let Some(mut node) = self.store.remove(handle) else {
            return;
        };
        for child in node.take_children() {
            self.teardown(child);
        }
        node.stop(self.interceptor.as_ref());
    }

    /// Flag every ancestor of `from` as having a dirty subtree.
    pub fn mark_ancestors_dirty(&mut self, from: NodeHandle) {
        let mut current = self.store.get(from).and_then(|node| node.parent());
        while let Some(handle) = current {
            match self.store.get_mut(handle) {
                Some(node) => {
                    node.mark_subtree_dirty();
                    current = node.parent();
                }
                None => break,
            }
        }
    }
}
