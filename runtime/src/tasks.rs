//! Worker and side-effect tasks owned by a node.
//!
//! Tasks are declared during render but only spawned once the render function
//! has returned. Each task gets a child of its node's cancellation token, so
//! tearing a node down stops every task it started.

use std::any::{Any, TypeId};

use futures_util::StreamExt;
use futures_util::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use workflow_core::{WorkerStream, WorkflowAction, WorkflowError, WorkflowResult};

use crate::arena::NodeHandle;
use crate::queue::{QueueSender, QueuedItem, TaskId};

pub(crate) type OutputHandler<P, S, O> =
    Box<dyn Fn(Box<dyn Any + Send>) -> Option<WorkflowAction<P, S, O>> + Send>;

pub(crate) struct WorkerEntry<P, S, O> {
    pub key: String,
    pub worker_type: TypeId,
    pub worker: Box<dyn Any + Send>,
    pub description: String,
    pub task: TaskId,
    pub handler: OutputHandler<P, S, O>,
    pending: Option<WorkerStream<Box<dyn Any + Send>>>,
    token: CancellationToken,
}

impl<P, S, O> WorkerEntry<P, S, O> {
    pub fn new(
        key: String,
        worker_type: TypeId,
        worker: Box<dyn Any + Send>,
        description: String,
        task: TaskId,
        handler: OutputHandler<P, S, O>,
        stream: WorkerStream<Box<dyn Any + Send>>,
        token: CancellationToken,
    ) -> Self {
        Self {
            key,
            worker_type,
            worker,
            description,
            task,
            handler,
            pending: Some(stream),
            token,
        }
    }

    /// Spawn the worker's stream if it has not been started yet.
    pub fn start(&mut self, target: NodeHandle, queue: &QueueSender) -> WorkflowResult<()> {
        let Some(mut stream) = self.pending.take() else {
            return Ok(());
        };
        let handle = current_runtime()?;
        let queue = queue.clone();
        let token = self.token.clone();
        let task = self.task;
        let description = self.description.clone();
        tracing::debug!(worker = %description, key = %self.key, task, "Starting worker");

        handle.spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    item = stream.next() => match item {
                        Some(Ok(value)) => {
                            if queue.send(QueuedItem::WorkerOutput { target, task, value }).is_err() {
                                break;
                            }
                        }
                        Some(Err(error)) => {
                            let _ = queue.send(QueuedItem::WorkerFailed { target, task, error });
                            break;
                        }
                        None => {
                            tracing::trace!(worker = %description, task, "Worker finished");
                            break;
                        }
                    },
                }
            }
        });
        Ok(())
    }

    pub fn cancel(&self) {
        tracing::debug!(worker = %self.description, key = %self.key, task = self.task, "Cancelling worker");
        self.token.cancel();
    }
}

pub(crate) struct SideEffectEntry {
    pub key: String,
    pending: Option<BoxFuture<'static, ()>>,
    token: CancellationToken,
}

impl SideEffectEntry {
    pub fn new(key: String, effect: BoxFuture<'static, ()>, token: CancellationToken) -> Self {
        Self {
            key,
            pending: Some(effect),
            token,
        }
    }

    pub fn start(&mut self) -> WorkflowResult<()> {
        let Some(effect) = self.pending.take() else {
            return Ok(());
        };
        let handle = current_runtime()?;
        let token = self.token.clone();
        tracing::debug!(key = %self.key, "Starting side effect");
        handle.spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => {}
                _ = effect => {}
            }
        });
        Ok(())
    }

    pub fn cancel(&self) {
        tracing::debug!(key = %self.key, "Cancelling side effect");
        self.token.cancel();
    }
}

fn current_runtime() -> WorkflowResult<tokio::runtime::Handle> {
    tokio::runtime::Handle::try_current().map_err(|e| {
        WorkflowError::Other(anyhow::anyhow!(
            "workers and side effects need a tokio runtime: {e}"
        ))
    })
}
