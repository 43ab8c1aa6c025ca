//! # Runner: The Root of One Workflow Tree
//!
//! [`WorkflowRunner`] owns the arena, the action queue and the props channel.
//! It exposes the two halves of the loop separately so callers can drive it
//! step by step:
//!
//! - [`WorkflowRunner::next_rendering`] renders the whole tree
//! - [`WorkflowRunner::process_action`] applies exactly one queued item or
//!   picks up one props change
//!
//! Any error tears the tree down and leaves the runner stopped.

use std::marker::PhantomData;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use workflow_core::{
    ActionApplied, RuntimeConfig, TreeSnapshot, WorkflowError, WorkflowNodeId, WorkflowResult,
};

use crate::arena::NodeHandle;
use crate::interceptor::{NoopInterceptor, WorkflowInterceptor};
use crate::node::{AnyBox, NodeLifecycle, WorkflowNode, render_node};
use crate::queue::{QueueReceiver, QueuedItem};
use crate::tree::TreeCore;
use crate::workflow::Workflow;

/// One completed render pass.
#[derive(Debug, Clone)]
pub struct RenderingAndSnapshot<R> {
    pub rendering: R,
    pub snapshot: TreeSnapshot,
}

/// What one call to `process_action` did.
#[derive(Debug, PartialEq, Eq)]
pub enum ActionProcessingResult<O> {
    /// The props channel delivered a value different from the current one.
    PropsUpdated,
    Applied(ActionApplied<O>),
    /// Nothing was queued. Only returned by the non-blocking variant.
    Exhausted,
}

impl<O> ActionProcessingResult<O> {
    pub fn state_changed(&self) -> bool {
        match self {
            ActionProcessingResult::PropsUpdated => true,
            ActionProcessingResult::Applied(applied) => applied.state_changed,
            ActionProcessingResult::Exhausted => false,
        }
    }

    pub fn into_output(self) -> Option<O> {
        match self {
            ActionProcessingResult::Applied(applied) => applied.output,
            _ => None,
        }
    }
}

pub struct WorkflowRunner<W: Workflow> {
    tree: TreeCore,
    receiver: QueueReceiver,
    props: watch::Receiver<W::Props>,
    props_open: bool,
    current_props: W::Props,
    root: NodeHandle,
    stopped: bool,
    _workflow: PhantomData<fn() -> W>,
}

impl<W: Workflow> WorkflowRunner<W> {
    /// Create the root node. Nothing is rendered until `next_rendering`.
    pub fn new(
        workflow: W,
        mut props: watch::Receiver<W::Props>,
        snapshot: Option<TreeSnapshot>,
        config: RuntimeConfig,
        interceptor: Arc<dyn WorkflowInterceptor>,
    ) -> WorkflowResult<Self> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut tree = TreeCore::new(sender, config, interceptor);
        let current_props = props.borrow_and_update().clone();
        let id = WorkflowNodeId::new(workflow.identifier(&mut tree.registry), "");
        tracing::info!(
            runtime = %tree.runtime_id,
            workflow = %id,
            restored = snapshot.is_some(),
            config = ?tree.config,
            "Starting workflow runtime"
        );
        let root = WorkflowNode::create(
            &mut tree,
            None,
            id,
            workflow,
            current_props.clone(),
            snapshot,
        )?;
        Ok(Self {
            tree,
            receiver,
            props,
            props_open: true,
            current_props,
            root,
            stopped: false,
            _workflow: PhantomData,
        })
    }

    /// Shorthand for a runner with default config and no interceptor.
    pub fn with_defaults(workflow: W, props: watch::Receiver<W::Props>) -> WorkflowResult<Self> {
        Self::new(
            workflow,
            props,
            None,
            RuntimeConfig::default(),
            Arc::new(NoopInterceptor),
        )
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.tree.config
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Token cancelled when the runner stops. Every node token descends
    /// from it.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.tree.root_token.clone()
    }

    /// Lifecycle of the root node; `None` once the tree is torn down.
    pub fn root_lifecycle(&self) -> Option<NodeLifecycle> {
        self.tree.store.get(self.root).map(|root| root.lifecycle())
    }

    /// Number of live nodes in the tree.
    pub fn node_count(&self) -> usize {
        self.tree.store.len()
    }

    pub fn next_rendering(&mut self) -> WorkflowResult<RenderingAndSnapshot<W::Rendering>> {
        self.ensure_running()?;
        let span = tracing::info_span!("render_pass", runtime = %self.tree.runtime_id);
        let _enter = span.enter();

        let props = self.current_props.clone();
        let rendering = match render_node::<W>(&mut self.tree, self.root, None, props) {
            Ok(rendering) => rendering,
            Err(err) => return Err(self.fail(err)),
        };
        Ok(RenderingAndSnapshot {
            rendering,
            snapshot: self.snapshot(),
        })
    }

    /// Wait for a props change or a queued item and handle exactly one.
    ///
    /// Props win ties. Items addressed to nodes that have since been torn
    /// down are skipped without returning.
    pub async fn process_action(&mut self) -> WorkflowResult<ActionProcessingResult<W::Output>> {
        self.ensure_running()?;
        loop {
            tokio::select! {
                biased;
                changed = self.props.changed(), if self.props_open => match changed {
                    Ok(()) => {
                        if self.take_new_props() {
                            return Ok(ActionProcessingResult::PropsUpdated);
                        }
                    }
                    Err(_) => {
                        tracing::debug!("Props channel closed; keeping the last props");
                        self.props_open = false;
                    }
                },
                item = self.receiver.recv() => match item {
                    Some(item) => {
                        if let Some(result) = self.handle_item(item)? {
                            return Ok(result);
                        }
                    }
                    None => return Err(WorkflowError::RuntimeStopped),
                },
            }
        }
    }

    /// Non-blocking `process_action`: `Exhausted` when nothing is pending.
    pub fn try_process_action(&mut self) -> WorkflowResult<ActionProcessingResult<W::Output>> {
        self.ensure_running()?;
        if self.props_open {
            match self.props.has_changed() {
                Ok(true) if self.take_new_props() => {
                    return Ok(ActionProcessingResult::PropsUpdated);
                }
                Ok(_) => {}
                Err(_) => self.props_open = false,
            }
        }
        while let Ok(item) = self.receiver.try_recv() {
            if let Some(result) = self.handle_item(item)? {
                return Ok(result);
            }
        }
        Ok(ActionProcessingResult::Exhausted)
    }

    /// Snapshot of the whole tree as of the last completed step.
    pub fn snapshot(&self) -> TreeSnapshot {
        self.tree
            .store
            .get(self.root)
            .map(|root| root.snapshot(&self.tree.store, self.tree.interceptor.as_ref()))
            .unwrap_or_default()
    }

    /// Stop every node and task. Later calls return `RuntimeStopped`.
    pub fn cancel(&mut self) {
        if self.stopped {
            return;
        }
        tracing::info!(runtime = %self.tree.runtime_id, "Stopping workflow runtime");
        self.stopped = true;
        self.tree.teardown(self.root);
        self.tree.root_token.cancel();
    }

    fn ensure_running(&self) -> WorkflowResult<()> {
        if self.stopped {
            Err(WorkflowError::RuntimeStopped)
        } else {
            Ok(())
        }
    }

    fn fail(&mut self, err: WorkflowError) -> WorkflowError {
        tracing::error!(runtime = %self.tree.runtime_id, error = %err, "Workflow runtime failed");
        self.cancel();
        err
    }

    fn take_new_props(&mut self) -> bool {
        let props = self.props.borrow_and_update().clone();
        if props == self.current_props {
            return false;
        }
        self.current_props = props;
        true
    }

    fn handle_item(
        &mut self,
        item: QueuedItem,
    ) -> WorkflowResult<Option<ActionProcessingResult<W::Output>>> {
        match self.dispatch(item) {
            Ok(result) => Ok(result),
            Err(err) => Err(self.fail(err)),
        }
    }

    fn dispatch(
        &mut self,
        item: QueuedItem,
    ) -> WorkflowResult<Option<ActionProcessingResult<W::Output>>> {
        let (target, action) = match item {
            QueuedItem::Action { target, action } => (target, action),
            QueuedItem::WorkerOutput {
                target,
                task,
                value,
            } => {
                let Some(node) = self.tree.store.get(target) else {
                    tracing::trace!(?target, task, "Dropping output of a stopped node's worker");
                    return Ok(None);
                };
                match node.worker_action(task, value) {
                    Some(action) => (target, action),
                    None => {
                        tracing::trace!(?target, task, "Dropping output of a cancelled worker");
                        return Ok(None);
                    }
                }
            }
            QueuedItem::WorkerFailed {
                target,
                task,
                error,
            } => {
                let Some(node) = self.tree.store.get(target) else {
                    return Ok(None);
                };
                return match node.worker_description(task) {
                    Some(worker) => Err(WorkflowError::Worker {
                        node: node.node_id().to_string(),
                        worker,
                        source: error,
                    }),
                    None => Ok(None),
                };
            }
        };
        self.apply(target, action)
    }

    fn apply(
        &mut self,
        target: NodeHandle,
        action: AnyBox,
    ) -> WorkflowResult<Option<ActionProcessingResult<W::Output>>> {
        let Some(node) = self.tree.store.get_mut(target) else {
            tracing::trace!(?target, "Dropping action for a stopped node");
            return Ok(None);
        };
        let applied = node.apply_action(action, self.tree.interceptor.as_ref())?;
        let parent = node.parent();
        if applied.state_changed {
            self.tree.mark_ancestors_dirty(target);
        }
        let state_changed = applied.state_changed;

        let Some(output) = applied.output else {
            return Ok(Some(ActionProcessingResult::Applied(ActionApplied {
                output: None,
                state_changed,
            })));
        };

        if target == self.root {
            let output = output.downcast::<W::Output>().map_err(|_| {
                WorkflowError::IncompatibleNode {
                    node: "root".into(),
                    requested: "the root workflow's output type".into(),
                }
            })?;
            return Ok(Some(ActionProcessingResult::Applied(ActionApplied {
                output: Some(*output),
                state_changed,
            })));
        }

        // A child output becomes a parent action at the back of the queue.
        if let Some(parent) = parent {
            if let Some(parent_node) = self.tree.store.get(parent) {
                if let Some(action) = parent_node.child_output_action(target, output) {
                    let _ = self.tree.queue.send(QueuedItem::Action {
                        target: parent,
                        action,
                    });
                }
            }
        }
        Ok(Some(ActionProcessingResult::Applied(ActionApplied {
            output: None,
            state_changed,
        })))
    }
}

impl<W: Workflow> Drop for WorkflowRunner<W> {
    fn drop(&mut self) {
        self.cancel();
    }
}
