//! # RenderTester: One Render Pass in Isolation
//!
//! Runs a single [`Workflow::render`] against a context whose children,
//! workers and side effects are stubbed. Children are never created: each
//! `render_child` call must match an expected child and receives the stubbed
//! rendering. Workers are never run and side effects are never polled.
//!
//! Actions sent during the pass (stubbed outputs, or event handlers fired by
//! the test afterwards) land in a private queue and can be applied one at a
//! time with [`RenderTestResult::apply_next_action`].

use std::any::{Any, TypeId};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use workflow_core::{
    ActionApplied, RuntimeConfig, Sink, Worker, WorkflowAction, WorkflowError, WorkflowNodeId,
    WorkflowResult,
};

use crate::context::RenderContext;
use crate::interceptor::{NoopInterceptor, WorkflowSession};
use crate::node::AnyBox;
use crate::queue::{ActionSink, QueueReceiver, QueuedItem};
use crate::subtree::{ActiveStagingList, SubtreeManager};
use crate::tree::TreeCore;
use crate::workflow::{ActionFor, Workflow};

/// One thing the render function asked its context for, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderCall {
    Child { workflow: String, key: String },
    Worker { worker: String, key: String },
    SideEffect { key: String },
}

struct ChildStub {
    workflow: TypeId,
    type_name: &'static str,
    key: String,
    rendering: AnyBox,
    output: Option<AnyBox>,
}

struct WorkerStub {
    worker: TypeId,
    type_name: &'static str,
    key: String,
    output: Option<AnyBox>,
}

/// Expectations for one stubbed pass, consumed as the render function
/// claims them.
#[derive(Default)]
pub(crate) struct RenderStubs {
    children: Vec<ChildStub>,
    workers: Vec<WorkerStub>,
    side_effects: Vec<String>,
    calls: Vec<RenderCall>,
}

fn unexpected(message: String) -> WorkflowError {
    WorkflowError::Other(anyhow::anyhow!(message))
}

impl RenderStubs {
    pub(crate) fn render_child<C, P, S, O>(
        &mut self,
        id: &WorkflowNodeId,
        sink: &ActionSink<P, S, O>,
        handler: impl Fn(C::Output) -> WorkflowAction<P, S, O>,
    ) -> WorkflowResult<C::Rendering>
    where
        C: Workflow,
        P: 'static,
        S: 'static,
        O: 'static,
    {
        let workflow = id.identifier.describe();
        let key = id.name.as_str();
        let seen = self.calls.iter().any(|call| {
            matches!(call, RenderCall::Child { workflow: w, key: k } if *w == workflow && k == key)
        });
        if seen {
            return Err(WorkflowError::DuplicateChildKey {
                identifier: workflow,
                key: key.to_string(),
            });
        }
        self.calls.push(RenderCall::Child {
            workflow: workflow.clone(),
            key: key.to_string(),
        });

        let index = self
            .children
            .iter()
            .position(|stub| stub.workflow == TypeId::of::<C>() && stub.key == key)
            .ok_or_else(|| unexpected(format!("Unexpected child workflow {workflow} with key \"{key}\"")))?;
        let stub = self.children.remove(index);
        let rendering = stub
            .rendering
            .downcast::<C::Rendering>()
            .map_err(|_| unexpected(format!("Stubbed rendering for {workflow} has the wrong type")))?;
        if let Some(output) = stub.output {
            let output = output
                .downcast::<C::Output>()
                .map_err(|_| unexpected(format!("Stubbed output for {workflow} has the wrong type")))?;
            sink.send(handler(*output));
        }
        Ok(*rendering)
    }

    pub(crate) fn running_worker<K, P, S, O>(
        &mut self,
        worker: &K,
        key: &str,
        sink: &ActionSink<P, S, O>,
        handler: impl Fn(K::Output) -> WorkflowAction<P, S, O>,
    ) -> WorkflowResult<()>
    where
        K: Worker,
        P: 'static,
        S: 'static,
        O: 'static,
    {
        let description = worker.describe();
        let seen = self.calls.iter().any(|call| {
            matches!(call, RenderCall::Worker { worker: w, key: k } if *w == description && k == key)
        });
        if seen {
            return Err(WorkflowError::DuplicateWorkerKey {
                worker: description,
                key: key.to_string(),
            });
        }
        self.calls.push(RenderCall::Worker {
            worker: description.clone(),
            key: key.to_string(),
        });

        let index = self
            .workers
            .iter()
            .position(|stub| stub.worker == TypeId::of::<K>() && stub.key == key)
            .ok_or_else(|| unexpected(format!("Unexpected worker {description} with key \"{key}\"")))?;
        if let Some(output) = self.workers.remove(index).output {
            let output = output
                .downcast::<K::Output>()
                .map_err(|_| unexpected(format!("Stubbed output for {description} has the wrong type")))?;
            sink.send(handler(*output));
        }
        Ok(())
    }

    pub(crate) fn running_side_effect(&mut self, key: &str) -> WorkflowResult<()> {
        let seen = self
            .calls
            .iter()
            .any(|call| matches!(call, RenderCall::SideEffect { key: k } if k == key));
        if seen {
            return Err(WorkflowError::DuplicateSideEffectKey {
                key: key.to_string(),
            });
        }
        self.calls.push(RenderCall::SideEffect {
            key: key.to_string(),
        });
        let index = self
            .side_effects
            .iter()
            .position(|expected| expected == key)
            .ok_or_else(|| unexpected(format!("Unexpected side effect with key \"{key}\"")))?;
        self.side_effects.remove(index);
        Ok(())
    }

    fn ensure_exhausted(&self) -> WorkflowResult<()> {
        let mut missing: Vec<String> = Vec::new();
        missing.extend(
            self.children
                .iter()
                .map(|stub| format!("child {} with key \"{}\"", stub.type_name, stub.key)),
        );
        missing.extend(
            self.workers
                .iter()
                .map(|stub| format!("worker {} with key \"{}\"", stub.type_name, stub.key)),
        );
        missing.extend(
            self.side_effects
                .iter()
                .map(|key| format!("side effect with key \"{key}\"")),
        );
        if missing.is_empty() {
            Ok(())
        } else {
            Err(unexpected(format!(
                "Expected render to request: {}",
                missing.join(", ")
            )))
        }
    }
}

/// Builder for one stubbed render pass of `W`.
pub struct RenderTester<W: Workflow> {
    workflow: W,
    props: W::Props,
    state: W::State,
    stubs: RenderStubs,
}

impl<W: Workflow> RenderTester<W> {
    pub fn new(workflow: W, props: W::Props, state: W::State) -> Self {
        Self {
            workflow,
            props,
            state,
            stubs: RenderStubs::default(),
        }
    }

    /// Expect a child of type `C` under `key` and hand back `rendering`.
    pub fn expect_workflow<C: Workflow>(self, key: &str, rendering: C::Rendering) -> Self {
        self.push_child::<C>(key, rendering, None)
    }

    /// Like [`expect_workflow`](Self::expect_workflow), and the child emits
    /// `output` once through the parent's handler.
    pub fn expect_workflow_output<C: Workflow>(
        self,
        key: &str,
        rendering: C::Rendering,
        output: C::Output,
    ) -> Self {
        self.push_child::<C>(key, rendering, Some(Box::new(output)))
    }

    pub fn expect_worker<K: Worker>(mut self, key: &str) -> Self {
        self.stubs.workers.push(WorkerStub {
            worker: TypeId::of::<K>(),
            type_name: std::any::type_name::<K>(),
            key: key.to_string(),
            output: None,
        });
        self
    }

    /// Expect a worker of type `K` under `key` that emits `output` once.
    pub fn expect_worker_output<K: Worker>(mut self, key: &str, output: K::Output) -> Self {
        self.stubs.workers.push(WorkerStub {
            worker: TypeId::of::<K>(),
            type_name: std::any::type_name::<K>(),
            key: key.to_string(),
            output: Some(Box::new(output)),
        });
        self
    }

    pub fn expect_side_effect(mut self, key: &str) -> Self {
        self.stubs.side_effects.push(key.to_string());
        self
    }

    fn push_child<C: Workflow>(mut self, key: &str, rendering: C::Rendering, output: Option<AnyBox>) -> Self {
        self.stubs.children.push(ChildStub {
            workflow: TypeId::of::<C>(),
            type_name: std::any::type_name::<C>(),
            key: key.to_string(),
            rendering: Box::new(rendering),
            output,
        });
        self
    }

    /// Run the pass. Fails if render fails, asks for something that was not
    /// expected, or leaves an expectation unclaimed.
    pub fn render(mut self) -> WorkflowResult<RenderTestResult<W>> {
        let (queue, receiver) = mpsc::unbounded_channel();
        let mut tree = TreeCore::new(queue.clone(), RuntimeConfig::default(), Arc::new(NoopInterceptor));
        let handle = tree.store.reserve();
        let session = WorkflowSession {
            identifier: self.workflow.identifier(&mut tree.registry),
            render_key: String::new(),
            session_id: tree.next_session_id(),
            parent_id: None,
            depth: 0,
            runtime_id: tree.runtime_id,
        };
        let id = WorkflowNodeId::new(session.identifier.clone(), "");
        let token = CancellationToken::new();
        let mut subtree = SubtreeManager::new(Vec::new());
        let mut workers = ActiveStagingList::new();
        let mut side_effects = ActiveStagingList::new();

        let span = tracing::debug_span!("render_test", node = %id);
        let _enter = span.enter();
        let result = {
            let mut ctx = RenderContext {
                session: &session,
                tree: &mut tree,
                subtree: &mut subtree,
                workers: &mut workers,
                side_effects: &mut side_effects,
                token: &token,
                sink: ActionSink::new(handle, queue, Arc::new(AtomicBool::new(true))),
                stubs: Some(&mut self.stubs),
            };
            self.workflow.render(&self.props, &self.state, &mut ctx)
        };
        let rendering = result.map_err(|err| {
            WorkflowError::from_user(err, |source| WorkflowError::Render {
                node: id.to_string(),
                source,
            })
        })?;
        self.stubs.ensure_exhausted()?;
        tracing::debug!(calls = self.stubs.calls.len(), "Render test pass finished");

        Ok(RenderTestResult {
            rendering,
            calls: self.stubs.calls,
            props: self.props,
            state: self.state,
            receiver,
        })
    }
}

/// What one stubbed pass produced, plus the state actions apply to.
pub struct RenderTestResult<W: Workflow> {
    rendering: W::Rendering,
    calls: Vec<RenderCall>,
    props: W::Props,
    state: W::State,
    receiver: QueueReceiver,
}

impl<W: Workflow> RenderTestResult<W> {
    pub fn rendering(&self) -> &W::Rendering {
        &self.rendering
    }

    pub fn calls(&self) -> &[RenderCall] {
        &self.calls
    }

    pub fn state(&self) -> &W::State {
        &self.state
    }

    pub fn into_state(self) -> W::State {
        self.state
    }

    /// Apply the oldest queued action to the held state. `None` when
    /// nothing is queued.
    pub fn apply_next_action(&mut self) -> WorkflowResult<Option<ActionApplied<W::Output>>> {
        let Ok(item) = self.receiver.try_recv() else {
            return Ok(None);
        };
        let QueuedItem::Action { action, .. } = item else {
            return Err(unexpected("Stubbed pass queued a worker item".to_string()));
        };
        let action = action
            .downcast::<ActionFor<W>>()
            .map_err(|_| unexpected("Queued action targets a different workflow type".to_string()))?;
        let name = action.name().to_string();
        let applied = (*action).apply_to(&self.props, &mut self.state).map_err(|err| {
            WorkflowError::from_user(err, |source| WorkflowError::Action {
                node: "render test".to_string(),
                action: name,
                source,
            })
        })?;
        Ok(Some(applied))
    }
}

impl<W: Workflow> std::fmt::Debug for RenderTestResult<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderTestResult")
            .field("calls", &self.calls)
            .finish_non_exhaustive()
    }
}
