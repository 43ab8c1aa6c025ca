//! # WorkflowNode: One Live Workflow in the Tree
//!
//! A node owns its workflow's state, its children (by handle, through the
//! [`SubtreeManager`]) and the workers and side effects its last render
//! declared. The runner only sees nodes through [`ErasedNode`], which hides
//! the workflow's props, state and output types behind `dyn Any`.

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use workflow_core::{
    ActionApplied, TreeSnapshot, WorkflowError, WorkflowNodeId, WorkflowResult, short_type_name,
};

use crate::arena::{NodeHandle, NodeStore};
use crate::context::RenderContext;
use crate::interceptor::{WorkflowInterceptor, WorkflowSession};
use crate::queue::{ActionSink, TaskId};
use crate::subtree::{ActiveStagingList, SubtreeManager};
use crate::tasks::{SideEffectEntry, WorkerEntry};
use crate::tree::TreeCore;
use crate::workflow::{ActionFor, Workflow};

pub(crate) type AnyBox = Box<dyn Any + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeLifecycle {
    Unstarted,
    Running,
    Stopped,
}

/// What a new child inherits from the node rendering it.
#[derive(Clone, Copy)]
pub(crate) struct ParentLink<'a> {
    pub handle: NodeHandle,
    pub session: &'a WorkflowSession,
    pub token: &'a CancellationToken,
}

type Tasks<W> = ActiveStagingList<
    WorkerEntry<<W as Workflow>::Props, <W as Workflow>::State, <W as Workflow>::Output>,
>;

pub struct WorkflowNode<W: Workflow> {
    handle: NodeHandle,
    id: WorkflowNodeId,
    parent: Option<NodeHandle>,
    session: WorkflowSession,
    workflow: W,
    props: W::Props,
    state: W::State,
    lifecycle: NodeLifecycle,
    subtree: SubtreeManager<W::Props, W::State, W::Output>,
    workers: Tasks<W>,
    side_effects: ActiveStagingList<SideEffectEntry>,
    alive: Arc<AtomicBool>,
    token: CancellationToken,
    cached_rendering: Option<W::Rendering>,
    self_dirty: bool,
    subtree_dirty: bool,
}

impl<W: Workflow> WorkflowNode<W> {
    /// Build a node, seed its state and install it in the arena.
    ///
    /// `fragment` is the restored snapshot for this node, if any; its child
    /// entries seed the new node's snapshot cache.
    pub(crate) fn create(
        tree: &mut TreeCore,
        parent: Option<ParentLink<'_>>,
        id: WorkflowNodeId,
        workflow: W,
        props: W::Props,
        fragment: Option<TreeSnapshot>,
    ) -> WorkflowResult<NodeHandle> {
        let handle = tree.store.reserve();
        let (own_snapshot, restored_children) = match fragment {
            Some(mut fragment) => (fragment.take_workflow_snapshot(), fragment.into_children()),
            None => (None, Vec::new()),
        };
        let own_snapshot = own_snapshot.filter(|snapshot| !snapshot.is_empty());

        let state = match workflow.initial_state(&props, own_snapshot.as_ref()) {
            Ok(state) => state,
            Err(err) => {
                tree.store.remove(handle);
                return Err(WorkflowError::from_user(err, |source| {
                    WorkflowError::InitialState {
                        node: id.to_string(),
                        source,
                    }
                }));
            }
        };

        let session = WorkflowSession {
            identifier: id.identifier.clone(),
            render_key: id.name.clone(),
            session_id: tree.next_session_id(),
            parent_id: parent.map(|p| p.session.session_id),
            depth: parent.map_or(0, |p| p.session.depth + 1),
            runtime_id: tree.runtime_id,
        };
        let token = match parent {
            Some(parent) => parent.token.child_token(),
            None => tree.root_token.child_token(),
        };
        tracing::debug!(
            node = %id,
            ?handle,
            restored = own_snapshot.is_some(),
            "Creating workflow node"
        );
        tree.interceptor.on_session_started(&session);

        let node = WorkflowNode {
            handle,
            id,
            parent: parent.map(|p| p.handle),
            session,
            workflow,
            props,
            state,
            lifecycle: NodeLifecycle::Unstarted,
            subtree: SubtreeManager::new(restored_children),
            workers: ActiveStagingList::new(),
            side_effects: ActiveStagingList::new(),
            alive: Arc::new(AtomicBool::new(true)),
            token,
            cached_rendering: None,
            self_dirty: true,
            subtree_dirty: true,
        };
        tree.store.put_back(handle, Box::new(node));
        Ok(handle)
    }

    fn is_dirty(&self) -> bool {
        self.self_dirty || self.subtree_dirty
    }

    /// One render pass over this node. `update` replaces the workflow value
    /// the parent handed in last time.
    pub(crate) fn render(
        &mut self,
        tree: &mut TreeCore,
        update: Option<W>,
        props: W::Props,
    ) -> WorkflowResult<W::Rendering> {
        if self.lifecycle == NodeLifecycle::Stopped {
            return Err(WorkflowError::NodeStopped {
                node: self.id.to_string(),
            });
        }
        if let Some(workflow) = update {
            self.workflow = workflow;
        }
        let props_changed = props != self.props;
        if props_changed {
            self.workflow
                .on_props_changed(&self.props, &props, &mut self.state);
            self.props = props;
        }

        if tree.config.partial_tree_rendering() && !props_changed && !self.is_dirty() {
            if let Some(rendering) = &self.cached_rendering {
                tracing::trace!(node = %self.id, "Reusing cached rendering");
                return Ok(rendering.clone());
            }
        }

        let span = tracing::debug_span!("render", node = %self.id);
        let _enter = span.enter();
        let started = Instant::now();

        let result = {
            let sink = ActionSink::new(self.handle, tree.queue.clone(), self.alive.clone());
            let mut ctx = RenderContext {
                session: &self.session,
                tree: &mut *tree,
                subtree: &mut self.subtree,
                workers: &mut self.workers,
                side_effects: &mut self.side_effects,
                token: &self.token,
                sink,
                stubs: None,
            };
            self.workflow.render(&self.props, &self.state, &mut ctx)
        };
        let rendering = result.map_err(|err| {
            WorkflowError::from_user(err, |source| WorkflowError::Render {
                node: self.id.to_string(),
                source,
            })
        })?;

        self.commit(tree)?;

        self.lifecycle = NodeLifecycle::Running;
        self.self_dirty = false;
        self.subtree_dirty = false;
        if tree.config.partial_tree_rendering() {
            self.cached_rendering = Some(rendering.clone());
        }
        tree.interceptor.on_render(&self.session, started.elapsed());
        Ok(rendering)
    }

    /// Tear down what the pass stopped declaring, then start what it added.
    fn commit(&mut self, tree: &mut TreeCore) -> WorkflowResult<()> {
        for stale in self.subtree.commit() {
            tree.teardown(stale.handle);
        }
        for worker in self.workers.commit_staging() {
            worker.cancel();
        }
        for effect in self.side_effects.commit_staging() {
            effect.cancel();
        }
        for worker in self.workers.active_mut() {
            worker.start(self.handle, &tree.queue)?;
        }
        for effect in self.side_effects.active_mut() {
            effect.start()?;
        }
        Ok(())
    }

    fn apply(
        &mut self,
        action: ActionFor<W>,
        interceptor: &dyn WorkflowInterceptor,
    ) -> WorkflowResult<ActionApplied<AnyBox>> {
        if self.lifecycle == NodeLifecycle::Stopped {
            return Err(WorkflowError::NodeStopped {
                node: self.id.to_string(),
            });
        }
        let name = action.name().to_string();
        let span = tracing::debug_span!("apply_action", node = %self.id, action = %name);
        let _enter = span.enter();

        let applied = action
            .apply_to(&self.props, &mut self.state)
            .map_err(|err| {
                WorkflowError::from_user(err, |source| WorkflowError::Action {
                    node: self.id.to_string(),
                    action: name.clone(),
                    source,
                })
            })?;
        if applied.state_changed {
            self.self_dirty = true;
        }
        interceptor.on_action_applied(
            &self.session,
            &name,
            applied.state_changed,
            applied.output.is_some(),
        );
        Ok(applied.map_output(|output| Box::new(output) as AnyBox))
    }
}

/// The type-erased view of a [`WorkflowNode`] the arena stores.
pub(crate) trait ErasedNode: Send + Any {
    fn parent(&self) -> Option<NodeHandle>;
    fn node_id(&self) -> &WorkflowNodeId;
    fn lifecycle(&self) -> NodeLifecycle;

    /// Apply a boxed `WorkflowAction` of this node's workflow type.
    fn apply_action(
        &mut self,
        action: AnyBox,
        interceptor: &dyn WorkflowInterceptor,
    ) -> WorkflowResult<ActionApplied<AnyBox>>;

    /// Map a worker's value into a boxed action, if the worker is still live.
    fn worker_action(&self, task: TaskId, value: AnyBox) -> Option<AnyBox>;
    fn worker_description(&self, task: TaskId) -> Option<String>;

    /// Map a child's output into a boxed action through the child's handler.
    fn child_output_action(&self, child: NodeHandle, output: AnyBox) -> Option<AnyBox>;

    fn mark_subtree_dirty(&mut self);
    fn snapshot(&self, store: &NodeStore, interceptor: &dyn WorkflowInterceptor) -> TreeSnapshot;
    fn take_children(&mut self) -> Vec<NodeHandle>;
    fn stop(&mut self, interceptor: &dyn WorkflowInterceptor);

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<W: Workflow> ErasedNode for WorkflowNode<W> {
    fn parent(&self) -> Option<NodeHandle> {
        self.parent
    }

    fn node_id(&self) -> &WorkflowNodeId {
        &self.id
    }

    fn lifecycle(&self) -> NodeLifecycle {
        self.lifecycle
    }

    fn apply_action(
        &mut self,
        action: AnyBox,
        interceptor: &dyn WorkflowInterceptor,
    ) -> WorkflowResult<ActionApplied<AnyBox>> {
        match action.downcast::<ActionFor<W>>() {
            Ok(action) => self.apply(*action, interceptor),
            Err(_) => Err(WorkflowError::IncompatibleNode {
                node: self.id.to_string(),
                requested: format!("an action for {}", short_type_name::<W>()),
            }),
        }
    }

    fn worker_action(&self, task: TaskId, value: AnyBox) -> Option<AnyBox> {
        let worker = self.workers.active().iter().find(|w| w.task == task)?;
        (worker.handler)(value).map(|action| Box::new(action) as AnyBox)
    }

    fn worker_description(&self, task: TaskId) -> Option<String> {
        self.workers
            .active()
            .iter()
            .find(|w| w.task == task)
            .map(|w| w.description.clone())
    }

    fn child_output_action(&self, child: NodeHandle, output: AnyBox) -> Option<AnyBox> {
        let handler = self.subtree.find_handler(child)?;
        handler(output).map(|action| Box::new(action) as AnyBox)
    }

    fn mark_subtree_dirty(&mut self) {
        self.subtree_dirty = true;
    }

    fn snapshot(&self, store: &NodeStore, interceptor: &dyn WorkflowInterceptor) -> TreeSnapshot {
        let own = self.workflow.snapshot_state(&self.state);
        interceptor.on_snapshot(&self.session, own.is_some());
        let children = self
            .subtree
            .children
            .active()
            .iter()
            .filter_map(|entry| {
                store
                    .get(entry.handle)
                    .map(|child| (entry.id.clone(), child.snapshot(store, interceptor)))
            })
            .collect();
        TreeSnapshot::new(own, children)
    }

    fn take_children(&mut self) -> Vec<NodeHandle> {
        self.subtree
            .children
            .drain_all()
            .into_iter()
            .map(|entry| entry.handle)
            .collect()
    }

    fn stop(&mut self, interceptor: &dyn WorkflowInterceptor) {
        if self.lifecycle == NodeLifecycle::Stopped {
            return;
        }
        tracing::debug!(node = %self.id, handle = ?self.handle, "Tearing down workflow node");
        self.lifecycle = NodeLifecycle::Stopped;
        self.alive.store(false, Ordering::Release);
        for worker in self.workers.drain_all() {
            worker.cancel();
        }
        for effect in self.side_effects.drain_all() {
            effect.cancel();
        }
        self.token.cancel();
        self.cached_rendering = None;
        interceptor.on_session_stopped(&self.session);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Check a node out of the arena, render it and put it back.
pub(crate) fn render_node<W: Workflow>(
    tree: &mut TreeCore,
    handle: NodeHandle,
    update: Option<W>,
    props: W::Props,
) -> WorkflowResult<W::Rendering> {
    let Some(mut boxed) = tree.store.take(handle) else {
        return Err(WorkflowError::NodeStopped {
            node: format!("{handle:?}"),
        });
    };
    let result = match boxed.as_any_mut().downcast_mut::<WorkflowNode<W>>() {
        Some(node) => node.render(tree, update, props),
        None => Err(WorkflowError::IncompatibleNode {
            node: boxed.node_id().to_string(),
            requested: short_type_name::<W>().to_string(),
        }),
    };
    tree.store.put_back(handle, boxed);
    result
}
