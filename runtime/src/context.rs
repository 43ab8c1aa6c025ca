//! # RenderContext: What a Render Function May Do
//!
//! A render function reads its props and state from its arguments and uses
//! the context to:
//!
//! - render child workflows and receive their renderings
//! - declare workers and side effects that should run while it keeps
//!   declaring them
//! - build event handlers and sinks that enqueue actions later
//!
//! Workers and side effects are only started after the render function
//! returns.

use std::any::{Any, TypeId};
use std::borrow::Cow;
use std::future::Future;

use futures_util::{FutureExt, StreamExt};
use tokio_util::sync::CancellationToken;
use workflow_core::{
    Updater, Worker, WorkflowAction, WorkflowError, WorkflowNodeId, WorkflowResult,
};

use crate::arena::NodeHandle;
use crate::interceptor::WorkflowSession;
use crate::node::{ParentLink, WorkflowNode, render_node};
use crate::queue::{ActionSink, EventHandler, event_handler};
use crate::render_tester::RenderStubs;
use crate::subtree::{ActiveStagingList, ChildEntry, SubtreeManager};
use crate::tasks::{OutputHandler, SideEffectEntry, WorkerEntry};
use crate::tree::TreeCore;
use crate::workflow::Workflow;

pub struct RenderContext<'a, P, S, O> {
    pub(crate) session: &'a WorkflowSession,
    pub(crate) tree: &'a mut TreeCore,
    pub(crate) subtree: &'a mut SubtreeManager<P, S, O>,
    pub(crate) workers: &'a mut ActiveStagingList<WorkerEntry<P, S, O>>,
    pub(crate) side_effects: &'a mut ActiveStagingList<SideEffectEntry>,
    pub(crate) token: &'a CancellationToken,
    pub(crate) sink: ActionSink<P, S, O>,
    /// Set only by [`RenderTester`](crate::render_tester::RenderTester).
    pub(crate) stubs: Option<&'a mut RenderStubs>,
}

impl<'a, P, S, O> RenderContext<'a, P, S, O>
where
    P: 'static,
    S: 'static,
    O: 'static,
{
    /// A sink that enqueues actions against this node.
    pub fn action_sink(&self) -> ActionSink<P, S, O> {
        self.sink.clone()
    }

    pub fn session(&self) -> &WorkflowSession {
        self.session
    }

    pub fn node_handle(&self) -> NodeHandle {
        self.sink.target()
    }

    /// Build a handler that turns each event into a named action.
    pub fn event_handler<E, F>(&self, name: impl Into<Cow<'static, str>>, update: F) -> EventHandler<E>
    where
        E: Send + 'static,
        F: Fn(&mut Updater<'_, P, S, O>, E) + Send + Sync + 'static,
    {
        event_handler(self.sink.clone(), name.into(), update)
    }

    pub fn event_handler0<F>(&self, name: impl Into<Cow<'static, str>>, update: F) -> EventHandler<()>
    where
        F: Fn(&mut Updater<'_, P, S, O>) + Send + Sync + 'static,
    {
        self.event_handler(name, move |updater, ()| update(updater))
    }

    /// Render `child` under `key`, reusing the node from the previous pass
    /// when the same workflow kind was rendered under the same key.
    ///
    /// `handler` maps the child's outputs into actions for this node; the
    /// latest handler always wins.
    pub fn render_child<C, H>(
        &mut self,
        child: C,
        props: C::Props,
        key: &str,
        handler: H,
    ) -> WorkflowResult<C::Rendering>
    where
        C: Workflow,
        H: Fn(C::Output) -> WorkflowAction<P, S, O> + Send + 'static,
    {
        let identifier = child.identifier(&mut self.tree.registry);
        let id = WorkflowNodeId::new(identifier, key);
        if let Some(stubs) = self.stubs.as_deref_mut() {
            return stubs.render_child::<C, P, S, O>(&id, &self.sink, handler);
        }
        if self.subtree.is_staged(&id) {
            return Err(WorkflowError::DuplicateChildKey {
                identifier: id.identifier.describe(),
                key: key.to_string(),
            });
        }

        let handler: OutputHandler<P, S, O> = Box::new(move |output: Box<dyn Any + Send>| {
            output.downcast::<C::Output>().ok().map(|output| handler(*output))
        });

        let store = &self.tree.store;
        if let Some(entry) = self.subtree.claim(&id, |handle| {
            store
                .get(handle)
                .is_some_and(|node| node.as_any().is::<WorkflowNode<C>>())
        }) {
            entry.handler = handler;
            let handle = entry.handle;
            return render_node(self.tree, handle, Some(child), props);
        }

        let fragment = self.subtree.take_fragment(&id);
        let parent = ParentLink {
            handle: self.sink.target(),
            session: self.session,
            token: self.token,
        };
        let handle = WorkflowNode::create(
            self.tree,
            Some(parent),
            id.clone(),
            child,
            props.clone(),
            fragment,
        )?;
        self.subtree.children.stage(ChildEntry {
            id,
            handle,
            handler,
        });
        render_node::<C>(self.tree, handle, None, props)
    }

    /// Render a child whose outputs this node ignores.
    pub fn render_child_no_output<C>(
        &mut self,
        child: C,
        props: C::Props,
        key: &str,
    ) -> WorkflowResult<C::Rendering>
    where
        C: Workflow,
    {
        self.render_child(child, props, key, |_| WorkflowAction::no_action())
    }

    /// Keep `worker` running while render passes keep declaring an
    /// equivalent worker under `key`.
    pub fn running_worker<K, H>(&mut self, worker: K, key: &str, handler: H) -> WorkflowResult<()>
    where
        K: Worker,
        H: Fn(K::Output) -> WorkflowAction<P, S, O> + Send + 'static,
    {
        if let Some(stubs) = self.stubs.as_deref_mut() {
            return stubs.running_worker(&worker, key, &self.sink, handler);
        }
        let worker_type = TypeId::of::<K>();
        if self
            .workers
            .staging_contains(|entry| entry.worker_type == worker_type && entry.key == key)
        {
            return Err(WorkflowError::DuplicateWorkerKey {
                worker: worker.describe(),
                key: key.to_string(),
            });
        }

        let handler: OutputHandler<P, S, O> = Box::new(move |value: Box<dyn Any + Send>| {
            value.downcast::<K::Output>().ok().map(|value| handler(*value))
        });

        let same_work = |entry: &WorkerEntry<P, S, O>| {
            entry.worker_type == worker_type
                && entry.key == key
                && entry
                    .worker
                    .downcast_ref::<K>()
                    .is_some_and(|running| running.does_same_work_as(&worker))
        };
        if let Some(entry) = self.workers.claim(same_work) {
            entry.handler = handler;
            return Ok(());
        }

        let description = worker.describe();
        let stream = worker
            .run()
            .map(|item| item.map(|value| Box::new(value) as Box<dyn Any + Send>))
            .boxed();
        let task = self.tree.next_task_id();
        self.workers.stage(WorkerEntry::new(
            key.to_string(),
            worker_type,
            Box::new(worker),
            description,
            task,
            handler,
            stream,
            self.token.child_token(),
        ));
        Ok(())
    }

    /// Run `effect` once for as long as render passes keep declaring `key`.
    pub fn running_side_effect<F>(&mut self, key: &str, effect: F) -> WorkflowResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if let Some(stubs) = self.stubs.as_deref_mut() {
            return stubs.running_side_effect(key);
        }
        if self.side_effects.staging_contains(|entry| entry.key == key) {
            return Err(WorkflowError::DuplicateSideEffectKey {
                key: key.to_string(),
            });
        }
        let token = self.token;
        self.side_effects.retain_or_create(
            |entry| entry.key == key,
            || SideEffectEntry::new(key.to_string(), effect.boxed(), token.child_token()),
        );
        Ok(())
    }
}
