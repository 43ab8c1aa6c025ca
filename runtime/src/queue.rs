//! The runtime's single action queue and the handles that feed it.
//!
//! Every sink, event handler and worker task of one runner shares the same
//! unbounded channel, so items are applied in global send order regardless
//! of which node they target.

use std::any::Any;
use std::borrow::Cow;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use workflow_core::{Sink, Updater, WorkflowAction};

use crate::arena::NodeHandle;

pub(crate) type TaskId = u64;

pub(crate) enum QueuedItem {
    /// A boxed `WorkflowAction` for the target node's workflow type.
    Action {
        target: NodeHandle,
        action: Box<dyn Any + Send>,
    },
    WorkerOutput {
        target: NodeHandle,
        task: TaskId,
        value: Box<dyn Any + Send>,
    },
    WorkerFailed {
        target: NodeHandle,
        task: TaskId,
        error: anyhow::Error,
    },
}

pub(crate) type QueueSender = mpsc::UnboundedSender<QueuedItem>;
pub(crate) type QueueReceiver = mpsc::UnboundedReceiver<QueuedItem>;

/// Sends actions to one node.
///
/// Once the node is torn down every send is a silent no-op.
pub struct ActionSink<P, S, O> {
    target: NodeHandle,
    queue: QueueSender,
    alive: Arc<AtomicBool>,
    _marker: PhantomData<fn() -> (P, S, O)>,
}

impl<P, S, O> ActionSink<P, S, O> {
    pub(crate) fn new(target: NodeHandle, queue: QueueSender, alive: Arc<AtomicBool>) -> Self {
        Self {
            target,
            queue,
            alive,
            _marker: PhantomData,
        }
    }

    pub fn target(&self) -> NodeHandle {
        self.target
    }

    pub fn is_closed(&self) -> bool {
        !self.alive.load(Ordering::Acquire) || self.queue.is_closed()
    }
}

impl<P, S, O> Clone for ActionSink<P, S, O> {
    fn clone(&self) -> Self {
        Self {
            target: self.target,
            queue: self.queue.clone(),
            alive: self.alive.clone(),
            _marker: PhantomData,
        }
    }
}

impl<P, S, O> fmt::Debug for ActionSink<P, S, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionSink")
            .field("target", &self.target)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<P, S, O> Sink<WorkflowAction<P, S, O>> for ActionSink<P, S, O>
where
    P: 'static,
    S: 'static,
    O: 'static,
{
    fn send(&self, action: WorkflowAction<P, S, O>) {
        if !self.alive.load(Ordering::Acquire) {
            tracing::trace!(target_node = ?self.target, action = action.name(), "Dropping action sent to stopped node");
            return;
        }
        let item = QueuedItem::Action {
            target: self.target,
            action: Box::new(action),
        };
        if self.queue.send(item).is_err() {
            tracing::trace!(target_node = ?self.target, "Dropping action: runtime is gone");
        }
    }
}

/// A cloneable callback that turns an event into a queued action.
pub struct EventHandler<E> {
    name: Cow<'static, str>,
    handler: Arc<dyn Fn(E) + Send + Sync>,
}

impl<E> EventHandler<E> {
    pub(crate) fn new(name: Cow<'static, str>, handler: impl Fn(E) + Send + Sync + 'static) -> Self {
        Self {
            name,
            handler: Arc::new(handler),
        }
    }

    pub fn call(&self, event: E) {
        (self.handler)(event)
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl EventHandler<()> {
    pub fn fire(&self) {
        self.call(())
    }
}

impl<E> Clone for EventHandler<E> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            handler: self.handler.clone(),
        }
    }
}

impl<E> fmt::Debug for EventHandler<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EventHandler").field(&self.name).finish()
    }
}

impl<E: 'static> Sink<E> for EventHandler<E> {
    fn send(&self, event: E) {
        self.call(event)
    }
}

pub(crate) fn event_handler<P, S, O, E, F>(
    sink: ActionSink<P, S, O>,
    name: Cow<'static, str>,
    update: F,
) -> EventHandler<E>
where
    P: 'static,
    S: 'static,
    O: 'static,
    E: Send + 'static,
    F: Fn(&mut Updater<'_, P, S, O>, E) + Send + Sync + 'static,
{
    let update = Arc::new(update);
    let action_name = name.clone();
    EventHandler::new(name, move |event: E| {
        let update = update.clone();
        sink.send(WorkflowAction::new(action_name.clone(), move |updater| {
            update(updater, event)
        }));
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena;

    fn handle() -> NodeHandle {
        let mut arena: Arena<()> = Arena::new();
        arena.reserve()
    }

    #[test]
    fn test_sink_enqueues_in_send_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let alive = Arc::new(AtomicBool::new(true));
        let sink: ActionSink<(), i32, ()> = ActionSink::new(handle(), tx, alive);

        sink.send(WorkflowAction::new("first", |u| *u.state_mut() += 1));
        sink.clone().send(WorkflowAction::new("second", |u| *u.state_mut() *= 10));

        let mut state = 0;
        for expected in ["first", "second"] {
            match rx.try_recv().unwrap() {
                QueuedItem::Action { action, .. } => {
                    let action = action
                        .downcast::<WorkflowAction<(), i32, ()>>()
                        .unwrap();
                    assert_eq!(action.name(), expected);
                    action.apply_to(&(), &mut state).unwrap();
                }
                _ => panic!("expected an action"),
            }
        }
        assert_eq!(state, 10);
    }

    #[test]
    fn test_send_after_close_is_noop() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let alive = Arc::new(AtomicBool::new(true));
        let sink: ActionSink<(), (), ()> = ActionSink::new(handle(), tx, alive.clone());
        alive.store(false, Ordering::Release);

        assert!(sink.is_closed());
        sink.send(WorkflowAction::no_action());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_send_after_runtime_dropped_is_noop() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let sink: ActionSink<(), (), ()> =
            ActionSink::new(handle(), tx, Arc::new(AtomicBool::new(true)));
        assert!(sink.is_closed());
        sink.send(WorkflowAction::no_action());
    }

    #[test]
    fn test_event_handler_builds_named_actions() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink: ActionSink<(), Vec<String>, ()> =
            ActionSink::new(handle(), tx, Arc::new(AtomicBool::new(true)));
        let on_text = event_handler(sink, Cow::Borrowed("onText"), |u, text: String| {
            u.state_mut().push(text)
        });
        assert_eq!(on_text.name(), "onText");
        on_text.call("a".into());
        on_text.clone().send("b".into());

        let mut state = Vec::new();
        while let Ok(QueuedItem::Action { action, .. }) = rx.try_recv() {
            let action = action
                .downcast::<WorkflowAction<(), Vec<String>, ()>>()
                .unwrap();
            assert_eq!(action.name(), "onText");
            action.apply_to(&(), &mut state).unwrap();
        }
        assert_eq!(state, vec!["a".to_string(), "b".to_string()]);
    }
}
