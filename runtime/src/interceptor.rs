//! # Interceptor: Observing Node Lifecycles
//!
//! Interceptors see every node session start and stop, every render pass,
//! every applied action and every snapshot. They observe only; they cannot
//! change what the runtime does.

use std::sync::Arc;
use std::time::Duration;

use workflow_core::WorkflowIdentifier;

/// Describes one node for as long as it lives in the tree.
#[derive(Debug, Clone)]
pub struct WorkflowSession {
    pub identifier: WorkflowIdentifier,
    pub render_key: String,
    /// Unique per runtime; assigned in creation order.
    pub session_id: u64,
    pub parent_id: Option<u64>,
    pub depth: usize,
    pub runtime_id: uuid::Uuid,
}

impl WorkflowSession {
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

pub trait WorkflowInterceptor: Send + Sync {
    fn on_session_started(&self, _session: &WorkflowSession) {}

    fn on_render(&self, _session: &WorkflowSession, _elapsed: Duration) {}

    fn on_action_applied(
        &self,
        _session: &WorkflowSession,
        _action: &str,
        _state_changed: bool,
        _emitted_output: bool,
    ) {
    }

    fn on_snapshot(&self, _session: &WorkflowSession, _has_snapshot: bool) {}

    fn on_session_stopped(&self, _session: &WorkflowSession) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopInterceptor;

impl WorkflowInterceptor for NoopInterceptor {}

/// Logs every lifecycle event through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingInterceptor;

impl WorkflowInterceptor for TracingInterceptor {
    fn on_session_started(&self, session: &WorkflowSession) {
        tracing::debug!(
            workflow = %session.identifier,
            key = %session.render_key,
            session = session.session_id,
            parent = ?session.parent_id,
            depth = session.depth,
            "Workflow session started"
        );
    }

    fn on_render(&self, session: &WorkflowSession, elapsed: Duration) {
        tracing::debug!(
            workflow = %session.identifier,
            session = session.session_id,
            ?elapsed,
            "Rendered"
        );
    }

    fn on_action_applied(
        &self,
        session: &WorkflowSession,
        action: &str,
        state_changed: bool,
        emitted_output: bool,
    ) {
        tracing::debug!(
            workflow = %session.identifier,
            session = session.session_id,
            action,
            state_changed,
            emitted_output,
            "Action applied"
        );
    }

    fn on_snapshot(&self, session: &WorkflowSession, has_snapshot: bool) {
        tracing::trace!(
            workflow = %session.identifier,
            session = session.session_id,
            has_snapshot,
            "Snapshot taken"
        );
    }

    fn on_session_stopped(&self, session: &WorkflowSession) {
        tracing::debug!(
            workflow = %session.identifier,
            key = %session.render_key,
            session = session.session_id,
            "Workflow session stopped"
        );
    }
}

/// Fans every event out to each interceptor, in order.
#[derive(Default, Clone)]
pub struct ChainedInterceptor {
    interceptors: Vec<Arc<dyn WorkflowInterceptor>>,
}

impl ChainedInterceptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, interceptor: impl WorkflowInterceptor + 'static) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    pub fn with_shared(mut self, interceptor: Arc<dyn WorkflowInterceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }
}

impl WorkflowInterceptor for ChainedInterceptor {
    fn on_session_started(&self, session: &WorkflowSession) {
        for i in &self.interceptors {
            i.on_session_started(session);
        }
    }

    fn on_render(&self, session: &WorkflowSession, elapsed: Duration) {
        for i in &self.interceptors {
            i.on_render(session, elapsed);
        }
    }

    fn on_action_applied(
        &self,
        session: &WorkflowSession,
        action: &str,
        state_changed: bool,
        emitted_output: bool,
    ) {
        for i in &self.interceptors {
            i.on_action_applied(session, action, state_changed, emitted_output);
        }
    }

    fn on_snapshot(&self, session: &WorkflowSession, has_snapshot: bool) {
        for i in &self.interceptors {
            i.on_snapshot(session, has_snapshot);
        }
    }

    fn on_session_stopped(&self, session: &WorkflowSession) {
        for i in &self.interceptors {
            i.on_session_stopped(session);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recording(Mutex<Vec<String>>);

    impl WorkflowInterceptor for Arc<Recording> {
        fn on_session_started(&self, session: &WorkflowSession) {
            self.0.lock().push(format!("start:{}", session.identifier));
        }

        fn on_action_applied(&self, _: &WorkflowSession, action: &str, changed: bool, _: bool) {
            self.0.lock().push(format!("action:{action}:{changed}"));
        }
    }

    fn session() -> WorkflowSession {
        WorkflowSession {
            identifier: WorkflowIdentifier::direct("Counter"),
            render_key: String::new(),
            session_id: 0,
            parent_id: None,
            depth: 0,
            runtime_id: uuid::Uuid::nil(),
        }
    }

    #[test]
    fn test_chained_fans_out_in_order() {
        let first = Arc::new(Recording::default());
        let second = Arc::new(Recording::default());
        let chain = ChainedInterceptor::new()
            .with(first.clone())
            .with(TracingInterceptor)
            .with(second.clone());
        assert_eq!(chain.len(), 3);

        let session = session();
        assert!(session.is_root());
        chain.on_session_started(&session);
        chain.on_action_applied(&session, "increment", true, false);
        chain.on_render(&session, Duration::from_millis(1));

        let expected = vec!["start:Counter".to_string(), "action:increment:true".to_string()];
        assert_eq!(*first.0.lock(), expected);
        assert_eq!(*second.0.lock(), expected);
    }
}
