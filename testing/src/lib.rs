//! Headless harness for driving a workflow tree from tests.
//!
//! [`HeadlessRuntime`] wraps a [`WorkflowRunner`] and re-renders after every
//! step, recording the latest rendering and every root output.
//! [`RecordingInterceptor`] captures node lifecycle events so tests can
//! assert on creation and teardown. [`WorkerTester`] pulls a single worker's
//! stream outside any tree, and [`RenderTester`] runs one stubbed render
//! pass.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::sync::watch;
use workflow_core::{
    RuntimeConfig, TreeSnapshot, Worker, WorkerStream, WorkflowError, WorkflowResult,
};
use workflow_runtime::{
    ActionProcessingResult, NoopInterceptor, RenderingAndSnapshot, Workflow, WorkflowInterceptor,
    WorkflowRunner, WorkflowSession,
};

pub use workflow_runtime::{RenderCall, RenderTestResult, RenderTester};

// ============== Harness ==============

pub struct HeadlessOptions {
    pub config: RuntimeConfig,
    pub snapshot: Option<TreeSnapshot>,
    pub interceptor: Arc<dyn WorkflowInterceptor>,
    /// Render every pass twice and fail if the second pass changed the tree.
    pub render_idempotency_check: bool,
}

impl Default for HeadlessOptions {
    fn default() -> Self {
        Self {
            config: RuntimeConfig::default(),
            snapshot: None,
            interceptor: Arc::new(NoopInterceptor),
            render_idempotency_check: false,
        }
    }
}

impl HeadlessOptions {
    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_snapshot(mut self, snapshot: TreeSnapshot) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    pub fn with_interceptor(mut self, interceptor: Arc<dyn WorkflowInterceptor>) -> Self {
        self.interceptor = interceptor;
        self
    }

    pub fn with_render_idempotency_check(mut self) -> Self {
        self.render_idempotency_check = true;
        self
    }
}

/// What one harness step did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepOutcome {
    pub props_updated: bool,
    pub state_changed: bool,
    pub emitted_output: bool,
}

pub struct HeadlessRuntime<W: Workflow> {
    runner: WorkflowRunner<W>,
    props: watch::Sender<W::Props>,
    rendering: W::Rendering,
    snapshot: TreeSnapshot,
    render_count: usize,
    outputs: Vec<W::Output>,
    idempotency: Option<Arc<RenderIdempotencyChecker>>,
}

impl<W: Workflow> HeadlessRuntime<W> {
    /// Create the tree and render it once.
    pub fn start(workflow: W, props: W::Props) -> WorkflowResult<Self> {
        Self::start_with(workflow, props, HeadlessOptions::default())
    }

    pub fn start_with_snapshot(
        workflow: W,
        props: W::Props,
        snapshot: TreeSnapshot,
    ) -> WorkflowResult<Self> {
        Self::start_with(
            workflow,
            props,
            HeadlessOptions::default().with_snapshot(snapshot),
        )
    }

    pub fn start_with(workflow: W, props: W::Props, options: HeadlessOptions) -> WorkflowResult<Self> {
        let (sender, receiver) = watch::channel(props);
        let idempotency = options
            .render_idempotency_check
            .then(|| Arc::new(RenderIdempotencyChecker::new(options.interceptor.clone())));
        let interceptor: Arc<dyn WorkflowInterceptor> = match &idempotency {
            Some(checker) => checker.clone() as Arc<dyn WorkflowInterceptor>,
            None => options.interceptor,
        };
        let mut runner = WorkflowRunner::new(
            workflow,
            receiver,
            options.snapshot,
            options.config,
            interceptor,
        )?;
        let first = render_pass(&mut runner, idempotency.as_deref())?;
        Ok(Self {
            runner,
            props: sender,
            rendering: first.rendering,
            snapshot: first.snapshot,
            render_count: 1,
            outputs: Vec::new(),
            idempotency,
        })
    }

    /// The latest rendering.
    pub fn rendering(&self) -> &W::Rendering {
        &self.rendering
    }

    /// How many render passes have completed, including the first.
    pub fn render_count(&self) -> usize {
        self.render_count
    }

    /// Publish new props. They are picked up by the next step.
    pub fn send_props(&self, props: W::Props) {
        self.props.send_replace(props);
    }

    /// Wait for one props change or queued item, apply it and re-render.
    pub async fn step(&mut self) -> WorkflowResult<StepOutcome> {
        let result = self.runner.process_action().await?;
        self.finish_step(result)
    }

    /// Like [`step`](Self::step) with an upper bound on the wait. Returns
    /// `None` if nothing arrived in time.
    pub async fn step_within(&mut self, limit: Duration) -> WorkflowResult<Option<StepOutcome>> {
        match tokio::time::timeout(limit, self.runner.process_action()).await {
            Ok(result) => self.finish_step(result?).map(Some),
            Err(_) => Ok(None),
        }
    }

    /// Apply one pending item without waiting. `None` when nothing is
    /// pending.
    pub fn try_step(&mut self) -> WorkflowResult<Option<StepOutcome>> {
        match self.runner.try_process_action()? {
            ActionProcessingResult::Exhausted => Ok(None),
            result => self.finish_step(result).map(Some),
        }
    }

    /// Step until nothing is pending. Returns the number of steps taken.
    pub fn drain(&mut self) -> WorkflowResult<usize> {
        let mut steps = 0;
        while self.try_step()?.is_some() {
            steps += 1;
        }
        Ok(steps)
    }

    /// Every root output so far, oldest first.
    pub fn outputs(&self) -> &[W::Output] {
        &self.outputs
    }

    pub fn take_outputs(&mut self) -> Vec<W::Output> {
        std::mem::take(&mut self.outputs)
    }

    /// Snapshot taken with the latest rendering.
    pub fn snapshot(&self) -> TreeSnapshot {
        self.snapshot.clone()
    }

    pub fn runner(&self) -> &WorkflowRunner<W> {
        &self.runner
    }

    pub fn runner_mut(&mut self) -> &mut WorkflowRunner<W> {
        &mut self.runner
    }

    fn finish_step(
        &mut self,
        result: ActionProcessingResult<W::Output>,
    ) -> WorkflowResult<StepOutcome> {
        let mut outcome = StepOutcome {
            props_updated: matches!(result, ActionProcessingResult::PropsUpdated),
            state_changed: result.state_changed(),
            emitted_output: false,
        };
        let output = result.into_output();

        let next = render_pass(&mut self.runner, self.idempotency.as_deref())?;
        self.rendering = next.rendering;
        self.snapshot = next.snapshot;
        self.render_count += 1;

        if let Some(output) = output {
            outcome.emitted_output = true;
            self.outputs.push(output);
        }
        tracing::debug!(?outcome, renders = self.render_count, "Headless step");
        Ok(outcome)
    }
}

/// Render once, or twice in a row when a checker is installed. Nothing
/// changes between the two passes, so the second must neither start nor stop
/// a node.
fn render_pass<W: Workflow>(
    runner: &mut WorkflowRunner<W>,
    checker: Option<&RenderIdempotencyChecker>,
) -> WorkflowResult<RenderingAndSnapshot<W::Rendering>> {
    let Some(checker) = checker else {
        return runner.next_rendering();
    };
    runner.next_rendering()?;
    let before = checker.lifecycle_changes();
    let again = runner.next_rendering()?;
    let changes = checker.lifecycle_changes() - before;
    if changes > 0 {
        return Err(WorkflowError::Other(anyhow::anyhow!(
            "Render is not idempotent: repeating it started or stopped {changes} node(s)"
        )));
    }
    Ok(again)
}

/// Forwards to the configured interceptor and counts node starts and stops.
pub struct RenderIdempotencyChecker {
    inner: Arc<dyn WorkflowInterceptor>,
    lifecycle_changes: AtomicUsize,
}

impl RenderIdempotencyChecker {
    pub fn new(inner: Arc<dyn WorkflowInterceptor>) -> Self {
        Self {
            inner,
            lifecycle_changes: AtomicUsize::new(0),
        }
    }

    pub fn lifecycle_changes(&self) -> usize {
        self.lifecycle_changes.load(Ordering::SeqCst)
    }
}

impl WorkflowInterceptor for RenderIdempotencyChecker {
    fn on_session_started(&self, session: &WorkflowSession) {
        self.lifecycle_changes.fetch_add(1, Ordering::SeqCst);
        self.inner.on_session_started(session);
    }

    fn on_render(&self, session: &WorkflowSession, elapsed: Duration) {
        self.inner.on_render(session, elapsed);
    }

    fn on_action_applied(
        &self,
        session: &WorkflowSession,
        action: &str,
        state_changed: bool,
        emitted_output: bool,
    ) {
        self.inner
            .on_action_applied(session, action, state_changed, emitted_output);
    }

    fn on_snapshot(&self, session: &WorkflowSession, has_snapshot: bool) {
        self.inner.on_snapshot(session, has_snapshot);
    }

    fn on_session_stopped(&self, session: &WorkflowSession) {
        self.lifecycle_changes.fetch_add(1, Ordering::SeqCst);
        self.inner.on_session_stopped(session);
    }
}

// ============== Workers ==============

/// What a worker's stream did next.
#[derive(Debug)]
pub enum WorkerEvent<T> {
    Output(T),
    Failed(anyhow::Error),
    Finished,
}

/// Runs one worker and pulls its stream by hand.
pub struct WorkerTester<K: Worker> {
    description: String,
    stream: WorkerStream<K::Output>,
    finished: bool,
}

impl<K: Worker> WorkerTester<K> {
    pub fn new(worker: &K) -> Self {
        Self {
            description: worker.describe(),
            stream: worker.run(),
            finished: false,
        }
    }

    pub async fn next_event(&mut self) -> WorkerEvent<K::Output> {
        if self.finished {
            return WorkerEvent::Finished;
        }
        match self.stream.next().await {
            Some(Ok(value)) => WorkerEvent::Output(value),
            Some(Err(err)) => {
                self.finished = true;
                WorkerEvent::Failed(err)
            }
            None => {
                self.finished = true;
                WorkerEvent::Finished
            }
        }
    }

    /// `None` if the worker stayed quiet for `limit`.
    pub async fn next_event_within(&mut self, limit: Duration) -> Option<WorkerEvent<K::Output>> {
        tokio::time::timeout(limit, self.next_event()).await.ok()
    }

    /// The next value, or an error if the worker failed or finished first.
    pub async fn next_output(&mut self) -> anyhow::Result<K::Output> {
        match self.next_event().await {
            WorkerEvent::Output(value) => Ok(value),
            WorkerEvent::Failed(err) => Err(err.context(format!("{} failed", self.description))),
            WorkerEvent::Finished => anyhow::bail!("{} finished without output", self.description),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

// ============== Recording ==============

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Started { workflow: String, key: String },
    Rendered { workflow: String, key: String },
    ActionApplied { workflow: String, action: String, state_changed: bool },
    Stopped { workflow: String, key: String },
}

/// Records lifecycle events. Clones share the same log.
#[derive(Debug, Default, Clone)]
pub struct RecordingInterceptor {
    events: Arc<Mutex<Vec<LifecycleEvent>>>,
}

impl RecordingInterceptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().clone()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    /// Keys of started nodes whose workflow description is `workflow`.
    pub fn started(&self, workflow: &str) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                LifecycleEvent::Started { workflow: w, key } if w == workflow => Some(key.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn stopped(&self, workflow: &str) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                LifecycleEvent::Stopped { workflow: w, key } if w == workflow => Some(key.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn renders_of(&self, workflow: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| matches!(event, LifecycleEvent::Rendered { workflow: w, .. } if w == workflow))
            .count()
    }

    fn push(&self, event: LifecycleEvent) {
        self.events.lock().push(event);
    }
}

impl WorkflowInterceptor for RecordingInterceptor {
    fn on_session_started(&self, session: &WorkflowSession) {
        self.push(LifecycleEvent::Started {
            workflow: session.identifier.describe(),
            key: session.render_key.clone(),
        });
    }

    fn on_render(&self, session: &WorkflowSession, _elapsed: Duration) {
        self.push(LifecycleEvent::Rendered {
            workflow: session.identifier.describe(),
            key: session.render_key.clone(),
        });
    }

    fn on_action_applied(
        &self,
        session: &WorkflowSession,
        action: &str,
        state_changed: bool,
        _emitted_output: bool,
    ) {
        self.push(LifecycleEvent::ActionApplied {
            workflow: session.identifier.describe(),
            action: action.to_string(),
            state_changed,
        });
    }

    fn on_session_stopped(&self, session: &WorkflowSession) {
        self.push(LifecycleEvent::Stopped {
            workflow: session.identifier.describe(),
            key: session.render_key.clone(),
        });
    }
}

pub mod prelude {
    pub use crate::{
        HeadlessOptions, HeadlessRuntime, LifecycleEvent, RecordingInterceptor,
        RenderIdempotencyChecker, RenderTester, StepOutcome, WorkerEvent, WorkerTester,
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use workflow_core::Snapshot;
    use workflow_runtime::{ContextFor, EventHandler};

    struct Echo;

    impl Workflow for Echo {
        type Props = String;
        type State = usize;
        type Output = String;
        type Rendering = (String, usize, EventHandler<()>);

        fn initial_state(&self, _props: &String, _snapshot: Option<&Snapshot>) -> anyhow::Result<usize> {
            Ok(0)
        }

        fn on_props_changed(&self, _old: &String, _new: &String, state: &mut usize) {
            *state += 1;
        }

        fn render(
            &self,
            props: &String,
            changes: &usize,
            ctx: &mut ContextFor<'_, Self>,
        ) -> anyhow::Result<Self::Rendering> {
            let shout = ctx.event_handler0("shout", |u| {
                let loud = u.props().to_uppercase();
                u.set_output(loud);
            });
            Ok((props.clone(), *changes, shout))
        }
    }

    #[tokio::test]
    async fn test_props_and_outputs() {
        let recorder = RecordingInterceptor::new();
        let mut runtime = HeadlessRuntime::start_with(
            Echo,
            "hi".into(),
            HeadlessOptions::default().with_interceptor(Arc::new(recorder.clone())),
        )
        .unwrap();
        assert_eq!(runtime.rendering().0, "hi");

        runtime.send_props("hey".into());
        let outcome = runtime.step().await.unwrap();
        assert!(outcome.props_updated);
        assert_eq!(runtime.rendering().0, "hey");
        assert_eq!(runtime.rendering().1, 1);

        runtime.rendering().2.fire();
        assert_eq!(runtime.drain().unwrap(), 1);
        assert_eq!(runtime.outputs(), &["HEY".to_string()]);
        assert_eq!(runtime.render_count(), 3);
        assert_eq!(recorder.started("Echo"), vec![String::new()]);
        assert_eq!(recorder.renders_of("Echo"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_step_within_times_out_when_idle() {
        let mut runtime = HeadlessRuntime::start(Echo, "x".into()).unwrap();
        let step = runtime.step_within(Duration::from_millis(50)).await.unwrap();
        assert!(step.is_none());
        assert!(runtime.try_step().unwrap().is_none());
    }

    /// Keys its child by a counter that moves on every pass.
    struct Restless {
        passes: AtomicUsize,
    }

    impl Workflow for Restless {
        type Props = ();
        type State = ();
        type Output = ();
        type Rendering = String;

        fn initial_state(&self, _props: &(), _snapshot: Option<&Snapshot>) -> anyhow::Result<()> {
            Ok(())
        }

        fn render(&self, _props: &(), _state: &(), ctx: &mut ContextFor<'_, Self>) -> anyhow::Result<String> {
            let key = self.passes.fetch_add(1, Ordering::SeqCst).to_string();
            let (echoed, _, _) = ctx.render_child(Echo, "x".to_string(), &key, |_| {
                workflow_core::WorkflowAction::no_action()
            })?;
            Ok(echoed)
        }
    }

    #[tokio::test]
    async fn test_idempotency_check_renders_twice_per_step() {
        let recorder = RecordingInterceptor::new();
        let mut runtime = HeadlessRuntime::start_with(
            Echo,
            "hi".into(),
            HeadlessOptions::default()
                .with_interceptor(Arc::new(recorder.clone()))
                .with_render_idempotency_check(),
        )
        .unwrap();
        assert_eq!(recorder.renders_of("Echo"), 2);

        runtime.rendering().2.fire();
        runtime.step().await.unwrap();
        assert_eq!(recorder.renders_of("Echo"), 4);
        assert_eq!(recorder.started("Echo"), vec![String::new()]);
        assert_eq!(runtime.render_count(), 2);
        assert_eq!(runtime.outputs(), &["HI".to_string()]);
    }

    #[tokio::test]
    async fn test_idempotency_check_rejects_render_that_churns_children() {
        let restless = Restless {
            passes: AtomicUsize::new(0),
        };
        let options = HeadlessOptions::default().with_render_idempotency_check();
        let err = match HeadlessRuntime::start_with(restless, (), options) {
            Ok(_) => panic!("churning render accepted"),
            Err(err) => err,
        };
        assert!(err.to_string().contains("not idempotent"), "{err}");

        let restless = Restless {
            passes: AtomicUsize::new(0),
        };
        assert!(HeadlessRuntime::start(restless, ()).is_ok());
    }

    struct Countdown(u32);

    impl Worker for Countdown {
        type Output = u32;

        fn run(&self) -> WorkerStream<u32> {
            let from = self.0;
            futures_util::stream::iter((0..from).rev().map(|n| {
                if n == 0 {
                    Err(anyhow::anyhow!("liftoff"))
                } else {
                    Ok(n)
                }
            }))
            .boxed()
        }
    }

    #[tokio::test]
    async fn test_worker_tester_pulls_outputs_then_failure() {
        let mut worker = WorkerTester::new(&Countdown(3));
        assert_eq!(worker.next_output().await.unwrap(), 2);
        assert!(matches!(worker.next_event().await, WorkerEvent::Output(1)));
        assert!(!worker.is_finished());

        let err = worker.next_output().await.unwrap_err();
        assert_eq!(format!("{err:#}"), "Countdown failed: liftoff");
        assert!(worker.is_finished());
        assert!(matches!(worker.next_event().await, WorkerEvent::Finished));
    }

    #[tokio::test]
    async fn test_worker_tester_reports_finish_without_output() {
        let mut worker = WorkerTester::new(&Countdown(0));
        let err = worker.next_output().await.unwrap_err();
        assert_eq!(err.to_string(), "Countdown finished without output");
    }

    #[test]
    fn test_sink_send_after_stop_is_dropped() {
        let mut runtime = HeadlessRuntime::start(Echo, "x".into()).unwrap();
        let shout = runtime.rendering().2.clone();
        runtime.runner_mut().cancel();
        shout.fire();
        assert!(runtime.try_step().is_err());
    }
}
