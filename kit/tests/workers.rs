use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::stream;
use workflow::core::ErrorKind;
use workflow::prelude::*;
use workflow::runtime::EventHandler;
use workflow::testing::RenderCall;

// ============== Fixtures ==============

/// Records the latest tick of a clock worker while `Props` is true.
struct Clock;

impl Workflow for Clock {
    type Props = bool;
    type State = u64;
    type Output = ();
    type Rendering = u64;

    fn initial_state(&self, _running: &bool, _snapshot: Option<&Snapshot>) -> anyhow::Result<u64> {
        Ok(0)
    }

    fn render(&self, running: &bool, ticks: &u64, ctx: &mut ContextFor<'_, Self>) -> anyhow::Result<u64> {
        if *running {
            let clock = IntervalWorker::new(Duration::from_millis(100)).map(|tick| tick * 10);
            ctx.running_worker(clock, "tick", |tick| {
                WorkflowAction::new("tick", move |u| u.set_state(tick))
            })?;
        }
        Ok(*ticks)
    }
}

/// Subscribes to a feed whose second item is an error.
struct Feed;

impl Workflow for Feed {
    type Props = ();
    type State = Vec<u32>;
    type Output = ();
    type Rendering = Vec<u32>;

    fn initial_state(&self, _props: &(), _snapshot: Option<&Snapshot>) -> anyhow::Result<Vec<u32>> {
        Ok(Vec::new())
    }

    fn render(&self, _props: &(), seen: &Vec<u32>, ctx: &mut ContextFor<'_, Self>) -> anyhow::Result<Vec<u32>> {
        let feed = StreamWorker::try_new("feed", || {
            stream::iter(vec![Ok(7u32), Err(anyhow::anyhow!("feed broke"))])
        });
        ctx.running_worker(feed, "", |value| {
            WorkflowAction::new("received", move |u: &mut workflow::core::Updater<'_, (), Vec<u32>, ()>| u.state_mut().push(value))
        })?;
        Ok(seen.clone())
    }
}

/// Declares the same timer twice.
struct DoubleTimer;

impl Workflow for DoubleTimer {
    type Props = ();
    type State = ();
    type Output = ();
    type Rendering = ();

    fn initial_state(&self, _props: &(), _snapshot: Option<&Snapshot>) -> anyhow::Result<()> {
        Ok(())
    }

    fn render(&self, _props: &(), _state: &(), ctx: &mut ContextFor<'_, Self>) -> anyhow::Result<()> {
        for _ in 0..2 {
            ctx.running_worker(TimerWorker::new(Duration::from_secs(1), "t"), "", |()| {
                WorkflowAction::no_action()
            })?;
        }
        Ok(())
    }
}

struct Counted(Arc<AtomicUsize>);

impl Drop for Counted {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Keeps a side effect alive while `Props` is true.
struct Watcher {
    starts: Arc<AtomicUsize>,
    stops: Arc<AtomicUsize>,
}

impl Workflow for Watcher {
    type Props = bool;
    type State = u32;
    type Output = ();
    type Rendering = EventHandler<()>;

    fn initial_state(&self, _active: &bool, _snapshot: Option<&Snapshot>) -> anyhow::Result<u32> {
        Ok(0)
    }

    fn render(
        &self,
        active: &bool,
        _bumps: &u32,
        ctx: &mut ContextFor<'_, Self>,
    ) -> anyhow::Result<EventHandler<()>> {
        if *active {
            let starts = self.starts.clone();
            let stops = self.stops.clone();
            ctx.running_side_effect("watch", async move {
                starts.fetch_add(1, Ordering::SeqCst);
                let _stopped = Counted(stops);
                std::future::pending::<()>().await;
            })?;
        }
        Ok(ctx.event_handler0("bump", |u| *u.state_mut() += 1))
    }
}

struct Tapper;

impl Workflow for Tapper {
    type Props = ();
    type State = u32;
    type Output = ();
    type Rendering = (u32, EventHandler<()>);

    fn initial_state(&self, _props: &(), _snapshot: Option<&Snapshot>) -> anyhow::Result<u32> {
        Ok(0)
    }

    fn render(
        &self,
        _props: &(),
        taps: &u32,
        ctx: &mut ContextFor<'_, Self>,
    ) -> anyhow::Result<(u32, EventHandler<()>)> {
        Ok((*taps, ctx.event_handler0("tap", |u| *u.state_mut() += 1)))
    }
}

/// A running clock next to a counter that re-renders the parent on its own.
struct Dashboard;

#[derive(Clone)]
struct DashboardRendering {
    ticks: u64,
    taps: (u32, EventHandler<()>),
}

impl Workflow for Dashboard {
    type Props = ();
    type State = ();
    type Output = ();
    type Rendering = DashboardRendering;

    fn initial_state(&self, _props: &(), _snapshot: Option<&Snapshot>) -> anyhow::Result<()> {
        Ok(())
    }

    fn render(&self, _props: &(), _state: &(), ctx: &mut ContextFor<'_, Self>) -> anyhow::Result<DashboardRendering> {
        Ok(DashboardRendering {
            ticks: ctx.render_child_no_output(Clock, true, "clock")?,
            taps: ctx.render_child_no_output(Tapper, (), "taps")?,
        })
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

// ============== Tests ==============

#[tokio::test(start_paused = true)]
async fn test_equivalent_worker_keeps_its_subscription() {
    let mut runtime = HeadlessRuntime::start(Clock, true).unwrap();
    for expected in [10, 20, 30] {
        runtime.step().await.unwrap();
        assert_eq!(*runtime.rendering(), expected);
    }
}

#[tokio::test(start_paused = true)]
async fn test_worker_survives_renders_triggered_by_a_sibling() {
    let mut runtime = HeadlessRuntime::start(Dashboard, ()).unwrap();
    runtime.step().await.unwrap();
    assert_eq!(runtime.rendering().ticks, 10);

    for (taps, ticks) in [(1, 20), (2, 30), (3, 40)] {
        // Queued before the next tick, so this step is the tap.
        runtime.rendering().taps.1.fire();
        let outcome = runtime.step().await.unwrap();
        assert!(outcome.state_changed);
        assert_eq!(runtime.rendering().taps.0, taps);
        assert_eq!(runtime.rendering().ticks, ticks - 10);

        runtime.step().await.unwrap();
        assert_eq!(runtime.rendering().ticks, ticks);
    }
}

#[tokio::test(start_paused = true)]
async fn test_undeclared_worker_is_cancelled() {
    let mut runtime = HeadlessRuntime::start(Clock, true).unwrap();
    runtime.step().await.unwrap();
    assert_eq!(*runtime.rendering(), 10);

    runtime.send_props(false);
    let outcome = runtime.step().await.unwrap();
    assert!(outcome.props_updated);

    let idle = runtime.step_within(Duration::from_secs(5)).await.unwrap();
    assert!(idle.is_none());
    assert_eq!(*runtime.rendering(), 10);
}

#[tokio::test]
async fn test_worker_error_stops_the_runtime() {
    let mut runtime = HeadlessRuntime::start(Feed, ()).unwrap();
    runtime.step().await.unwrap();
    assert_eq!(runtime.rendering(), &vec![7]);

    let err = runtime.step().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UserCode);
    match &err {
        WorkflowError::Worker { worker, source, .. } => {
            assert_eq!(worker, "StreamWorker(\"feed\")");
            assert_eq!(source.to_string(), "feed broke");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(runtime.runner().is_stopped());
    assert_eq!(runtime.runner().node_count(), 0);
}

#[test]
fn test_duplicate_worker_key_fails_render() {
    let err = match HeadlessRuntime::start(DoubleTimer, ()) {
        Ok(_) => panic!("duplicate worker accepted"),
        Err(err) => err,
    };
    assert_eq!(err.kind(), ErrorKind::Usage);
    assert!(matches!(err, WorkflowError::DuplicateWorkerKey { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_side_effect_runs_once_and_stops_when_undeclared() {
    let starts = Arc::new(AtomicUsize::new(0));
    let stops = Arc::new(AtomicUsize::new(0));
    let watcher = Watcher {
        starts: starts.clone(),
        stops: stops.clone(),
    };
    let mut runtime = HeadlessRuntime::start(watcher, true).unwrap();
    settle().await;

    for _ in 0..3 {
        runtime.rendering().fire();
        runtime.step().await.unwrap();
    }
    settle().await;
    assert_eq!(starts.load(Ordering::SeqCst), 1);
    assert_eq!(stops.load(Ordering::SeqCst), 0);

    runtime.send_props(false);
    runtime.step().await.unwrap();
    settle().await;
    assert_eq!(stops.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_timer_fires_once_then_finishes() {
    let mut timer = WorkerTester::new(&TimerWorker::new(Duration::from_secs(1), "t"));
    assert!(timer.next_event_within(Duration::from_millis(500)).await.is_none());
    timer.next_output().await.unwrap();
    assert!(matches!(timer.next_event().await, WorkerEvent::Finished));
    assert!(timer.is_finished());
}

#[test]
fn test_render_tester_declares_side_effect_without_running_it() {
    let starts = Arc::new(AtomicUsize::new(0));
    let watcher = Watcher {
        starts: starts.clone(),
        stops: Arc::new(AtomicUsize::new(0)),
    };
    let mut result = RenderTester::new(watcher, true, 0)
        .expect_side_effect("watch")
        .render()
        .unwrap();
    assert_eq!(
        result.calls(),
        &[RenderCall::SideEffect {
            key: "watch".into()
        }]
    );

    result.rendering().fire();
    assert!(result.apply_next_action().unwrap().unwrap().state_changed);
    assert_eq!(*result.state(), 1);
    assert_eq!(starts.load(Ordering::SeqCst), 0);
}

#[test]
fn test_render_tester_rejects_duplicate_worker_key() {
    let err = RenderTester::new(DoubleTimer, (), ())
        .expect_worker::<TimerWorker>("")
        .render()
        .unwrap_err();
    assert!(matches!(err, WorkflowError::DuplicateWorkerKey { .. }));
}
