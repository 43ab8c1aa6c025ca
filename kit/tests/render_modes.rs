use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures_util::stream;
use workflow::core::{RuntimeConfig, RuntimeOption};
use workflow::prelude::*;
use workflow::runtime::EventHandler;
use workflow::testing::{HeadlessOptions, LifecycleEvent};

// ============== Fixtures ==============

struct Leaf;

impl Workflow for Leaf {
    type Props = ();
    type State = i32;
    type Output = ();
    type Rendering = (i32, EventHandler<()>);

    fn initial_state(&self, _props: &(), _snapshot: Option<&Snapshot>) -> anyhow::Result<i32> {
        Ok(0)
    }

    fn render(
        &self,
        _props: &(),
        value: &i32,
        ctx: &mut ContextFor<'_, Self>,
    ) -> anyhow::Result<(i32, EventHandler<()>)> {
        Ok((*value, ctx.event_handler0("increment", |u| *u.state_mut() += 1)))
    }
}

/// Two independent leaves under one parent.
struct Pair;

#[derive(Clone)]
struct PairRendering {
    a: (i32, EventHandler<()>),
    b: (i32, EventHandler<()>),
}

impl Workflow for Pair {
    type Props = ();
    type State = ();
    type Output = ();
    type Rendering = PairRendering;

    fn initial_state(&self, _props: &(), _snapshot: Option<&Snapshot>) -> anyhow::Result<()> {
        Ok(())
    }

    fn render(&self, _props: &(), _state: &(), ctx: &mut ContextFor<'_, Self>) -> anyhow::Result<PairRendering> {
        Ok(PairRendering {
            a: ctx.render_child_no_output(Leaf, (), "a")?,
            b: ctx.render_child_no_output(Leaf, (), "b")?,
        })
    }
}

/// A leaf plus a feed worker that counts how often it is subscribed.
struct Station {
    subscriptions: Arc<AtomicUsize>,
}

impl Workflow for Station {
    type Props = ();
    type State = ();
    type Output = ();
    type Rendering = (i32, EventHandler<()>);

    fn initial_state(&self, _props: &(), _snapshot: Option<&Snapshot>) -> anyhow::Result<()> {
        Ok(())
    }

    fn render(&self, _props: &(), _state: &(), ctx: &mut ContextFor<'_, Self>) -> anyhow::Result<Self::Rendering> {
        let subscriptions = self.subscriptions.clone();
        let feed = StreamWorker::new("feed", move || {
            subscriptions.fetch_add(1, Ordering::SeqCst);
            stream::pending::<u32>()
        });
        ctx.running_worker(feed, "", |_: u32| WorkflowAction::no_action())?;
        Ok(ctx.render_child_no_output(Leaf, (), "leaf")?)
    }
}

fn start(config: RuntimeConfig) -> (HeadlessRuntime<Pair>, RecordingInterceptor) {
    let recorder = RecordingInterceptor::new();
    let runtime = HeadlessRuntime::start_with(
        Pair,
        (),
        HeadlessOptions::default()
            .with_config(config)
            .with_interceptor(Arc::new(recorder.clone())),
    )
    .unwrap();
    (runtime, recorder)
}

fn rendered_leaves(recorder: &RecordingInterceptor) -> Vec<String> {
    recorder
        .events()
        .into_iter()
        .filter_map(|event| match event {
            LifecycleEvent::Rendered { workflow, key } if workflow == "Leaf" => Some(key),
            _ => None,
        })
        .collect()
}

// ============== Tests ==============

#[tokio::test]
async fn test_partial_rendering_skips_clean_siblings() {
    let (mut runtime, recorder) =
        start(RuntimeConfig::new().with_option(RuntimeOption::PartialTreeRendering));
    assert_eq!(rendered_leaves(&recorder), vec!["a", "b"]);
    recorder.clear();

    runtime.rendering().a.1.fire();
    runtime.step().await.unwrap();
    assert_eq!(rendered_leaves(&recorder), vec!["a"]);
    assert_eq!(recorder.renders_of("Pair"), 1);
    assert_eq!(runtime.rendering().a.0, 1);
    assert_eq!(runtime.rendering().b.0, 0);

    // The cached rendering's handler still reaches its node.
    recorder.clear();
    runtime.rendering().b.1.fire();
    runtime.step().await.unwrap();
    assert_eq!(rendered_leaves(&recorder), vec!["b"]);
    assert_eq!(runtime.rendering().a.0, 1);
    assert_eq!(runtime.rendering().b.0, 1);
}

#[tokio::test]
async fn test_equal_props_do_not_count_as_a_step() {
    let (mut runtime, recorder) =
        start(RuntimeConfig::new().with_option(RuntimeOption::PartialTreeRendering));
    recorder.clear();

    runtime.send_props(());
    assert!(runtime.try_step().unwrap().is_none());
    assert!(rendered_leaves(&recorder).is_empty());
}

#[tokio::test]
async fn test_full_rendering_renders_every_node() {
    let (mut runtime, recorder) = start(RuntimeConfig::default());
    recorder.clear();

    runtime.rendering().a.1.fire();
    runtime.step().await.unwrap();
    assert_eq!(rendered_leaves(&recorder), vec!["a", "b"]);
    assert_eq!(recorder.renders_of("Pair"), 1);
    assert_eq!(runtime.rendering().a.0, 1);
}

#[tokio::test]
async fn test_options_parsed_from_string_drive_the_runtime() {
    let config = RuntimeConfig::from_options_str("partial_tree_rendering").unwrap();
    let (mut runtime, recorder) = start(config);
    recorder.clear();

    runtime.rendering().b.1.fire();
    runtime.step().await.unwrap();
    assert_eq!(rendered_leaves(&recorder), vec!["b"]);
}

#[tokio::test]
async fn test_repeated_render_without_actions_changes_nothing() {
    let subscriptions = Arc::new(AtomicUsize::new(0));
    let recorder = RecordingInterceptor::new();
    let mut runtime = HeadlessRuntime::start_with(
        Station {
            subscriptions: subscriptions.clone(),
        },
        (),
        HeadlessOptions::default()
            .with_interceptor(Arc::new(recorder.clone()))
            .with_render_idempotency_check(),
    )
    .unwrap();
    assert_eq!(recorder.renders_of("Station"), 2);
    let nodes = runtime.runner().node_count();
    recorder.clear();

    for _ in 0..3 {
        runtime.runner_mut().next_rendering().unwrap();
    }
    assert!(
        recorder
            .events()
            .iter()
            .all(|event| matches!(event, LifecycleEvent::Rendered { .. })),
        "{:?}",
        recorder.events()
    );
    assert_eq!(recorder.renders_of("Leaf"), 3);
    assert_eq!(runtime.runner().node_count(), nodes);
    assert_eq!(subscriptions.load(Ordering::SeqCst), 1);

    runtime.rendering().1.fire();
    runtime.step().await.unwrap();
    assert_eq!(runtime.rendering().0, 1);
    assert_eq!(subscriptions.load(Ordering::SeqCst), 1);
}
