use std::time::Duration;

use futures_util::StreamExt;
use futures_util::stream;
use workflow_core::{Worker, WorkerStream};

/// Fires once after `delay`.
///
/// Equivalence is by key only: re-declaring the timer with a different delay
/// under the same key keeps the running countdown.
#[derive(Debug, Clone)]
pub struct TimerWorker {
    delay: Duration,
    key: String,
}

impl TimerWorker {
    pub fn new(delay: Duration, key: impl Into<String>) -> Self {
        Self {
            delay,
            key: key.into(),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl Worker for TimerWorker {
    type Output = ();

    fn run(&self) -> WorkerStream<()> {
        let delay = self.delay;
        stream::once(async move {
            tokio::time::sleep(delay).await;
            tracing::trace!(?delay, "Timer fired");
            Ok(())
        })
        .boxed()
    }

    fn does_same_work_as(&self, other: &Self) -> bool {
        self.key == other.key
    }

    fn describe(&self) -> String {
        format!("TimerWorker({:?}, {:?})", self.delay, self.key)
    }
}

/// Ticks every `period`, emitting 1, 2, 3, ...
///
/// Two intervals are equivalent iff their periods are equal, so changing the
/// period restarts the count.
#[derive(Debug, Clone)]
pub struct IntervalWorker {
    period: Duration,
}

impl IntervalWorker {
    pub fn new(period: Duration) -> Self {
        Self { period }
    }
}

impl Worker for IntervalWorker {
    type Output = u64;

    fn run(&self) -> WorkerStream<u64> {
        let period = self.period;
        stream::unfold(0u64, move |ticks| async move {
            tokio::time::sleep(period).await;
            let ticks = ticks + 1;
            Some((Ok(ticks), ticks))
        })
        .boxed()
    }

    fn does_same_work_as(&self, other: &Self) -> bool {
        self.period == other.period
    }

    fn describe(&self) -> String {
        format!("IntervalWorker({:?})", self.period)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use workflow_core::{Snapshot, WorkflowAction};
    use workflow_runtime::{ContextFor, Workflow, WorkflowRunner};

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_once_after_delay() {
        let started = tokio::time::Instant::now();
        let fired: Vec<_> = TimerWorker::new(Duration::from_secs(5), "t")
            .run()
            .collect()
            .await;
        assert_eq!(fired.len(), 1);
        assert!(started.elapsed() >= Duration::from_secs(5));
    }

    #[test]
    fn test_timer_equivalent_by_key() {
        let a = TimerWorker::new(Duration::from_secs(1), "a");
        assert!(a.does_same_work_as(&TimerWorker::new(Duration::from_secs(9), "a")));
        assert!(!a.does_same_work_as(&TimerWorker::new(Duration::from_secs(1), "b")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_counts_ticks() {
        let ticks: Vec<u64> = IntervalWorker::new(Duration::from_millis(100))
            .run()
            .take(3)
            .map(|tick| tick.unwrap())
            .collect()
            .await;
        assert_eq!(ticks, vec![1, 2, 3]);
    }

    struct Alarm;

    impl Workflow for Alarm {
        type Props = ();
        type State = bool;
        type Output = ();
        type Rendering = bool;

        fn initial_state(&self, _props: &(), _snapshot: Option<&Snapshot>) -> anyhow::Result<bool> {
            Ok(false)
        }

        fn render(
            &self,
            _props: &(),
            rang: &bool,
            ctx: &mut ContextFor<'_, Self>,
        ) -> anyhow::Result<bool> {
            if !*rang {
                let timer = TimerWorker::new(Duration::from_secs(60), "alarm");
                ctx.running_worker(timer, "", |()| {
                    WorkflowAction::new("ring", |u| u.set_state(true))
                })?;
            }
            Ok(*rang)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_drives_a_workflow() {
        let (_props, rx) = tokio::sync::watch::channel(());
        let mut runner = WorkflowRunner::with_defaults(Alarm, rx).unwrap();
        assert!(!runner.next_rendering().unwrap().rendering);

        let result = runner.process_action().await.unwrap();
        assert!(result.state_changed());
        assert!(runner.next_rendering().unwrap().rendering);
    }

    #[test]
    fn test_interval_equivalent_by_period() {
        let a = IntervalWorker::new(Duration::from_secs(1));
        assert!(a.does_same_work_as(&IntervalWorker::new(Duration::from_secs(1))));
        assert!(!a.does_same_work_as(&IntervalWorker::new(Duration::from_secs(2))));
    }
}
