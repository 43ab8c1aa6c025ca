//! The render loop: render, wait for one thing to happen, render again.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use workflow_core::{RuntimeConfig, TreeSnapshot, WorkflowError, WorkflowResult};

use crate::interceptor::WorkflowInterceptor;
use crate::runner::{ActionProcessingResult, RenderingAndSnapshot, WorkflowRunner};
use crate::workflow::Workflow;

impl<W: Workflow> WorkflowRunner<W> {
    /// Drive the tree until the runner's token is cancelled or an error
    /// stops it.
    ///
    /// Each step emits the new rendering before the output the step
    /// produced, so an output handler always sees the tree it came from.
    pub async fn run<R, O>(mut self, mut on_rendering: R, on_output: O) -> WorkflowResult<()>
    where
        R: FnMut(RenderingAndSnapshot<W::Rendering>),
        O: FnMut(W::Output),
    {
        let first = self.next_rendering()?;
        on_rendering(first);
        self.drive(on_rendering, on_output).await
    }

    async fn drive<R, O>(&mut self, mut on_rendering: R, mut on_output: O) -> WorkflowResult<()>
    where
        R: FnMut(RenderingAndSnapshot<W::Rendering>),
        O: FnMut(W::Output),
    {
        let token = self.cancellation_token();
        loop {
            let result = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    tracing::debug!("Render loop cancelled");
                    return Ok(());
                }
                result = self.process_action() => match result {
                    Ok(result) => result,
                    Err(WorkflowError::RuntimeStopped) if token.is_cancelled() => return Ok(()),
                    Err(err) => return Err(err),
                },
            };

            let mut state_changed = result.state_changed();
            let mut output = result.into_output();

            if self.config().conflate_stale_renderings() {
                while output.is_none() {
                    let next = self.try_process_action()?;
                    if matches!(next, ActionProcessingResult::Exhausted) {
                        break;
                    }
                    state_changed |= next.state_changed();
                    output = next.into_output();
                }
            }

            if self.config().render_only_when_state_changes() && !state_changed {
                tracing::trace!("Skipping render: nothing changed");
            } else {
                on_rendering(self.next_rendering()?);
            }
            if let Some(output) = output {
                on_output(output);
            }
        }
    }
}

/// A runner spawned onto the current tokio runtime.
pub struct WorkflowHandle<W: Workflow> {
    /// Latest rendering; starts with the first render pass.
    pub renderings: watch::Receiver<RenderingAndSnapshot<W::Rendering>>,
    pub outputs: mpsc::UnboundedReceiver<W::Output>,
    task: JoinHandle<WorkflowResult<()>>,
    token: CancellationToken,
}

impl<W: Workflow> WorkflowHandle<W> {
    pub fn rendering(&self) -> W::Rendering {
        self.renderings.borrow().rendering.clone()
    }

    pub fn snapshot(&self) -> TreeSnapshot {
        self.renderings.borrow().snapshot.clone()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the loop to end and return how it ended.
    pub async fn join(self) -> WorkflowResult<()> {
        match self.task.await {
            Ok(result) => result,
            Err(err) => Err(WorkflowError::Other(anyhow::anyhow!(
                "render loop task failed: {err}"
            ))),
        }
    }
}

/// Render `workflow` once, then keep rendering it on a spawned task.
///
/// The first render happens before this returns, so its errors come back
/// directly.
pub fn render_workflow<W>(
    workflow: W,
    props: watch::Receiver<W::Props>,
    snapshot: Option<TreeSnapshot>,
    config: RuntimeConfig,
    interceptor: Arc<dyn WorkflowInterceptor>,
) -> WorkflowResult<WorkflowHandle<W>>
where
    W: Workflow,
    W::Rendering: Sync,
{
    let mut runner = WorkflowRunner::new(workflow, props, snapshot, config, interceptor)?;
    let first = runner.next_rendering()?;
    let (rendering_tx, renderings) = watch::channel(first);
    let (output_tx, outputs) = mpsc::unbounded_channel();
    let token = runner.cancellation_token();

    let task = tokio::spawn(async move {
        runner
            .drive(
                move |rendering| {
                    let _ = rendering_tx.send(rendering);
                },
                move |output| {
                    let _ = output_tx.send(output);
                },
            )
            .await
    });

    Ok(WorkflowHandle {
        renderings,
        outputs,
        task,
        token,
    })
}
