//! The Workflow runtime: a tree of live workflow nodes, reconciled on every
//! render pass and driven by one global action queue.
//!
//! Start with [`WorkflowRunner`] to drive a tree step by step, or
//! [`render_workflow`] to spawn the loop onto the current tokio runtime.

mod arena;
pub mod context;
pub mod interceptor;
mod node;
pub mod operators;
mod queue;
pub mod render_loop;
pub mod render_tester;
pub mod runner;
pub mod stateless;
mod subtree;
mod tasks;
pub mod telemetry;
mod tree;
pub mod workflow;

pub use arena::NodeHandle;
pub use context::RenderContext;
pub use interceptor::{
    ChainedInterceptor, NoopInterceptor, TracingInterceptor, WorkflowInterceptor, WorkflowSession,
};
pub use node::NodeLifecycle;
pub use operators::{MapRendering, WorkflowExt};
pub use queue::{ActionSink, EventHandler};
pub use render_loop::{WorkflowHandle, render_workflow};
pub use render_tester::{RenderCall, RenderTestResult, RenderTester};
pub use runner::{ActionProcessingResult, RenderingAndSnapshot, WorkflowRunner};
pub use stateless::{Stateless, stateless};
pub use telemetry::init_tracing;
pub use workflow::{ActionFor, ContextFor, Workflow};

pub mod prelude {
    pub use crate::context::RenderContext;
    pub use crate::interceptor::{TracingInterceptor, WorkflowInterceptor};
    pub use crate::operators::WorkflowExt;
    pub use crate::queue::{ActionSink, EventHandler};
    pub use crate::render_loop::render_workflow;
    pub use crate::runner::{ActionProcessingResult, WorkflowRunner};
    pub use crate::stateless::stateless;
    pub use crate::workflow::{ActionFor, ContextFor, Workflow};
}
