//! Workflow facade crate.
//!
//! This crate re-exports the core, runtime, std and testing crates with a
//! single entry point.

pub use workflow_core as core;
pub use workflow_runtime as runtime;
#[cfg(feature = "std")]
pub use workflow_std as std;
#[cfg(feature = "testing")]
pub use workflow_testing as testing;

pub use workflow_core::{
    Snapshot, TreeSnapshot, WorkflowAction, WorkflowError, WorkflowIdentifier, WorkflowResult,
};
pub use workflow_runtime::{
    RenderContext, Workflow, WorkflowRunner, render_workflow, stateless,
};

pub mod prelude {
    pub use workflow_core::prelude::*;
    pub use workflow_runtime::prelude::*;
    #[cfg(feature = "std")]
    pub use workflow_std::prelude::*;
    #[cfg(feature = "testing")]
    pub use workflow_testing::prelude::*;
}
