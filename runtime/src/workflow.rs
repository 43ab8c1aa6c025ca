use std::borrow::Cow;

use workflow_core::{
    IdentifierRegistry, Snapshot, WorkflowAction, WorkflowIdentifier, short_type_name,
};

use crate::context::RenderContext;

/// The action type a workflow's handlers produce.
pub type ActionFor<W> = WorkflowAction<
    <W as Workflow>::Props,
    <W as Workflow>::State,
    <W as Workflow>::Output,
>;

/// The render context handed to a workflow's `render`.
pub type ContextFor<'a, W> = RenderContext<
    'a,
    <W as Workflow>::Props,
    <W as Workflow>::State,
    <W as Workflow>::Output,
>;

/// A unit of render logic: `(props, state) -> rendering`, plus hooks for
/// creating, updating and persisting its state.
///
/// `render` must not mutate state. State only changes through
/// [`WorkflowAction`]s sent from event handlers, workers or child output
/// handlers.
pub trait Workflow: Send + Sized + 'static {
    type Props: Clone + PartialEq + Send + Sync + 'static;
    type State: Send + 'static;
    type Output: Send + 'static;
    type Rendering: Clone + Send + 'static;

    /// Stable name used for identity and snapshot keys.
    ///
    /// Defaults to the last path segment of the type. If another type in the
    /// same runtime already reported that name, the registry falls back to
    /// the full type path for this one.
    fn type_name(&self) -> Cow<'static, str> {
        Cow::Borrowed(short_type_name::<Self>())
    }

    /// Impostor workflows override this to report a delegating chain.
    fn identifier(&self, registry: &mut IdentifierRegistry) -> WorkflowIdentifier {
        registry.identifier_for::<Self>(&self.type_name())
    }

    /// Called once when the node is created. `snapshot` is the fragment
    /// restored for this node, if any.
    fn initial_state(
        &self,
        props: &Self::Props,
        snapshot: Option<&Snapshot>,
    ) -> anyhow::Result<Self::State>;

    /// Called before `render` whenever the parent passes props that differ
    /// from the previous pass.
    fn on_props_changed(&self, _old: &Self::Props, _new: &Self::Props, _state: &mut Self::State) {}

    fn render(
        &self,
        props: &Self::Props,
        state: &Self::State,
        ctx: &mut ContextFor<'_, Self>,
    ) -> anyhow::Result<Self::Rendering>;

    fn snapshot_state(&self, _state: &Self::State) -> Option<Snapshot> {
        None
    }
}
