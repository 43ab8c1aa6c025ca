//! Workflows without state.

use std::borrow::Cow;
use std::marker::PhantomData;
use std::sync::Arc;

use workflow_core::{IdentifierRegistry, Snapshot, WorkflowIdentifier};

use crate::context::RenderContext;
use crate::workflow::Workflow;

/// A workflow whose state is `()`: rendering is a pure function of props
/// plus whatever children and workers it declares.
pub struct Stateless<P, O, R, F> {
    name: Cow<'static, str>,
    render: Arc<F>,
    _types: PhantomData<fn(P) -> (O, R)>,
}

impl<P, O, R, F> Clone for Stateless<P, O, R, F> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            render: self.render.clone(),
            _types: PhantomData,
        }
    }
}

/// Build a [`Stateless`] workflow named `name`.
///
/// The name is the workflow's identity: two stateless workflows with the same
/// closure type and name reconcile with each other, and one factory closure
/// reused under different names yields distinct workflows.
pub fn stateless<P, O, R, F>(name: impl Into<Cow<'static, str>>, render: F) -> Stateless<P, O, R, F>
where
    F: Fn(&P, &mut RenderContext<'_, P, (), O>) -> anyhow::Result<R> + Send + Sync + 'static,
{
    Stateless {
        name: name.into(),
        render: Arc::new(render),
        _types: PhantomData,
    }
}

impl<P, O, R, F> Workflow for Stateless<P, O, R, F>
where
    P: Clone + PartialEq + Send + Sync + 'static,
    O: Send + 'static,
    R: Clone + Send + 'static,
    F: Fn(&P, &mut RenderContext<'_, P, (), O>) -> anyhow::Result<R> + Send + Sync + 'static,
{
    type Props = P;
    type State = ();
    type Output = O;
    type Rendering = R;

    fn type_name(&self) -> Cow<'static, str> {
        self.name.clone()
    }

    fn identifier(&self, registry: &mut IdentifierRegistry) -> WorkflowIdentifier {
        registry.identifier_for::<Self>(&self.name)
    }

    fn initial_state(&self, _props: &P, _snapshot: Option<&Snapshot>) -> anyhow::Result<()> {
        Ok(())
    }

    fn render(
        &self,
        props: &P,
        _state: &(),
        ctx: &mut RenderContext<'_, P, (), O>,
    ) -> anyhow::Result<R> {
        (self.render)(props, ctx)
    }
}
