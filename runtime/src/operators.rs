//! Wrappers that change what a workflow looks like from outside without
//! changing its identity.

use std::borrow::Cow;
use std::marker::PhantomData;
use std::sync::Arc;

use workflow_core::{IdentifierRegistry, Snapshot, WorkflowAction, WorkflowIdentifier};

use crate::workflow::{ContextFor, Workflow};

/// Renders `inner` as its only child and maps each rendering through `map`.
///
/// Outputs pass through unchanged. The identifier is
/// `Delegating("MapRendering", inner)`, so two wrappers around the same inner
/// workflow reconcile with each other.
pub struct MapRendering<W, F, R> {
    inner: W,
    map: Arc<F>,
    _rendering: PhantomData<fn() -> R>,
}

impl<W: Clone, F, R> Clone for MapRendering<W, F, R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            map: self.map.clone(),
            _rendering: PhantomData,
        }
    }
}

impl<W, F, R> Workflow for MapRendering<W, F, R>
where
    W: Workflow + Clone,
    F: Fn(W::Rendering) -> R + Send + Sync + 'static,
    R: Clone + Send + 'static,
{
    type Props = W::Props;
    type State = ();
    type Output = W::Output;
    type Rendering = R;

    fn type_name(&self) -> Cow<'static, str> {
        Cow::Owned(format!("MapRendering({})", self.inner.type_name()))
    }

    fn identifier(&self, registry: &mut IdentifierRegistry) -> WorkflowIdentifier {
        let inner = self.inner.identifier(registry);
        registry.delegating("MapRendering", inner)
    }

    fn initial_state(&self, _props: &W::Props, _snapshot: Option<&Snapshot>) -> anyhow::Result<()> {
        Ok(())
    }

    fn render(
        &self,
        props: &W::Props,
        _state: &(),
        ctx: &mut ContextFor<'_, Self>,
    ) -> anyhow::Result<R> {
        let rendering = ctx.render_child(self.inner.clone(), props.clone(), "", |output| {
            WorkflowAction::emit_output(output)
        })?;
        Ok((self.map)(rendering))
    }
}

pub trait WorkflowExt: Workflow + Clone {
    fn map_rendering<F, R>(self, map: F) -> MapRendering<Self, F, R>
    where
        F: Fn(Self::Rendering) -> R + Send + Sync + 'static,
        R: Clone + Send + 'static,
    {
        MapRendering {
            inner: self,
            map: Arc::new(map),
            _rendering: PhantomData,
        }
    }
}

impl<W: Workflow + Clone> WorkflowExt for W {}
