//! # Action: Atomic State Transitions
//!
//! A [`WorkflowAction`] is the only thing that mutates a node's state. It is
//! built by an event handler, a worker callback or a child-output handler,
//! queued, and later applied in one piece against the node's current props
//! and state.

use std::borrow::Cow;
use std::fmt;

type ApplyFn<P, S, O> = Box<dyn FnOnce(&mut Updater<'_, P, S, O>) -> anyhow::Result<()> + Send>;

/// Result of applying one action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionApplied<O> {
    pub output: Option<O>,
    pub state_changed: bool,
}

impl<O> ActionApplied<O> {
    pub fn unchanged() -> Self {
        Self {
            output: None,
            state_changed: false,
        }
    }

    pub fn map_output<U>(self, f: impl FnOnce(O) -> U) -> ActionApplied<U> {
        ActionApplied {
            output: self.output.map(f),
            state_changed: self.state_changed,
        }
    }
}

/// Mutable view handed to an action while it is applied.
///
/// State changes are tracked by access: calling [`Updater::state_mut`] or
/// [`Updater::set_state`] marks the state as changed.
pub struct Updater<'a, P, S, O> {
    props: &'a P,
    state: &'a mut S,
    output: Option<O>,
    state_changed: bool,
}

impl<'a, P, S, O> Updater<'a, P, S, O> {
    pub fn props(&self) -> &P {
        self.props
    }

    pub fn state(&self) -> &S {
        self.state
    }

    pub fn state_mut(&mut self) -> &mut S {
        self.state_changed = true;
        self.state
    }

    pub fn set_state(&mut self, state: S) {
        self.state_changed = true;
        *self.state = state;
    }

    pub fn set_output(&mut self, output: O) {
        self.output = Some(output);
    }

    pub fn output(&self) -> Option<&O> {
        self.output.as_ref()
    }
}

/// A named, one-shot mutation of `(props, state)` that may emit an output.
pub struct WorkflowAction<P, S, O> {
    name: Cow<'static, str>,
    apply: Option<ApplyFn<P, S, O>>,
}

impl<P, S, O> WorkflowAction<P, S, O> {
    pub fn new<F>(name: impl Into<Cow<'static, str>>, update: F) -> Self
    where
        F: FnOnce(&mut Updater<'_, P, S, O>) + Send + 'static,
    {
        Self {
            name: name.into(),
            apply: Some(Box::new(move |updater| {
                update(updater);
                Ok(())
            })),
        }
    }

    /// Like [`WorkflowAction::new`] for updates that can fail.
    pub fn try_new<F>(name: impl Into<Cow<'static, str>>, update: F) -> Self
    where
        F: FnOnce(&mut Updater<'_, P, S, O>) -> anyhow::Result<()> + Send + 'static,
    {
        Self {
            name: name.into(),
            apply: Some(Box::new(update)),
        }
    }

    /// Leaves state untouched and emits nothing.
    pub fn no_action() -> Self {
        Self {
            name: Cow::Borrowed("noAction"),
            apply: None,
        }
    }

    pub fn emit_output(output: O) -> Self
    where
        O: Send + 'static,
    {
        Self::new("emitOutput", move |updater| updater.set_output(output))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_no_action(&self) -> bool {
        self.apply.is_none()
    }

    pub fn apply_to(self, props: &P, state: &mut S) -> anyhow::Result<ActionApplied<O>> {
        let Some(apply) = self.apply else {
            return Ok(ActionApplied::unchanged());
        };
        let mut updater = Updater {
            props,
            state,
            output: None,
            state_changed: false,
        };
        apply(&mut updater)?;
        Ok(ActionApplied {
            output: updater.output,
            state_changed: updater.state_changed,
        })
    }
}

impl<P, S, O> fmt::Debug for WorkflowAction<P, S, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowAction")
            .field("name", &self.name)
            .finish()
    }
}
