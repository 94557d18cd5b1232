//! Ordered steps with compensating actions.
//!
//! A [`Transaction`] runs its steps in order. When one fails, the undo
//! actions of the steps that already succeeded run in reverse order, and the
//! failure is returned labelled with the failing step's description. Undo
//! failures are logged and otherwise ignored so that the remaining undos
//! still get their chance.

use tracing::{debug, warn};

use crate::error::RamdiskResult;

type Action<'a> = Box<dyn FnOnce() -> RamdiskResult<()> + 'a>;

struct Step<'a> {
    description: String,
    forward: Action<'a>,
    undo: Option<Action<'a>>,
}

#[derive(Default)]
pub struct Transaction<'a> {
    steps: Vec<Step<'a>>,
}

impl<'a> Transaction<'a> {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    pub fn step<F, U>(mut self, description: impl Into<String>, forward: F, undo: U) -> Self
    where
        F: FnOnce() -> RamdiskResult<()> + 'a,
        U: FnOnce() -> RamdiskResult<()> + 'a,
    {
        self.steps.push(Step {
            description: description.into(),
            forward: Box::new(forward),
            undo: Some(Box::new(undo)),
        });
        self
    }

    /// A step with nothing to compensate, e.g. restoring attributes.
    pub fn step_final<F>(mut self, description: impl Into<String>, forward: F) -> Self
    where
        F: FnOnce() -> RamdiskResult<()> + 'a,
    {
        self.steps.push(Step {
            description: description.into(),
            forward: Box::new(forward),
            undo: None,
        });
        self
    }

    pub fn run(self) -> RamdiskResult<()> {
        let mut committed: Vec<(String, Action<'a>)> = Vec::with_capacity(self.steps.len());

        for Step { description, forward, undo } in self.steps {
            debug!(step = %description, "running step");
            if let Err(err) = forward() {
                warn!(step = %description, error = %err, "step failed, rolling back");
                rollback(committed);
                return Err(err.step(description));
            }
            if let Some(undo) = undo {
                committed.push((description, undo));
            }
        }

        Ok(())
    }
}

fn rollback(committed: Vec<(String, Action<'_>)>) {
    for (description, undo) in committed.into_iter().rev() {
        debug!(step = %description, "undoing step");
        if let Err(err) = undo() {
            warn!(step = %description, error = %err, "failed to undo step");
        }
    }
}
