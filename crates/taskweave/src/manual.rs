//! Named state machine built from async steps
//!
//! Every state receives the values its predecessor handed over and decides
//! where control goes next, see [`Step`]. The first declared state is the
//! initial one.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;
use tracing::trace;

use crate::error::{FlowError, FlowResult, GraphError, GraphResult};
use crate::task::{Args, Outcome, Task};
use crate::BoxFuture;

/// Where control goes after a state completes
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Continue in `state` with `args` as its inputs
    Goto { state: String, args: Args },
    /// Finish the machine with these values
    End(Vec<Value>),
}

impl Step {
    pub fn goto(state: impl Into<String>, args: Args) -> Self {
        Step::Goto {
            state: state.into(),
            args,
        }
    }

    pub fn end(values: Vec<Value>) -> Self {
        Step::End(values)
    }
}

type StateFn = Arc<dyn Fn(Args) -> BoxFuture<FlowResult<Step>> + Send + Sync>;

/// A state machine that behaves like a single task
#[derive(Clone)]
pub struct Manual {
    states: Arc<IndexMap<String, StateFn>>,
}

impl fmt::Debug for Manual {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Manual")
            .field("states", &self.states.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Manual {
    pub fn builder() -> ManualBuilder {
        ManualBuilder::default()
    }

    /// State names in declaration order; the first is the initial state
    pub fn states(&self) -> impl Iterator<Item = &str> {
        self.states.keys().map(String::as_str)
    }
}

impl Task for Manual {
    fn call(&self, args: Args) -> BoxFuture<Outcome> {
        let states = self.states.clone();
        let first = states.first().map(|(name, state)| (name.clone(), state(args)));

        Box::pin(async move {
            let Some((mut current, mut pending)) = first else {
                return Err(FlowError::Graph(GraphError::EmptyStateMachine));
            };

            loop {
                match pending.await? {
                    Step::End(values) => {
                        trace!(state = %current, "State machine finished");
                        return Ok(values);
                    }
                    Step::Goto { state, args } => {
                        let Some(next) = states.get(&state) else {
                            return Err(FlowError::contract(format!(
                                "state '{current}' moved to unknown state '{state}'"
                            )));
                        };
                        trace!(from = %current, to = %state, "State transition");
                        pending = next(args);
                        current = state;
                    }
                }
            }
        })
    }
}

/// Collects states for a [`Manual`]
#[derive(Default)]
pub struct ManualBuilder {
    states: IndexMap<String, StateFn>,
    duplicate: Option<String>,
}

impl ManualBuilder {
    /// Declare a state; the first declared state is the initial one
    pub fn state<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FlowResult<Step>> + Send + 'static,
    {
        let name = name.into();
        if self.states.contains_key(&name) {
            self.duplicate.get_or_insert(name);
            return self;
        }
        let state: StateFn = Arc::new(move |args| Box::pin(f(args)));
        self.states.insert(name, state);
        self
    }

    pub fn build(self) -> GraphResult<Manual> {
        if let Some(name) = self.duplicate {
            return Err(GraphError::DuplicateState { name });
        }
        if self.states.is_empty() {
            return Err(GraphError::EmptyStateMachine);
        }
        Ok(Manual {
            states: Arc::new(self.states),
        })
    }
}

/// Shorthand for `Manual::builder()`
pub fn manual() -> ManualBuilder {
    Manual::builder()
}
