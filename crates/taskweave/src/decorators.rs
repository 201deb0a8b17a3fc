//! Small building blocks: pass-through tasks and wrappers around a task

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, info_span, Instrument};

use crate::task::{Args, Outcome, Task};
use crate::BoxFuture;

/// Completes immediately with its inputs
#[derive(Debug, Clone, Copy, Default)]
pub struct Noop;

/// Completes with its inputs after a fixed delay
#[derive(Debug, Clone, Copy)]
pub struct Sleep {
    duration: Duration,
}

/// Runs a task inside a named tracing span
#[derive(Debug)]
pub struct Logged<T> {
    name: Arc<str>,
    task: Arc<T>,
}

/// Replaces any error of a task with fixed values
#[derive(Debug)]
pub struct Fallback<T> {
    default: Arc<[Value]>,
    task: Arc<T>,
}

impl<T> Clone for Logged<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            task: self.task.clone(),
        }
    }
}

impl<T> Clone for Fallback<T> {
    fn clone(&self) -> Self {
        Self {
            default: self.default.clone(),
            task: self.task.clone(),
        }
    }
}

pub fn noop() -> Noop {
    Noop
}

pub fn sleep(duration: Duration) -> Sleep {
    Sleep { duration }
}

/// Wrap `task` so every invocation is traced under `name`, with its
/// duration and outcome
pub fn logged<T: Task>(name: impl Into<String>, task: T) -> Logged<T> {
    Logged {
        name: name.into().into(),
        task: Arc::new(task),
    }
}

/// Wrap `task` so that a failure completes with `default` instead
pub fn fallback<T: Task>(default: Vec<Value>, task: T) -> Fallback<T> {
    Fallback {
        default: default.into(),
        task: Arc::new(task),
    }
}

impl Task for Noop {
    fn call(&self, args: Args) -> BoxFuture<Outcome> {
        Box::pin(async move { Ok(args) })
    }
}

impl Task for Sleep {
    fn call(&self, args: Args) -> BoxFuture<Outcome> {
        let duration = self.duration;
        Box::pin(async move {
            tokio::time::sleep(duration).await;
            Ok(args)
        })
    }
}

impl<T: Task> Task for Logged<T> {
    fn call(&self, args: Args) -> BoxFuture<Outcome> {
        let span = info_span!("task", name = %self.name);
        let started = span.in_scope(|| {
            debug!(inputs = args.len(), "Task started");
            self.task.call(args)
        });

        Box::pin(
            async move {
                let start = Instant::now();
                let outcome = started.await;
                match &outcome {
                    Ok(values) => {
                        debug!(outputs = values.len(), duration = ?start.elapsed(), "Task completed")
                    }
                    Err(err) => debug!(error = %err, duration = ?start.elapsed(), "Task failed"),
                }
                outcome
            }
            .instrument(span),
        )
    }
}

impl<T: Task> Task for Fallback<T> {
    fn call(&self, args: Args) -> BoxFuture<Outcome> {
        let started = self.task.call(args);
        let default = self.default.clone();
        Box::pin(async move {
            match started.await {
                Ok(values) => Ok(values),
                Err(err) => {
                    debug!(error = %err, "Task failed, using fallback values");
                    Ok(default.to_vec())
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combinators::waterfall;
    use crate::error::FlowError;
    use crate::task::{task_fn, TaskExt};
    use serde_json::json;

    #[tokio::test]
    async fn test_noop_passes_inputs() {
        assert_eq!(noop().call(vec![json!(1), json!("a")]).await, Ok(vec![json!(1), json!("a")]));
    }

    #[tokio::test]
    async fn test_sleep_waits() {
        let start = Instant::now();
        let outcome = sleep(Duration::from_millis(20)).call(vec![json!(true)]).await;
        assert!(start.elapsed() >= Duration::from_millis(20));
        assert_eq!(outcome, Ok(vec![json!(true)]));
    }

    #[tokio::test]
    async fn test_logged_is_transparent() {
        let failing = logged("failing", task_fn(|_| async { Err(FlowError::task("boom")) }));
        assert_eq!(failing.call(vec![]).await, Err(FlowError::task("boom")));

        let flow = waterfall([logged("noop", noop()).boxed(), noop().boxed()]);
        assert_eq!(flow.call(vec![json!(5)]).await, Ok(vec![json!(5)]));
    }

    #[tokio::test]
    async fn test_fallback_replaces_errors() {
        let recovered = fallback(vec![json!(0)], task_fn(|_| async { Err(FlowError::task("boom")) }));
        assert_eq!(recovered.call(vec![]).await, Ok(vec![json!(0)]));

        let untouched = fallback(vec![json!(0)], noop());
        assert_eq!(untouched.call(vec![json!(7)]).await, Ok(vec![json!(7)]));
    }
}
