//! Retry decorator with optional backoff

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::reporter::{FlowEvent, NoOpReporter, Reporter};
use crate::task::{Args, Outcome, Task};
use crate::types::RetryPolicy;
use crate::BoxFuture;

/// A task wrapped by [`retry`]
///
/// Every invocation keeps its own attempt counter, starting at 1 for the
/// first call.
pub struct Retry<T> {
    task: Arc<T>,
    policy: Arc<RetryPolicy>,
    reporter: Arc<dyn Reporter>,
}

impl<T> Clone for Retry<T> {
    fn clone(&self) -> Self {
        Self {
            task: self.task.clone(),
            policy: self.policy.clone(),
            reporter: self.reporter.clone(),
        }
    }
}

impl<T> fmt::Debug for Retry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Retry")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl<T: Task> Retry<T> {
    pub fn new(policy: impl Into<RetryPolicy>, task: T) -> Self {
        Self {
            task: Arc::new(task),
            policy: Arc::new(policy.into()),
            reporter: Arc::new(NoOpReporter),
        }
    }

    /// Attach a reporter that is told about every scheduled retry
    pub fn with_reporter<R: Reporter + 'static>(mut self, reporter: R) -> Self {
        self.reporter = Arc::new(reporter);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

impl<T: Task> Task for Retry<T> {
    fn call(&self, args: Args) -> BoxFuture<Outcome> {
        let first = self.task.call(args.clone());
        let task = self.task.clone();
        let policy = self.policy.clone();
        let reporter = self.reporter.clone();

        Box::pin(async move {
            let max_attempts = policy.max_attempts();
            let mut attempt = 1;
            let mut outcome = first.await;

            loop {
                let err = match outcome {
                    Ok(values) => return Ok(values),
                    Err(err) if attempt >= max_attempts => {
                        debug!(attempt, max_attempts, error = %err, "Retries exhausted");
                        return Err(err);
                    }
                    Err(err) => err,
                };

                let delay = policy.delay(attempt);
                debug!(attempt, max_attempts, ?delay, error = %err, "Task failed, retrying");
                reporter.report_event(FlowEvent::RetryScheduled {
                    attempt,
                    max_attempts,
                    delay,
                    error: err.to_string(),
                });

                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
                outcome = task.call(args.clone()).await;
            }
        })
    }
}

/// Re-invoke `task` with the same inputs until it succeeds or `policy`'s
/// attempt bound is reached
///
/// `policy` is a [`RetryPolicy`] or a bare attempt count. The last error is
/// delivered unchanged once attempts run out.
pub fn retry<T: Task>(policy: impl Into<RetryPolicy>, task: T) -> Retry<T> {
    Retry::new(policy, task)
}
