//! Progress reporting for composed tasks
//!
//! Reporters observe dependency-graph runs and retry decisions without
//! influencing them. Attach one with [`crate::Auto::with_reporter`] or
//! [`crate::Retry::with_reporter`].

use std::sync::Arc;
use std::time::Duration;

use crate::executor::RunId;

/// Event types that can be reported while composed tasks execute
#[derive(Debug, Clone, PartialEq)]
pub enum FlowEvent {
    /// A graph invocation started
    RunStarted { run_id: RunId, total_jobs: usize },
    /// A job's task was invoked
    JobStarted { run_id: RunId, job: String },
    /// A job completed successfully
    JobCompleted {
        run_id: RunId,
        job: String,
        duration: Duration,
    },
    /// A job failed; this is the error the run reports
    JobFailed {
        run_id: RunId,
        job: String,
        error: String,
        duration: Duration,
    },
    /// A graph invocation delivered its outcome
    RunFinished {
        run_id: RunId,
        succeeded: bool,
        /// Jobs still running whose outcomes will be dropped
        discarded: usize,
        duration: Duration,
    },
    /// A retried task failed and will be invoked again
    RetryScheduled {
        attempt: u32,
        max_attempts: u32,
        delay: Option<Duration>,
        error: String,
    },
}

/// Trait for observing task execution
pub trait Reporter: Send + Sync {
    /// Report an execution event
    fn report_event(&self, event: FlowEvent);
}

/// A no-op reporter that discards all events
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpReporter;

impl Reporter for NoOpReporter {
    fn report_event(&self, _event: FlowEvent) {}
}

/// Forwards every event to `tracing`
#[derive(Debug, Default, Clone)]
pub struct LogReporter {
    context: Option<String>,
}

impl LogReporter {
    pub fn new() -> Self {
        Self { context: None }
    }

    /// Tag every event with a context label
    pub fn with_context(context: impl Into<String>) -> Self {
        Self {
            context: Some(context.into()),
        }
    }
}

impl Reporter for LogReporter {
    fn report_event(&self, event: FlowEvent) {
        let context = self.context.as_deref().unwrap_or_default();
        match event {
            FlowEvent::RunStarted { run_id, total_jobs } => {
                tracing::info!(context, %run_id, total_jobs, "Run started");
            }
            FlowEvent::JobStarted { run_id, job } => {
                tracing::debug!(context, %run_id, job, "Job started");
            }
            FlowEvent::JobCompleted {
                run_id,
                job,
                duration,
            } => {
                tracing::debug!(context, %run_id, job, ?duration, "Job completed");
            }
            FlowEvent::JobFailed {
                run_id,
                job,
                error,
                duration,
            } => {
                tracing::warn!(context, %run_id, job, error, ?duration, "Job failed");
            }
            FlowEvent::RunFinished {
                run_id,
                succeeded,
                discarded,
                duration,
            } => {
                tracing::info!(context, %run_id, succeeded, discarded, ?duration, "Run finished");
            }
            FlowEvent::RetryScheduled {
                attempt,
                max_attempts,
                delay,
                error,
            } => {
                tracing::debug!(context, attempt, max_attempts, ?delay, error, "Retry scheduled");
            }
        }
    }
}

/// A multi-reporter that broadcasts events to multiple reporters
#[derive(Default, Clone)]
pub struct MultiReporter {
    reporters: Vec<Arc<dyn Reporter>>,
}

impl MultiReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_reporter<R: Reporter + 'static>(mut self, reporter: R) -> Self {
        self.reporters.push(Arc::new(reporter));
        self
    }

    pub fn len(&self) -> usize {
        self.reporters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reporters.is_empty()
    }
}

impl Reporter for MultiReporter {
    fn report_event(&self, event: FlowEvent) {
        for reporter in &self.reporters {
            reporter.report_event(event.clone());
        }
    }
}

impl<R: Reporter + ?Sized> Reporter for Arc<R> {
    fn report_event(&self, event: FlowEvent) {
        (**self).report_event(event)
    }
}
