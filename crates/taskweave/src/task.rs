//! Core task abstractions and traits

use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::task::JoinError;

use crate::error::FlowError;
use crate::BoxFuture;

/// Positional inputs of a single invocation
pub type Args = Vec<Value>;

/// Completion of a single invocation: either an error or the result values
pub type Outcome = Result<Vec<Value>, FlowError>;

/// A shared, type-erased task
pub type TaskRef = Arc<dyn Task>;

/// Core trait that every unit of work implements
///
/// A task accepts positional inputs and completes exactly once with an
/// [`Outcome`]. Whatever `call` does before it returns the future happens
/// synchronously at call time; combinators rely on that to start a batch of
/// ready tasks in a fixed order.
pub trait Task: Send + Sync + 'static {
    /// Start the task with the given inputs
    fn call(&self, args: Args) -> BoxFuture<Outcome>;
}

impl<T: Task + ?Sized> Task for Arc<T> {
    fn call(&self, args: Args) -> BoxFuture<Outcome> {
        (**self).call(args)
    }
}

impl<T: Task + ?Sized> Task for Box<T> {
    fn call(&self, args: Args) -> BoxFuture<Outcome> {
        (**self).call(args)
    }
}

/// A task backed by an async closure, see [`task_fn`]
#[derive(Clone)]
pub struct FnTask<F> {
    f: F,
}

impl<F> Debug for FnTask<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnTask").finish_non_exhaustive()
    }
}

impl<F, Fut> Task for FnTask<F>
where
    F: Fn(Args) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Outcome> + Send + 'static,
{
    fn call(&self, args: Args) -> BoxFuture<Outcome> {
        Box::pin((self.f)(args))
    }
}

/// Turn an async closure into a [`Task`]
///
/// ```rust
/// use taskweave::{json, task_fn, Task};
///
/// let double = task_fn(|args| async move {
///     let x = args[0].as_i64().unwrap_or_default();
///     Ok(vec![json!(x * 2)])
/// });
/// # let _ = double;
/// ```
pub fn task_fn<F, Fut>(f: F) -> FnTask<F>
where
    F: Fn(Args) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Outcome> + Send + 'static,
{
    FnTask { f }
}

/// Convenience methods available on every task
pub trait TaskExt: Task + Sized {
    /// Erase the concrete type so the task can sit in a list next to others
    fn boxed(self) -> TaskRef {
        Arc::new(self)
    }
}

impl<T: Task> TaskExt for T {}

/// Run a task and deliver its outcome to a completion callback
///
/// The invocation is spawned onto the current tokio runtime and `completion`
/// is called exactly once, from that spawned task.
pub fn invoke<T, C>(task: &T, args: Args, completion: C) -> tokio::task::JoinHandle<()>
where
    T: Task + ?Sized,
    C: FnOnce(Outcome) + Send + 'static,
{
    let future = task.call(args);
    tokio::spawn(async move {
        completion(future.await);
    })
}

/// Spawn a started invocation so that it runs to completion even when the
/// caller stops waiting for it.
pub(crate) fn detach(
    name: impl Into<String>,
    future: BoxFuture<Outcome>,
) -> impl Future<Output = Outcome> + Send + 'static {
    let name = name.into();
    let handle = tokio::spawn(future);
    async move { handle.await.unwrap_or_else(|err| Err(abandoned(name, err))) }
}

fn abandoned(name: String, err: JoinError) -> FlowError {
    if err.is_panic() {
        FlowError::abandoned(name, "task panicked")
    } else {
        FlowError::abandoned(name, "runtime shut down before the task finished")
    }
}

/// Lifecycle of one job inside a single graph invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Waiting for its dependencies
    Pending,
    /// Started, completion not yet reported
    Running { started_at: Instant },
    /// Finished successfully
    Done { duration: Duration },
}

impl JobState {
    pub fn is_pending(&self) -> bool {
        matches!(self, JobState::Pending)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, JobState::Running { .. })
    }

    pub fn is_done(&self) -> bool {
        matches!(self, JobState::Done { .. })
    }

    /// Mark the job as started
    pub fn mark_started(&mut self) {
        *self = JobState::Running {
            started_at: Instant::now(),
        };
    }

    /// Mark the job as done, returning how long it ran
    pub fn mark_done(&mut self) -> Duration {
        let duration = self.elapsed().unwrap_or_default();
        *self = JobState::Done { duration };
        duration
    }

    /// Time spent running so far, or in total once done
    pub fn elapsed(&self) -> Option<Duration> {
        match self {
            JobState::Pending => None,
            JobState::Running { started_at } => Some(started_at.elapsed()),
            JobState::Done { duration } => Some(*duration),
        }
    }
}
