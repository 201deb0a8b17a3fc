//! Collection helpers that run a task once per item
//!
//! The items are the elements of the first input, which must be an array.
//! Each item is handed to the task as its only input.

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;

use serde_json::Value;
use tracing::trace;

use crate::combinators::join_ordered;
use crate::error::{ConfigError, ConfigResult, FlowError};
use crate::task::{Args, Outcome, Task};
use crate::BoxFuture;

/// How the per-item invocations are scheduled and reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// All items at once, nothing reported
    Each,
    /// All items at once, results reported in input order
    Map,
    /// Groups of items one group at a time, results reported in input order
    Chunk(NonZeroUsize),
}

/// A task applied to every item of its input array
pub struct ForEach<T> {
    task: Arc<T>,
    mode: Mode,
}

impl<T> fmt::Debug for ForEach<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForEach").field("mode", &self.mode).finish_non_exhaustive()
    }
}

impl<T> Clone for ForEach<T> {
    fn clone(&self) -> Self {
        Self {
            task: self.task.clone(),
            mode: self.mode,
        }
    }
}

/// Run `task` for every item concurrently, completing with no values
pub fn each<T: Task>(task: T) -> ForEach<T> {
    ForEach {
        task: Arc::new(task),
        mode: Mode::Each,
    }
}

/// Run `task` for every item concurrently, completing with the array of
/// normalized results in input order
pub fn map<T: Task>(task: T) -> ForEach<T> {
    ForEach {
        task: Arc::new(task),
        mode: Mode::Map,
    }
}

/// Like [`map`], but only `size` consecutive items run at a time; the next
/// group starts once the previous one has completed
pub fn chunk<T: Task>(size: usize, task: T) -> ConfigResult<ForEach<T>> {
    let size = NonZeroUsize::new(size).ok_or(ConfigError::InvalidChunkSize { value: size })?;
    Ok(ForEach {
        task: Arc::new(task),
        mode: Mode::Chunk(size),
    })
}

fn items(args: Args) -> Result<Vec<Value>, FlowError> {
    match args.into_iter().next() {
        Some(Value::Array(items)) => Ok(items),
        Some(other) => Err(FlowError::contract(format!(
            "expected an array of items, got {other}"
        ))),
        None => Err(FlowError::contract("expected an array of items, got nothing")),
    }
}

impl<T: Task> Task for ForEach<T> {
    fn call(&self, args: Args) -> BoxFuture<Outcome> {
        let items = match items(args) {
            Ok(items) => items,
            Err(err) => return Box::pin(async move { Err(err) }),
        };
        let mode = self.mode;

        let group_size = match mode {
            Mode::Chunk(size) => size.get(),
            Mode::Each | Mode::Map => items.len().max(1),
        };
        let mut groups = items
            .chunks(group_size)
            .map(<[Value]>::to_vec)
            .collect::<Vec<_>>()
            .into_iter();

        // The first group starts at call time like every other task
        let first = groups.next().map(|group| self.start(group));
        let task = self.task.clone();

        Box::pin(async move {
            let mut results = Vec::new();
            if let Some(started) = first {
                results.extend(join_ordered("item", started).await?);
            }
            for group in groups {
                trace!(size = group.len(), "Starting next chunk");
                let started = group.into_iter().map(|item| task.call(vec![item])).collect();
                results.extend(join_ordered("item", started).await?);
            }

            match mode {
                Mode::Each => Ok(vec![]),
                Mode::Map | Mode::Chunk(_) => Ok(vec![Value::Array(results)]),
            }
        })
    }
}

impl<T: Task> ForEach<T> {
    fn start(&self, group: Vec<Value>) -> Vec<BoxFuture<Outcome>> {
        group.into_iter().map(|item| self.task.call(vec![item])).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::task_fn;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    fn double() -> impl Task {
        task_fn(|args: Args| async move {
            let x = args[0].as_i64().unwrap();
            tokio::time::sleep(Duration::from_millis(10 * (4 - x as u64))).await;
            Ok(vec![json!(x * 2)])
        })
    }

    #[tokio::test]
    async fn test_map_keeps_input_order() {
        let outcome = map(double()).call(vec![json!([1, 2, 3])]).await;
        assert_eq!(outcome, Ok(vec![json!([2, 4, 6])]));
        assert_eq!(map(double()).call(vec![json!([])]).await, Ok(vec![json!([])]));
    }

    #[tokio::test]
    async fn test_each_runs_every_item() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = seen.clone();
        let task = each(task_fn(move |args: Args| {
            recorder.lock().unwrap().push(args[0].clone());
            async { Ok(vec![json!("ignored")]) }
        }));

        assert_eq!(task.call(vec![json!(["a", "b"])]).await, Ok(vec![]));
        assert_eq!(*seen.lock().unwrap(), vec![json!("a"), json!("b")]);
    }

    #[tokio::test]
    async fn test_chunk_bounds_concurrency() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (r, p) = (running.clone(), peak.clone());
        let task = chunk(
            2,
            task_fn(move |args: Args| {
                let now = r.fetch_add(1, Ordering::SeqCst) + 1;
                p.fetch_max(now, Ordering::SeqCst);
                let r = r.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    r.fetch_sub(1, Ordering::SeqCst);
                    Ok(args)
                }
            }),
        )
        .unwrap();

        let outcome = task.call(vec![json!([1, 2, 3, 4, 5])]).await;
        assert_eq!(outcome, Ok(vec![json!([1, 2, 3, 4, 5])]));
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_first_error_is_delivered() {
        let task = map(task_fn(|args: Args| async move {
            if args[0] == json!(2) {
                Err(FlowError::task("bad item"))
            } else {
                Ok(args)
            }
        }));
        assert_eq!(task.call(vec![json!([1, 2, 3])]).await, Err(FlowError::task("bad item")));
    }

    #[tokio::test]
    async fn test_rejects_non_array_input() {
        let err = map(double()).call(vec![json!(3)]).await.unwrap_err();
        assert!(matches!(err, FlowError::Contract(_)));
        assert!(each(double()).call(vec![]).await.is_err());
    }

    #[test]
    fn test_chunk_size_must_be_positive() {
        assert_eq!(
            chunk(0, double()).unwrap_err(),
            ConfigError::InvalidChunkSize { value: 0 }
        );
    }
}
