//! Taskweave - composable async task orchestration
//!
//! Every unit of work is a [`Task`]: it takes positional [`Value`] inputs and
//! completes exactly once with either an error or a list of result values.
//! Combinators build new tasks out of existing ones, so they nest freely.
//!
//! # Overview
//!
//! - [`auto`]: a dependency graph of named jobs; each job starts as soon as
//!   all of its dependencies are done and receives their results
//! - [`limit`]: bounds how many invocations of a task run at once, optionally
//!   per partition key, queueing the rest in arrival order
//! - [`retry`]: re-invokes a failing task with optional backoff
//! - [`waterfall`], [`serial`], [`parallel`], [`manual`] and the collection
//!   helpers [`each`], [`map`], [`chunk`]
//!
//! Results are normalized before they are stored: no values become `null`,
//! one value is kept as is and several become an array, see [`normalize`].
//!
//! Started work is never cancelled. When a combinator delivers the first
//! error, siblings that are still running finish in the background and their
//! outcomes are dropped.
//!
//! # Example
//!
//! ```rust
//! use taskweave::{json, task_fn, Args, Auto};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let graph = Auto::builder()
//!         .job("start", task_fn(|_| async { Ok(vec![json!(4)]) }))
//!         .job_after(
//!             "divmul",
//!             ["start"],
//!             task_fn(|args: Args| async move {
//!                 let x = args[0].as_f64().unwrap_or_default();
//!                 Ok(vec![json!(x / 2.0), json!(x * 2.0)])
//!             }),
//!         )
//!         .build()?;
//!
//!     let results = graph.run().await?;
//!     assert_eq!(results["divmul"], json!([2.0, 8.0]));
//!     Ok(())
//! }
//! ```

pub mod collection;
pub mod combinators;
pub mod decorators;
pub mod error;
pub mod executor;
pub mod graph;
pub mod limit;
pub mod manual;
pub mod normalize;
pub mod reporter;
pub mod retry;
pub mod task;
pub mod types;

pub use collection::{chunk, each, map, ForEach};
pub use combinators::{parallel, serial, waterfall, Parallel, Serial, Waterfall};
pub use decorators::{fallback, logged, noop, sleep, Fallback, Logged, Noop, Sleep};
pub use error::{ConfigError, ConfigResult, FlowError, FlowResult, GraphError, GraphResult};
pub use executor::{auto, Auto, AutoBuilder, RunId};
pub use graph::{Job, JobGraph, JobGraphBuilder};
pub use limit::{limit, LimitRegistry, Limited, PartitionStats, GLOBAL_PARTITION};
pub use manual::{manual, Manual, ManualBuilder, Step};
pub use normalize::normalize;
pub use reporter::{FlowEvent, LogReporter, MultiReporter, NoOpReporter, Reporter};
pub use retry::{retry, Retry};
pub use task::{invoke, task_fn, Args, FnTask, JobState, Outcome, Task, TaskExt, TaskRef};
pub use types::{Backoff, Limit, LimitConfig, RetryConfig, RetryPolicy, DEFAULT_ATTEMPTS};

pub use serde_json::{json, Value};

use std::future::Future;
use std::pin::Pin;

/// A boxed future that is Send and can be used across thread boundaries
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;
