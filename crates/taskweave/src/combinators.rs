//! Sequential and fan-out combinators
//!
//! These build a new task out of a list of tasks:
//! - [`waterfall`]: each task's results become the next task's inputs
//! - [`serial`]: tasks run one after another, results are collected in order
//! - [`parallel`]: tasks start together, results are collected in declared order

use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::Value;

use crate::normalize::normalize;
use crate::task::{detach, Args, Outcome, Task, TaskRef};
use crate::BoxFuture;

/// Tasks run one at a time, each fed with the previous task's results
#[derive(Clone)]
pub struct Waterfall {
    tasks: Arc<[TaskRef]>,
}

/// Tasks run one at a time, each with the entry point's inputs
#[derive(Clone)]
pub struct Serial {
    tasks: Arc<[TaskRef]>,
}

/// Tasks start together, each with the entry point's inputs
#[derive(Clone)]
pub struct Parallel {
    tasks: Arc<[TaskRef]>,
}

/// Thread values through `tasks` in order
///
/// The first task receives the entry point's inputs, every later task the
/// values its predecessor completed with, and the last task's values are the
/// overall result. An empty list passes its inputs through. The first error
/// stops the chain.
pub fn waterfall(tasks: impl IntoIterator<Item = TaskRef>) -> Waterfall {
    Waterfall {
        tasks: tasks.into_iter().collect(),
    }
}

/// Run `tasks` strictly one after another
///
/// Completes with a single array holding every task's normalized result in
/// list order. The first error stops the sequence.
pub fn serial(tasks: impl IntoIterator<Item = TaskRef>) -> Serial {
    Serial {
        tasks: tasks.into_iter().collect(),
    }
}

/// Start every task at once
///
/// Completes with a single array holding every task's normalized result in
/// list order, whatever order they finish in. The first error is delivered as
/// soon as it happens; the other tasks keep running and their outcomes are
/// dropped.
pub fn parallel(tasks: impl IntoIterator<Item = TaskRef>) -> Parallel {
    Parallel {
        tasks: tasks.into_iter().collect(),
    }
}

impl Task for Waterfall {
    fn call(&self, args: Args) -> BoxFuture<Outcome> {
        let tasks = self.tasks.clone();
        Box::pin(async move {
            let mut values = args;
            for task in tasks.iter() {
                values = task.call(values).await?;
            }
            Ok(values)
        })
    }
}

impl Task for Serial {
    fn call(&self, args: Args) -> BoxFuture<Outcome> {
        let tasks = self.tasks.clone();
        Box::pin(async move {
            let mut results = Vec::with_capacity(tasks.len());
            for task in tasks.iter() {
                results.push(normalize(task.call(args.clone()).await?));
            }
            Ok(vec![Value::Array(results)])
        })
    }
}

impl Task for Parallel {
    fn call(&self, args: Args) -> BoxFuture<Outcome> {
        let tasks = self.tasks.clone();
        Box::pin(async move {
            let started = tasks
                .iter()
                .map(|task| task.call(args.clone()))
                .collect::<Vec<_>>();
            Ok(vec![Value::Array(join_ordered("parallel", started).await?)])
        })
    }
}

/// Wait for already started invocations, returning their normalized results
/// in the order given. Returns on the first error; invocations still running
/// at that point are left to finish detached.
pub(crate) async fn join_ordered(
    label: &str,
    started: Vec<BoxFuture<Outcome>>,
) -> Result<Vec<Value>, crate::FlowError> {
    let mut results = vec![Value::Null; started.len()];
    let mut in_flight: FuturesUnordered<_> = started
        .into_iter()
        .enumerate()
        .map(|(index, future)| {
            let completion = detach(format!("{label}[{index}]"), future);
            async move { (index, completion.await) }
        })
        .collect();

    while let Some((index, outcome)) = in_flight.next().await {
        results[index] = normalize(outcome?);
    }
    Ok(results)
}
