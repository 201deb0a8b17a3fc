//! Dependency graph executor
//!
//! [`Auto`] runs every job of a [`JobGraph`] as soon as all of its
//! dependencies have produced results, passing those results to the job as
//! positional inputs. The first job error ends the run; jobs that are already
//! running are left to finish on their own and their outcomes are dropped.

use std::fmt::{self, Display};
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{FuturesUnordered, StreamExt};
use indexmap::IndexMap;
use serde_json::{Map, Value};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::error::{FlowError, FlowResult, GraphResult};
use crate::graph::{JobGraph, JobGraphBuilder};
use crate::normalize::normalize;
use crate::reporter::{FlowEvent, NoOpReporter, Reporter};
use crate::task::{detach, Args, JobState, Outcome, Task};
use crate::BoxFuture;

/// Identifies one invocation of a graph in logs and reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-invocation bookkeeping; never shared between runs
struct Execution {
    states: Vec<JobState>,
    results: Vec<Option<Value>>,
    remaining: usize,
}

impl Execution {
    fn new(jobs: usize) -> Self {
        Self {
            states: vec![JobState::Pending; jobs],
            results: vec![None; jobs],
            remaining: jobs,
        }
    }

    fn running(&self) -> usize {
        self.states.iter().filter(|state| state.is_running()).count()
    }
}

/// Entry point of a dependency graph, see the module docs
///
/// Cloning is cheap and every call to [`Auto::run`] starts an independent
/// execution.
#[derive(Clone)]
pub struct Auto {
    graph: Arc<JobGraph>,
    reporter: Arc<dyn Reporter>,
}

impl fmt::Debug for Auto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Auto").field("graph", &self.graph).finish()
    }
}

impl Auto {
    pub fn new(graph: JobGraph) -> Self {
        Self {
            graph: Arc::new(graph),
            reporter: Arc::new(NoOpReporter),
        }
    }

    /// Start describing a graph; finish with [`AutoBuilder::build`]
    pub fn builder() -> AutoBuilder {
        AutoBuilder {
            graph: JobGraph::builder(),
        }
    }

    /// Attach a reporter that observes every run
    pub fn with_reporter<R: Reporter + 'static>(mut self, reporter: R) -> Self {
        self.reporter = Arc::new(reporter);
        self
    }

    pub fn graph(&self) -> &JobGraph {
        &self.graph
    }

    /// Run the graph to completion
    ///
    /// Returns every job's normalized result keyed by job name, in
    /// declaration order, or the first job error.
    pub async fn run(&self) -> FlowResult<IndexMap<String, Value>> {
        let run_id = RunId::new();
        let started_at = Instant::now();
        let graph = &self.graph;
        let mut execution = Execution::new(graph.len());
        let mut in_flight = FuturesUnordered::new();

        self.reporter.report_event(FlowEvent::RunStarted {
            run_id,
            total_jobs: graph.len(),
        });
        debug!(%run_id, jobs = graph.len(), "Starting job graph");

        loop {
            for index in graph.ready_jobs(&execution.states) {
                let Some(job) = graph.job_at(index) else {
                    continue;
                };
                let args: Args = job
                    .dependency_indices()
                    .iter()
                    .map(|&dependency| execution.results[dependency].clone().unwrap_or(Value::Null))
                    .collect();

                execution.states[index].mark_started();
                trace!(%run_id, job = job.name(), "Job started");
                self.reporter.report_event(FlowEvent::JobStarted {
                    run_id,
                    job: job.name().to_string(),
                });

                let completion = detach(job.name(), job.task().call(args));
                in_flight.push(async move { (index, completion.await) });
            }

            if execution.remaining == 0 {
                break;
            }

            let Some((index, outcome)) = in_flight.next().await else {
                // Built graphs are acyclic with known dependencies, so some
                // job is always running while others remain.
                return Err(FlowError::contract("job graph stalled with unfinished jobs"));
            };
            let name = graph.job_at(index).map(|job| job.name().to_string()).unwrap_or_default();

            match outcome {
                Ok(values) => {
                    let duration = execution.states[index].mark_done();
                    execution.results[index] = Some(normalize(values));
                    execution.remaining -= 1;
                    trace!(%run_id, job = %name, ?duration, remaining = execution.remaining, "Job done");
                    self.reporter.report_event(FlowEvent::JobCompleted {
                        run_id,
                        job: name,
                        duration,
                    });
                }
                Err(err) => {
                    let duration = execution.states[index].elapsed().unwrap_or_default();
                    execution.states[index].mark_done();
                    let discarded = execution.running();
                    if discarded > 0 {
                        warn!(%run_id, job = %name, discarded, error = %err, "Job failed, dropping outcomes of running jobs");
                    } else {
                        debug!(%run_id, job = %name, error = %err, "Job failed");
                    }
                    self.reporter.report_event(FlowEvent::JobFailed {
                        run_id,
                        job: name,
                        error: err.to_string(),
                        duration,
                    });
                    self.reporter.report_event(FlowEvent::RunFinished {
                        run_id,
                        succeeded: false,
                        discarded,
                        duration: started_at.elapsed(),
                    });
                    return Err(err);
                }
            }
        }

        self.reporter.report_event(FlowEvent::RunFinished {
            run_id,
            succeeded: true,
            discarded: 0,
            duration: started_at.elapsed(),
        });
        debug!(%run_id, elapsed = ?started_at.elapsed(), "Job graph finished");

        Ok(graph
            .names()
            .map(str::to_string)
            .zip(execution.results.into_iter().map(Option::unwrap_or_default))
            .collect())
    }
}

/// As a task, a graph ignores its inputs and completes with a single object
/// mapping job names to results.
impl Task for Auto {
    fn call(&self, _args: Args) -> BoxFuture<Outcome> {
        let auto = self.clone();
        Box::pin(async move {
            let results = auto.run().await?;
            Ok(vec![Value::Object(results.into_iter().collect::<Map<String, Value>>())])
        })
    }
}

/// Builder returned by [`Auto::builder`]
pub struct AutoBuilder {
    graph: JobGraphBuilder,
}

impl AutoBuilder {
    /// Add a job without dependencies
    pub fn job(mut self, name: impl Into<String>, task: impl Task) -> Self {
        self.graph = self.graph.job(name, task);
        self
    }

    /// Add a job fed by the results of `dependencies`
    pub fn job_after<I, S>(mut self, name: impl Into<String>, dependencies: I, task: impl Task) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.graph = self.graph.job_after(name, dependencies, task);
        self
    }

    pub fn build(self) -> GraphResult<Auto> {
        Ok(Auto::new(self.graph.build()?))
    }
}

/// Build a dependency graph entry point from a graph builder
pub fn auto(graph: JobGraphBuilder) -> GraphResult<Auto> {
    Ok(Auto::new(graph.build()?))
}
