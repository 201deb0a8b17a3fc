//! Named job graphs for the dependency executor

use std::fmt::{self, Debug};

use daggy::petgraph::visit::{EdgeRef, IntoEdgeReferences};
use daggy::{Dag, NodeIndex};
use indexmap::IndexMap;

use crate::error::{GraphError, GraphResult};
use crate::task::{JobState, Task, TaskExt, TaskRef};

/// A named task together with the jobs whose results it consumes
#[derive(Clone)]
pub struct Job {
    name: String,
    dependencies: Vec<String>,
    /// Positions of `dependencies` in the graph's declaration order
    dependency_indices: Vec<usize>,
    task: TaskRef,
}

impl Job {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Dependency names, in the order their results are passed to the task
    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    pub(crate) fn dependency_indices(&self) -> &[usize] {
        &self.dependency_indices
    }

    pub fn task(&self) -> &TaskRef {
        &self.task
    }
}

impl Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

/// A validated, acyclic set of jobs in declaration order
///
/// Declaration order is the tie-break whenever several jobs become ready in
/// the same scan.
#[derive(Clone)]
pub struct JobGraph {
    jobs: IndexMap<String, Job>,
    /// Edges point from a dependency to the job that consumes it
    dag: Dag<String, ()>,
}

impl Debug for JobGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.jobs.values()).finish()
    }
}

impl JobGraph {
    pub fn builder() -> JobGraphBuilder {
        JobGraphBuilder::default()
    }

    /// Get the number of jobs
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Look a job up by name
    pub fn get(&self, name: &str) -> Option<&Job> {
        self.jobs.get(name)
    }

    pub(crate) fn job_at(&self, index: usize) -> Option<&Job> {
        self.jobs.get_index(index).map(|(_, job)| job)
    }

    /// Job names in declaration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.jobs.keys().map(String::as_str)
    }

    pub fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.jobs.values()
    }

    /// Indices of pending jobs whose dependencies are all done, in declaration order
    pub(crate) fn ready_jobs(&self, states: &[JobState]) -> Vec<usize> {
        self.jobs
            .values()
            .enumerate()
            .filter(|(index, job)| {
                states[*index].is_pending()
                    && job
                        .dependency_indices
                        .iter()
                        .all(|dependency| states[*dependency].is_done())
            })
            .map(|(index, _)| index)
            .collect()
    }

    /// Group jobs by the scan in which they would start if every job
    /// completed the moment it started
    pub fn waves(&self) -> Vec<Vec<&str>> {
        let mut states = vec![JobState::Pending; self.jobs.len()];
        let mut waves = Vec::new();

        loop {
            let ready = self.ready_jobs(&states);
            if ready.is_empty() {
                break;
            }
            for &index in &ready {
                states[index] = JobState::Done {
                    duration: Default::default(),
                };
            }
            waves.push(
                ready
                    .into_iter()
                    .filter_map(|index| self.jobs.get_index(index).map(|(name, _)| name.as_str()))
                    .collect(),
            );
        }

        waves
    }

    /// Job names in a topological order of the dependency DAG
    pub fn topological_order(&self) -> Vec<&str> {
        daggy::petgraph::algo::toposort(self.dag.graph(), None)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|node| self.dag.node_weight(node).map(String::as_str))
            .collect()
    }

    /// Export the graph structure for visualization or debugging
    pub fn export_dot(&self) -> String {
        let mut dot = String::from("digraph JobGraph {\n  rankdir=TB;\n");

        for (index, name) in self.jobs.keys().enumerate() {
            dot.push_str(&format!("  {index} [label=\"{name}\"];\n"));
        }
        for edge in self.dag.graph().edge_references() {
            dot.push_str(&format!(
                "  {} -> {};\n",
                edge.source().index(),
                edge.target().index()
            ));
        }

        dot.push_str("}\n");
        dot
    }
}

/// Collects job definitions; validation happens in [`JobGraphBuilder::build`]
#[derive(Default)]
pub struct JobGraphBuilder {
    definitions: Vec<(String, Vec<String>, TaskRef)>,
}

impl JobGraphBuilder {
    /// Add a job without dependencies
    pub fn job(self, name: impl Into<String>, task: impl Task) -> Self {
        self.job_after(name, Vec::<String>::new(), task)
    }

    /// Add a job that runs once all `dependencies` are done, receiving their
    /// results as positional inputs in the listed order
    pub fn job_after<I, S>(mut self, name: impl Into<String>, dependencies: I, task: impl Task) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.definitions.push((
            name.into(),
            dependencies.into_iter().map(Into::into).collect(),
            task.boxed(),
        ));
        self
    }

    /// Validate names and dependencies and reject cycles
    pub fn build(self) -> GraphResult<JobGraph> {
        let mut dag = Dag::with_capacity(self.definitions.len(), 0);
        let mut nodes: IndexMap<String, NodeIndex> = IndexMap::with_capacity(self.definitions.len());

        for (name, _, _) in &self.definitions {
            if nodes.contains_key(name) {
                return Err(GraphError::DuplicateJob { name: name.clone() });
            }
            nodes.insert(name.clone(), dag.add_node(name.clone()));
        }

        let mut jobs = IndexMap::with_capacity(self.definitions.len());
        for (index, (name, dependencies, task)) in self.definitions.into_iter().enumerate() {
            let mut dependency_indices = Vec::with_capacity(dependencies.len());
            for dependency in &dependencies {
                let Some((dependency_index, _, &dependency_node)) = nodes.get_full(dependency) else {
                    return Err(GraphError::unknown_dependency(&name, dependency));
                };
                if dependency_index == index {
                    return Err(GraphError::SelfDependency { job: name });
                }
                dag.add_edge(dependency_node, nodes[index], ())
                    .map_err(|_| GraphError::cycle(dependency, &name))?;
                dependency_indices.push(dependency_index);
            }

            tracing::trace!(job = %name, ?dependencies, "Added job to graph");
            jobs.insert(
                name.clone(),
                Job {
                    name,
                    dependencies,
                    dependency_indices,
                    task,
                },
            );
        }

        Ok(JobGraph { jobs, dag })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::task_fn;

    fn noop() -> impl Task + Clone {
        task_fn(|args| async move { Ok(args) })
    }

    #[test]
    fn test_empty_graph() {
        let graph = JobGraph::builder().build().unwrap();
        assert!(graph.is_empty());
        assert!(graph.waves().is_empty());
        assert!(graph.topological_order().is_empty());
    }

    #[test]
    fn test_declaration_order_and_dependencies() {
        let graph = JobGraph::builder()
            .job("start", noop())
            .job_after("divmul", ["start"], noop())
            .job_after("sum", ["divmul"], noop())
            .build()
            .unwrap();

        assert_eq!(graph.len(), 3);
        assert_eq!(graph.names().collect::<Vec<_>>(), ["start", "divmul", "sum"]);
        assert_eq!(graph.get("sum").unwrap().dependencies(), ["divmul"]);
        assert_eq!(graph.get("divmul").unwrap().dependency_indices(), [0]);
        assert!(graph.get("missing").is_none());
    }

    #[test]
    fn test_ready_jobs_follow_states() {
        let graph = JobGraph::builder()
            .job("a", noop())
            .job("b", noop())
            .job_after("c", ["a", "b"], noop())
            .build()
            .unwrap();

        let mut states = vec![JobState::Pending; 3];
        assert_eq!(graph.ready_jobs(&states), [0, 1]);

        states[0].mark_started();
        states[1].mark_started();
        assert!(graph.ready_jobs(&states).is_empty());

        states[1].mark_done();
        assert!(graph.ready_jobs(&states).is_empty());

        states[0].mark_done();
        assert_eq!(graph.ready_jobs(&states), [2]);
    }

    #[test]
    fn test_waves() {
        let graph = JobGraph::builder()
            .job_after("report", ["load", "fetch"], noop())
            .job("fetch", noop())
            .job_after("load", ["fetch"], noop())
            .job("config", noop())
            .build()
            .unwrap();

        assert_eq!(
            graph.waves(),
            vec![vec!["fetch", "config"], vec!["load"], vec!["report"]]
        );

        let order = graph.topological_order();
        let position = |name| order.iter().position(|n| *n == name).unwrap();
        assert!(position("fetch") < position("load"));
        assert!(position("load") < position("report"));
    }

    #[test]
    fn test_unknown_dependency() {
        let result = JobGraph::builder()
            .job_after("sum", ["divmul"], noop())
            .build();
        assert_eq!(
            result.unwrap_err(),
            GraphError::unknown_dependency("sum", "divmul")
        );
    }

    #[test]
    fn test_self_dependency() {
        let result = JobGraph::builder().job_after("a", ["a"], noop()).build();
        assert_eq!(
            result.unwrap_err(),
            GraphError::SelfDependency { job: "a".into() }
        );
    }

    #[test]
    fn test_cycle_detection() {
        let result = JobGraph::builder()
            .job_after("a", ["c"], noop())
            .job_after("b", ["a"], noop())
            .job_after("c", ["b"], noop())
            .build();
        assert!(matches!(result, Err(GraphError::CycleDetected { .. })));
    }

    #[test]
    fn test_duplicate_job() {
        let result = JobGraph::builder().job("a", noop()).job("a", noop()).build();
        assert_eq!(
            result.unwrap_err(),
            GraphError::DuplicateJob { name: "a".into() }
        );
    }

    #[test]
    fn test_export_dot() {
        let graph = JobGraph::builder()
            .job("a", noop())
            .job_after("b", ["a"], noop())
            .build()
            .unwrap();

        let dot = graph.export_dot();
        assert!(dot.starts_with("digraph JobGraph {"));
        assert!(dot.contains("0 [label=\"a\"]"));
        assert!(dot.contains("0 -> 1;"));
    }
}
