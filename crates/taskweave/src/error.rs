//! Error types for taskweave combinators

use serde_json::Value;
use thiserror::Error;

/// Main error type delivered to the caller of any composed task
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FlowError {
    /// Error value reported by a task itself. Combinators pass it through untouched.
    #[error("Task error: {0}")]
    Task(Value),

    #[error("Contract violation: {0}")]
    Contract(String),

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A detached child never reported back (it panicked or the runtime went away).
    #[error("Task {name} did not complete: {reason}")]
    Abandoned { name: String, reason: String },
}

/// Errors found while validating a job graph or state machine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Job `{job}` depends on unknown job `{dependency}`")]
    UnknownDependency { job: String, dependency: String },

    #[error("Invalid dependency: job `{job}` cannot depend on itself")]
    SelfDependency { job: String },

    #[error("Cycle detected: `{to}` depending on `{from}` closes a cycle")]
    CycleDetected { from: String, to: String },

    #[error("Job `{name}` is declared more than once")]
    DuplicateJob { name: String },

    #[error("State `{name}` is declared more than once")]
    DuplicateState { name: String },

    #[error("State machine has no states")]
    EmptyStateMachine,
}

/// Errors related to combinator configuration
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Invalid attempts: {value} (must be > 0)")]
    InvalidAttempts { value: u32 },

    #[error("Invalid backoff factor: {factor} (must be finite and > 0)")]
    InvalidFactor { factor: f64 },

    #[error("Invalid chunk size: {value} (must be > 0)")]
    InvalidChunkSize { value: usize },
}

/// Result type alias for taskweave operations
pub type FlowResult<T> = Result<T, FlowError>;

/// Result type alias for graph operations
pub type GraphResult<T> = Result<T, GraphError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

impl FlowError {
    /// Create a task error from any JSON-convertible value
    pub fn task<V: Into<Value>>(value: V) -> Self {
        FlowError::Task(value.into())
    }

    pub fn contract<S: Into<String>>(message: S) -> Self {
        FlowError::Contract(message.into())
    }

    pub fn abandoned<S: Into<String>, R: Into<String>>(name: S, reason: R) -> Self {
        FlowError::Abandoned {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Check if this error was reported by a task rather than by the combinators
    pub fn is_task(&self) -> bool {
        matches!(self, FlowError::Task(_))
    }

    /// The value a task failed with, if any
    pub fn task_value(&self) -> Option<&Value> {
        match self {
            FlowError::Task(value) => Some(value),
            _ => None,
        }
    }
}

impl GraphError {
    /// Create a cycle detection error
    pub fn cycle<F: Into<String>, T: Into<String>>(from: F, to: T) -> Self {
        GraphError::CycleDetected {
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn unknown_dependency<J: Into<String>, D: Into<String>>(job: J, dependency: D) -> Self {
        GraphError::UnknownDependency {
            job: job.into(),
            dependency: dependency.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_task_error_keeps_payload() {
        let err = FlowError::task("an error");
        assert!(err.is_task());
        assert_eq!(err.task_value(), Some(&json!("an error")));
        assert_eq!(err.to_string(), "Task error: \"an error\"");

        let structured = FlowError::task(json!({"code": 7}));
        assert_eq!(structured.task_value(), Some(&json!({"code": 7})));
    }

    #[test]
    fn test_layered_errors() {
        let err: FlowError = GraphError::cycle("a", "b").into();
        assert!(!err.is_task());
        assert!(err.task_value().is_none());
        assert!(matches!(
            err,
            FlowError::Graph(GraphError::CycleDetected { ref from, ref to }) if from == "a" && to == "b"
        ));

        let err: FlowError = ConfigError::InvalidAttempts { value: 0 }.into();
        assert_eq!(
            err.to_string(),
            "Configuration error: Invalid attempts: 0 (must be > 0)"
        );
    }

    #[test]
    fn test_graph_error_helpers() {
        let missing = GraphError::unknown_dependency("sum", "divmul");
        if let GraphError::UnknownDependency { job, dependency } = missing {
            assert_eq!(job, "sum");
            assert_eq!(dependency, "divmul");
        } else {
            panic!("Expected unknown dependency error");
        }
    }

    #[test]
    fn test_abandoned() {
        let err = FlowError::abandoned("fetch", "task panicked");
        assert_eq!(err.to_string(), "Task fetch did not complete: task panicked");
    }
}
