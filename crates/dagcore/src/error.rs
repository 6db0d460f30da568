use crate::ExecutionResult;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Node error: {0}")]
    Node(#[from] NodeError),

    #[error("DAG error: {0}")]
    Dag(#[from] DagError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failure of a single node execution attempt.
///
/// The `Display` text is what ends up in `ExecutionResult::error`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NodeError {
    #[error("Required input '{0}' is missing")]
    MissingInput(String),

    #[error("Input '{field}' should be {expected}, got {actual}")]
    InvalidInputType {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Invalid inputs: {}", .0.join("; "))]
    InvalidInputs(Vec<String>),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("{0}")]
    ExecutionFailed(String),

    #[error("Command failed with return code {code}")]
    CommandFailed { code: i32 },

    #[error("Command terminated by signal")]
    CommandTerminated,

    #[error("Failed to run command: {0}")]
    Spawn(String),

    #[error("Timeout after {seconds}s")]
    Timeout { seconds: f64 },

    #[error("Node panicked: {0}")]
    Panicked(String),
}

impl NodeError {
    /// Convert a caught panic payload into a node failure
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(message) = payload.downcast_ref::<&str>() {
            message.to_string()
        } else if let Some(message) = payload.downcast_ref::<String>() {
            message.clone()
        } else {
            "unknown panic".to_string()
        };
        NodeError::Panicked(message)
    }
}

/// Errors raised by graph construction, inspection and execution.
#[derive(Error, Debug)]
pub enum DagError {
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Duplicate node id: {0}")]
    DuplicateNode(String),

    #[error("Adding edge {from} -> {to} would create a cycle")]
    CycleDetected { from: String, to: String },

    #[error("DAG contains cycles")]
    Cyclic,

    #[error("DAG validation failed: {}", join_issues(.0))]
    Validation(Vec<ValidationIssue>),

    /// The run loop found no ready node while `remaining` were unresolved.
    /// `results` holds every result recorded so far, including SKIPPED
    /// entries for the remaining nodes.
    #[error("No ready nodes found, but {} nodes remain", .remaining.len())]
    Stalled {
        remaining: Vec<String>,
        results: HashMap<String, ExecutionResult>,
    },

    #[error("Unknown node type: {0}")]
    UnknownNodeType(String),

    #[error("Invalid definition: {0}")]
    InvalidDefinition(String),
}

/// A structural problem reported by `Dag::validate`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    Cycle,
    IsolatedNodes(Vec<String>),
    DanglingGraphEntry(String),
    UnindexedNode(String),
    DependencyMismatch(String),
    DependentMismatch(String),
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::Cycle => write!(f, "DAG contains cycles"),
            ValidationIssue::IsolatedNodes(ids) => {
                write!(f, "Isolated nodes found: [{}]", ids.join(", "))
            }
            ValidationIssue::DanglingGraphEntry(id) => {
                write!(f, "Graph references non-existent node: {}", id)
            }
            ValidationIssue::UnindexedNode(id) => {
                write!(f, "Node {} is registered but missing from the graph", id)
            }
            ValidationIssue::DependencyMismatch(id) => {
                write!(f, "Node {} dependencies don't match graph structure", id)
            }
            ValidationIssue::DependentMismatch(id) => {
                write!(f, "Node {} dependents don't match graph structure", id)
            }
        }
    }
}

fn join_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
