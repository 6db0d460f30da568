//! Core abstractions for the DAG engine
//!
//! This crate provides the data model every other crate builds on: node
//! configuration, the `Node` trait and its per-run records, run events and
//! the error taxonomy. It knows nothing about scheduling.

mod config;
mod definition;
mod error;
mod events;
mod node;
mod value;

pub use config::{NodeConfig, ResourceRequirement, ResourceType};
pub use definition::{DagDefinition, EdgeSpec};
pub use error::{DagError, FlowError, NodeError, ValidationIssue};
pub use events::{DagState, EventBus, ExecutionEvent};
pub use node::{
    validate_inputs, ExecutionContext, ExecutionResult, InputSpec, Node, NodeHandle, NodeOutcome,
    NodeOutput, NodeState, OutputSpec,
};
pub use value::{Value, ValueType};

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, FlowError>;
