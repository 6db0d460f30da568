//! DAG construction and execution runtime
//!
//! This crate owns the graph structure, the frontier-based scheduler that
//! runs it with bounded parallelism, and the node registry used to build
//! graphs from serialized definitions.

mod dag;
mod executor;
mod registry;
mod runtime;

pub use dag::{Dag, DagDescription, ExecutionPlan, NodeDescription};
pub use executor::{DagExecutor, RunResults, DEFAULT_MAX_PARALLEL};
pub use registry::{NodeFactory, NodeMetadata, NodeRegistry};
pub use runtime::{DagRuntime, RuntimeConfig};
