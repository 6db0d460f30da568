//! Standard node library
//!
//! The node variants the scheduler runs: wrapped callables, external
//! commands, and conditional branching between two child nodes.

mod command;
mod conditional;
mod function;

pub use command::{CommandNode, CommandNodeFactory};
pub use conditional::{ConditionalNode, Predicate};
pub use function::{CallArgs, FunctionNode, FunctionNodeFactory, NodeFn};

use dagcore::{NodeConfig, NodeError};
use dagruntime::NodeRegistry;
use std::sync::Arc;
use std::time::Duration;

/// Register all configuration-constructible nodes with a registry
pub fn register_all(registry: &mut NodeRegistry) {
    registry.register(Arc::new(CommandNodeFactory));
}

/// The node's own timeout, if it declared one
pub(crate) fn configured_timeout(config: &NodeConfig) -> Result<Option<Duration>, NodeError> {
    config
        .timeout
        .map(|seconds| {
            Duration::try_from_secs_f64(seconds).map_err(|_| {
                NodeError::Configuration(format!("invalid timeout: {}", seconds))
            })
        })
        .transpose()
}
