use async_trait::async_trait;
use dagcore::{
    ExecutionContext, InputSpec, Node, NodeConfig, NodeError, NodeOutcome, NodeOutput, OutputSpec,
    Value, ValueType,
};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

const CONDITION_DATA: &str = "condition_data";

/// Decides which branch a [`ConditionalNode`] takes
pub type Predicate = Arc<dyn Fn(&HashMap<String, Value>) -> bool + Send + Sync>;

/// Runs exactly one of two child nodes depending on a predicate over the
/// upstream `condition_data` map.
///
/// The selected branch's outputs are forwarded unchanged and the node
/// completes even when the branch fails; the branch error lands in the logs.
/// Only a failing predicate fails the node. Without a node for the selected
/// branch the output is `result = <predicate value>`.
pub struct ConditionalNode {
    config: NodeConfig,
    predicate: Predicate,
    if_true: Option<Arc<dyn Node>>,
    if_false: Option<Arc<dyn Node>>,
    inputs: Vec<InputSpec>,
    outputs: Vec<OutputSpec>,
}

impl ConditionalNode {
    pub fn new<P>(node_id: impl Into<String>, predicate: P) -> Self
    where
        P: Fn(&HashMap<String, Value>) -> bool + Send + Sync + 'static,
    {
        Self {
            config: NodeConfig::new(node_id, "conditional"),
            predicate: Arc::new(predicate),
            if_true: None,
            if_false: None,
            inputs: vec![InputSpec::optional(
                CONDITION_DATA,
                ValueType::Object,
                Some(Value::Object(HashMap::new())),
            )],
            outputs: vec![OutputSpec::new("result", ValueType::Any)],
        }
    }

    pub fn if_true(mut self, node: impl Node + 'static) -> Self {
        self.if_true = Some(Arc::new(node));
        self
    }

    pub fn if_false(mut self, node: impl Node + 'static) -> Self {
        self.if_false = Some(Arc::new(node));
        self
    }

    pub fn with_branches(
        mut self,
        if_true: Option<Arc<dyn Node>>,
        if_false: Option<Arc<dyn Node>>,
    ) -> Self {
        self.if_true = if_true;
        self.if_false = if_false;
        self
    }

    pub fn with_config(mut self, config: NodeConfig) -> Self {
        self.config = config;
        self
    }

    fn evaluate(&self, ctx: &ExecutionContext) -> Result<bool, NodeError> {
        let empty = HashMap::new();
        let data = match ctx.upstream(CONDITION_DATA) {
            None => &empty,
            Some(Value::Object(data)) => data,
            Some(other) => {
                return Err(NodeError::InvalidInputType {
                    field: CONDITION_DATA.to_string(),
                    expected: ValueType::Object.to_string(),
                    actual: other.value_type().to_string(),
                })
            }
        };

        catch_unwind(AssertUnwindSafe(|| (self.predicate)(data))).map_err(NodeError::from_panic)
    }
}

#[async_trait]
impl Node for ConditionalNode {
    fn config(&self) -> &NodeConfig {
        &self.config
    }

    fn inputs(&self) -> &[InputSpec] {
        &self.inputs
    }

    fn outputs(&self) -> &[OutputSpec] {
        &self.outputs
    }

    async fn run(&self, ctx: ExecutionContext) -> NodeOutcome {
        let decision = match self.evaluate(&ctx) {
            Ok(decision) => decision,
            Err(error) => return NodeOutcome::failed(error),
        };

        let branch = if decision { &self.if_true } else { &self.if_false };
        let Some(branch) = branch else {
            return NodeOutcome::Completed(
                NodeOutput::new()
                    .with_output("result", decision)
                    .with_log(format!("condition evaluated to {}; no branch", decision)),
            );
        };

        let line = format!("condition evaluated to {}; running {}", decision, branch.id());
        tracing::debug!("Node {}: {}", self.id(), line);

        let branch_result = branch.execute(ctx).await;
        let mut logs = vec![line];
        logs.extend(branch_result.logs);
        if let Some(error) = branch_result.error {
            tracing::warn!("Node {}: branch {} failed: {}", self.id(), branch.id(), error);
            logs.push(format!("branch {} failed: {}", branch.id(), error));
        }

        NodeOutcome::Completed(NodeOutput {
            outputs: branch_result.outputs,
            logs,
            resource_usage: branch_result.resource_usage,
        })
    }
}
