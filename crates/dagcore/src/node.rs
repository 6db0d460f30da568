use crate::{NodeConfig, NodeError, ResourceRequirement, ResourceType, Value, ValueType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Core trait that every executable node variant implements.
///
/// `run` reports ordinary failures through [`NodeOutcome::Failed`]; it never
/// needs to panic or bubble errors for business failures. The scheduler only
/// calls [`Node::execute`], which times `run` and produces the terminal
/// [`ExecutionResult`].
#[async_trait]
pub trait Node: Send + Sync {
    /// Static configuration, including the node id
    fn config(&self) -> &NodeConfig;

    fn id(&self) -> &str {
        &self.config().node_id
    }

    /// Type identifier (e.g. "function", "command", "conditional")
    fn node_type(&self) -> &str {
        &self.config().node_type
    }

    /// Declared inputs, captured once at construction
    fn inputs(&self) -> &[InputSpec] {
        &[]
    }

    /// Declared outputs
    fn outputs(&self) -> &[OutputSpec] {
        &[]
    }

    /// Perform the node's work
    async fn run(&self, ctx: ExecutionContext) -> NodeOutcome;

    /// Execute a single attempt and record it as a terminal result
    async fn execute(&self, ctx: ExecutionContext) -> ExecutionResult {
        let start = Instant::now();
        let outcome = self.run(ctx).await;
        ExecutionResult::from_outcome(self.id(), outcome, start.elapsed())
    }

    /// Check candidate input values against the declared inputs
    fn validate_inputs(&self, values: &HashMap<String, Value>) -> Vec<String> {
        validate_inputs(self.inputs(), values)
    }
}

/// Accumulate every problem with `values` instead of stopping at the first.
pub fn validate_inputs(specs: &[InputSpec], values: &HashMap<String, Value>) -> Vec<String> {
    let mut errors = Vec::new();

    for spec in specs {
        match values.get(&spec.name) {
            None if spec.required => {
                errors.push(NodeError::MissingInput(spec.name.clone()).to_string());
            }
            None => {}
            Some(value) if !spec.value_type.accepts(value) => {
                errors.push(
                    NodeError::InvalidInputType {
                        field: spec.name.clone(),
                        expected: spec.value_type.to_string(),
                        actual: value.value_type().to_string(),
                    }
                    .to_string(),
                );
            }
            Some(_) => {}
        }
    }

    errors
}

/// Lifecycle of a node within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl NodeState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, NodeState::Completed | NodeState::Failed | NodeState::Skipped)
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeState::Pending => "pending",
            NodeState::Running => "running",
            NodeState::Completed => "completed",
            NodeState::Failed => "failed",
            NodeState::Skipped => "skipped",
        };
        f.write_str(name)
    }
}

/// Declared input of a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSpec {
    pub name: String,
    pub value_type: ValueType,
    pub required: bool,
    pub default: Option<Value>,
    pub description: Option<String>,
}

impl InputSpec {
    pub fn required(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
            required: true,
            default: None,
            description: None,
        }
    }

    pub fn optional(name: impl Into<String>, value_type: ValueType, default: Option<Value>) -> Self {
        Self {
            name: name.into(),
            value_type,
            required: false,
            default,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Declared output of a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSpec {
    pub name: String,
    pub value_type: ValueType,
    pub description: Option<String>,
}

impl OutputSpec {
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
            description: None,
        }
    }
}

/// Per-invocation bundle handed to a node.
///
/// `upstream_outputs` is owned by each copy. The remaining maps are shared
/// read-only views across every node of the same run.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub run_id: String,
    pub timestamp: DateTime<Utc>,
    pub upstream_outputs: HashMap<String, Value>,
    pub global_config: Arc<HashMap<String, Value>>,
    pub resources: Arc<HashMap<ResourceType, f64>>,
    pub metadata: Arc<HashMap<String, Value>>,
}

impl ExecutionContext {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            timestamp: Utc::now(),
            upstream_outputs: HashMap::new(),
            global_config: Arc::new(HashMap::new()),
            resources: Arc::new(HashMap::new()),
            metadata: Arc::new(HashMap::new()),
        }
    }

    /// Context with a freshly generated run id
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4().to_string())
    }

    pub fn with_upstream(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.upstream_outputs.insert(name.into(), value.into());
        self
    }

    pub fn with_global_config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        Arc::make_mut(&mut self.global_config).insert(key.into(), value.into());
        self
    }

    pub fn with_resource(mut self, resource: ResourceType, amount: f64) -> Self {
        Arc::make_mut(&mut self.resources).insert(resource, amount);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        Arc::make_mut(&mut self.metadata).insert(key.into(), value.into());
        self
    }

    /// Fresh copy for one node invocation: the base upstream outputs overlaid
    /// with each map in `upstream`, in order. Shared maps are not copied.
    pub fn for_invocation<'a, I>(&self, upstream: I) -> Self
    where
        I: IntoIterator<Item = &'a HashMap<String, Value>>,
    {
        let mut upstream_outputs = self.upstream_outputs.clone();
        for outputs in upstream {
            upstream_outputs.extend(outputs.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        Self {
            run_id: self.run_id.clone(),
            timestamp: Utc::now(),
            upstream_outputs,
            global_config: Arc::clone(&self.global_config),
            resources: Arc::clone(&self.resources),
            metadata: Arc::clone(&self.metadata),
        }
    }

    pub fn upstream(&self, name: &str) -> Option<&Value> {
        self.upstream_outputs.get(name)
    }
}

/// Successful payload of a node run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeOutput {
    pub outputs: HashMap<String, Value>,
    pub logs: Vec<String>,
    pub resource_usage: HashMap<ResourceType, f64>,
}

impl NodeOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output(mut self, port: impl Into<String>, value: impl Into<Value>) -> Self {
        self.outputs.insert(port.into(), value.into());
        self
    }

    pub fn with_log(mut self, line: impl Into<String>) -> Self {
        self.logs.push(line.into());
        self
    }
}

/// Explicit result of one `Node::run` call
#[derive(Debug, Clone, PartialEq)]
pub enum NodeOutcome {
    Completed(NodeOutput),
    /// `output` keeps whatever the node produced before failing
    Failed { error: NodeError, output: NodeOutput },
}

impl NodeOutcome {
    pub fn failed(error: NodeError) -> Self {
        NodeOutcome::Failed {
            error,
            output: NodeOutput::default(),
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, NodeOutcome::Completed(_))
    }

    pub fn output(&self) -> &NodeOutput {
        match self {
            NodeOutcome::Completed(output) => output,
            NodeOutcome::Failed { output, .. } => output,
        }
    }
}

impl From<Result<NodeOutput, NodeError>> for NodeOutcome {
    fn from(result: Result<NodeOutput, NodeError>) -> Self {
        match result {
            Ok(output) => NodeOutcome::Completed(output),
            Err(error) => NodeOutcome::failed(error),
        }
    }
}

/// Terminal record of one node's single execution attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub node_id: String,
    pub state: NodeState,
    pub outputs: HashMap<String, Value>,
    pub error: Option<String>,
    pub execution_time_ms: u64,
    pub resource_usage: HashMap<ResourceType, f64>,
    pub logs: Vec<String>,
}

impl ExecutionResult {
    pub fn from_outcome(node_id: impl Into<String>, outcome: NodeOutcome, elapsed: Duration) -> Self {
        let (state, output, error) = match outcome {
            NodeOutcome::Completed(output) => (NodeState::Completed, output, None),
            NodeOutcome::Failed { error, output } => {
                (NodeState::Failed, output, Some(error.to_string()))
            }
        };

        Self {
            node_id: node_id.into(),
            state,
            outputs: output.outputs,
            error,
            execution_time_ms: elapsed.as_millis() as u64,
            resource_usage: output.resource_usage,
            logs: output.logs,
        }
    }

    /// Empty FAILED record, used when a node could not report for itself
    pub fn failed(node_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self::empty(node_id, NodeState::Failed, error)
    }

    /// Record for a node that never became ready
    pub fn skipped(node_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::empty(node_id, NodeState::Skipped, reason)
    }

    fn empty(node_id: impl Into<String>, state: NodeState, error: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            state,
            outputs: HashMap::new(),
            error: Some(error.into()),
            execution_time_ms: 0,
            resource_usage: HashMap::new(),
            logs: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.state == NodeState::Completed
    }
}

/// A node as registered on a DAG: the shared executable plus its
/// dependency bookkeeping and current state.
///
/// Cloning a handle shares the executable and the state cell; the
/// dependency sets are copied.
#[derive(Clone)]
pub struct NodeHandle {
    node: Arc<dyn Node>,
    dependencies: BTreeSet<String>,
    dependents: BTreeSet<String>,
    state: Arc<RwLock<NodeState>>,
}

impl NodeHandle {
    pub fn new(node: impl Node + 'static) -> Self {
        Self::from_arc(Arc::new(node))
    }

    pub fn from_arc(node: Arc<dyn Node>) -> Self {
        Self {
            node,
            dependencies: BTreeSet::new(),
            dependents: BTreeSet::new(),
            state: Arc::new(RwLock::new(NodeState::Pending)),
        }
    }

    pub fn id(&self) -> &str {
        self.node.id()
    }

    pub fn node(&self) -> &Arc<dyn Node> {
        &self.node
    }

    pub fn config(&self) -> &NodeConfig {
        self.node.config()
    }

    pub fn node_type(&self) -> &str {
        self.node.node_type()
    }

    pub fn inputs(&self) -> &[InputSpec] {
        self.node.inputs()
    }

    pub fn outputs(&self) -> &[OutputSpec] {
        self.node.outputs()
    }

    pub fn resource_requirements(&self) -> &[ResourceRequirement] {
        &self.config().resource_requirements
    }

    pub fn dependencies(&self) -> &BTreeSet<String> {
        &self.dependencies
    }

    pub fn dependents(&self) -> &BTreeSet<String> {
        &self.dependents
    }

    pub fn add_dependency(&mut self, node_id: impl Into<String>) -> bool {
        self.dependencies.insert(node_id.into())
    }

    pub fn remove_dependency(&mut self, node_id: &str) -> bool {
        self.dependencies.remove(node_id)
    }

    pub fn add_dependent(&mut self, node_id: impl Into<String>) -> bool {
        self.dependents.insert(node_id.into())
    }

    pub fn remove_dependent(&mut self, node_id: &str) -> bool {
        self.dependents.remove(node_id)
    }

    pub fn state(&self) -> NodeState {
        match self.state.read() {
            Ok(state) => *state,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn set_state(&self, state: NodeState) {
        match self.state.write() {
            Ok(mut guard) => *guard = state,
            Err(poisoned) => *poisoned.into_inner() = state,
        }
    }

    /// True iff every dependency is in `completed`
    pub fn can_execute(&self, completed: &HashSet<String>) -> bool {
        self.dependencies.iter().all(|dep| completed.contains(dep))
    }

    pub fn validate_inputs(&self, values: &HashMap<String, Value>) -> Vec<String> {
        self.node.validate_inputs(values)
    }

    /// Same executable and state cell, no edges
    pub fn detached(&self) -> Self {
        Self {
            node: Arc::clone(&self.node),
            dependencies: BTreeSet::new(),
            dependents: BTreeSet::new(),
            state: Arc::clone(&self.state),
        }
    }
}

impl fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeHandle")
            .field("id", &self.id())
            .field("node_type", &self.node_type())
            .field("dependencies", &self.dependencies)
            .field("dependents", &self.dependents)
            .field("state", &self.state())
            .finish()
    }
}
