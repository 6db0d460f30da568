use crate::configured_timeout;
use async_trait::async_trait;
use dagcore::{
    ExecutionContext, InputSpec, Node, NodeConfig, NodeError, NodeOutcome, NodeOutput, OutputSpec,
    Value, ValueType,
};
use dagruntime::{NodeFactory, NodeMetadata};
use futures::future::{BoxFuture, FutureExt};
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Input name that receives the execution context instead of a value
const CONTEXT_PARAM: &str = "context";

/// Type-erased callable wrapped by a [`FunctionNode`]
pub type NodeFn = Arc<dyn Fn(CallArgs) -> BoxFuture<'static, Result<Value, NodeError>> + Send + Sync>;

/// Arguments resolved for one call of a wrapped function
#[derive(Debug, Clone)]
pub struct CallArgs {
    values: HashMap<String, Value>,
    context: Option<ExecutionContext>,
}

impl CallArgs {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn require(&self, name: &str) -> Result<&Value, NodeError> {
        self.values
            .get(name)
            .ok_or_else(|| NodeError::MissingInput(name.to_string()))
    }

    pub fn str(&self, name: &str) -> Result<&str, NodeError> {
        let value = self.require(name)?;
        value.as_str().ok_or_else(|| mismatch(name, ValueType::String, value))
    }

    pub fn f64(&self, name: &str) -> Result<f64, NodeError> {
        let value = self.require(name)?;
        value.as_f64().ok_or_else(|| mismatch(name, ValueType::Number, value))
    }

    /// Present only when the function declared a `context` input
    pub fn context(&self) -> Option<&ExecutionContext> {
        self.context.as_ref()
    }

    pub fn values(&self) -> &HashMap<String, Value> {
        &self.values
    }
}

fn mismatch(name: &str, expected: ValueType, actual: &Value) -> NodeError {
    NodeError::InvalidInputType {
        field: name.to_string(),
        expected: expected.to_string(),
        actual: actual.value_type().to_string(),
    }
}

/// Node wrapping a callable.
///
/// Inputs are declared once at construction. At run time each input is
/// resolved by name from the upstream outputs, then from the node's
/// configured parameters, then from its declared default. The return value
/// becomes the single output `result`.
#[derive(Clone)]
pub struct FunctionNode {
    config: NodeConfig,
    inputs: Vec<InputSpec>,
    outputs: Vec<OutputSpec>,
    wants_context: bool,
    func: NodeFn,
}

impl FunctionNode {
    pub fn new<F, Fut>(node_id: impl Into<String>, func: F) -> Self
    where
        F: Fn(CallArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, NodeError>> + Send + 'static,
    {
        let func: NodeFn = Arc::new(move |args| func(args).boxed());
        Self::from_node_fn(node_id, func)
    }

    /// Wrap a synchronous function. It runs on the scheduler's worker, so it
    /// should not block for long.
    pub fn from_fn<F>(node_id: impl Into<String>, func: F) -> Self
    where
        F: Fn(CallArgs) -> Result<Value, NodeError> + Send + Sync + 'static,
    {
        let func = Arc::new(func);
        Self::new(node_id, move |args| {
            let func = Arc::clone(&func);
            async move { func(args) }
        })
    }

    pub fn from_node_fn(node_id: impl Into<String>, func: NodeFn) -> Self {
        Self {
            config: NodeConfig::new(node_id, "function"),
            inputs: Vec::new(),
            outputs: vec![OutputSpec::new("result", ValueType::Any)],
            wants_context: false,
            func,
        }
    }

    /// Declare a required input of any type. The name `context` instead
    /// requests the execution context.
    pub fn input(self, name: impl Into<String>) -> Self {
        self.typed_input(name, ValueType::Any)
    }

    pub fn typed_input(mut self, name: impl Into<String>, value_type: ValueType) -> Self {
        let name = name.into();
        if name == CONTEXT_PARAM {
            self.wants_context = true;
        } else {
            self.inputs.push(InputSpec::required(name, value_type));
        }
        self
    }

    pub fn optional_input(mut self, name: impl Into<String>, default: impl Into<Value>) -> Self {
        let name = name.into();
        if name == CONTEXT_PARAM {
            self.wants_context = true;
        } else {
            self.inputs
                .push(InputSpec::optional(name, ValueType::Any, Some(default.into())));
        }
        self
    }

    pub fn output_type(mut self, value_type: ValueType) -> Self {
        self.outputs = vec![OutputSpec::new("result", value_type)];
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.parameters.insert(key.into(), value.into());
        self
    }

    /// Replace the whole configuration, including the node id
    pub fn with_config(mut self, config: NodeConfig) -> Self {
        self.config = config;
        self
    }

    fn resolve(&self, ctx: &ExecutionContext) -> HashMap<String, Value> {
        self.inputs
            .iter()
            .filter_map(|spec| {
                ctx.upstream(&spec.name)
                    .or_else(|| self.config.parameters.get(&spec.name))
                    .cloned()
                    .or_else(|| spec.default.clone())
                    .map(|value| (spec.name.clone(), value))
            })
            .collect()
    }

    async fn call(&self, args: CallArgs) -> Result<Value, NodeError> {
        let call = AssertUnwindSafe(async { (self.func)(args).await }).catch_unwind();

        let result = match configured_timeout(&self.config)? {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| NodeError::Timeout {
                    seconds: limit.as_secs_f64(),
                })?,
            None => call.await,
        };

        result.unwrap_or_else(|payload| Err(NodeError::from_panic(payload)))
    }
}

#[async_trait]
impl Node for FunctionNode {
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
        let values = self.resolve(&ctx);

        let errors = self.validate_inputs(&values);
        if !errors.is_empty() {
            return NodeOutcome::failed(NodeError::InvalidInputs(errors));
        }

        let args = CallArgs {
            values,
            context: self.wants_context.then_some(ctx),
        };

        match self.call(args).await {
            Ok(value) => NodeOutcome::Completed(NodeOutput::new().with_output("result", value)),
            Err(error) => NodeOutcome::failed(error),
        }
    }
}

/// Registers a named callable so definitions can refer to it by node type.
///
/// Every created node is a copy of `prototype` carrying the requested
/// configuration.
pub struct FunctionNodeFactory {
    node_type: String,
    description: String,
    prototype: FunctionNode,
}

impl FunctionNodeFactory {
    pub fn new(node_type: impl Into<String>, prototype: FunctionNode) -> Self {
        Self {
            node_type: node_type.into(),
            description: String::new(),
            prototype,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

impl NodeFactory for FunctionNodeFactory {
    fn create(&self, config: &NodeConfig) -> Result<Arc<dyn Node>, NodeError> {
        Ok(Arc::new(self.prototype.clone().with_config(config.clone())))
    }

    fn node_type(&self) -> &str {
        &self.node_type
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: self.description.clone(),
            category: "function".to_string(),
            inputs: self.prototype.inputs.clone(),
            outputs: self.prototype.outputs.clone(),
        }
    }
}
