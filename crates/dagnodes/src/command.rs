use crate::configured_timeout;
use async_trait::async_trait;
use dagcore::{
    ExecutionContext, InputSpec, Node, NodeConfig, NodeError, NodeOutcome, NodeOutput, OutputSpec,
    Value, ValueType,
};
use dagruntime::{NodeFactory, NodeMetadata};
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;

/// Upstream output whose entries fill remaining placeholders
const COMMAND_ARGS: &str = "command_args";

const PLACEHOLDER: &str = r"\{(\w+)\}";

/// Node that runs a shell command built from a `{name}` template.
///
/// Placeholders are filled from the configured parameters first, then from
/// an upstream `command_args` map. Unknown placeholders are left as-is.
/// The node completes iff the command exits with code 0.
pub struct CommandNode {
    config: NodeConfig,
    command: String,
    inputs: Vec<InputSpec>,
    outputs: Vec<OutputSpec>,
}

impl CommandNode {
    pub fn new(node_id: impl Into<String>, command: impl Into<String>) -> Self {
        Self::with_node_config(NodeConfig::new(node_id, "command"), command)
    }

    pub fn with_node_config(config: NodeConfig, command: impl Into<String>) -> Self {
        Self {
            config,
            command: command.into(),
            inputs: vec![InputSpec::optional(
                COMMAND_ARGS,
                ValueType::Object,
                Some(Value::Object(HashMap::new())),
            )],
            outputs: vec![
                OutputSpec::new("stdout", ValueType::String),
                OutputSpec::new("stderr", ValueType::String),
                OutputSpec::new("return_code", ValueType::Number),
            ],
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.environment.insert(key.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, seconds: f64) -> Self {
        self.config.timeout = Some(seconds);
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// The command line after placeholder substitution
    pub fn render(&self, ctx: &ExecutionContext) -> Result<String, NodeError> {
        let placeholder =
            Regex::new(PLACEHOLDER).map_err(|e| NodeError::Configuration(e.to_string()))?;
        let mut command = substitute(&placeholder, &self.command, &self.config.parameters);

        if let Some(args) = ctx.upstream(COMMAND_ARGS) {
            let args = args.as_object().ok_or_else(|| NodeError::InvalidInputType {
                field: COMMAND_ARGS.to_string(),
                expected: ValueType::Object.to_string(),
                actual: args.value_type().to_string(),
            })?;
            command = substitute(&placeholder, &command, args);
        }

        Ok(command)
    }

    async fn spawn_and_wait(&self, command: &str) -> Result<std::process::Output, NodeError> {
        let mut cmd = shell(command);
        cmd.envs(&self.config.environment)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|e| NodeError::Spawn(e.to_string()))?;
        let wait = child.wait_with_output();

        let output = match configured_timeout(&self.config)? {
            // Dropping the pending wait kills the child.
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .map_err(|_| NodeError::Timeout {
                    seconds: limit.as_secs_f64(),
                })?,
            None => wait.await,
        };

        output.map_err(|e| NodeError::Spawn(e.to_string()))
    }
}

#[async_trait]
impl Node for CommandNode {
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
        let command = match self.render(&ctx) {
            Ok(command) => command,
            Err(error) => return NodeOutcome::failed(error),
        };
        tracing::debug!("Node {} running: {}", self.id(), command);

        let process = match self.spawn_and_wait(&command).await {
            Ok(process) => process,
            Err(error) => {
                return NodeOutcome::Failed {
                    error,
                    output: NodeOutput::new().with_log(format!("$ {}", command)),
                }
            }
        };

        let code = process.status.code();
        let output = NodeOutput::new()
            .with_output("stdout", String::from_utf8_lossy(&process.stdout).into_owned())
            .with_output("stderr", String::from_utf8_lossy(&process.stderr).into_owned())
            .with_output("return_code", code.map_or(Value::Null, Value::from))
            .with_log(format!("$ {}", command));

        match code {
            Some(0) => NodeOutcome::Completed(output),
            Some(code) => NodeOutcome::Failed {
                error: NodeError::CommandFailed { code },
                output,
            },
            None => NodeOutcome::Failed {
                error: NodeError::CommandTerminated,
                output,
            },
        }
    }
}

/// Fills known placeholders in a single scan; inserted text is not rescanned
fn substitute(placeholder: &Regex, template: &str, values: &HashMap<String, Value>) -> String {
    placeholder
        .replace_all(template, |caps: &Captures| match values.get(&caps[1]) {
            Some(value) => value.to_string(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

#[cfg(unix)]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(windows)]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

/// Builds command nodes from `parameters.command`
pub struct CommandNodeFactory;

impl NodeFactory for CommandNodeFactory {
    fn create(&self, config: &NodeConfig) -> Result<Arc<dyn Node>, NodeError> {
        let command = config
            .parameters
            .get("command")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                NodeError::Configuration("command nodes need a string 'command' parameter".into())
            })?
            .to_string();

        Ok(Arc::new(CommandNode::with_node_config(config.clone(), command)))
    }

    fn node_type(&self) -> &str {
        "command"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Run a shell command built from a {placeholder} template".to_string(),
            category: "process".to_string(),
            inputs: vec![InputSpec::optional(COMMAND_ARGS, ValueType::Object, None)
                .with_description("Values for placeholders not set by parameters")],
            outputs: vec![
                OutputSpec::new("stdout", ValueType::String),
                OutputSpec::new("stderr", ValueType::String),
                OutputSpec::new("return_code", ValueType::Number),
            ],
        }
    }
}
