// crates/dagnodes/tests/command_test.rs
#![cfg(unix)]

use dagcore::{ExecutionContext, Node, NodeConfig, NodeState, Value};
use dagnodes::{CommandNode, CommandNodeFactory};
use dagruntime::NodeFactory;
use std::collections::HashMap;

fn ctx() -> ExecutionContext {
    ExecutionContext::new(uuid::Uuid::new_v4().to_string())
}

fn args(pairs: &[(&str, &str)]) -> Value {
    Value::Object(
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Value::from(*v)))
            .collect::<HashMap<_, _>>(),
    )
}

#[tokio::test]
async fn test_command_echo() {
    let node = CommandNode::new("hello", "echo hello");

    let result = node.execute(ctx()).await;

    assert_eq!(result.state, NodeState::Completed);
    assert_eq!(result.outputs["stdout"].as_str(), Some("hello\n"));
    assert_eq!(result.outputs["stderr"].as_str(), Some(""));
    assert_eq!(result.outputs["return_code"].as_i64(), Some(0));
    assert_eq!(result.logs, vec!["$ echo hello"]);
    assert!(result.error.is_none());
}

#[tokio::test]
async fn test_command_nonzero_exit_fails() {
    let node = CommandNode::new("bad", "echo oops >&2; exit 3");

    let result = node.execute(ctx()).await;

    assert_eq!(result.state, NodeState::Failed);
    assert_eq!(result.outputs["return_code"].as_i64(), Some(3));
    assert_eq!(result.outputs["stderr"].as_str(), Some("oops\n"));
    assert_eq!(
        result.error.as_deref(),
        Some("Command failed with return code 3")
    );
}

#[tokio::test]
async fn test_command_placeholders_from_parameters_and_args() {
    let node = CommandNode::new("fmt", "echo {greeting} {name} {unknown}")
        .with_parameter("greeting", "hi");

    let ctx = ctx().with_upstream("command_args", args(&[("name", "ada"), ("greeting", "ignored")]));
    assert_eq!(node.render(&ctx).unwrap(), "echo hi ada {unknown}");

    let result = node.execute(ctx).await;
    assert_eq!(result.state, NodeState::Completed);
    assert_eq!(result.outputs["stdout"].as_str(), Some("hi ada {unknown}\n"));
}

#[test]
fn test_substituted_values_are_not_rescanned() {
    // fresh maps each time so hash iteration order varies
    for _ in 0..32 {
        let node = CommandNode::new("c", "echo {a}")
            .with_parameter("a", "{b}")
            .with_parameter("b", "x");
        assert_eq!(node.render(&ctx()).unwrap(), "echo {b}");
    }
}

#[tokio::test]
async fn test_command_args_must_be_an_object() {
    let node = CommandNode::new("fmt", "echo {name}");

    let result = node
        .execute(ctx().with_upstream("command_args", "not a map"))
        .await;

    assert_eq!(result.state, NodeState::Failed);
    assert_eq!(
        result.error.as_deref(),
        Some("Input 'command_args' should be object, got string")
    );
}

#[tokio::test]
async fn test_command_environment_is_layered() {
    let node = CommandNode::new("env", "echo \"$DAG_TEST_VAR:${PATH:+has-path}\"")
        .with_env("DAG_TEST_VAR", "42");

    let result = node.execute(ctx()).await;

    assert_eq!(result.state, NodeState::Completed);
    assert_eq!(result.outputs["stdout"].as_str(), Some("42:has-path\n"));
}

#[tokio::test]
async fn test_command_timeout() {
    let node = CommandNode::new("sleepy", "sleep 5").with_timeout(0.2);

    let started = std::time::Instant::now();
    let result = node.execute(ctx()).await;

    assert_eq!(result.state, NodeState::Failed);
    assert!(result.error.as_deref().unwrap().starts_with("Timeout after"));
    assert!(started.elapsed() < std::time::Duration::from_secs(4));
}

#[test]
fn test_factory_requires_command() {
    let factory = CommandNodeFactory;
    assert_eq!(factory.node_type(), "command");

    let missing = NodeConfig::new("a", "command");
    assert!(factory.create(&missing).is_err());

    let config = NodeConfig::new("a", "command")
        .with_parameter("command", "echo {x}")
        .with_parameter("x", 1);
    let node = factory.create(&config).unwrap();
    assert_eq!(node.id(), "a");
    assert_eq!(node.node_type(), "command");
    assert_eq!(
        node.outputs().iter().map(|o| o.name.as_str()).collect::<Vec<_>>(),
        vec!["stdout", "stderr", "return_code"]
    );
}
