// crates/dagcore/tests/core_test.rs

use dagcore::{
    validate_inputs, DagDefinition, ExecutionContext, ExecutionEvent, ExecutionResult, EventBus,
    InputSpec, NodeConfig, NodeError, NodeOutcome, NodeOutput, NodeState, ResourceRequirement,
    ResourceType, Value, ValueType,
};
use std::collections::HashMap;
use std::io::Write;
use std::time::Duration;

#[test]
fn test_node_config_dict_round_trip() {
    let config = NodeConfig::new("train", "function")
        .with_parameter("epochs", 10)
        .with_parameter("model", "resnet")
        .with_resource(ResourceRequirement::new(ResourceType::Memory, 2.0, "GB"))
        .with_resource(ResourceRequirement::new(ResourceType::Gpu, 1.0, "units").optional())
        .with_retry("max_attempts", 3)
        .with_timeout(60.0)
        .with_tag("ml")
        .with_tag("nightly")
        .with_env("CUDA_VISIBLE_DEVICES", "0");

    let dict = config.to_dict();
    assert_eq!(dict["node_id"], "train");
    assert_eq!(dict["resource_requirements"][0]["type"], "memory");
    assert_eq!(dict["tags"], serde_json::json!(["ml", "nightly"]));

    let restored = NodeConfig::from_dict(&dict).unwrap();
    assert_eq!(restored, config);
}

#[test]
fn test_node_config_from_minimal_dict() {
    let dict = serde_json::json!({ "node_id": "a", "node_type": "command" });
    let config = NodeConfig::from_dict(&dict).unwrap();

    assert_eq!(config.node_id, "a");
    assert!(config.parameters.is_empty());
    assert!(config.resource_requirements.is_empty());
    assert!(config.tags.is_empty());
    assert_eq!(config.timeout, None);
}

#[test]
fn test_node_config_missing_id_is_rejected() {
    let dict = serde_json::json!({ "node_type": "command" });
    assert!(NodeConfig::from_dict(&dict).is_err());
}

#[test]
fn test_validate_inputs_accumulates_problems() {
    let specs = vec![
        InputSpec::required("path", ValueType::String),
        InputSpec::required("count", ValueType::Number),
        InputSpec::optional("verbose", ValueType::Bool, Some(Value::Bool(false))),
    ];

    let mut values = HashMap::new();
    values.insert("count".to_string(), Value::from("three"));

    let errors = validate_inputs(&specs, &values);
    assert_eq!(
        errors,
        vec![
            "Required input 'path' is missing".to_string(),
            "Input 'count' should be number, got string".to_string(),
        ]
    );
}

#[test]
fn test_validate_inputs_accepts_any_and_optional() {
    let specs = vec![
        InputSpec::required("data", ValueType::Any),
        InputSpec::optional("limit", ValueType::Number, None),
    ];

    let mut values = HashMap::new();
    values.insert("data".to_string(), Value::Array(vec![Value::from(1)]));

    assert!(validate_inputs(&specs, &values).is_empty());
}

#[test]
fn test_value_json_is_untagged() {
    let value: Value = serde_json::from_str(r#"{"name": "x", "size": 3, "tags": ["a"], "ok": true, "none": null}"#)
        .unwrap();

    let object = value.as_object().unwrap();
    assert_eq!(object["name"].as_str(), Some("x"));
    assert_eq!(object["size"].as_i64(), Some(3));
    assert_eq!(object["tags"].as_array().map(|a| a.len()), Some(1));
    assert_eq!(object["ok"].as_bool(), Some(true));
    assert!(object["none"].is_null());

    assert_eq!(serde_json::to_string(&Value::from(1.5)).unwrap(), "1.5");
}

#[test]
fn test_value_display_for_templates() {
    assert_eq!(Value::from("plain").to_string(), "plain");
    assert_eq!(Value::from(3).to_string(), "3");
    assert_eq!(Value::Array(vec![Value::from(1), Value::from("a")]).to_string(), r#"[1.0,"a"]"#);
}

#[test]
fn test_context_for_invocation_layers_upstream() {
    let base = ExecutionContext::new("run-1")
        .with_upstream("shared", "base")
        .with_upstream("only_base", 1)
        .with_global_config("env", "prod");

    let mut first = HashMap::new();
    first.insert("shared".to_string(), Value::from("first"));
    let mut second = HashMap::new();
    second.insert("shared".to_string(), Value::from("second"));
    second.insert("extra".to_string(), Value::from(true));

    let ctx = base.for_invocation([&first, &second]);

    assert_eq!(ctx.run_id, "run-1");
    assert_eq!(ctx.upstream("shared"), Some(&Value::from("second")));
    assert_eq!(ctx.upstream("only_base"), Some(&Value::from(1)));
    assert_eq!(ctx.upstream("extra"), Some(&Value::from(true)));
    assert_eq!(ctx.global_config.get("env"), Some(&Value::from("prod")));
    // the base context is untouched
    assert_eq!(base.upstream("shared"), Some(&Value::from("base")));
    assert!(base.upstream("extra").is_none());
}

#[test]
fn test_generated_run_ids_are_unique() {
    let a = ExecutionContext::generate();
    let b = ExecutionContext::generate();
    assert_ne!(a.run_id, b.run_id);
}

#[test]
fn test_execution_result_from_outcome() {
    let completed = ExecutionResult::from_outcome(
        "a",
        NodeOutcome::Completed(NodeOutput::new().with_output("result", 42).with_log("done")),
        Duration::from_millis(12),
    );
    assert_eq!(completed.state, NodeState::Completed);
    assert_eq!(completed.outputs["result"], Value::from(42));
    assert_eq!(completed.execution_time_ms, 12);
    assert!(completed.error.is_none());
    assert!(completed.is_success());

    let failed = ExecutionResult::from_outcome(
        "b",
        NodeOutcome::Failed {
            error: NodeError::CommandFailed { code: 2 },
            output: NodeOutput::new().with_output("stderr", "boom"),
        },
        Duration::ZERO,
    );
    assert_eq!(failed.state, NodeState::Failed);
    assert_eq!(failed.error.as_deref(), Some("Command failed with return code 2"));
    assert_eq!(failed.outputs["stderr"], Value::from("boom"));

    let skipped = ExecutionResult::skipped("c", "upstream failed");
    assert_eq!(skipped.state, NodeState::Skipped);
    assert!(!skipped.is_success());
}

#[test]
fn test_panic_payload_becomes_node_error() {
    let payload = std::panic::catch_unwind(|| panic!("kaboom")).unwrap_err();
    assert_eq!(
        NodeError::from_panic(payload),
        NodeError::Panicked("kaboom".to_string())
    );
}

#[test]
fn test_definition_from_path() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{
            "dag_id": "etl",
            "nodes": [
                {{ "node_id": "extract", "node_type": "command", "parameters": {{ "command": "echo hi" }} }},
                {{ "node_id": "load", "node_type": "command", "parameters": {{ "command": "echo bye" }} }}
            ],
            "edges": [ {{ "from": "extract", "to": "load" }} ]
        }}"#
    )
    .unwrap();

    let definition = DagDefinition::from_path(file.path()).unwrap();
    assert_eq!(definition.dag_id, "etl");
    assert_eq!(definition.nodes.len(), 2);
    assert_eq!(definition.edges[0].from, "extract");
    assert_eq!(
        definition.find_node("load").and_then(|n| n.parameters["command"].as_str()),
        Some("echo bye")
    );

    let json = definition.to_json_pretty().unwrap();
    assert_eq!(DagDefinition::from_json(&json).unwrap(), definition);
}

#[test]
fn test_definition_from_missing_path_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = DagDefinition::from_path(dir.path().join("missing.json"));
    assert!(matches!(result, Err(dagcore::FlowError::Io(_))));
}

#[tokio::test]
async fn test_event_bus_delivers_to_subscribers() {
    let bus = EventBus::new(16);
    let mut rx = bus.subscribe();

    bus.emit(ExecutionEvent::NodeSkipped {
        run_id: "r".to_string(),
        node_id: "d".to_string(),
        reason: "upstream failed".to_string(),
        timestamp: chrono::Utc::now(),
    });

    let event = rx.recv().await.unwrap();
    assert_eq!(event.run_id(), "r");
    assert_eq!(event.node_transition(), Some(("d", NodeState::Skipped)));

    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["type"], "NodeSkipped");
}
