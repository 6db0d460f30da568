// crates/dagcli/src/main.rs

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use dagcore::{
    DagDefinition, DagError, DagState, ExecutionContext, ExecutionEvent, NodeConfig, Value,
};
use dagruntime::{DagRuntime, NodeRegistry, RunResults, RuntimeConfig, DEFAULT_MAX_PARALLEL};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dag")]
#[command(about = "DAG task runner", long_about = None)]
struct Cli {
    /// Show debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a pipeline definition
    Run {
        /// Path to pipeline JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Maximum number of nodes running at once
        #[arg(short = 'p', long, default_value_t = DEFAULT_MAX_PARALLEL)]
        max_parallel: usize,

        /// Run id (generated when omitted)
        #[arg(long)]
        run_id: Option<String>,

        /// Global configuration entry, KEY=VALUE (VALUE parsed as JSON when possible)
        #[arg(short, long = "config", value_name = "KEY=VALUE")]
        config: Vec<String>,

        /// Print the full result map as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate a pipeline definition
    Validate {
        /// Path to pipeline JSON file
        file: PathBuf,
    },

    /// Print the static execution plan
    Plan {
        /// Path to pipeline JSON file
        file: PathBuf,
    },

    /// Print a text summary of the graph
    Show {
        /// Path to pipeline JSON file
        file: PathBuf,
    },

    /// List available node types
    Nodes,

    /// Create a new example pipeline
    Init {
        /// Output file path
        #[arg(short, long, default_value = "pipeline.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match cli.command {
        Commands::Run {
            file,
            max_parallel,
            run_id,
            config,
            json,
        } => run_pipeline(file, max_parallel, run_id, config, json).await,
        Commands::Validate { file } => validate_pipeline(file),
        Commands::Plan { file } => plan_pipeline(file),
        Commands::Show { file } => show_pipeline(file),
        Commands::Nodes => {
            list_nodes();
            Ok(())
        }
        Commands::Init { output } => create_example_pipeline(output),
    }
}

fn runtime(max_parallel: usize) -> DagRuntime {
    let mut registry = NodeRegistry::new();
    dagnodes::register_all(&mut registry);

    DagRuntime::with_registry(
        Arc::new(registry),
        RuntimeConfig {
            max_parallel_nodes: max_parallel,
            ..RuntimeConfig::default()
        },
    )
}

fn load(file: &PathBuf) -> Result<DagDefinition> {
    let definition = DagDefinition::from_path(file)
        .with_context(|| format!("failed to load pipeline from {}", file.display()))?;
    tracing::debug!("Loaded pipeline {} from {}", definition.dag_id, file.display());
    Ok(definition)
}

/// Split KEY=VALUE, reading VALUE as JSON and falling back to a string
fn parse_config_entry(entry: &str) -> Result<(String, Value)> {
    let Some((key, raw)) = entry.split_once('=') else {
        bail!("config entry '{}' is not KEY=VALUE", entry);
    };
    let value = serde_json::from_str::<serde_json::Value>(raw)
        .map(Value::from)
        .unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}

async fn run_pipeline(
    file: PathBuf,
    max_parallel: usize,
    run_id: Option<String>,
    config: Vec<String>,
    json: bool,
) -> Result<()> {
    let definition = load(&file)?;
    println!("Loading pipeline: {}", definition.dag_id);
    println!("   Nodes: {}", definition.nodes.len());
    println!("   Edges: {}", definition.edges.len());
    println!();

    let runtime = runtime(max_parallel);
    let mut dag = runtime.build(&definition)?;

    let mut context = match run_id {
        Some(run_id) => ExecutionContext::new(run_id),
        None => ExecutionContext::generate(),
    };
    for entry in &config {
        let (key, value) = parse_config_entry(entry)?;
        context = context.with_global_config(key, value);
    }

    let mut events = runtime.subscribe_events();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ExecutionEvent::RunStarted { run_id, .. } => {
                    println!("Run {} started", run_id);
                }
                ExecutionEvent::NodeStarted { node_id, node_type, .. } => {
                    println!("  Starting node: {} ({})", node_id, node_type);
                }
                ExecutionEvent::NodeCompleted { node_id, duration_ms, .. } => {
                    println!("  Node {} completed in {}ms", node_id, duration_ms);
                }
                ExecutionEvent::NodeFailed { node_id, error, .. } => {
                    println!("  Node {} failed: {}", node_id, error);
                }
                ExecutionEvent::NodeSkipped { node_id, reason, .. } => {
                    println!("  Node {} skipped: {}", node_id, reason);
                }
                ExecutionEvent::RunCompleted { state, duration_ms, .. } => {
                    println!("Run finished {} in {}ms", state, duration_ms);
                    break;
                }
            }
        }
    });

    let outcome = runtime.execute(&mut dag, &context).await;
    let _ = event_task.await;

    let results = match outcome {
        Ok(results) => results,
        Err(DagError::Stalled { results, .. }) => results,
        Err(e) => return Err(e.into()),
    };

    println!();
    print_summary(&dag.node_ids(), &results, json)?;

    if dag.state() != DagState::Completed {
        bail!("pipeline {} finished {}", dag.id(), dag.state());
    }
    Ok(())
}

fn print_summary(order: &[String], results: &RunResults, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(results)?);
        return Ok(());
    }

    println!("Execution Summary:");
    for node_id in order {
        let Some(result) = results.get(node_id) else {
            continue;
        };
        println!("   {}: {}", node_id, result.state);
        if let Some(error) = &result.error {
            println!("     error: {}", error);
        }
        let mut keys: Vec<&String> = result.outputs.keys().collect();
        keys.sort();
        for key in keys {
            println!("     {}: {}", key, result.outputs[key].to_string().trim_end());
        }
    }
    Ok(())
}

fn validate_pipeline(file: PathBuf) -> Result<()> {
    println!("Validating pipeline: {}", file.display());

    let definition = load(&file)?;
    let dag = runtime(DEFAULT_MAX_PARALLEL).build(&definition)?;

    let issues = dag.validate();
    if issues.is_empty() {
        println!("Pipeline is valid:");
        println!("   DAG: {}", dag.id());
        println!("   Nodes: {}", dag.len());
        println!("   Edges: {}", dag.edge_count());
        return Ok(());
    }

    for issue in &issues {
        println!("   - {}", issue);
    }
    bail!("{} validation issue(s)", issues.len())
}

fn plan_pipeline(file: PathBuf) -> Result<()> {
    let definition = load(&file)?;
    let dag = runtime(DEFAULT_MAX_PARALLEL).build(&definition)?;
    let plan = dag.get_execution_plan()?;

    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}

fn show_pipeline(file: PathBuf) -> Result<()> {
    let definition = load(&file)?;
    let dag = runtime(DEFAULT_MAX_PARALLEL).build(&definition)?;

    println!("{}", dag.visualize());
    Ok(())
}

fn list_nodes() {
    println!("Available Node Types:");
    println!();

    let mut registry = NodeRegistry::new();
    dagnodes::register_all(&mut registry);

    for node_type in registry.list_node_types() {
        if let Some(metadata) = registry.get_metadata(&node_type) {
            println!("  {} ({})", node_type, metadata.category);
            println!("    {}", metadata.description);
            for input in &metadata.inputs {
                println!("    input  {}: {}", input.name, input.value_type);
            }
            for output in &metadata.outputs {
                println!("    output {}: {}", output.name, output.value_type);
            }
        } else {
            println!("  {}", node_type);
        }
    }
}

fn create_example_pipeline(output: PathBuf) -> Result<()> {
    let definition = DagDefinition::new("example_pipeline")
        .with_node(
            NodeConfig::new("load", "command")
                .with_parameter("command", "echo loading {source}")
                .with_parameter("source", "src")
                .with_tag("io"),
        )
        .with_node(
            NodeConfig::new("process", "command")
                .with_parameter("command", "echo processing")
                .with_timeout(30.0),
        )
        .with_node(
            NodeConfig::new("save", "command")
                .with_parameter("command", "echo saving to {destination}")
                .with_parameter("destination", "out.json")
                .with_tag("io"),
        )
        .with_edge("load", "process")
        .with_edge("process", "save");

    std::fs::write(&output, definition.to_json_pretty()?)?;

    println!("Created example pipeline: {}", output.display());
    println!();
    println!("Run it with:");
    println!("  dag run --file {}", output.display());
    Ok(())
}
