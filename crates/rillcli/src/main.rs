use anyhow::Result;
use clap::{Parser, Subcommand};
use rillcore::{ExecutionEvent, NodeEvent, NodeProgress, Value, Workflow};
use rillruntime::{RillRuntime, WorkflowGraph};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rill")]
#[command(about = "Rill workflow engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow file
    Run {
        /// Path to workflow JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Input data as JSON string
        #[arg(short, long)]
        input: Option<String>,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate a workflow file
    Validate {
        /// Path to workflow JSON file
        file: PathBuf,
    },

    /// List available node types
    Nodes,

    /// Create a new example workflow
    Init {
        /// Output file path
        #[arg(short, long, default_value = "workflow.json")]
        output: PathBuf,
    },
}

/// Convert a serde_json::Value to rillcore::Value
fn json_to_value(json: serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else {
                Value::Float(n.as_f64().unwrap_or(0.0))
            }
        }
        serde_json::Value::String(s) => Value::String(s),
        serde_json::Value::Array(arr) => Value::Array(arr.into_iter().map(json_to_value).collect()),
        serde_json::Value::Object(obj) => {
            let map: HashMap<String, Value> =
                obj.into_iter().map(|(k, v)| (k, json_to_value(v))).collect();
            Value::Object(map)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            input,
            verbose,
        } => {
            // Initialize logging
            if verbose {
                tracing_subscriber::fmt()
                    .with_max_level(tracing::Level::DEBUG)
                    .init();
            } else {
                tracing_subscriber::fmt()
                    .with_max_level(tracing::Level::INFO)
                    .init();
            }

            run_workflow(file, input).await?;
        }

        Commands::Validate { file } => {
            validate_workflow(file)?;
        }

        Commands::Nodes => {
            list_nodes();
        }

        Commands::Init { output } => {
            create_example_workflow(output)?;
        }
    }

    Ok(())
}

async fn run_workflow(file: PathBuf, input: Option<String>) -> Result<()> {
    println!("🚀 Loading workflow from: {}", file.display());

    // Load workflow
    let workflow_json = std::fs::read_to_string(&file)?;
    let workflow: Workflow = serde_json::from_str(&workflow_json)?;

    println!("📋 Workflow: {}", workflow.name);
    println!("   Nodes: {}", workflow.nodes.len());
    println!("   Connections: {}", workflow.connections.len());
    println!();

    // Parse input data - convert plain JSON to Value types
    let inputs: HashMap<String, Value> = if let Some(input_str) = input {
        let json: serde_json::Value = serde_json::from_str(&input_str)?;
        if let serde_json::Value::Object(obj) = json {
            obj.into_iter().map(|(k, v)| (k, json_to_value(v))).collect()
        } else {
            return Err(anyhow::anyhow!("Input must be a JSON object"));
        }
    } else {
        HashMap::new()
    };

    // Create runtime with registered nodes
    let mut registry = rillruntime::NodeRegistry::new();
    rillnodes::register_all(&mut registry);

    let runtime = RillRuntime::with_registry(
        std::sync::Arc::new(registry),
        rillruntime::RuntimeConfig::default(),
    );

    // Subscribe to events for real-time output
    let mut events = runtime.subscribe_events();

    // Spawn event listener; progress is folded field-by-field per node
    let event_task = tokio::spawn(async move {
        let mut progress: HashMap<String, NodeProgress> = HashMap::new();
        while let Ok(event) = events.recv().await {
            match event {
                ExecutionEvent::WorkflowStarted { .. } => {
                    println!("▶️  Workflow started");
                }
                ExecutionEvent::NodeStarted {
                    node_id, node_type, ..
                } => {
                    println!("  ⚡ Starting node: {} ({})", node_id, node_type);
                }
                ExecutionEvent::NodeStateChanged {
                    node_id, from, to, ..
                } => {
                    tracing::debug!("node {} state {} -> {}", node_id, from, to);
                }
                ExecutionEvent::NodeMessageChanged {
                    node_id, message, ..
                } => {
                    if !message.is_none() {
                        println!("     📝 [{}] {:?}: {}", node_id, message.kind, message.text);
                    }
                }
                ExecutionEvent::NodeCompleted {
                    node_id,
                    duration_ms,
                    ..
                } => {
                    println!("  ✅ Node {} completed in {}ms", node_id, duration_ms);
                }
                ExecutionEvent::NodeFailed { node_id, error, .. } => {
                    println!("  ❌ Node {} failed: {}", node_id, error);
                }
                ExecutionEvent::NodeEvent { node_id, event, .. } => match event {
                    NodeEvent::Info { message } => {
                        println!("     ℹ️  [{}] {}", node_id, message);
                    }
                    NodeEvent::Warning { message } => {
                        println!("     ⚠️  [{}] {}", node_id, message);
                    }
                    NodeEvent::Progress { progress: update } => {
                        let entry = progress.entry(node_id.to_string()).or_default();
                        entry.apply(&update);
                        if let Some(fraction) = entry.fraction {
                            match &entry.message {
                                Some(msg) => println!(
                                    "     📊 [{}] {:.0}% - {}",
                                    node_id,
                                    fraction * 100.0,
                                    msg
                                ),
                                None => {
                                    println!("     📊 [{}] {:.0}%", node_id, fraction * 100.0)
                                }
                            }
                        }
                    }
                    _ => {}
                },
                ExecutionEvent::WorkflowCompleted {
                    success,
                    duration_ms,
                    ..
                } => {
                    if success {
                        println!("✨ Workflow completed successfully in {}ms", duration_ms);
                    } else {
                        println!("💥 Workflow failed after {}ms", duration_ms);
                    }
                }
            }
        }
    });

    // Execute workflow
    let result = runtime.execute(&workflow, inputs).await?;

    // Wait for events to finish printing
    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    event_task.abort();

    println!();
    println!("📊 Execution Summary:");
    println!("   Execution ID: {}", result.execution_id);
    println!(
        "   Completed: {}/{} nodes",
        result.completed_nodes, result.total_nodes
    );

    let mut states: Vec<_> = result.states.iter().collect();
    states.sort_by_key(|(id, _)| (*id).clone());
    println!();
    println!("🗂  Final node states:");
    for (node_id, state) in states {
        println!("   {} -> {}", node_id, state);
    }

    if !result.outputs.is_empty() {
        println!();
        println!("📤 Outputs:");
        for (node_id, outputs) in &result.outputs {
            if !outputs.is_empty() {
                println!("   Node {}:", node_id);
                for (key, value) in outputs {
                    println!("     {}: {:?}", key, value);
                }
            }
        }
    }

    Ok(())
}

fn validate_workflow(file: PathBuf) -> Result<()> {
    println!("🔍 Validating workflow: {}", file.display());

    let workflow_json = std::fs::read_to_string(&file)?;
    let workflow: Workflow = serde_json::from_str(&workflow_json)?;

    // Reject cycles and dangling connections
    WorkflowGraph::build(&workflow)?;

    // Reject unknown node types
    let mut registry = rillruntime::NodeRegistry::new();
    rillnodes::register_all(&mut registry);
    let known = registry.list_node_types();
    for node in &workflow.nodes {
        if !known.contains(&node.node_type) {
            return Err(anyhow::anyhow!("unknown node type: {}", node.node_type));
        }
    }

    println!("✅ Workflow is valid:");
    println!("   Name: {}", workflow.name);
    println!("   Nodes: {}", workflow.nodes.len());
    println!("   Connections: {}", workflow.connections.len());

    Ok(())
}

fn list_nodes() {
    println!("📦 Available Node Types:");
    println!();

    let mut registry = rillruntime::NodeRegistry::new();
    rillnodes::register_all(&mut registry);

    let mut types = registry.list_node_types();
    types.sort();
    for node_type in types {
        if let Some(info) = registry.type_info(&node_type) {
            println!("  • {} ({})", node_type, info.category);
            println!("    {}", info.description);
        } else {
            println!("  • {}", node_type);
        }
    }
}

fn create_example_workflow(output: PathBuf) -> Result<()> {
    use rillcore::NodeSpec;

    let mut workflow = Workflow::new("Counted Loop Example");
    workflow.description =
        Some("Runs a three-pass loop that delays and collects each pass".to_string());

    let start = NodeSpec::new("loop.counted_start")
        .with_name("Loop over 3 passes")
        .with_config("iterations", 3i64)
        .with_bounds(100.0, 100.0, 80.0, 40.0);

    let delay = NodeSpec::new("time.delay")
        .with_name("Slow work")
        .with_config("delay_ms", 100i64)
        .with_bounds(300.0, 100.0, 80.0, 40.0);

    let end = NodeSpec::new("loop.collect_end")
        .with_name("Collect results")
        .with_bounds(500.0, 100.0, 80.0, 40.0);

    let start_id = workflow.add_node(start);
    let delay_id = workflow.add_node(delay);
    let end_id = workflow.add_node(end);

    workflow.connect(start_id, "iterations", delay_id, "value");
    workflow.connect(delay_id, "value", end_id, "value");

    // Save to file
    let json = serde_json::to_string_pretty(&workflow)?;
    std::fs::write(&output, json)?;

    println!("✨ Created example workflow: {}", output.display());
    println!();
    println!("Run it with:");
    println!("  rill run --file {}", output.display());

    Ok(())
}
