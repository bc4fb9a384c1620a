use anyhow::{bail, Context, Result};
use bpmncore::{Definition, ExecutionEvent, NodeKind, NodeSpec, Value, Variables};
use bpmnexpr::ScriptEvaluator;
use bpmnruntime::{Engine, EngineConfig, EvaluatorRegistry, Execution, ExecutionOutcome};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bpmn")]
#[command(about = "BPMN process engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a process definition
    Run {
        /// Path to definition JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Initial variables as a JSON object
        #[arg(short, long)]
        input: Option<String>,

        /// Resume every wait-state task as soon as it suspends
        #[arg(short, long)]
        signal_all: bool,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate a process definition
    Validate {
        /// Path to definition JSON file
        file: PathBuf,
    },

    /// Create an example definition
    Init {
        /// Output file path
        #[arg(short, long, default_value = "process.json")]
        output: PathBuf,
    },

    /// List available expression languages
    Languages,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let verbose = matches!(cli.command, Commands::Run { verbose: true, .. });
    init_tracing(verbose);

    match cli.command {
        Commands::Run {
            file,
            input,
            signal_all,
            ..
        } => run_process(file, input, signal_all).await,
        Commands::Validate { file } => validate_process(file),
        Commands::Init { output } => create_example_process(output),
        Commands::Languages => {
            list_languages();
            Ok(())
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn registry() -> Arc<EvaluatorRegistry> {
    let mut registry = EvaluatorRegistry::new();
    registry.register(Arc::new(ScriptEvaluator::new()));
    Arc::new(registry)
}

fn parse_input(input: Option<String>) -> Result<Variables> {
    let Some(input) = input else {
        return Ok(Variables::new());
    };
    let json: serde_json::Value = serde_json::from_str(&input).context("Input is not valid JSON")?;
    match Value::from(json) {
        Value::Object(map) => Ok(map),
        other => bail!("Input must be a JSON object, got {}", other.type_name()),
    }
}

async fn run_process(file: PathBuf, input: Option<String>, signal_all: bool) -> Result<()> {
    println!("🚀 Loading process from: {}", file.display());

    let engine = Engine::from_file(&file, registry(), EngineConfig::default())?;
    let variables = parse_input(input)?;

    if let Some(definition) = engine.definition() {
        println!("📋 Process: {}", definition.name.as_deref().unwrap_or(&definition.id));
        println!("   Nodes: {}", definition.nodes.len());
        println!("   Flows: {}", definition.flows.len());
        println!();
    }

    let execution = engine.create_execution(variables, None)?;
    let mut events = execution.subscribe();
    let printer = {
        let execution = execution.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        let terminal = event.is_terminal();
                        print_event(&execution, &event, signal_all);
                        if terminal {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("event printer lagged, skipped {} events", skipped);
                        if execution.outcome().is_some() {
                            break;
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    };

    execution.start()?;

    let outcome = tokio::select! {
        outcome = execution.wait() => outcome,
        _ = tokio::signal::ctrl_c() => {
            println!();
            println!("🛑 Interrupted, discarding execution");
            execution.discard();
            ExecutionOutcome::Discarded
        }
    };
    if !matches!(outcome, ExecutionOutcome::Discarded) {
        if let Err(e) = printer.await {
            tracing::warn!("event printer failed: {}", e);
        }
    } else {
        printer.abort();
    }

    print_summary(&execution);

    match outcome {
        ExecutionOutcome::Ended { .. } => Ok(()),
        ExecutionOutcome::Errored { activity_id, error } => {
            bail!("Activity {} failed: {}", activity_id, error)
        }
        ExecutionOutcome::Discarded => bail!("Execution was discarded"),
    }
}

fn print_event(execution: &Execution, event: &ExecutionEvent, signal_all: bool) {
    match event {
        ExecutionEvent::Started { process_id, .. } => {
            println!("▶️  Process {} started", process_id);
        }
        ExecutionEvent::ActivityStarted { activity_id, kind, .. } => {
            println!("  ⚡ Entered {} ({})", activity_id, kind);
        }
        ExecutionEvent::ActivityWaiting { activity_id, .. } => {
            if signal_all {
                println!("  ⏸️  {} is waiting, signalling", activity_id);
                execution.signal(activity_id);
            } else {
                println!(
                    "  ⏸️  {} is waiting for a signal (pass --signal-all to resume wait states)",
                    activity_id
                );
            }
        }
        ExecutionEvent::ActivityEnded { activity_id, .. } => {
            println!("  ✅ Completed {}", activity_id);
        }
        ExecutionEvent::FlowTaken { flow_id, source, target, .. } => {
            println!("     ➡️  {} ({} -> {})", flow_id, source, target);
        }
        ExecutionEvent::Ended { process_id, .. } => {
            println!("✨ Process {} ended", process_id);
        }
        ExecutionEvent::Failed { activity_id, error, .. } => {
            println!("💥 {} failed: {}", activity_id, error);
        }
    }
}

fn print_summary(execution: &Execution) {
    println!();
    println!("📊 Execution Summary:");
    println!("   Execution ID: {}", execution.id());
    println!("   Status: {:?}", execution.status());
    println!("   Flows taken: {}", execution.paths().join(", "));

    let children = execution.children();
    println!("   Activities: {}", children.len());
    for (id, child) in &children {
        println!("     {} {} (entered {}x)", id, child.state, child.entries);
    }

    let variables = execution.variables();
    if !variables.is_empty() {
        println!();
        println!("📤 Variables:");
        let json: serde_json::Map<String, serde_json::Value> = variables
            .into_iter()
            .map(|(k, v)| (k, serde_json::Value::from(v)))
            .collect();
        match serde_json::to_string_pretty(&json) {
            Ok(text) => println!("{}", text),
            Err(e) => tracing::warn!("could not render variables: {}", e),
        }
    }
}

fn validate_process(file: PathBuf) -> Result<()> {
    println!("🔍 Validating process: {}", file.display());

    let engine = Engine::from_file(&file, registry(), EngineConfig::default())?;
    engine.validate()?;

    if let Some(definition) = engine.definition() {
        println!("✅ Process is valid:");
        println!("   Id: {}", definition.id);
        println!("   Entry: {}", engine.entry_node_id().unwrap_or("-"));
        println!("   Nodes: {}", definition.nodes.len());
        println!("   Flows: {}", definition.flows.len());
    }

    Ok(())
}

fn list_languages() {
    println!("📦 Available expression languages:");
    println!();

    let registry = registry();
    for language in registry.list_languages() {
        let names = registry.names_for(&language);
        println!("  • {} (also: {})", language, names.join(", "));
    }
}

fn create_example_process(output: PathBuf) -> Result<()> {
    let mut definition = Definition::new("approval").with_name("Example approval process");

    definition.add_node(NodeSpec::start("theStart"));
    definition.add_node(
        NodeSpec::script_task("score", "javascript", "this.context.score = this.amount / 10;\nnext();")
            .with_name("Score request"),
    );
    definition.add_node(
        NodeSpec::new("decision", NodeKind::ExclusiveGateway)
            .with_name("Large amount?")
            .with_default("autoApprove"),
    );
    definition.add_node(
        NodeSpec::new("review", NodeKind::UserTask)
            .with_name("Manual review")
            .with_attribute("assignee", "finance"),
    );
    definition.add_node(NodeSpec::end("approved"));
    definition.add_node(NodeSpec::end("reviewed"));

    definition.connect("toScore", "theStart", "score");
    definition.connect("toDecision", "score", "decision");
    definition.connect("autoApprove", "decision", "approved");
    definition.connect_when("needsReview", "decision", "review", "this.score > 50");
    definition.connect("toReviewed", "review", "reviewed");

    std::fs::write(&output, definition.to_json()?)?;

    println!("✨ Created example process: {}", output.display());
    println!();
    println!("Run it with:");
    println!(
        "  bpmn run --file {} --input '{{\"amount\": 1000}}' --signal-all",
        output.display()
    );

    Ok(())
}
