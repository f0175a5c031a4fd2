//! CLI binary for building, validating and running Remedy workflow graphs.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};

use remedy_engine::{
    canonical_graph, validate, Edge, EventEmitter, ExecutorConfig, Graph, GraphExecutor,
    IterationPolicy, Node, Severity, WorkflowService,
};
use remedy_types::{LogEntry, RunStatus, State, DATA_KEY, MAX_ITERATIONS_EXCEEDED};

#[derive(Parser)]
#[command(name = "remedy", version, about = "Graph-driven data-quality remediation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the canonical remediation graph as JSON
    Create {
        /// Write the graph to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run a graph over a JSON dataset
    Run {
        /// Input file: an array of rows, or a full initial state object
        input: PathBuf,

        /// Graph JSON file (default: the canonical remediation graph)
        #[arg(short, long)]
        graph: Option<PathBuf>,

        /// Loop again while anomaly_count exceeds this value
        #[arg(long)]
        threshold: Option<f64>,

        /// Also flag z-score outliers
        #[arg(long)]
        use_zscore: bool,

        /// Absolute z-score above which a value is an outlier
        #[arg(long)]
        z_thresh: Option<f64>,

        /// Count condition nodes against max_iterations too
        #[arg(long)]
        count_all_nodes: bool,

        /// Write the run record to this file instead of printing the final state
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Validate a graph JSON file
    Validate {
        /// Path to the graph JSON file
        graph: PathBuf,
    },

    /// Show information about a graph
    Info {
        /// Path to the graph JSON file
        graph: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Create { output } => cmd_create(output.as_deref())?,
        Commands::Run {
            input,
            graph,
            threshold,
            use_zscore,
            z_thresh,
            count_all_nodes,
            output,
        } => {
            let opts = RunOptions {
                threshold,
                use_zscore,
                z_thresh,
                count_all_nodes,
            };
            cmd_run(&input, graph.as_deref(), &opts, output.as_deref()).await?;
        }
        Commands::Validate { graph } => cmd_validate(&graph)?,
        Commands::Info { graph } => cmd_info(&graph)?,
    }

    Ok(())
}

fn load_graph(path: &Path) -> anyhow::Result<Graph> {
    Graph::load(path).with_context(|| format!("failed to load graph from {}", path.display()))
}

fn cmd_create(output: Option<&Path>) -> anyhow::Result<()> {
    let graph = canonical_graph()?;
    match output {
        Some(path) => {
            graph.save(path)?;
            println!("Wrote {}", path.display());
        }
        None => println!("{}", graph.to_json_pretty()?),
    }
    Ok(())
}

fn cmd_validate(path: &Path) -> anyhow::Result<()> {
    let graph = load_graph(path)?;
    let diagnostics = validate(&graph);

    if diagnostics.is_empty() {
        println!("Graph is valid");
        return Ok(());
    }

    let mut has_error = false;
    for diag in &diagnostics {
        let severity = match diag.severity {
            Severity::Error => {
                has_error = true;
                "ERROR"
            }
            Severity::Warning => "WARN",
        };
        println!("[{}] {}: {}", severity, diag.rule, diag.message);
        if let Some(fix) = &diag.fix {
            println!("        fix: {fix}");
        }
    }

    if has_error {
        std::process::exit(1);
    }
    Ok(())
}

fn cmd_info(path: &Path) -> anyhow::Result<()> {
    let graph = load_graph(path)?;

    println!("Start: {}", graph.start_node);
    println!("Max iterations: {}", graph.max_iterations());
    println!("Nodes: {}", graph.nodes.len());
    println!("Edges: {}", graph.edges.len());

    println!("\nNodes:");
    for (id, node) in &graph.nodes {
        match node {
            Node::Tool { tool_name } => println!("  {id} [tool] {tool_name}"),
            Node::Condition { expression } => println!("  {id} [condition] {expression}"),
        }
    }

    println!("\nEdges:");
    for (from, edge) in &graph.edges {
        match edge {
            Edge::Next(to) => println!("  {from} -> {to}"),
            Edge::Branch { on_true, on_false } => println!(
                "  {from} -> true: {}, false: {}",
                on_true.as_deref().unwrap_or("(missing)"),
                on_false.as_deref().unwrap_or("(missing)")
            ),
        }
    }

    Ok(())
}

struct RunOptions {
    threshold: Option<f64>,
    use_zscore: bool,
    z_thresh: Option<f64>,
    count_all_nodes: bool,
}

/// Build the initial state from the input file and command-line overrides.
fn initial_state(path: &Path, opts: &RunOptions) -> anyhow::Result<State> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let value: Value = serde_json::from_str(&source)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;

    let mut state = match value {
        Value::Array(rows) => {
            let mut state = State::new();
            state.set(DATA_KEY, Value::Array(rows));
            state
        }
        Value::Object(map) => State::from(map),
        other => bail!("input must be an array of rows or a state object, got {other}"),
    };

    if let Some(threshold) = opts.threshold {
        state.set("threshold", json!(threshold));
    }
    if opts.use_zscore || opts.z_thresh.is_some() {
        let mut options = match state.remove("options") {
            Some(Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        };
        if opts.use_zscore {
            options.insert("use_zscore".into(), json!(true));
        }
        if let Some(z) = opts.z_thresh {
            options.insert("z_thresh".into(), json!(z));
        }
        state.set("options", Value::Object(options));
    }

    Ok(state)
}

async fn cmd_run(
    input: &Path,
    graph_path: Option<&Path>,
    opts: &RunOptions,
    output: Option<&Path>,
) -> anyhow::Result<()> {
    let graph = match graph_path {
        Some(path) => load_graph(path)?,
        None => canonical_graph()?,
    };
    let state = initial_state(input, opts)?;

    let policy = if opts.count_all_nodes {
        IterationPolicy::AllNodes
    } else {
        IterationPolicy::ToolNodesOnly
    };
    let events = EventEmitter::default();
    let mut rx = events.subscribe();
    let executor = GraphExecutor::with_default_registry()
        .with_config(ExecutorConfig {
            iteration_policy: policy,
        })
        .with_events(events);

    let service = WorkflowService::with_executor(executor);
    let graph_id = service.register_graph(graph).await?;
    let record = service.run_workflow(&graph_id, state).await?;

    while let Ok(event) = rx.try_recv() {
        tracing::debug!(?event, "Run event");
    }

    let tool_steps = record.logs.iter().filter(|e| e.is_tool_step()).count();
    let status = match record.status {
        RunStatus::Running => "running",
        RunStatus::Completed => "completed",
        RunStatus::Failed => "failed",
    };
    eprintln!("Run {}: {} ({} tool steps)", record.run_id, status, tool_steps);
    if let Some(rules) = record.state.get("rules").and_then(Value::as_array) {
        for rule in rules {
            if let Some(explain) = rule.get("explain").and_then(Value::as_str) {
                eprintln!("  {explain}");
            }
        }
    }
    if let Some(LogEntry::Error { error }) = record.logs.last() {
        if error == MAX_ITERATIONS_EXCEEDED {
            eprintln!("Stopped: {error}");
        }
    }

    match output {
        Some(path) => {
            record.save(path)?;
            eprintln!("Wrote {}", path.display());
        }
        None => println!("{}", serde_json::to_string_pretty(&record.state)?),
    }

    Ok(())
}
