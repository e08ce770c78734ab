use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use authgraph_config::FlowDef;
use authgraph_script::{FunctionRegistry, SessionContext};
use authgraph_script_lua::{LuaEngineConfig, LuaScriptEngine};
use authgraph_sequence::{FlowStatus, GraphBuilderFactory, SUCCESS};

/// Authgraph - script-driven authentication flows
#[derive(Parser)]
#[command(name = "authgraph")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Memory limit for the Lua state, in MiB
  #[arg(long, global = true, default_value_t = 16)]
  memory_limit_mib: usize,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Build the authentication graph of a flow and print it
  Graph {
    /// Path to the flow definition (JSON)
    flow_file: PathBuf,

    /// Output format
    #[arg(long, value_enum, default_value_t = Format::Json)]
    format: Format,
  },

  /// Simulate a login, completing each step with the given events
  Run {
    /// Path to the flow definition (JSON)
    flow_file: PathBuf,

    /// Event each executed step finishes with, in order (default: success)
    #[arg(long = "event")]
    events: Vec<String>,

    /// Requested ACR values, overriding those in the flow file
    #[arg(long = "acr")]
    acr: Vec<String>,
  },
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
  Json,
  Dot,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    )
    .with_writer(std::io::stderr)
    .init();

  let cli = Cli::parse();
  let config = LuaEngineConfig {
    memory_limit: Some(memory_limit_bytes(cli.memory_limit_mib)?),
  };

  match cli.command {
    Some(Commands::Graph { flow_file, format }) => {
      print_graph(flow_file, format, config)?;
    }
    Some(Commands::Run {
      flow_file,
      events,
      acr,
    }) => {
      run_flow(flow_file, events, acr, config)?;
    }
    None => {
      println!("authgraph - use --help to see available commands");
    }
  }

  Ok(())
}

fn memory_limit_bytes(mib: usize) -> Result<usize> {
  mib
    .checked_mul(1024 * 1024)
    .with_context(|| format!("memory limit of {mib} MiB is too large"))
}

fn load_flow(flow_file: &Path) -> Result<FlowDef> {
  FlowDef::load(flow_file)
    .with_context(|| format!("failed to load flow file: {}", flow_file.display()))
}

fn create_factory(config: LuaEngineConfig) -> Result<GraphBuilderFactory> {
  let engine = LuaScriptEngine::with_config(config).context("failed to create script engine")?;
  Ok(GraphBuilderFactory::new(
    Arc::new(engine),
    FunctionRegistry::new(),
  ))
}

fn print_graph(flow_file: PathBuf, format: Format, config: LuaEngineConfig) -> Result<()> {
  let flow = load_flow(&flow_file)?;
  let factory = create_factory(config)?;

  let mut session =
    SessionContext::new(flow.application.clone()).with_requested_acr(flow.requested_acr.clone());
  let graph = factory
    .build_graph(&flow, &mut session)
    .context("failed to build authentication graph")?;

  eprintln!("Built graph for {} with {} nodes", flow.application, graph.len());

  match format {
    Format::Json => {
      let json = graph.to_json().context("failed to serialize graph")?;
      println!("{}", serde_json::to_string_pretty(&json)?);
    }
    Format::Dot => print!("{}", graph.to_dot()),
  }

  factory.release_graph(&graph);
  Ok(())
}

fn run_flow(
  flow_file: PathBuf,
  events: Vec<String>,
  acr: Vec<String>,
  config: LuaEngineConfig,
) -> Result<()> {
  let flow = load_flow(&flow_file)?;
  let factory = create_factory(config)?;

  let acr = if acr.is_empty() {
    flow.requested_acr.clone()
  } else {
    acr
  };
  let mut session = SessionContext::new(flow.application.clone()).with_requested_acr(acr);
  let mut graph = factory
    .build_graph(&flow, &mut session)
    .context("failed to build authentication graph")?;

  eprintln!("Session {} started", session.session_id());

  let handler = factory.handler();
  let mut statuses = vec![
    handler
      .start(&mut graph, &mut session)
      .context("failed to start flow")?,
  ];
  let mut events = events.into_iter();

  while let Some(FlowStatus::ExecuteStep { step, .. }) = statuses.last() {
    // Every resume moves past a distinct step node.
    if statuses.len() > graph.len() {
      bail!("flow did not finish, still executing step {}", step.id);
    }
    let step_id = step.id.clone();
    let event = events.next().unwrap_or_else(|| SUCCESS.to_string());
    eprintln!("Step {step_id} -> {event}");

    let status = handler
      .resume(&mut graph, &mut session, &event)
      .with_context(|| format!("failed to resume flow after step {step_id}"))?;
    statuses.push(status);
  }

  println!("{}", serde_json::to_string_pretty(&statuses)?);
  factory.release_graph(&graph);
  Ok(())
}
