mod shell;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use statewright_config::{EngineSettings, StateMachineDef};
use statewright_engine::{
  CallbackPump, ChannelCallback, ExecutionRequest, InMemoryWaitNotify, StateMachineExecutor, TokioDelayScheduler,
  builtin_registry,
};
use statewright_graph::StateMachine;
use statewright_store::{ExecutionInterrupt, ExecutionInterruptType, MemoryStore, SqliteStore, Store};

use crate::shell::ShellDispatcher;

/// Statewright - a durable state machine engine
#[derive(Parser)]
#[command(name = "statewright")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.statewright)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  /// Emit logs as JSON lines
  #[arg(long, global = true)]
  json_logs: bool,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Check that a state machine definition builds
  Validate {
    /// Path to the state machine file (JSON)
    machine_file: PathBuf,
  },

  /// Execute a state machine to completion
  Run {
    /// Path to the state machine file (JSON)
    machine_file: PathBuf,

    /// Execution variables as a JSON object
    #[arg(long)]
    vars: Option<String>,

    /// Engine settings file (JSON)
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Keep execution records in memory instead of the data directory
    #[arg(long)]
    memory: bool,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();
  init_tracing(cli.json_logs);

  let data_dir = match cli.data_dir {
    Some(dir) => dir,
    None => dirs::home_dir()
      .context("could not determine home directory")?
      .join(".statewright"),
  };

  match cli.command {
    Some(Commands::Validate { machine_file }) => validate(&machine_file),
    Some(Commands::Run {
      machine_file,
      vars,
      settings,
      memory,
    }) => {
      let rt = tokio::runtime::Runtime::new()?;
      rt.block_on(run(machine_file, vars, settings, memory, data_dir))
    }
    None => {
      println!("statewright - use --help to see available commands");
      Ok(())
    }
  }
}

fn init_tracing(json_logs: bool) {
  let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
  let registry = tracing_subscriber::registry();
  if json_logs {
    registry
      .with(fmt::layer().json().with_writer(std::io::stderr).with_filter(filter()))
      .init();
  } else {
    registry
      .with(
        fmt::layer()
          .with_target(true)
          .with_writer(std::io::stderr)
          .with_filter(filter()),
      )
      .init();
  }
}

fn validate(machine_file: &Path) -> Result<()> {
  let def = load_machine(machine_file)?;
  // Command states need a dispatcher to build, never to validate.
  let (wait_notify, _deliveries) = InMemoryWaitNotify::new();
  let dispatcher = Arc::new(ShellDispatcher::new(Arc::new(wait_notify)));
  let machine = StateMachine::build(&def, &builtin_registry(dispatcher)).context("state machine is invalid")?;
  println!("{} is valid (initial state: {})", machine.id(), machine.initial_state_name());
  Ok(())
}

fn load_machine(machine_file: &Path) -> Result<StateMachineDef> {
  StateMachineDef::load(machine_file)
    .with_context(|| format!("failed to load state machine: {}", machine_file.display()))
}

async fn run(
  machine_file: PathBuf,
  vars: Option<String>,
  settings: Option<PathBuf>,
  memory: bool,
  data_dir: PathBuf,
) -> Result<()> {
  let def = load_machine(&machine_file)?;
  let settings = match settings {
    Some(path) => {
      EngineSettings::load(&path).with_context(|| format!("failed to load settings: {}", path.display()))?
    }
    None => EngineSettings::default(),
  };
  let variables = match vars {
    Some(vars) => match serde_json::from_str(&vars).context("failed to parse --vars")? {
      serde_json::Value::Object(map) => map,
      _ => bail!("--vars must be a JSON object"),
    },
    None => Default::default(),
  };

  let store: Arc<dyn Store> = if memory {
    Arc::new(MemoryStore::new())
  } else {
    tokio::fs::create_dir_all(&data_dir)
      .await
      .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;
    let url = format!("sqlite://{}", data_dir.join("statewright.db").display());
    Arc::new(SqliteStore::connect(&url).await.context("failed to open store")?)
  };

  let (wait_notify, deliveries) = InMemoryWaitNotify::new();
  let wait_notify = Arc::new(wait_notify);
  let dispatcher = Arc::new(ShellDispatcher::new(wait_notify.clone()));
  let delay = Arc::new(TokioDelayScheduler::new(wait_notify.clone()));
  let (outcome_tx, mut outcomes) = mpsc::unbounded_channel();

  let executor = StateMachineExecutor::builder(store, dispatcher.clone(), wait_notify, delay)
    .settings(settings)
    .callback("cli", Arc::new(ChannelCallback::new(outcome_tx)))
    .build();
  let machine = StateMachine::build(&def, &builtin_registry(dispatcher)).context("state machine is invalid")?;
  let machine_id = machine.id().to_string();
  executor.register_machine(machine).await;

  let cancel = CancellationToken::new();
  tokio::spawn(CallbackPump::new(executor.clone(), deliveries).start(cancel.clone()));

  let started = executor
    .execute(
      ExecutionRequest::new(&machine_id)
        .with_variables(variables)
        .with_callback("cli"),
    )
    .await
    .context("failed to start execution")?;
  info!(execution_id = %started.execution_id, machine_id = %machine_id, "execution started");

  let outcome = loop {
    tokio::select! {
      outcome = outcomes.recv() => break outcome,
      _ = tokio::signal::ctrl_c() => {
        warn!(execution_id = %started.execution_id, "interrupted, aborting execution");
        let interrupt = ExecutionInterrupt::for_execution(&started.execution_id, ExecutionInterruptType::AbortAll);
        if let Err(e) = executor.register_interrupt(interrupt).await {
          warn!(error = %e, "failed to abort execution");
          break None;
        }
      }
    }
  };
  cancel.cancel();

  let Some(outcome) = outcome else {
    bail!("execution {} ended without an outcome", started.execution_id);
  };
  println!(
    "{}",
    serde_json::to_string_pretty(&json!({
      "execution_id": outcome.execution_id,
      "state": outcome.state_name,
      "status": outcome.status,
      "context": outcome.context,
    }))?
  );

  if !outcome.status.is_positive() {
    bail!("execution finished with status {}", outcome.status);
  }
  Ok(())
}
