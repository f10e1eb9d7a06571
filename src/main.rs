mod command;

use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use stateflow_core::config::FlowConfig;
use stateflow_engine::{millis, RunLogger, RunReport, WorkFlow};

#[derive(Parser)]
#[command(name = "stateflow", version, about = "Run a graph of states and timeout-bounded actions")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the workflow and exit non-zero unless every state completes
    Run {
        /// Path to the workflow definition
        #[arg(default_value = "stateflow.toml", env = "STATEFLOW_CONFIG")]
        file: PathBuf,
    },
    /// Validate the workflow and print its start and end states
    Check {
        /// Path to the workflow definition
        #[arg(default_value = "stateflow.toml", env = "STATEFLOW_CONFIG")]
        file: PathBuf,
    },
    /// Print the resolved workflow definition
    Config {
        /// Path to the workflow definition
        #[arg(default_value = "stateflow.toml", env = "STATEFLOW_CONFIG")]
        file: PathBuf,
    },
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("stateflow=info,warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "stateflow", &mut std::io::stdout());
        }
        Commands::Config { file } => {
            let config = FlowConfig::load(&file)?;
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Check { file } => {
            let config = FlowConfig::load(&file)?;
            print!("{}", check_summary(&config)?);
        }
        Commands::Run { file } => {
            let config = FlowConfig::load(&file)?;
            let report = run_workflow(&config).await?;
            println!("{}", report.outcome);
            let code = exit_code(&report);
            if code != 0 {
                std::process::exit(code);
            }
        }
    }

    Ok(())
}

/// Validate and describe a workflow definition.
fn check_summary(config: &FlowConfig) -> anyhow::Result<String> {
    config.validate()?;
    Ok(format!(
        "workflow: {}\nstart:    {}\nend:      {}\nstates:   {}  actions: {}\n",
        config.workflow.name,
        config.start_state()?,
        config.end_states().join(", "),
        config.state_names().len(),
        config.edges.len()
    ))
}

fn exit_code(report: &RunReport) -> i32 {
    if report.succeeded() {
        0
    } else {
        1
    }
}

async fn run_workflow(config: &FlowConfig) -> anyhow::Result<RunReport> {
    let workflow = WorkFlow::from_config(config, command::work_fn)?;

    info!(
        workflow = %config.workflow.name,
        run_id = %workflow.run_id(),
        start = %workflow.start_state()?,
        "Running workflow"
    );

    let logger = match &config.log {
        Some(log) if log.enabled => Some(RunLogger::new(log.log_dir(), log.level).spawn(
            &workflow.event_bus(),
            workflow.run_id().clone(),
            CancellationToken::new(),
        )),
        _ => None,
    };

    // Ctrl-C cancels the run the same way a failing action does.
    let cancel = workflow.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling workflow");
            cancel.cancel();
        }
    });

    let report = workflow.execute().await;

    if let Some(handle) = logger {
        handle.await.ok();
    }

    info!(
        outcome = %report.outcome,
        elapsed_ms = millis(report.elapsed),
        "Workflow finished"
    );
    Ok(report)
}
