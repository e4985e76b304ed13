//! CLI command definitions for docker-step.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::info;

use crate::execution::config::{
    DEFAULT_CONTAINER_WORKING_DIR, DEFAULT_DOCKER_HOST, DEFAULT_STOP_GRACE_SECONDS,
};
use crate::execution::script::{agent_user, write_script};
use crate::execution::{
    DockerClient, EngineConfig, ExecutionPlan, Orchestrator, RunResult, StdoutConsole,
};

/// Run a build step in ephemeral Docker containers.
#[derive(Parser, Debug)]
#[command(name = "docker-step")]
#[command(about = "Run a build step in ephemeral Docker containers")]
#[command(version)]
#[command(
    long_about = "docker-step pulls the step image, starts service containers on a private network, runs the step commands in a one-shot container with live output, and removes every container and network it created.\n\nExample usage:\n  docker-step run --plan step.yaml"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Run a step described by a plan file.
    Run(RunArgs),
}

/// Arguments for `docker-step run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Plan file (JSON or YAML).
    #[arg(short, long)]
    pub plan: PathBuf,

    /// Executable script to run instead of the plan's commands.
    #[arg(short, long)]
    pub script: Option<PathBuf>,

    /// User to run the script as (uid:gid). Defaults to the current user.
    #[arg(short, long)]
    pub user: Option<String>,

    /// Docker daemon endpoint.
    #[arg(long, env = "DOCKER_STEP_HOST", default_value = DEFAULT_DOCKER_HOST)]
    pub docker_host: String,

    /// Seconds to wait for containers to stop before killing them.
    #[arg(long, default_value_t = DEFAULT_STOP_GRACE_SECONDS)]
    pub stop_grace_seconds: i64,

    /// Mount point of the working directory inside the script container.
    #[arg(long, default_value = DEFAULT_CONTAINER_WORKING_DIR)]
    pub container_workdir: String,

    /// Write the run result as JSON to this file instead of stdout.
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl RunArgs {
    fn engine_config(&self) -> EngineConfig {
        EngineConfig::new()
            .with_docker_host(&self.docker_host)
            .with_stop_grace_seconds(self.stop_grace_seconds)
            .with_container_working_dir(&self.container_workdir)
    }
}

/// Parses command-line arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Parses arguments and runs the selected command.
pub async fn run() -> Result<()> {
    run_with_cli(parse_cli()).await
}

/// Runs the command selected in `cli`.
pub async fn run_with_cli(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run(args) => run_step(args).await,
    }
}

async fn run_step(args: RunArgs) -> Result<()> {
    let plan = ExecutionPlan::from_file(&args.plan)
        .with_context(|| format!("Failed to load plan {}", args.plan.display()))?;

    let config = args.engine_config();
    let client = DockerClient::connect(&config).context("Failed to set up Docker client")?;
    let orchestrator = Orchestrator::new(Arc::new(client), Arc::new(StdoutConsole), config);

    // Generated scripts live until the run returns.
    let (script, _generated) = match &args.script {
        Some(path) => (path.clone(), None),
        None => {
            let generated = write_script(&plan.commands, &plan.working_directory)
                .context("Failed to write step script")?;
            (generated.to_path_buf(), Some(generated))
        }
    };

    let user = match args.user.clone() {
        Some(user) => Some(user),
        None => agent_user().await,
    };

    info!(plan = %args.plan.display(), script = %script.display(), "Running step");
    let result = orchestrator.run(&plan, &script, user.as_deref()).await;
    write_result(&result, args.output.as_ref())?;

    if !result.success {
        bail!("Step failed: {}", result.message);
    }
    Ok(())
}

fn write_result(result: &RunResult, output: Option<&PathBuf>) -> Result<()> {
    let json = serde_json::to_string_pretty(result).context("Failed to serialize run result")?;
    match output {
        Some(path) => std::fs::write(path, json)
            .with_context(|| format!("Failed to write result to {}", path.display())),
        None => {
            println!("{json}");
            Ok(())
        }
    }
}
