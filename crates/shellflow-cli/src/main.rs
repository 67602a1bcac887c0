mod cmd;
mod context;
mod output;

use clap::{Parser, Subcommand};
use cmd::{vault::VaultSubcommand, workflow::WorkflowSubcommand};
use context::Context;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "shellflow",
    about = "Run templated shell workflows with pre-checks, steps, and actions",
    version,
    propagate_version = true
)]
struct Cli {
    /// Data directory (default: ~/.shellflow)
    #[arg(long, global = true, env = "SHELLFLOW_HOME")]
    home: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow: pre-checks, then its steps or the requested actions
    Run {
        /// Workflow id
        id: String,

        /// Run this action instead of the steps (repeatable, runs in order given)
        #[arg(long = "action", short = 'a')]
        actions: Vec<String>,

        /// Variable override as KEY=VALUE (repeatable)
        #[arg(long = "var", value_parser = cmd::parse_kv)]
        vars: Vec<(String, String)>,

        /// Only run the pre-checks
        #[arg(long, conflicts_with = "actions")]
        pre_checks_only: bool,

        /// Directory searched for env files (default: current directory)
        #[arg(long)]
        env_dir: Option<PathBuf>,
    },

    /// Manage stored workflows
    Workflow {
        #[command(subcommand)]
        subcommand: WorkflowSubcommand,
    },

    /// Manage scoped variables
    Vault {
        #[command(subcommand)]
        subcommand: VaultSubcommand,
    },

    /// Show recent runs
    History {
        /// Maximum number of runs (default: history_limit from config)
        #[arg(long)]
        limit: Option<usize>,

        /// Only runs of this workflow
        #[arg(long)]
        workflow: Option<String>,
    },
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    if let Err(e) = run(cli) {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let ctx = Context::open(cli.home.as_deref()).await?;
        let result = match cli.command {
            Commands::Run {
                id,
                actions,
                vars,
                pre_checks_only,
                env_dir,
            } => {
                let args = cmd::run::RunArgs {
                    id,
                    actions,
                    vars,
                    pre_checks_only,
                    env_dir,
                };
                cmd::run::run(&ctx, args).await
            }
            Commands::Workflow { subcommand } => cmd::workflow::run(&ctx, subcommand, cli.json).await,
            Commands::Vault { subcommand } => cmd::vault::run(&ctx, subcommand, cli.json).await,
            Commands::History { limit, workflow } => {
                cmd::history::run(&ctx, limit, workflow.as_deref(), cli.json).await
            }
        };
        ctx.close().await;
        result
    })
}
