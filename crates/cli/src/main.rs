//! contentloom CLI: the main entry point.
//!
//! Commands:
//! - `compact`   Compact a context file into prompt-ready buckets
//! - `prompt`    Assemble the system prompt for an agent
//! - `workflow`  Validate a template or list the tasks a run would execute
//! - `config`    Show the resolved configuration

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "contentloom",
    about = "contentloom: workflow templates and layered prompt assembly",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Config file (defaults to ~/.contentloom/config.toml)
    #[arg(short, long, global = true, env = "CONTENTLOOM_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Compact a JSON context into kb_summary, runtime_context and examples
    Compact {
        /// JSON object with the execution context
        context: PathBuf,

        /// Do not cap the citation list
        #[arg(long)]
        summarize: bool,
    },

    /// Assemble the system prompt for an agent
    Prompt {
        /// JSON agent descriptor
        #[arg(short, long)]
        agent: PathBuf,

        /// JSON execution context
        #[arg(short, long)]
        context: Option<PathBuf>,

        /// Template set version (overrides config)
        #[arg(long)]
        version: Option<String>,

        /// Print the budget report alongside the prompt as JSON
        #[arg(long)]
        report: bool,
    },

    /// Inspect workflow templates
    Workflow {
        #[command(subcommand)]
        action: WorkflowAction,
    },

    /// Show the resolved configuration
    Config {
        /// Print the config file path instead
        #[arg(long)]
        path: bool,
    },
}

#[derive(Subcommand)]
enum WorkflowAction {
    /// List workflow types found in the workflows directory
    List,

    /// Check a template's task ids and dependencies
    Validate {
        /// Workflow type (template file stem)
        workflow_type: String,
    },

    /// Show the tasks a run would execute, without executing them
    Tasks {
        /// Workflow type (template file stem)
        workflow_type: String,

        /// JSON execution context
        #[arg(short, long)]
        context: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Compact { context, summarize } => {
            commands::compact::run(&config, &context, summarize).await?
        }
        Commands::Prompt {
            agent,
            context,
            version,
            report,
        } => commands::prompt::run(&config, &agent, context.as_deref(), version, report).await?,
        Commands::Workflow { action } => match action {
            WorkflowAction::List => commands::workflow::list(&config)?,
            WorkflowAction::Validate { workflow_type } => {
                commands::workflow::validate(&config, &workflow_type).await?
            }
            WorkflowAction::Tasks {
                workflow_type,
                context,
            } => commands::workflow::tasks(&config, &workflow_type, context.as_deref()).await?,
        },
        Commands::Config { path } => commands::config_cmd::run(&config, cli.config.as_deref(), path)?,
    }

    Ok(())
}
