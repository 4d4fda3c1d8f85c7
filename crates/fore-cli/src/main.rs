use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use fore_agent::validator::CommandValidator;
use fore_agent::ProcessSupervisor;
use fore_gateway::{Dispatcher, DirectoryProjects, SessionManager};

/// Default instruction handed to the agent when a session begins.
/// Prompt templating proper lives outside this core; this is just the
/// fallback the CLI ships with.
const DEFAULT_KICKOFF_PROMPT: &str = "Review this project and record the features it needs \
in features.json, one entry per feature with a title and description.";

#[derive(Parser)]
#[command(name = "foreman", version, about = "Foreman — coding-agent orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the session protocol over stdin/stdout for one project
    Serve {
        /// Project identifier (a subdirectory of the projects root)
        #[arg(long)]
        project: String,
        /// Override the configured projects root directory
        #[arg(long)]
        projects_root: Option<PathBuf>,
    },
    /// Validate a shell command against the allowlist policy
    Check {
        /// The command line to check (quote it)
        command: Vec<String>,
    },
    /// Probe whether the agent CLI is installed and responsive
    Ready,
    /// Show current configuration
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            project,
            projects_root,
        } => serve(project, projects_root).await,
        Commands::Check { command } => {
            let line = command.join(" ");
            match CommandValidator::new().ensure_allowed(&line) {
                Ok(()) => {
                    println!("allowed: {line}");
                    Ok(())
                }
                Err(e) => {
                    println!("{e}");
                    std::process::exit(1);
                }
            }
        }
        Commands::Ready => {
            let config = fore_gateway::config::load_config()?;
            let supervisor = ProcessSupervisor::new(config.agent);
            if supervisor.is_ready().await {
                println!("agent is ready");
                Ok(())
            } else {
                println!("agent is not responding");
                std::process::exit(1);
            }
        }
        Commands::Status => {
            let config = fore_gateway::config::load_config()?;
            println!("Foreman v{}", env!("CARGO_PKG_VERSION"));
            println!("Agent command: {}", config.agent.command);
            println!("Run ceiling: {}s", config.agent.run_timeout_secs);
            println!("Projects root: {}", config.gateway.projects_root.display());
            println!("Config: {}", fore_gateway::config::config_path().display());
            Ok(())
        }
    }
}

async fn serve(project: String, projects_root: Option<PathBuf>) -> Result<()> {
    let config = fore_gateway::config::load_config()?;
    let root = projects_root.unwrap_or(config.gateway.projects_root.clone());
    let projects = Arc::new(DirectoryProjects::new(root));
    let manager = Arc::new(SessionManager::for_cli(
        projects,
        config.agent,
        DEFAULT_KICKOFF_PROMPT,
    ));
    let dispatcher = Dispatcher::new(manager, project);

    let (tx, mut rx) = mpsc::channel(256);

    // Writer task: one JSON object per stdout line.
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(msg) = rx.recv().await {
            let Ok(json) = serde_json::to_string(&msg) else {
                continue;
            };
            if stdout.write_all(json.as_bytes()).await.is_err() {
                break;
            }
            if stdout.write_all(b"\n").await.is_err() {
                break;
            }
            let _ = stdout.flush().await;
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("reading stdin")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        dispatcher.handle_line(line, &tx).await;
    }

    // Forwarder tasks for live sessions still hold sender clones, so
    // give the writer a short drain window instead of waiting them out.
    drop(tx);
    let _ = tokio::time::timeout(std::time::Duration::from_secs(1), writer).await;
    Ok(())
}
