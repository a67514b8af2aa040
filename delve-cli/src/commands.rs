//! Subcommand handlers.

use anyhow::Context;
use delve_core::config::{DelveConfig, ResearchDepth, default_data_dir, load_config};
use delve_core::research::{
    Collaborators, InMemoryKnowledgeStore, ResearchCallback, ResearchEngine, ResearchPhase,
    ResearchSession, SessionId, VectorStatus,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::web::{DuckDuckGoSearch, HtmlTextParser, HttpFetcher};

#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Research a question and print the cited report
    Research {
        /// The research question
        query: String,

        /// Depth preset: quick, detailed, comprehensive
        #[arg(short, long)]
        depth: Option<ResearchDepth>,

        /// Override the iteration budget
        #[arg(long)]
        max_iterations: Option<u32>,

        /// Print the full session as JSON instead of the markdown report
        #[arg(long)]
        json: bool,

        /// Do not persist the session
        #[arg(long)]
        no_save: bool,
    },
    /// Inspect saved research sessions
    Sessions {
        #[command(subcommand)]
        action: SessionsAction,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
pub enum SessionsAction {
    /// List saved sessions, newest first
    List,
    /// Print a saved session's report
    Show {
        /// Session ID
        id: String,
        /// Print the full session as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(clap::Subcommand, Debug)]
pub enum ConfigAction {
    /// Write a default `.delve/config.toml` in the workspace
    Init,
    /// Show the effective configuration
    Show,
}

pub async fn handle_command(command: Commands, workspace: &Path) -> anyhow::Result<()> {
    match command {
        Commands::Research {
            query,
            depth,
            max_iterations,
            json,
            no_save,
        } => {
            handle_research(
                workspace,
                ResearchArgs {
                    query,
                    depth,
                    max_iterations,
                    json,
                    save: !no_save,
                },
            )
            .await
        }
        Commands::Sessions { action } => handle_sessions(action, workspace),
        Commands::Config { action } => handle_config(action, workspace),
    }
}

fn load(workspace: &Path) -> anyhow::Result<DelveConfig> {
    load_config(Some(workspace), None).map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
}

fn session_dir(config: &DelveConfig) -> PathBuf {
    config
        .research
        .session_dir
        .clone()
        .unwrap_or_else(default_data_dir)
}

struct ResearchArgs {
    query: String,
    depth: Option<ResearchDepth>,
    max_iterations: Option<u32>,
    json: bool,
    save: bool,
}

/// Prints coarse progress to stderr.
struct ConsoleProgress;

impl ResearchCallback for ConsoleProgress {
    fn on_phase_change(&self, phase: ResearchPhase) {
        eprintln!("[{phase}]");
    }

    fn on_vector_status(&self, vector_id: &str, topic: &str, status: VectorStatus) {
        if status.is_terminal() {
            eprintln!("  {vector_id} {status:<10} {topic}");
        }
    }

    fn on_iteration_complete(&self, iteration: u32, max_iterations: u32, remaining: usize) {
        eprintln!("  pass {iteration}/{max_iterations}: {remaining} topic(s) still open");
    }
}

async fn handle_research(workspace: &Path, args: ResearchArgs) -> anyhow::Result<()> {
    let config = load(workspace)?;
    let mut research = config.research.clone();
    if let Some(depth) = args.depth {
        research = research.with_depth(depth);
    }
    if let Some(max_iterations) = args.max_iterations {
        research.max_iterations = max_iterations;
    }
    research.session_dir = args.save.then(|| session_dir(&config));

    let collaborators = Collaborators::new(
        Arc::new(
            DuckDuckGoSearch::new(&config.web, research.results_per_query)
                .context("Failed to create search client")?,
        ),
        Arc::new(HttpFetcher::new(&config.web).context("Failed to create HTTP client")?),
        Arc::new(HtmlTextParser::new()),
        Arc::new(InMemoryKnowledgeStore::new()),
    );
    let engine = ResearchEngine::new(research, collaborators)
        .map_err(|e| anyhow::anyhow!("Invalid research configuration: {}", e))?
        .with_callback(Arc::new(ConsoleProgress));

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling research");
            on_signal.cancel();
        }
    });

    let session = engine.run_with_cancel(&args.query, cancel).await?;
    print_session(&session, args.json)?;
    if args.save {
        eprintln!("Session saved: {}", session.id);
    }
    Ok(())
}

fn print_session(session: &ResearchSession, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(session)?);
        return Ok(());
    }

    match &session.final_report {
        Some(report) => println!("{report}"),
        None => println!("No report was written (session {}).", session.phase),
    }
    if !session.errors.is_empty() {
        eprintln!("\nWarnings ({}):", session.errors.len());
        for e in &session.errors {
            eprintln!("  - {e}");
        }
    }
    Ok(())
}

fn handle_sessions(action: SessionsAction, workspace: &Path) -> anyhow::Result<()> {
    let config = load(workspace)?;
    let dir = session_dir(&config);

    match action {
        SessionsAction::List => {
            let sessions = ResearchSession::list_sessions(&dir);
            if sessions.is_empty() {
                println!("No saved sessions in {}", dir.display());
                return Ok(());
            }
            println!("Saved sessions ({}):", sessions.len());
            for s in sessions {
                println!(
                    "  {}  {:<9}  {} verified / {} incomplete / {} failed  {}  {}",
                    s.id,
                    s.phase.to_string(),
                    s.verified,
                    s.incomplete,
                    s.failed,
                    s.updated_at.format("%Y-%m-%d %H:%M"),
                    s.user_query,
                );
            }
            Ok(())
        }
        SessionsAction::Show { id, json } => {
            let id: SessionId = id
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid session ID '{}': {}", id, e))?;
            let session = ResearchSession::load(&dir, &id)
                .with_context(|| format!("Failed to load session {id}"))?;
            print_session(&session, json)
        }
    }
}

fn handle_config(action: ConfigAction, workspace: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_dir = workspace.join(".delve");
            std::fs::create_dir_all(&config_dir)?;

            let config_path = config_dir.join("config.toml");
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }
            std::fs::write(&config_path, DelveConfig::default().to_toml_string()?)?;
            println!("Created configuration file: {}", config_path.display());
            Ok(())
        }
        ConfigAction::Show => {
            let config = load(workspace)?;
            println!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}
