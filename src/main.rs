#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::module_name_repetitions,
    clippy::too_many_lines,
    clippy::uninlined_format_args
)]

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use switchboard::catalog::{bootstrap, spawn_refresh, FileAgentSource, SnapshotHandle};
use switchboard::config::Config;
use switchboard::inference::{GuardedInference, OpenAiClient};
use switchboard::memory::create_memory;
use switchboard::router::AgentRouter;
use switchboard::sessions::GateError;
use switchboard::telemetry::{TelemetrySink, TracingSink};

/// Switchboard - routes every conversational turn to the right agent.
#[derive(Parser, Debug)]
#[command(name = "switchboard")]
#[command(version)]
#[command(about = "Conversational agent routing engine.", long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, global = true, default_value = "config.toml")]
    config: String,

    /// Path to the agent catalog file
    #[arg(long, global = true, default_value = "agents.toml")]
    agents: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start an interactive chat session
    #[command(long_about = "\
Start an interactive chat session.

Reads turns from stdin and routes each one through the engine, printing \
the selected agent and its response. Ctrl-D exits.

Examples:
  switchboard chat                      # fresh session
  switchboard chat --session support-7  # resume a named session")]
    Chat {
        /// Session id to use (a random one is generated when omitted)
        #[arg(short, long)]
        session: Option<String>,
    },

    /// Route a single message and print the decision as JSON
    #[command(long_about = "\
Route a single message and print the decision as JSON.

Examples:
  switchboard route -m \"I forgot my password\"
  switchboard route -m \"hi\" --session support-7")]
    Route {
        /// The message to route
        #[arg(short, long)]
        message: String,

        /// Session id to use (a random one is generated when omitted)
        #[arg(short, long)]
        session: Option<String>,
    },

    /// List the agents in the catalog
    Agents,

    /// Check configuration and connectivity to the inference backend
    Doctor,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respects RUST_LOG, defaults to INFO.
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let config = load_config(&cli.config).await?;

    match cli.command {
        Commands::Chat { session } => {
            let router = build_router(config, &cli.agents).await?;
            let session_id = session.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            chat_loop(&router, &session_id).await
        }
        Commands::Route { message, session } => {
            let router = build_router(config, &cli.agents).await?;
            let session_id = session.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let outcome = router
                .handle_turn(&session_id, &message, &HashMap::new())
                .await?;
            println!("{}", outcome.response_text);
            println!("{}", serde_json::to_string_pretty(&outcome.decision)?);
            Ok(())
        }
        Commands::Agents => list_agents(&cli.agents).await,
        Commands::Doctor => doctor(&config, &cli.agents).await,
    }
}

async fn load_config(path: &str) -> Result<Config> {
    if Path::new(path).exists() {
        Config::load(Path::new(path)).await
    } else {
        info!(path, "config file not found, using defaults");
        Ok(Config::default())
    }
}

async fn build_router(config: Config, agents_path: &str) -> Result<AgentRouter> {
    let client = Arc::new(OpenAiClient::new(&config.inference));
    let inference = Arc::new(GuardedInference::new(
        client,
        &config.breaker,
        &config.inference,
    ));

    let source = Arc::new(FileAgentSource::new(agents_path));
    let snapshot = bootstrap(source.as_ref(), Some(inference.as_ref())).await?;
    info!(agents = snapshot.agents().len(), "agent catalog loaded");
    let handle = SnapshotHandle::new(snapshot);
    // Detached on purpose; the refresh task runs for the process lifetime.
    let _refresh = spawn_refresh(
        handle.clone(),
        source,
        inference.clone(),
        Duration::from_secs(config.routing.snapshot_refresh_secs),
    );

    let telemetry: Arc<dyn TelemetrySink> = Arc::new(TracingSink);
    let memory = Arc::new(create_memory(&config.memory, telemetry.clone())?);
    Ok(AgentRouter::new(config, handle, inference, memory, telemetry))
}

async fn chat_loop(router: &AgentRouter, session_id: &str) -> Result<()> {
    println!("switchboard chat (session {session_id}) - Ctrl-D to exit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        match router.handle_turn(session_id, input, &HashMap::new()).await {
            Ok(outcome) => {
                let agent = outcome.decision.agent_id.as_deref().unwrap_or("-");
                println!("[{agent} {:.2}] {}", outcome.decision.confidence, outcome.response_text);
            }
            Err(e) if e.downcast_ref::<GateError>().is_some() => {
                println!("(session busy, previous turn still running)");
            }
            Err(e) => return Err(e),
        }
        router.sweep_sessions();
    }
    println!();
    Ok(())
}

async fn list_agents(agents_path: &str) -> Result<()> {
    use switchboard::catalog::AgentSource;
    let source = FileAgentSource::new(agents_path);
    let agents = source.load().await?;
    if agents.is_empty() {
        println!("no agents defined in {agents_path}");
        return Ok(());
    }
    println!("{:<20} {:<18} {:<8} patterns", "id", "category", "active");
    for agent in agents {
        let category = serde_json::to_string(&agent.category)?;
        println!(
            "{:<20} {:<18} {:<8} {}",
            agent.id,
            category.trim_matches('"'),
            agent.active,
            agent.patterns.len()
        );
    }
    Ok(())
}

async fn doctor(config: &Config, agents_path: &str) -> Result<()> {
    println!("config:");
    println!("  inference endpoint: {}", config.inference.base_url);
    println!(
        "  api key: {}",
        if config.inference.resolve_api_key().is_some() {
            "configured"
        } else {
            "MISSING (set SWITCHBOARD_API_KEY or OPENAI_API_KEY)"
        }
    );

    use switchboard::catalog::AgentSource;
    match FileAgentSource::new(agents_path).load().await {
        Ok(agents) => println!("  agent catalog: {} agents in {agents_path}", agents.len()),
        Err(e) => println!("  agent catalog: FAILED ({e})"),
    }

    let client = Arc::new(OpenAiClient::new(&config.inference));
    let inference = GuardedInference::new(client, &config.breaker, &config.inference);
    print!("inference: ");
    match inference.complete("Reply with the single word OK.").await {
        Ok(_) => println!("completion OK"),
        Err(e) => println!("completion FAILED ({e})"),
    }
    print!("embeddings: ");
    match inference.embed("connectivity check").await {
        Ok(v) => println!("OK ({} dimensions)", v.len()),
        Err(e) => println!("FAILED ({e})"),
    }
    println!(
        "breakers: completion={:?} embedding={:?}",
        inference.completion_breaker().state(),
        inference.embedding_breaker().state()
    );
    Ok(())
}
