use clap::{Parser, Subcommand};
use colored::*;
use std::path::PathBuf;
use std::sync::Arc;

use crate::agent::Agent;
use crate::config::Config;
use crate::llm::{ChatBackend, LlmClient};
use crate::observer::ConsoleObserver;
use crate::server;
use crate::tools::mcp::{connect_toolset, shutdown_toolset};

#[derive(Parser, Debug)]
#[command(
    name = "cambio",
    version,
    about = "Currency-conversion agent served over A2A, with MCP exchange-rate tools",
    long_about = None,
)]
pub struct Cli {
    /// Path to config.yaml (default: search ./cambio/config, ~/.cambio/config, ./config)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Command to run (default: serve)
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the agent over the A2A HTTP interface (default)
    Serve {
        /// Override the configured port
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Run a single question through the agent and print the answer
    Ask { prompt: String },
    /// List the tools published by the exchange-rate MCP server
    Tools,
}

pub async fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();
    // Credential validation happens here: missing GROQ_API_KEY aborts before
    // anything binds or connects.
    let mut cfg = match &cli.config {
        Some(path) => Config::load_from_yaml(path)?,
        None => Config::load()?,
    };

    match cli.command.unwrap_or(Command::Serve { port: None }) {
        Command::Serve { port } => {
            if let Some(p) = port {
                cfg.server.port = p;
            }
            let backend: Arc<dyn ChatBackend> =
                Arc::new(LlmClient::from_config(&cfg.llm).await?);
            let tools = connect_toolset(&cfg.mcp.server_url).await?;
            server::serve(&cfg, backend, tools).await
        }
        Command::Ask { prompt } => ask(&cfg, prompt).await,
        Command::Tools => list_tools(&cfg).await,
    }
}

async fn ask(cfg: &Config, prompt: String) -> anyhow::Result<()> {
    let backend: Arc<dyn ChatBackend> = Arc::new(LlmClient::from_config(&cfg.llm).await?);
    let tools = connect_toolset(&cfg.mcp.server_url).await?;
    let system_prompt = server::resolve_system_prompt(cfg)?;

    let mut agent = Agent::builder(backend, system_prompt)
        .with_tools(tools)
        .with_max_steps(cfg.agent.max_steps)
        .with_token_limit(cfg.agent.token_limit)
        .with_completion_reserve(cfg.agent.completion_reserve)
        .with_transcript_label("ask")
        .with_observer(Arc::new(ConsoleObserver::new()))
        .build();

    let answer = agent.run_turn(prompt).await;
    shutdown_toolset().await;
    let answer = answer?;
    if answer.is_empty() {
        println!("{}", "The agent returned no answer.".yellow());
    }
    Ok(())
}

async fn list_tools(cfg: &Config) -> anyhow::Result<()> {
    let tools = connect_toolset(&cfg.mcp.server_url).await?;
    println!(
        "{} {}",
        "MCP server:".bold(),
        cfg.mcp.server_url.cyan()
    );
    if tools.is_empty() {
        println!("{}", "No tools published.".yellow());
    }
    for t in &tools {
        println!("  {} {}", t.name().cyan().bold(), t.description().dimmed());
    }
    shutdown_toolset().await;
    Ok(())
}
