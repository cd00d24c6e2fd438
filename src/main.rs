mod application;
mod config;
mod domain;
mod infrastructure;

use application::agent::{Agent, AgentOptions};
use application::client::{AgentClient, ClientConfig};
use application::tooling::{ServerManager, ToolBridge};
use application::{repl, stdio};
use clap::{Parser, ValueEnum};
use config::AppConfig;
use infrastructure::model::{build_provider, resolve_target};
use serde_json::json;
use std::error::Error;
use std::fs;
use std::io::{self, Read};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser, Debug)]
#[command(
    name = "bob",
    version,
    about = "Project assistant driving MCP tool servers from a chat model"
)]
struct Cli {
    #[arg(long, default_value = "http://127.0.0.1:11434")]
    ollama_url: String,
    #[arg(long)]
    config: Option<String>,
    #[arg(long)]
    system: Option<String>,
    #[arg(long)]
    session: Option<String>,
    #[arg(long)]
    prompt_file: Option<String>,
    #[arg(long, value_enum, default_value_t = RunMode::Repl)]
    mode: RunMode,
    prompt: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum RunMode {
    /// Interactive chat loop with streamed answers.
    Repl,
    /// One prompt in, one JSON outcome out.
    Cli,
    /// Line-delimited JSON requests over stdin/stdout.
    Stdio,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.mode);
    debug!(?cli.mode, config = ?cli.config, system = ?cli.system, session = ?cli.session, "CLI arguments parsed");

    let config_path = cli.config.as_deref().map(Path::new);
    let app_config = AppConfig::load(config_path)?;
    if let Some(path) = config_path {
        info!(path = %path.display(), "Loaded configuration from file");
    }

    let target = resolve_target(&app_config.model);
    let provider = build_provider(&target, &cli.ollama_url);

    let mut client_config = ClientConfig::new(target.model.clone(), app_config.workspace.clone())
        .with_prompt_template(app_config.prompt_template.clone());
    if let Some(system_prompt) = cli.system.clone().or(app_config.system_prompt.clone()) {
        client_config = client_config.with_system_prompt(system_prompt);
    }
    let client = Arc::new(AgentClient::new(provider, client_config));

    let manager = Arc::new(ServerManager::new(app_config.servers.clone()));
    manager.start_all().await;
    let bridge: Arc<dyn ToolBridge> = manager;

    info!(mode = ?cli.mode, "Running in selected mode");
    match cli.mode {
        RunMode::Repl => {
            let options = AgentOptions {
                session_id: cli.session.clone(),
                ..AgentOptions::default()
            };
            repl::run(client, bridge, options).await?;
        }
        RunMode::Cli => {
            let prompt = load_prompt(&cli)?;
            let options = AgentOptions {
                session_id: cli.session.clone(),
                ..AgentOptions::default()
            };
            let agent = Agent::new(client, bridge);
            let outcome = agent.run(prompt, options).await?;
            let output = json!({
                "session_id": outcome.session_id,
                "content": outcome.response,
                "tool_steps": outcome.steps,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        RunMode::Stdio => {
            info!("Entering STDIO mode; awaiting JSON line input");
            stdio::run(client, bridge).await?;
        }
    }
    Ok(())
}

/// In REPL mode log noise would interleave with the streamed answer, so the
/// default filter only lets warnings through; RUST_LOG still overrides.
fn init_tracing(mode: RunMode) {
    let default_filter = match mode {
        RunMode::Repl => "warn",
        RunMode::Cli | RunMode::Stdio => "info",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .init();
}

fn load_prompt(cli: &Cli) -> Result<String, Box<dyn Error>> {
    if let Some(path) = &cli.prompt_file {
        info!(path = %path, "Loading prompt from file");
        let content = fs::read_to_string(path)?;
        return Ok(content.trim().to_string());
    }

    if !cli.prompt.is_empty() {
        return Ok(cli.prompt.join(" ").trim().to_string());
    }

    if atty::isnt(atty::Stream::Stdin) {
        info!("Reading prompt from standard input");
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        return Ok(buffer.trim().to_string());
    }

    warn!("Prompt not provided via arguments, file, or stdin");
    Err("prompt required via arguments, file, or stdin".into())
}
