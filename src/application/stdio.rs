use crate::application::agent::{Agent, AgentOptions, AgentStep};
use crate::application::client::{AgentClient, ChatRequest};
use crate::application::tooling::ToolBridge;
use crate::infrastructure::model::ModelProvider;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, error, info};

#[derive(Debug, Error)]
pub enum StdioError {
    #[error("stdin/stdout I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to serialize stdio response: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct StdioChatRequest {
    prompt: String,
    model: Option<String>,
    system_prompt: Option<String>,
    session_id: Option<String>,
    /// Tool-calling agent loop by default; set false for a raw chat turn.
    #[serde(default = "default_agent")]
    agent: bool,
    #[serde(default)]
    max_tool_steps: Option<usize>,
}

fn default_agent() -> bool {
    true
}

#[derive(Debug, Serialize)]
struct StdioChatResponse {
    session_id: Option<String>,
    content: Option<String>,
    error: Option<String>,
    tool_steps: Vec<AgentStep>,
}

impl StdioChatResponse {
    fn success(session_id: String, content: String, tool_steps: Vec<AgentStep>) -> Self {
        Self {
            session_id: Some(session_id),
            content: Some(content),
            error: None,
            tool_steps,
        }
    }

    fn failure(message: impl Into<String>) -> Self {
        Self {
            session_id: None,
            content: None,
            error: Some(message.into()),
            tool_steps: Vec::new(),
        }
    }
}

/// Line-delimited JSON mode for embedding in other programs: one request
/// object per input line, one response object per output line.
pub async fn run<P>(
    client: Arc<AgentClient<P>>,
    bridge: Arc<dyn ToolBridge>,
) -> Result<(), StdioError>
where
    P: ModelProvider + 'static,
{
    let stdin = BufReader::new(io::stdin());
    let mut lines = stdin.lines();
    let mut stdout = io::stdout();
    let agent = Agent::new(client.clone(), bridge);

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        debug!("Received STDIO line");

        let response = match serde_json::from_str::<StdioChatRequest>(&line) {
            Ok(request) => handle_request(client.as_ref(), &agent, request).await,
            Err(parse_error) => {
                error!(%parse_error, "Failed to parse STDIO input line");
                StdioChatResponse::failure(format!("input line is not valid JSON: {parse_error}"))
            }
        };
        write_response(&mut stdout, response).await?;
    }

    stdout.flush().await?;
    Ok(())
}

async fn handle_request<P: ModelProvider>(
    client: &AgentClient<P>,
    agent: &Agent<P>,
    request: StdioChatRequest,
) -> StdioChatResponse {
    if request.prompt.trim().is_empty() {
        return StdioChatResponse::failure("prompt cannot be empty");
    }

    if request.agent {
        info!("Processing STDIO agent request");
        let options = AgentOptions {
            model: request.model,
            system_prompt: request.system_prompt,
            session_id: request.session_id,
            max_steps: request
                .max_tool_steps
                .unwrap_or(AgentOptions::default().max_steps),
        };
        match agent.run(request.prompt, options).await {
            Ok(outcome) => {
                StdioChatResponse::success(outcome.session_id, outcome.response, outcome.steps)
            }
            Err(agent_error) => {
                error!(%agent_error, "Agent processing failed via STDIO");
                StdioChatResponse::failure(agent_error.user_message())
            }
        }
    } else {
        info!("Processing STDIO direct chat request");
        let chat = ChatRequest {
            prompt: request.prompt,
            model: request.model,
            system_prompt: request.system_prompt,
            session_id: request.session_id,
        };
        match client.chat(chat).await {
            Ok(result) => StdioChatResponse::success(result.session_id, result.content, Vec::new()),
            Err(chat_error) => {
                error!(%chat_error, "STDIO chat request failed");
                StdioChatResponse::failure(chat_error.user_message())
            }
        }
    }
}

async fn write_response(
    stdout: &mut io::Stdout,
    response: StdioChatResponse,
) -> Result<(), StdioError> {
    let mut payload = serde_json::to_vec(&response)?;
    payload.push(b'\n');
    stdout.write_all(&payload).await?;
    stdout.flush().await?;
    Ok(())
}
