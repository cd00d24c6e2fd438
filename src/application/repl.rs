use crate::application::agent::{Agent, AgentEvent, AgentOptions};
use crate::application::client::AgentClient;
use crate::application::tooling::ToolBridge;
use crate::infrastructure::model::ModelProvider;
use std::io::Write as _;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ReplError {
    #[error("failed to read from standard input: {0}")]
    Io(#[from] std::io::Error),
}

/// Interactive loop: read a prompt, stream the agent's answer, repeat.
/// `quit`, `exit`, or end-of-input terminate the session. The whole loop
/// shares one session id, so the model keeps conversational context.
pub async fn run<P: ModelProvider + 'static>(
    client: Arc<AgentClient<P>>,
    bridge: Arc<dyn ToolBridge>,
    base_options: AgentOptions,
) -> Result<(), ReplError> {
    let agent = Arc::new(Agent::new(client, bridge));
    let session_id = base_options
        .session_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    debug!(session_id = session_id.as_str(), "Starting interactive session");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("\nUSER: ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let prompt = line.trim();
        if prompt.is_empty() {
            continue;
        }
        if prompt.eq_ignore_ascii_case("quit") || prompt.eq_ignore_ascii_case("exit") {
            break;
        }

        let options = AgentOptions {
            session_id: Some(session_id.clone()),
            ..base_options.clone()
        };
        let (events_tx, mut events_rx) = mpsc::channel(32);
        let task = {
            let agent = Arc::clone(&agent);
            let prompt = prompt.to_string();
            tokio::spawn(async move { agent.run_streaming(prompt, options, events_tx).await })
        };

        print!("\nASSISTANT: ");
        std::io::stdout().flush()?;
        while let Some(event) = events_rx.recv().await {
            match event {
                AgentEvent::Token(text) => {
                    print!("{text}");
                    std::io::stdout().flush()?;
                }
                AgentEvent::ToolResult(step) => {
                    let server = step.server.as_deref().unwrap_or("agent");
                    let status = if step.success { "ok" } else { "error" };
                    println!("\n--- tool {server}:{} ({status}) ---", step.tool);
                    if let Some(message) = &step.message {
                        println!("{message}");
                    }
                }
            }
        }

        match task.await {
            Ok(Ok(_)) => println!(),
            Ok(Err(error)) => {
                println!("\n{}", error.user_message());
                debug!(%error, "Agent run failed");
            }
            Err(join_error) => {
                println!("\nThe assistant stopped unexpectedly. Try again.");
                debug!(%join_error, "Agent task panicked or was cancelled");
            }
        }
    }

    println!("\nGoodbye.");
    Ok(())
}
