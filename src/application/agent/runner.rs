use super::directive::AgentDirective;
use super::errors::AgentError;
use super::events::{AgentEvent, StreamGate};
use super::models::{AgentOptions, AgentOutcome, AgentStep};
use super::runtime::{ToolRuntime, tool_result_prompt};
use crate::application::client::{AgentClient, ChatRequest};
use crate::application::tooling::ToolBridge;
use crate::infrastructure::model::ModelProvider;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Drives the tool-calling loop on top of [`AgentClient`]: sends the prompt,
/// interprets each reply as either a tool directive or the final answer, and
/// feeds tool results back until the model answers in prose.
pub struct Agent<P: ModelProvider> {
    client: Arc<AgentClient<P>>,
    runtime: ToolRuntime,
}

impl<P: ModelProvider> Agent<P> {
    pub fn new(client: Arc<AgentClient<P>>, bridge: Arc<dyn ToolBridge>) -> Self {
        Self {
            client,
            runtime: ToolRuntime::new(bridge),
        }
    }

    pub async fn run(
        &self,
        prompt: impl Into<String>,
        options: AgentOptions,
    ) -> Result<AgentOutcome, AgentError> {
        self.drive(prompt.into(), options, None).await
    }

    /// Like [`Agent::run`], but emits [`AgentEvent`]s as the run progresses:
    /// answer fragments stream live, tool results arrive as they complete.
    pub async fn run_streaming(
        &self,
        prompt: impl Into<String>,
        options: AgentOptions,
        events: mpsc::Sender<AgentEvent>,
    ) -> Result<AgentOutcome, AgentError> {
        self.drive(prompt.into(), options, Some(events)).await
    }

    async fn drive(
        &self,
        prompt: String,
        options: AgentOptions,
        events: Option<mpsc::Sender<AgentEvent>>,
    ) -> Result<AgentOutcome, AgentError> {
        let context = self.runtime.build_context().await;
        let instructions = self.runtime.compose_system_instructions(&context);
        let system_prompt = match &options.system_prompt {
            Some(custom) => format!("{custom}\n\n{instructions}"),
            None => instructions,
        };

        let mut session_id = options.session_id.clone();
        let mut steps: Vec<AgentStep> = Vec::new();
        let mut remaining_steps = options.max_steps;
        let mut current_prompt = prompt;

        loop {
            let request = ChatRequest {
                prompt: current_prompt,
                model: options.model.clone(),
                system_prompt: Some(system_prompt.clone()),
                session_id: session_id.clone(),
            };

            let (result, streamed_live) = match &events {
                Some(events) => {
                    let (fragments, mut fragment_rx) = mpsc::channel::<String>(32);
                    let forwarder = events.clone();
                    let gate_task = tokio::spawn(async move {
                        let mut gate = StreamGate::new();
                        while let Some(fragment) = fragment_rx.recv().await {
                            if let Some(text) = gate.accept(&fragment) {
                                if forwarder.send(AgentEvent::Token(text)).await.is_err() {
                                    break;
                                }
                            }
                        }
                        gate.forwarded()
                    });
                    let result = self.client.chat_stream(request, fragments).await?;
                    let streamed_live = gate_task.await.unwrap_or(false);
                    (result, streamed_live)
                }
                None => (self.client.chat(request).await?, false),
            };

            session_id = Some(result.session_id.clone());

            match self.runtime.parse_agent_action(&result.content)? {
                AgentDirective::Final { response } => {
                    if let Some(events) = &events {
                        // A held `final` directive never reached the user;
                        // replay the extracted answer text.
                        if !streamed_live {
                            let _ = events.send(AgentEvent::Token(response.clone())).await;
                        }
                    }
                    info!(
                        steps = steps.len(),
                        "Agent run finished with final response"
                    );
                    return Ok(AgentOutcome {
                        session_id: result.session_id,
                        response,
                        steps,
                    });
                }
                AgentDirective::CallTool {
                    tool,
                    server,
                    input,
                } => {
                    if remaining_steps == 0 {
                        return Err(AgentError::InvalidResponse(
                            "exceeded maximum number of tool interactions".into(),
                        ));
                    }
                    remaining_steps -= 1;
                    debug!(tool = tool.as_str(), "Agent requested tool call");

                    let execution = self.runtime.execute(&tool, server.as_deref(), input).await?;
                    let step = AgentStep {
                        server: execution.server.clone(),
                        tool: execution.tool.clone(),
                        input: execution.input.clone(),
                        success: execution.success,
                        output: execution.output.clone(),
                        message: execution.message.clone(),
                    };
                    if let Some(events) = &events {
                        let _ = events.send(AgentEvent::ToolResult(step.clone())).await;
                    }
                    steps.push(step);
                    current_prompt = tool_result_prompt(&execution);
                }
            }
        }
    }
}
