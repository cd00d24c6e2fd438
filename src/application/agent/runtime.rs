use super::directive::AgentDirective;
use super::errors::{AgentError, ToolError};
use crate::application::tooling::{ToolBridge, ToolDescriptor, ToolInvokeError};
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Aggregated tool catalogue plus per-server usage guidance, gathered from
/// the bridge when an agent run starts.
#[derive(Debug, Clone, Serialize, Default)]
pub struct ToolContext {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDescriptor>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub servers: Vec<ServerGuidance>,
}

impl ToolContext {
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty() && self.servers.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerGuidance {
    pub name: String,
    pub instruction: String,
}

pub struct ToolRuntime {
    bridge: Arc<dyn ToolBridge>,
}

impl ToolRuntime {
    pub fn new(bridge: Arc<dyn ToolBridge>) -> Self {
        Self { bridge }
    }

    pub async fn build_context(&self) -> ToolContext {
        let tools = self.bridge.catalogue().await;
        let mut context = ToolContext::default();
        let mut seen_servers = HashSet::new();

        for tool in &tools {
            if seen_servers.insert(tool.server.clone()) {
                if let Some(instruction) = self.bridge.server_instructions(&tool.server).await {
                    context.servers.push(ServerGuidance {
                        name: tool.server.clone(),
                        instruction,
                    });
                }
            }
        }
        context.tools = tools;
        context
    }

    /// Protocol preamble: tool calls are JSON directives, final answers are
    /// plain prose (which lets the REPL stream them as they arrive).
    pub fn compose_system_instructions(&self, context: &ToolContext) -> String {
        let mut lines = vec![
            "You can call tools provided by connected MCP servers to carry out the user's request."
                .to_string(),
            "To invoke a tool, reply with exactly one JSON object and nothing else: {\"action\":\"call_tool\",\"tool\":\"tool_name\",\"server\":\"server_name\",\"input\":{...}}."
                .to_string(),
            "To see the available tools again, call the special tool: {\"action\":\"call_tool\",\"tool\":\"list_tools\"}."
                .to_string(),
            "After each call you receive a tool_result message; continue calling tools until the task is done."
                .to_string(),
            "When you are ready to answer the user, reply in plain prose without any JSON wrapper."
                .to_string(),
        ];

        if context.is_empty() {
            lines.push("No tools are currently available.".to_string());
            return lines.join(" ");
        }

        for guidance in &context.servers {
            lines.push(format!(
                "Server '{}' guidance: {}",
                guidance.name, guidance.instruction
            ));
        }

        if !context.tools.is_empty() {
            lines.push("Available tools:".to_string());
            for tool in &context.tools {
                let mut line = format!("- {} (server: {})", tool.name, tool.server);
                if let Some(description) = &tool.description {
                    line.push_str(&format!(": {description}"));
                }
                if let Some(schema) = &tool.input_schema {
                    let compact = serde_json::to_string(schema).unwrap_or_default();
                    line.push_str(&format!(". Input schema: {compact}"));
                }
                lines.push(line);
            }
        }

        lines.join(" ")
    }

    pub fn parse_agent_action(&self, content: &str) -> Result<AgentDirective, AgentError> {
        let Some(value) = extract_json(content) else {
            // No JSON anywhere: the model answered the user directly.
            return Ok(AgentDirective::Final {
                response: content.trim().to_string(),
            });
        };

        let Some(map) = value.as_object() else {
            return Ok(AgentDirective::Final {
                response: content.trim().to_string(),
            });
        };
        let Some(action) = map.get("action").and_then(Value::as_str) else {
            return Err(AgentError::InvalidResponse(
                "missing action field in agent response".into(),
            ));
        };

        match action {
            "call_tool" => {
                let tool = map
                    .get("tool")
                    .or_else(|| map.get("name"))
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        AgentError::InvalidResponse("call_tool action missing tool field".into())
                    })?;
                let server = map
                    .get("server")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                let input = map
                    .get("input")
                    .or_else(|| map.get("arguments"))
                    .cloned()
                    .unwrap_or(Value::Null);
                Ok(AgentDirective::CallTool {
                    tool: tool.to_string(),
                    server,
                    input,
                })
            }
            "final" => {
                let response = map
                    .get("response")
                    .or_else(|| map.get("answer"))
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        AgentError::InvalidResponse("final action missing response field".into())
                    })?;
                Ok(AgentDirective::Final {
                    response: response.to_string(),
                })
            }
            other => Err(AgentError::InvalidResponse(format!(
                "unknown action value: {other}"
            ))),
        }
    }

    pub(super) async fn execute(
        &self,
        tool_name: &str,
        server: Option<&str>,
        input: Value,
    ) -> Result<ToolExecution, ToolError> {
        if tool_name.eq_ignore_ascii_case("list_tools") {
            let context = self.build_context().await;
            debug!("Agent requested tool catalogue via list_tools");
            return Ok(ToolExecution {
                server: None,
                tool: "list_tools".to_string(),
                success: true,
                input,
                output: serde_json::to_value(&context).unwrap_or(Value::Null),
                message: Some(format!("{} tools available.", context.tools.len())),
            });
        }

        let (server_name, resolved_tool) = self.resolve(tool_name, server).await?;
        let arguments = match input.clone() {
            Value::Null => Value::Object(Default::default()),
            other => other,
        };

        debug!(tool = %resolved_tool, server = %server_name, "Dispatching tool via MCP");
        match self
            .bridge
            .invoke_tool(&server_name, &resolved_tool, arguments)
            .await
        {
            Ok(result) => {
                let is_error = result
                    .get("isError")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                let message = extract_tool_message(&result);
                let execution = ToolExecution {
                    server: Some(server_name),
                    tool: resolved_tool,
                    success: !is_error,
                    input,
                    output: result,
                    message,
                };
                info!(tool = %execution.tool, success = execution.success, "Tool executed");
                Ok(execution)
            }
            Err(ToolInvokeError::NotConfigured { .. }) => {
                Err(ToolError::UnknownTool(resolved_tool))
            }
            Err(source) => {
                warn!(tool = %resolved_tool, server = %server_name, %source, "Tool execution failed");
                Err(ToolError::Execution {
                    tool: resolved_tool,
                    source,
                })
            }
        }
    }

    /// Map a requested tool name (and optional server hint) onto a concrete
    /// `(server, tool)` pair from the catalogue.
    async fn resolve(
        &self,
        tool_name: &str,
        server: Option<&str>,
    ) -> Result<(String, String), ToolError> {
        if let Some(server) = server {
            return Ok((server.to_string(), tool_name.to_string()));
        }

        let catalogue = self.bridge.catalogue().await;
        let matched = catalogue
            .iter()
            .find(|tool| tool.name.eq_ignore_ascii_case(tool_name));
        match matched {
            Some(tool) => Ok((tool.server.clone(), tool.name.clone())),
            None => {
                warn!(requested_tool = %tool_name, "Unknown tool requested by agent");
                Err(ToolError::UnknownTool(tool_name.to_string()))
            }
        }
    }
}

pub(super) struct ToolExecution {
    pub server: Option<String>,
    pub tool: String,
    pub success: bool,
    pub input: Value,
    pub output: Value,
    pub message: Option<String>,
}

/// Feedback turn describing a completed tool call to the model.
pub(super) fn tool_result_prompt(execution: &ToolExecution) -> String {
    json!({
        "tool_result": {
            "server": execution.server,
            "tool": execution.tool,
            "input": execution.input,
            "success": execution.success,
            "output": execution.output,
            "message": execution.message,
        }
    })
    .to_string()
}

fn extract_json(content: &str) -> Option<Value> {
    let trimmed = content.trim();

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    // Code-fenced JSON.
    if trimmed.starts_with("```") {
        let stripped = trimmed
            .trim_start_matches("```json")
            .trim_start_matches("```JSON")
            .trim_start_matches("```");
        if let Some(end) = stripped.rfind("```") {
            if let Ok(value) = serde_json::from_str::<Value>(stripped[..end].trim()) {
                return Some(value);
            }
        }
        // A fenced reply that is not JSON is prose, not a directive.
        return None;
    }

    // A JSON object embedded at the start of surrounding chatter.
    if trimmed.starts_with('{') {
        if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
            if start < end {
                if let Ok(value) = serde_json::from_str::<Value>(&trimmed[start..=end]) {
                    return Some(value);
                }
            }
        }
    }

    None
}

fn extract_tool_message(result: &Value) -> Option<String> {
    if let Some(blocks) = result.get("content").and_then(Value::as_array) {
        for block in blocks {
            let is_text = block
                .get("type")
                .and_then(Value::as_str)
                .map(|kind| kind.eq_ignore_ascii_case("text"))
                .unwrap_or(false);
            if is_text {
                if let Some(text) = block.get("text").and_then(Value::as_str) {
                    let trimmed = text.trim();
                    if !trimmed.is_empty() {
                        return Some(trimmed.to_string());
                    }
                }
            }
        }
    }

    if let Some(error) = result
        .get("structuredContent")
        .and_then(|s| s.get("error"))
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
    {
        let trimmed = error.trim();
        if !trimmed.is_empty() {
            return Some(trimmed.to_string());
        }
    }

    None
}
