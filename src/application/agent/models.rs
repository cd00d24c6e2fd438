use serde::Serialize;
use serde_json::Value;

const DEFAULT_MAX_STEPS: usize = 8;

/// One executed tool call, kept for the outcome report and surfaced live
/// through [`super::AgentEvent::ToolResult`].
#[derive(Debug, Clone, Serialize)]
pub struct AgentStep {
    pub server: Option<String>,
    pub tool: String,
    pub input: Value,
    pub success: bool,
    pub output: Value,
    pub message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AgentOutcome {
    pub session_id: String,
    pub response: String,
    pub steps: Vec<AgentStep>,
}

#[derive(Debug, Clone)]
pub struct AgentOptions {
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    pub session_id: Option<String>,
    pub max_steps: usize,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            model: None,
            system_prompt: None,
            session_id: None,
            max_steps: DEFAULT_MAX_STEPS,
        }
    }
}
