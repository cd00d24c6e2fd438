use serde_json::Value;

/// What the model asked for in one turn.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentDirective {
    Final {
        response: String,
    },
    CallTool {
        tool: String,
        server: Option<String>,
        input: Value,
    },
}
