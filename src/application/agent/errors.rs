use crate::application::client::ChatError;
use crate::application::tooling::ToolInvokeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Client(#[from] ChatError),
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error("invalid agent response: {0}")]
    InvalidResponse(String),
}

impl AgentError {
    pub fn user_message(&self) -> String {
        match self {
            AgentError::Client(error) => error.user_message(),
            AgentError::Tool(error) => error.user_message(),
            AgentError::InvalidResponse(_) => {
                "The model produced a response that could not be interpreted. Try rephrasing your request."
                    .to_string()
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool requested: {0}")]
    UnknownTool(String),
    #[error("tool '{tool}' failed: {source}")]
    Execution {
        tool: String,
        #[source]
        source: ToolInvokeError,
    },
}

impl ToolError {
    pub fn user_message(&self) -> String {
        match self {
            ToolError::UnknownTool(name) => {
                format!("No connected server provides a tool named \"{name}\".")
            }
            ToolError::Execution { tool, .. } => {
                format!("Tool \"{tool}\" failed while executing. Check that its server is running.")
            }
        }
    }
}
