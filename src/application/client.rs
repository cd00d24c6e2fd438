use crate::config::{DEFAULT_PROMPT_TEMPLATE, WorkspaceConfig};
use crate::domain::types::{ChatMessage, MessageRole};
use crate::infrastructure::model::{
    ModelError, ModelProvider, ModelRequest, ModelResponse, TokenSink,
};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub default_model: String,
    pub default_system_prompt: Option<String>,
    pub prompt_template: Option<String>,
    pub workspace: WorkspaceConfig,
}

impl ClientConfig {
    pub fn new(default_model: impl Into<String>, workspace: WorkspaceConfig) -> Self {
        Self {
            default_model: default_model.into(),
            default_system_prompt: None,
            prompt_template: None,
            workspace,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.default_system_prompt = Some(prompt.into());
        self
    }

    pub fn with_prompt_template(mut self, template: Option<String>) -> Self {
        self.prompt_template = template;
        self
    }
}

#[derive(Debug)]
pub struct ChatRequest {
    pub prompt: String,
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ChatResult {
    pub content: String,
    pub session_id: String,
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error(transparent)]
    Model(#[from] ModelError),
}

impl ChatError {
    pub fn user_message(&self) -> String {
        match self {
            ChatError::Model(error) => error.user_message(),
        }
    }
}

/// Chat client owning the per-session conversation state. Histories are
/// ordered message vectors keyed by session id; a missing id starts a fresh
/// session (the original's in-memory checkpointer keyed by thread id).
pub struct AgentClient<P: ModelProvider> {
    provider: P,
    config: ClientConfig,
    sessions: Mutex<HashMap<String, Vec<ChatMessage>>>,
}

impl<P: ModelProvider> AgentClient<P> {
    pub fn new(provider: P, config: ClientConfig) -> Self {
        Self {
            provider,
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub async fn chat(&self, request: ChatRequest) -> Result<ChatResult, ChatError> {
        let prepared = self.prepare(request).await;
        let response = self.provider.chat(prepared.model_request()).await?;
        Ok(self.settle(prepared, response).await)
    }

    /// Same contract as [`AgentClient::chat`], but forwards content
    /// fragments through `fragments` as the provider produces them.
    pub async fn chat_stream(
        &self,
        request: ChatRequest,
        fragments: TokenSink,
    ) -> Result<ChatResult, ChatError> {
        let prepared = self.prepare(request).await;
        let response = self
            .provider
            .chat_stream(prepared.model_request(), fragments)
            .await?;
        Ok(self.settle(prepared, response).await)
    }

    async fn prepare(&self, request: ChatRequest) -> PreparedChat {
        let model = request
            .model
            .unwrap_or_else(|| self.config.default_model.clone());
        let session_id = request
            .session_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let history = {
            let mut sessions = self.sessions.lock().await;
            sessions.entry(session_id.clone()).or_default().clone()
        };
        debug!(
            session_id = session_id.as_str(),
            history_count = history.len(),
            "Preparing chat request with prior history"
        );

        let mut messages = Vec::with_capacity(history.len() + 2);
        let system_prompt = self.compose_system_prompt(request.system_prompt);
        if !system_prompt.is_empty() {
            messages.push(ChatMessage::new(MessageRole::System, system_prompt));
        }
        messages.extend(history);
        messages.push(ChatMessage::new(MessageRole::User, request.prompt.clone()));

        PreparedChat {
            model,
            session_id,
            messages,
            user_prompt: request.prompt,
        }
    }

    async fn settle(&self, prepared: PreparedChat, response: ModelResponse) -> ChatResult {
        let session_id = response
            .session_id
            .unwrap_or_else(|| prepared.session_id.clone());
        info!(
            session_id = session_id.as_str(),
            "Received response from model provider"
        );

        let content = response.message.content.clone();
        {
            let mut sessions = self.sessions.lock().await;
            let history = sessions.entry(session_id.clone()).or_default();
            history.push(ChatMessage::new(MessageRole::User, prepared.user_prompt));
            history.push(response.message);
            debug!(
                session_id = session_id.as_str(),
                total_messages = history.len(),
                "Persisted chat exchange to session history"
            );
        }

        ChatResult {
            content,
            session_id,
        }
    }

    /// Render the Bob prompt template against the workspace, then append
    /// the custom instruction (per-request override or configured default).
    fn compose_system_prompt(&self, override_prompt: Option<String>) -> String {
        let template = self
            .config
            .prompt_template
            .clone()
            .unwrap_or_else(|| DEFAULT_PROMPT_TEMPLATE.to_string());

        let mut prompt = template
            .replace("{working_dir}", &self.config.workspace.working_dir)
            .replace("{dir_name}", &self.config.workspace.dir_name);

        let custom = override_prompt.or_else(|| self.config.default_system_prompt.clone());
        if let Some(custom) = custom {
            let custom = custom.trim();
            if !custom.is_empty() {
                prompt.push_str("\n\n");
                prompt.push_str(custom);
            }
        }

        collapse_blank_lines(&prompt)
    }
}

struct PreparedChat {
    model: String,
    session_id: String,
    messages: Vec<ChatMessage>,
    user_prompt: String,
}

impl PreparedChat {
    fn model_request(&self) -> ModelRequest {
        ModelRequest {
            model: self.model.clone(),
            messages: self.messages.clone(),
            session_id: Some(self.session_id.clone()),
        }
    }
}

fn collapse_blank_lines(text: &str) -> String {
    let mut cleaned: Vec<&str> = Vec::new();
    let mut previous_blank = false;
    for line in text.lines().map(str::trim_end) {
        let is_blank = line.trim().is_empty();
        if is_blank {
            if !previous_blank {
                cleaned.push("");
            }
        } else {
            cleaned.push(line);
        }
        previous_blank = is_blank;
    }
    cleaned.join("\n").trim().to_string()
}
