use super::base::{Auth, HttpBase};
use crate::infrastructure::model::adapter::openai_messages;
use crate::infrastructure::model::stream::{LineBuffer, sse_data};
use crate::infrastructure::model::traits::{ModelProvider, TokenSink};
use crate::infrastructure::model::types::{ModelError, ModelRequest, ModelResponse};
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

const PROVIDER: &str = "openai";
const DEFAULT_ENDPOINT: &str = "https://api.openai.com";
const API_PATH: &str = "/v1/chat/completions";

/// OpenAI-compatible chat completions client. Streaming replies arrive as
/// SSE `data:` events terminated by a `[DONE]` sentinel.
#[derive(Clone)]
pub struct OpenAiClient {
    base: HttpBase,
}

impl OpenAiClient {
    pub fn new(api_key: Option<String>) -> Self {
        Self::with_endpoint(DEFAULT_ENDPOINT, api_key)
    }

    pub fn with_endpoint(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            base: HttpBase::new(PROVIDER, endpoint, api_key),
        }
    }
}

#[async_trait]
impl ModelProvider for OpenAiClient {
    async fn chat(&self, request: ModelRequest) -> Result<ModelResponse, ModelError> {
        let url = self.base.url(API_PATH);
        let payload = OpenAiRequest::from_request(&request, false);
        info!(
            model = request.model.as_str(),
            messages = request.messages.len(),
            "Sending chat request to OpenAI-compatible provider"
        );

        let response: OpenAiResponse = self.base.post_json(&url, &payload, Auth::Bearer).await?;
        debug!("Received OpenAI-compatible response");

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .map(|message| message.content)
            .ok_or_else(|| ModelError::invalid_response(PROVIDER, "missing content"))?;
        Ok(ModelResponse::new(content, request.session_id))
    }

    async fn chat_stream(
        &self,
        request: ModelRequest,
        fragments: TokenSink,
    ) -> Result<ModelResponse, ModelError> {
        let url = self.base.url(API_PATH);
        let payload = OpenAiRequest::from_request(&request, true);
        info!(
            model = request.model.as_str(),
            messages = request.messages.len(),
            "Streaming chat request to OpenAI-compatible provider"
        );

        let response = self.base.post(&url, &payload, Auth::Bearer).await?;
        let mut body = response.bytes_stream();
        let mut lines = LineBuffer::new();
        let mut content = String::new();

        'outer: while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| ModelError::network(PROVIDER, e))?;
            for line in lines.push(&chunk) {
                let Some(data) = sse_data(&line) else { continue };
                if data == "[DONE]" {
                    break 'outer;
                }
                if let Some(text) = delta_text(data)? {
                    content.push_str(&text);
                    let _ = fragments.send(text).await;
                }
            }
        }

        Ok(ModelResponse::new(content, request.session_id))
    }
}

fn delta_text(data: &str) -> Result<Option<String>, ModelError> {
    let value: Value = serde_json::from_str(data)
        .map_err(|e| ModelError::invalid_response(PROVIDER, format!("bad stream event: {e}")))?;
    Ok(value
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("delta"))
        .and_then(|delta| delta.get("content"))
        .and_then(Value::as_str)
        .filter(|text| !text.is_empty())
        .map(str::to_string))
}

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<Value>,
    stream: bool,
}

impl OpenAiRequest {
    fn from_request(request: &ModelRequest, stream: bool) -> Self {
        Self {
            model: request.model.clone(),
            messages: openai_messages(&request.messages),
            stream,
        }
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: Option<OpenAiMessage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiMessage {
    content: String,
}
