use super::base::{Auth, HttpBase};
use crate::infrastructure::model::adapter::gemini_contents;
use crate::infrastructure::model::stream::{LineBuffer, sse_data};
use crate::infrastructure::model::traits::{ModelProvider, TokenSink};
use crate::infrastructure::model::types::{ModelError, ModelRequest, ModelResponse};
use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info};

const PROVIDER: &str = "gemini";
const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Google Gemini client. The API key travels as a query parameter;
/// streaming uses `:streamGenerateContent` with `alt=sse`.
#[derive(Clone)]
pub struct GeminiClient {
    base: HttpBase,
}

impl GeminiClient {
    pub fn new(api_key: Option<String>) -> Self {
        Self::with_endpoint(DEFAULT_ENDPOINT, api_key)
    }

    pub fn with_endpoint(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            base: HttpBase::new(PROVIDER, endpoint, api_key),
        }
    }

    fn model_url(&self, model: &str, method: &str) -> String {
        format!(
            "{}/{model}:{method}",
            self.base.endpoint.trim_end_matches('/')
        )
    }

    fn payload(request: &ModelRequest) -> Value {
        let (system, contents) = gemini_contents(&request.messages);
        let mut payload = json!({ "contents": contents });
        if let Some(system) = system {
            payload["system_instruction"] = json!({ "parts": [{ "text": system }] });
        }
        payload
    }
}

#[async_trait]
impl ModelProvider for GeminiClient {
    async fn chat(&self, request: ModelRequest) -> Result<ModelResponse, ModelError> {
        let url = self.model_url(&request.model, "generateContent");
        let payload = Self::payload(&request);
        info!(
            model = request.model.as_str(),
            messages = request.messages.len(),
            "Sending chat request to Gemini"
        );

        let response: GeminiResponse = self.base.post_json(&url, &payload, Auth::QueryKey).await?;
        debug!("Received Gemini response");

        let content = response
            .text()
            .ok_or_else(|| ModelError::invalid_response(PROVIDER, "missing candidate text"))?;
        Ok(ModelResponse::new(content, request.session_id))
    }

    async fn chat_stream(
        &self,
        request: ModelRequest,
        fragments: TokenSink,
    ) -> Result<ModelResponse, ModelError> {
        let url = self.model_url(&request.model, "streamGenerateContent?alt=sse");
        let payload = Self::payload(&request);
        info!(
            model = request.model.as_str(),
            messages = request.messages.len(),
            "Streaming chat request to Gemini"
        );

        let response = self.base.post(&url, &payload, Auth::QueryKey).await?;
        let mut body = response.bytes_stream();
        let mut lines = LineBuffer::new();
        let mut content = String::new();

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| ModelError::network(PROVIDER, e))?;
            for line in lines.push(&chunk) {
                let Some(data) = sse_data(&line) else { continue };
                let event: GeminiResponse = serde_json::from_str(data).map_err(|e| {
                    ModelError::invalid_response(PROVIDER, format!("bad stream event: {e}"))
                })?;
                if let Some(text) = event.text() {
                    if !text.is_empty() {
                        content.push_str(&text);
                        let _ = fragments.send(text).await;
                    }
                }
            }
        }

        Ok(ModelResponse::new(content, request.session_id))
    }
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
}

impl GeminiResponse {
    /// All text parts of the first candidate's content, concatenated.
    fn text(self) -> Option<String> {
        let text: String = self
            .candidates?
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)?
            .parts
            .into_iter()
            .filter_map(|part| part.text)
            .collect();
        if text.is_empty() { None } else { Some(text) }
    }
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{ChatMessage, MessageRole};

    #[test]
    fn model_url_includes_method_suffix() {
        let client = GeminiClient::new(Some("key".to_string()));
        assert_eq!(
            client.model_url("gemini-2.0-flash", "generateContent"),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent"
        );
    }

    #[test]
    fn payload_lifts_system_instruction() {
        let request = ModelRequest {
            model: "gemini-2.0-flash".into(),
            messages: vec![
                ChatMessage::new(MessageRole::System, "be brief"),
                ChatMessage::new(MessageRole::User, "hi"),
            ],
            session_id: None,
        };
        let payload = GeminiClient::payload(&request);
        assert_eq!(
            payload["system_instruction"]["parts"][0]["text"],
            "be brief"
        );
        assert_eq!(payload["contents"].as_array().map(Vec::len), Some(1));
    }

    #[test]
    fn response_text_takes_first_candidate_part() {
        let response: GeminiResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"text":"answer"}],"role":"model"}}]}"#,
        )
        .expect("parse");
        assert_eq!(response.text().as_deref(), Some("answer"));
    }

    #[test]
    fn response_text_joins_multiple_parts() {
        let response: GeminiResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"text":"first "},{"inlineData":{}},{"text":"second"}],"role":"model"}}]}"#,
        )
        .expect("parse");
        assert_eq!(response.text().as_deref(), Some("first second"));
    }
}
