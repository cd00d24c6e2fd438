use super::base::{Auth, HttpBase};
use crate::infrastructure::model::adapter::openai_messages;
use crate::infrastructure::model::stream::LineBuffer;
use crate::infrastructure::model::traits::{ModelProvider, TokenSink};
use crate::infrastructure::model::types::{ModelError, ModelRequest, ModelResponse};
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

const PROVIDER: &str = "ollama";

/// Local Ollama server. No credentials; streams newline-delimited JSON.
#[derive(Clone)]
pub struct OllamaClient {
    base: HttpBase,
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base: HttpBase::new(PROVIDER, base_url, None),
        }
    }
}

#[async_trait]
impl ModelProvider for OllamaClient {
    async fn chat(&self, request: ModelRequest) -> Result<ModelResponse, ModelError> {
        let url = self.base.url("/api/chat");
        let payload = OllamaRequest::from_request(&request, false);
        info!(
            model = request.model.as_str(),
            messages = request.messages.len(),
            "Sending chat request to Ollama"
        );

        let response: OllamaResponse = self.base.post_json(&url, &payload, Auth::None).await?;
        debug!("Received Ollama response");

        let message = response
            .message
            .ok_or_else(|| ModelError::invalid_response(PROVIDER, "missing message field"))?;
        Ok(ModelResponse::new(message.content, request.session_id))
    }

    async fn chat_stream(
        &self,
        request: ModelRequest,
        fragments: TokenSink,
    ) -> Result<ModelResponse, ModelError> {
        let url = self.base.url("/api/chat");
        let payload = OllamaRequest::from_request(&request, true);
        info!(
            model = request.model.as_str(),
            messages = request.messages.len(),
            "Streaming chat request to Ollama"
        );

        let response = self.base.post(&url, &payload, Auth::None).await?;
        let mut body = response.bytes_stream();
        let mut lines = LineBuffer::new();
        let mut content = String::new();

        'outer: while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| ModelError::network(PROVIDER, e))?;
            for line in lines.push(&chunk) {
                if consume_chunk(&line, &mut content, &fragments).await? {
                    break 'outer;
                }
            }
        }
        if let Some(rest) = lines.take_remainder() {
            consume_chunk(&rest, &mut content, &fragments).await?;
        }

        Ok(ModelResponse::new(content, request.session_id))
    }
}

/// Returns true once the final (`done`) chunk has been seen.
async fn consume_chunk(
    line: &str,
    content: &mut String,
    fragments: &TokenSink,
) -> Result<bool, ModelError> {
    let value: Value = serde_json::from_str(line)
        .map_err(|e| ModelError::invalid_response(PROVIDER, format!("bad stream chunk: {e}")))?;

    if let Some(error) = value.get("error").and_then(Value::as_str) {
        return Err(ModelError::invalid_response(PROVIDER, error));
    }

    if let Some(text) = value
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(Value::as_str)
    {
        if !text.is_empty() {
            content.push_str(text);
            let _ = fragments.send(text.to_string()).await;
        }
    }

    Ok(value.get("done").and_then(Value::as_bool).unwrap_or(false))
}

#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    messages: Vec<Value>,
    stream: bool,
}

impl OllamaRequest {
    fn from_request(request: &ModelRequest, stream: bool) -> Self {
        Self {
            model: request.model.clone(),
            messages: openai_messages(&request.messages),
            stream,
        }
    }
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    message: Option<OllamaMessage>,
}

#[derive(Debug, Deserialize)]
struct OllamaMessage {
    content: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{ChatMessage, MessageRole};
    use tokio::sync::mpsc;

    #[test]
    fn request_conversion_sets_stream_flag() {
        let request = ModelRequest {
            model: "gemma3:4b".into(),
            messages: vec![ChatMessage::new(MessageRole::User, "hi")],
            session_id: None,
        };
        let payload = OllamaRequest::from_request(&request, true);
        assert!(payload.stream);
        assert_eq!(payload.model, "gemma3:4b");
        assert_eq!(payload.messages.len(), 1);
    }

    #[tokio::test]
    async fn consume_chunk_forwards_text_and_flags_done() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut content = String::new();

        let done = consume_chunk(
            r#"{"message":{"role":"assistant","content":"hel"},"done":false}"#,
            &mut content,
            &tx,
        )
        .await
        .expect("chunk parses");
        assert!(!done);

        let done = consume_chunk(
            r#"{"message":{"role":"assistant","content":"lo"},"done":true}"#,
            &mut content,
            &tx,
        )
        .await
        .expect("chunk parses");
        assert!(done);

        assert_eq!(content, "hello");
        assert_eq!(rx.recv().await.as_deref(), Some("hel"));
        assert_eq!(rx.recv().await.as_deref(), Some("lo"));
    }

    #[tokio::test]
    async fn consume_chunk_surfaces_server_error() {
        let (tx, _rx) = mpsc::channel(8);
        let mut content = String::new();
        let error = consume_chunk(r#"{"error":"model not found"}"#, &mut content, &tx)
            .await
            .unwrap_err();
        assert!(matches!(error, ModelError::InvalidResponse { .. }));
    }
}
