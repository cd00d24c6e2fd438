use super::types::{ModelError, ModelRequest, ModelResponse};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Channel the streaming path delivers incremental content fragments on.
pub type TokenSink = mpsc::Sender<String>;

#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn chat(&self, request: ModelRequest) -> Result<ModelResponse, ModelError>;

    /// Stream the reply, forwarding content fragments through `fragments` as
    /// they arrive, and return the fully accumulated response. Providers
    /// without a streaming API fall back to a single fragment.
    async fn chat_stream(
        &self,
        request: ModelRequest,
        fragments: TokenSink,
    ) -> Result<ModelResponse, ModelError> {
        let response = self.chat(request).await?;
        let _ = fragments.send(response.message.content.clone()).await;
        Ok(response)
    }
}

#[async_trait]
impl ModelProvider for Box<dyn ModelProvider> {
    async fn chat(&self, request: ModelRequest) -> Result<ModelResponse, ModelError> {
        self.as_ref().chat(request).await
    }

    async fn chat_stream(
        &self,
        request: ModelRequest,
        fragments: TokenSink,
    ) -> Result<ModelResponse, ModelError> {
        self.as_ref().chat_stream(request, fragments).await
    }
}
