mod adapter;
mod clients;
mod factory;
mod stream;
mod traits;
mod types;

pub use clients::{GeminiClient, OllamaClient, OpenAiClient};
pub use factory::{ModelTarget, ProviderKind, build_provider, resolve_target};
pub use traits::{ModelProvider, TokenSink};
pub use types::{ModelError, ModelRequest, ModelResponse};
