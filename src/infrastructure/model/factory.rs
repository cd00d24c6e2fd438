//! Provider selection from the model identifier and environment.

use super::clients::{GeminiClient, OllamaClient, OpenAiClient};
use super::traits::ModelProvider;
use std::env;
use tracing::{info, warn};

pub const ENV_GOOGLE_API_KEY: &str = "GOOGLE_API_KEY";
pub const ENV_OPENAI_API_KEY: &str = "OPENAI_API_KEY";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Ollama,
    OpenAi,
    Gemini,
}

/// A resolved provider plus the bare model name to send it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelTarget {
    pub kind: ProviderKind,
    pub model: String,
}

/// Resolve a model spec like `gemini:gemini-2.0-flash` or plain `llama3`.
///
/// Only known provider prefixes are split off; a bare spec keeps its colons
/// (Ollama tags like `gemma3:4b`) and the provider is inferred from which
/// API key is present in the environment.
pub fn resolve_target(spec: &str) -> ModelTarget {
    let env_key = |name: &str| env::var(name).ok().filter(|v| !v.trim().is_empty());
    let target = classify(
        spec,
        env_key(ENV_GOOGLE_API_KEY).is_some(),
        env_key(ENV_OPENAI_API_KEY).is_some(),
    );
    info!(kind = ?target.kind, model = target.model.as_str(), "Resolved model provider");
    target
}

fn classify(spec: &str, has_google_key: bool, has_openai_key: bool) -> ModelTarget {
    if let Some((prefix, rest)) = spec.split_once(':') {
        let kind = match prefix.to_ascii_lowercase().as_str() {
            "ollama" | "localai" => Some(ProviderKind::Ollama),
            "gemini" | "google" | "google-ai" | "google_genai" => Some(ProviderKind::Gemini),
            "openai" => Some(ProviderKind::OpenAi),
            _ => None,
        };
        if let Some(kind) = kind {
            return ModelTarget {
                kind,
                model: rest.to_string(),
            };
        }
    }

    let kind = if has_google_key {
        ProviderKind::Gemini
    } else if has_openai_key {
        ProviderKind::OpenAi
    } else {
        ProviderKind::Ollama
    };
    ModelTarget {
        kind,
        model: spec.to_string(),
    }
}

pub fn build_provider(target: &ModelTarget, ollama_url: &str) -> Box<dyn ModelProvider> {
    match target.kind {
        ProviderKind::Ollama => Box::new(OllamaClient::new(ollama_url)),
        ProviderKind::OpenAi => Box::new(OpenAiClient::new(api_key(ENV_OPENAI_API_KEY))),
        ProviderKind::Gemini => Box::new(GeminiClient::new(api_key(ENV_GOOGLE_API_KEY))),
    }
}

fn api_key(name: &str) -> Option<String> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Some(value),
        _ => {
            warn!(env_var = name, "API key environment variable is not set");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_prefix_selects_provider() {
        let target = classify("gemini:gemini-2.0-flash", false, false);
        assert_eq!(target.kind, ProviderKind::Gemini);
        assert_eq!(target.model, "gemini-2.0-flash");

        let target = classify("openai:gpt-4o-mini", true, false);
        assert_eq!(target.kind, ProviderKind::OpenAi);
    }

    #[test]
    fn ollama_tag_colon_is_not_a_prefix() {
        let target = classify("gemma3:4b", false, false);
        assert_eq!(target.kind, ProviderKind::Ollama);
        assert_eq!(target.model, "gemma3:4b");
    }

    #[test]
    fn bare_spec_follows_available_api_key() {
        assert_eq!(classify("some-model", true, true).kind, ProviderKind::Gemini);
        assert_eq!(
            classify("some-model", false, true).kind,
            ProviderKind::OpenAi
        );
        assert_eq!(
            classify("some-model", false, false).kind,
            ProviderKind::Ollama
        );
    }
}
