//! Conversions from the internal message model to provider wire formats.

use crate::domain::types::{ChatMessage, MessageRole};
use serde_json::{Value, json};

/// OpenAI-style `[{"role", "content"}]` array. Ollama uses the same shape.
pub fn openai_messages(messages: &[ChatMessage]) -> Vec<Value> {
    messages
        .iter()
        .map(|msg| {
            json!({
                "role": msg.role.as_str(),
                "content": msg.content,
            })
        })
        .collect()
}

/// Gemini splits system text out of the turn list and names the assistant
/// role "model". Returns `(system_instruction, contents)`.
pub fn gemini_contents(messages: &[ChatMessage]) -> (Option<String>, Vec<Value>) {
    let mut system_parts = Vec::new();
    let mut contents = Vec::new();

    for message in messages {
        match message.role {
            MessageRole::System => system_parts.push(message.content.clone()),
            MessageRole::User => contents.push(json!({
                "role": "user",
                "parts": [{"text": message.content}],
            })),
            MessageRole::Assistant => contents.push(json!({
                "role": "model",
                "parts": [{"text": message.content}],
            })),
        }
    }

    let system = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n\n"))
    };
    (system, contents)
}
