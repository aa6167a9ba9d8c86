use serde::{Deserialize, Deserializer, Serialize};

fn default_stream() -> bool {
    true
}

fn null_as_empty<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(d)?.unwrap_or_default())
}

/// Body of `POST /stream`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct InboundRequest {
    /// Absent and `null` both decode as the empty prompt.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub prompt: String,
    /// Advisory only; the relay always streams.
    #[serde(default = "default_stream")]
    pub stream: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// Upstream `/chat/completions` request body.
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct CompletionRequest<'a> {
    pub model: &'a str,
    pub stream: bool,
    pub messages: Vec<ChatMessage>,
}

impl<'a> CompletionRequest<'a> {
    /// Streaming request carrying `prompt` as the sole user message.
    pub fn streaming(model: &'a str, prompt: &str) -> Self {
        Self {
            model,
            stream: true,
            messages: vec![ChatMessage {
                role: Role::User,
                content: prompt.to_string(),
            }],
        }
    }
}
