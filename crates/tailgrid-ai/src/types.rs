//! Chat message and wire types for the inference endpoint

use serde::{Deserialize, Serialize};

/// Who authored a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A single role-tagged message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Request body sent to the endpoint
#[derive(Debug, Serialize)]
pub(crate) struct InferenceRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [ChatMessage],
    pub stream: bool,
}

/// One streamed fragment: `{"response": "..."}`
#[derive(Debug, Deserialize)]
pub(crate) struct FragmentPayload {
    pub response: String,
}

/// Non-streaming body, either wrapped in a `result` envelope or bare
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum CompletionBody {
    Envelope { result: FragmentPayload },
    Bare(FragmentPayload),
}

impl CompletionBody {
    pub fn into_text(self) -> String {
        match self {
            CompletionBody::Envelope { result } => result.response,
            CompletionBody::Bare(payload) => payload.response,
        }
    }
}
