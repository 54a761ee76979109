//! Conversation state: finished messages plus the reply being streamed.

use tailgrid_ai::ChatMessage;

/// One finished message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationEntry {
    pub message: ChatMessage,
    /// Assistant entry recording a failed request rather than a reply
    pub is_error: bool,
}

/// Ordered messages and at most one in-flight assistant reply.
///
/// Append-only until [`Conversation::clear`].
#[derive(Debug, Default)]
pub struct Conversation {
    entries: Vec<ConversationEntry>,
    streaming: Option<String>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[ConversationEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.streaming.is_none()
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.is_some()
    }

    /// Text received so far for the in-flight reply
    pub fn streaming_text(&self) -> Option<&str> {
        self.streaming.as_deref()
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.entries.push(ConversationEntry {
            message: ChatMessage::user(content),
            is_error: false,
        });
    }

    /// Start accumulating a new reply
    pub fn begin_stream(&mut self) {
        self.streaming = Some(String::new());
    }

    pub fn append_chunk(&mut self, text: &str) {
        if let Some(buffer) = self.streaming.as_mut() {
            buffer.push_str(text);
        }
    }

    /// Move the accumulated reply into the message list
    pub fn finish_stream(&mut self) {
        if let Some(text) = self.streaming.take() {
            if !text.is_empty() {
                self.entries.push(ConversationEntry {
                    message: ChatMessage::assistant(text),
                    is_error: false,
                });
            }
        }
    }

    /// Record a failed request. Any partial reply is kept before the error.
    pub fn fail_stream(&mut self, message: impl Into<String>) {
        self.finish_stream();
        self.entries.push(ConversationEntry {
            message: ChatMessage::assistant(message),
            is_error: true,
        });
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.streaming = None;
    }

    /// Finished turns worth sending back to the model; error entries are left out
    pub fn history(&self) -> Vec<ChatMessage> {
        self.entries
            .iter()
            .filter(|e| !e.is_error)
            .map(|e| e.message.clone())
            .collect()
    }
}
