//! Log event model and tail frame decoding

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity or origin of a log event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Log,
    Info,
    Warn,
    Error,
    Request,
    Exception,
    System,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Log => "log",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Request => "request",
            LogLevel::Exception => "exception",
            LogLevel::System => "system",
        }
    }

    /// Map a console level from the wire onto the closed level set.
    /// Unknown levels (including `debug`) become [`LogLevel::Log`].
    pub fn from_console(level: &str) -> Self {
        match level.to_ascii_lowercase().as_str() {
            "info" => LogLevel::Info,
            "warn" | "warning" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Log,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One rendered log line from a source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub text: String,
}

impl LogEvent {
    pub fn new(timestamp: DateTime<Utc>, level: LogLevel, text: impl Into<String>) -> Self {
        Self {
            timestamp,
            level,
            text: text.into(),
        }
    }

    /// An event produced by tailgrid itself rather than the remote source
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Utc::now(), LogLevel::System, text)
    }
}

/// Convert epoch milliseconds to an instant; out-of-range values clamp to the epoch
pub fn millis_to_instant(millis: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(millis).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

// Wire types

/// One server-to-client frame of the tail protocol
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TailEnvelope {
    pub outcome: String,
    pub script_name: Option<String>,
    pub event_timestamp: i64,
    #[serde(default)]
    pub event: Option<TailTrigger>,
    #[serde(default)]
    pub logs: Vec<TailLog>,
    #[serde(default)]
    pub exceptions: Vec<TailException>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TailTrigger {
    #[serde(default)]
    pub request: Option<TailRequest>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TailRequest {
    pub url: String,
    pub method: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TailLog {
    #[serde(default)]
    pub message: serde_json::Value,
    #[serde(default)]
    pub level: Option<String>,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TailException {
    pub name: String,
    pub message: String,
    pub timestamp: i64,
}

impl TailEnvelope {
    /// Parse a frame from its JSON text
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Parse a frame from raw bytes
    pub fn parse_slice(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }

    /// Expand the envelope into events: the request line first, then
    /// console logs, then exceptions.
    pub fn into_events(self) -> Vec<LogEvent> {
        let mut events = Vec::with_capacity(1 + self.logs.len() + self.exceptions.len());

        if let Some(request) = self.event.and_then(|e| e.request) {
            events.push(LogEvent::new(
                millis_to_instant(self.event_timestamp),
                LogLevel::Request,
                format!("{} {}  {}", request.method, request.url, self.outcome),
            ));
        }

        for log in self.logs {
            let level = log
                .level
                .as_deref()
                .map(LogLevel::from_console)
                .unwrap_or(LogLevel::Log);
            events.push(LogEvent::new(
                millis_to_instant(log.timestamp),
                level,
                render_message(&log.message),
            ));
        }

        for exception in self.exceptions {
            events.push(LogEvent::new(
                millis_to_instant(exception.timestamp),
                LogLevel::Exception,
                format!("{}: {}", exception.name, exception.message),
            ));
        }

        events
    }
}

/// Flatten a console message into a single line. Arrays are joined with
/// spaces; strings are taken as-is and everything else is rendered as JSON.
fn render_message(message: &serde_json::Value) -> String {
    match message {
        serde_json::Value::Array(parts) => parts
            .iter()
            .map(render_part)
            .collect::<Vec<_>>()
            .join(" "),
        other => render_part(other),
    }
}

fn render_part(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
