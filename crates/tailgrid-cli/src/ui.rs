//! Plain-text rendering of workspace state

use chrono::{Local, TimeZone};
use tailgrid_core::{ContextSource, LogEvent, PaneSnapshot, PaneStatus, WorkspaceEvent};

/// A piece of output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    /// A complete line
    Line(String),
    /// Text written without a trailing newline
    Fragment(String),
}

/// `[source] HH:MM:SS level text`, in local time
pub fn format_line(source: &str, event: &LogEvent) -> String {
    format_line_in(source, event, &Local)
}

fn format_line_in<Tz: TimeZone>(source: &str, event: &LogEvent, tz: &Tz) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!(
        "[{}] {} {:<9} {}",
        source,
        event.timestamp.with_timezone(tz).format("%H:%M:%S"),
        event.level.as_str(),
        event.text
    )
}

/// How a workspace event is shown
pub fn render_event(event: &WorkspaceEvent) -> Vec<Output> {
    match event {
        WorkspaceEvent::SourceConnected { source } => {
            vec![Output::Line(format!("* {} connected", source))]
        }
        WorkspaceEvent::SourceFailed { source, message } => {
            vec![Output::Line(format!("* {} failed: {}", source, message))]
        }
        WorkspaceEvent::SourceStopped { source } => {
            vec![Output::Line(format!("* {} stopped", source))]
        }
        WorkspaceEvent::Lines { source, events } => events
            .iter()
            .map(|e| Output::Line(format_line(source, e)))
            .collect(),
        WorkspaceEvent::ResponseChunk { text } => vec![Output::Fragment(text.clone())],
        WorkspaceEvent::ResponseDone => vec![Output::Line(String::new())],
        WorkspaceEvent::ResponseFailed { message } => {
            vec![Output::Line(String::new()), Output::Line(format!("Error: {}", message))]
        }
    }
}

fn status_label(status: PaneStatus) -> &'static str {
    match status {
        PaneStatus::Connecting => "connecting",
        PaneStatus::Connected => "connected",
        PaneStatus::Stopped => "stopped",
        PaneStatus::Error => "error",
    }
}

/// One row per pane
pub fn format_panes(panes: &[PaneSnapshot]) -> String {
    if panes.is_empty() {
        return "No panes. Use :tail <worker> or :add <name>.".to_string();
    }

    let width = panes
        .iter()
        .map(|p| p.source_name.len())
        .max()
        .unwrap_or(0);

    let mut output = String::new();
    for pane in panes {
        let mut row = format!(
            "{} {:<width$}  {:<10} {:>5} lines",
            if pane.selected { "+" } else { " " },
            pane.source_name,
            status_label(pane.status),
            pane.line_count,
            width = width
        );
        if pane.synthetic {
            row.push_str("  (fed)");
        }
        if let Some(url) = &pane.source_url {
            row.push_str(&format!("  {}", url));
        }
        if let Some(error) = &pane.error_message {
            row.push_str(&format!("  {}", error));
        }
        output.push_str(&row);
        output.push('\n');
    }
    output.pop();
    output
}

/// Context sources with their rough size
pub fn format_context_sources(sources: &[ContextSource], char_budget: usize) -> String {
    let selected: Vec<&ContextSource> = sources.iter().filter(|s| s.selected).collect();
    if selected.is_empty() {
        return "No panes selected; questions are sent without logs.".to_string();
    }

    let total: usize = selected.iter().map(|s| s.char_estimate).sum();
    let mut output = String::new();
    for source in &selected {
        output.push_str(&format!(
            "  {} ({} lines, ~{} chars)\n",
            source.name, source.line_count, source.char_estimate
        ));
    }
    output.push_str(&format!("~{} of {} chars", total, char_budget));
    if total > char_budget {
        output.push_str(" (older lines will be trimmed)");
    }
    output
}
