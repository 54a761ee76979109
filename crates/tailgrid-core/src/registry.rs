//! Pane registry: the addressable set of sources shown side by side

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::{
    context::{ContextLine, ContextSource, SourceHistory},
    event::LogEvent,
    history::BoundedHistory,
};

/// Registry configuration
#[derive(Debug, Clone)]
pub struct GridConfig {
    /// Number of events each pane keeps
    pub pane_capacity: usize,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self { pane_capacity: 200 }
    }
}

/// Lifecycle of a pane.
///
/// `Connecting -> Connected | Error`, `Connected -> Stopped | Error`.
/// A start stopped before it connects goes `Connecting -> Stopped`.
/// `Stopped` and `Error` are terminal until the pane is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaneStatus {
    Connecting,
    Connected,
    Stopped,
    Error,
}

impl PaneStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PaneStatus::Stopped | PaneStatus::Error)
    }
}

#[derive(Debug)]
struct Pane {
    source_name: String,
    source_url: Option<String>,
    synthetic: bool,
    status: PaneStatus,
    active: bool,
    selected: bool,
    history: BoundedHistory<LogEvent>,
    error_message: Option<String>,
}

impl Pane {
    fn snapshot(&self) -> PaneSnapshot {
        PaneSnapshot {
            source_name: self.source_name.clone(),
            source_url: self.source_url.clone(),
            synthetic: self.synthetic,
            status: self.status,
            active: self.active,
            selected: self.selected,
            line_count: self.history.len(),
            lines: self.history.to_vec(),
            error_message: self.error_message.clone(),
        }
    }

    fn context_lines(&self) -> Vec<ContextLine> {
        self.history
            .iter()
            .map(|event| ContextLine::from_event(&self.source_name, event))
            .collect()
    }
}

/// Point-in-time copy of one pane
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaneSnapshot {
    pub source_name: String,
    pub source_url: Option<String>,
    pub synthetic: bool,
    pub status: PaneStatus,
    /// Has received lines while connected
    pub active: bool,
    /// Included in inference context
    pub selected: bool,
    pub line_count: usize,
    pub lines: Vec<LogEvent>,
    pub error_message: Option<String>,
}

/// The set of panes, keyed by source name.
///
/// All mutation goes through one lock; readers get copies, never references
/// into the live buffers.
#[derive(Debug)]
pub struct Registry {
    panes: RwLock<Vec<Pane>>,
    config: GridConfig,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(GridConfig::default())
    }
}

impl Registry {
    pub fn new(config: GridConfig) -> Self {
        Self {
            panes: RwLock::new(Vec::new()),
            config,
        }
    }

    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    /// Add a pane. Returns `false` (and changes nothing) if the name exists.
    ///
    /// Synthetic panes get their lines out-of-band and start `Connected`.
    pub fn add_pane(&self, source_name: &str, source_url: Option<&str>, synthetic: bool) -> bool {
        let mut panes = self.panes.write();
        if panes.iter().any(|p| p.source_name == source_name) {
            return false;
        }
        panes.push(Pane {
            source_name: source_name.to_string(),
            source_url: source_url.map(str::to_string),
            synthetic,
            status: if synthetic {
                PaneStatus::Connected
            } else {
                PaneStatus::Connecting
            },
            active: false,
            selected: false,
            history: BoundedHistory::new(self.config.pane_capacity),
            error_message: None,
        });
        true
    }

    /// Remove a pane. Returns whether it existed.
    pub fn remove_pane(&self, source_name: &str) -> bool {
        let mut panes = self.panes.write();
        let before = panes.len();
        panes.retain(|p| p.source_name != source_name);
        panes.len() != before
    }

    /// Append a batch to a pane's history. A batch for a missing pane is
    /// discarded; returns whether it was routed.
    pub fn route_batch(&self, source_name: &str, events: &[LogEvent]) -> bool {
        let mut panes = self.panes.write();
        let Some(pane) = panes.iter_mut().find(|p| p.source_name == source_name) else {
            tracing::debug!(
                "Discarding {} events for removed pane {}",
                events.len(),
                source_name
            );
            return false;
        };
        pane.history.extend(events.iter().cloned());
        if pane.status == PaneStatus::Connected && !events.is_empty() {
            pane.active = true;
        }
        true
    }

    fn transition(&self, source_name: &str, apply: impl FnOnce(&mut Pane) -> bool) -> bool {
        let mut panes = self.panes.write();
        match panes.iter_mut().find(|p| p.source_name == source_name) {
            Some(pane) => apply(pane),
            None => false,
        }
    }

    /// `Connecting -> Connected`. Returns whether the status changed.
    pub fn set_connected(&self, source_name: &str) -> bool {
        self.transition(source_name, |pane| {
            if pane.status != PaneStatus::Connecting {
                return false;
            }
            pane.status = PaneStatus::Connected;
            true
        })
    }

    /// Move a live pane to `Error`. Terminal until the pane is re-added.
    pub fn set_error(&self, source_name: &str, message: impl Into<String>) -> bool {
        let message = message.into();
        self.transition(source_name, |pane| {
            if pane.status.is_terminal() {
                return false;
            }
            pane.status = PaneStatus::Error;
            pane.active = false;
            pane.error_message = Some(message);
            true
        })
    }

    /// Move a live pane to `Stopped`.
    pub fn set_stopped(&self, source_name: &str) -> bool {
        self.transition(source_name, |pane| {
            if pane.status.is_terminal() {
                return false;
            }
            pane.status = PaneStatus::Stopped;
            pane.active = false;
            true
        })
    }

    /// Include or exclude a pane from inference context
    pub fn set_selected(&self, source_name: &str, selected: bool) -> bool {
        self.transition(source_name, |pane| {
            pane.selected = selected;
            true
        })
    }

    pub fn contains(&self, source_name: &str) -> bool {
        self.panes.read().iter().any(|p| p.source_name == source_name)
    }

    pub fn len(&self) -> usize {
        self.panes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.panes.read().is_empty()
    }

    /// Number of panes currently receiving lines
    pub fn active_count(&self) -> usize {
        self.panes
            .read()
            .iter()
            .filter(|p| p.active && p.status == PaneStatus::Connected)
            .count()
    }

    /// Copy of every pane, in insertion order
    pub fn snapshot(&self) -> Vec<PaneSnapshot> {
        self.panes.read().iter().map(Pane::snapshot).collect()
    }

    /// Copy of one pane
    pub fn pane(&self, source_name: &str) -> Option<PaneSnapshot> {
        self.panes
            .read()
            .iter()
            .find(|p| p.source_name == source_name)
            .map(Pane::snapshot)
    }

    /// Every pane as a toggleable context source
    pub fn context_sources(&self) -> Vec<ContextSource> {
        self.panes
            .read()
            .iter()
            .map(|p| ContextSource {
                name: p.source_name.clone(),
                selected: p.selected,
                line_count: p.history.len(),
                char_estimate: p.history.iter().map(|e| e.text.len()).sum(),
            })
            .collect()
    }

    /// Histories of the selected panes, in insertion order
    pub fn selected_histories(&self) -> Vec<SourceHistory> {
        self.panes
            .read()
            .iter()
            .filter(|p| p.selected)
            .map(|p| SourceHistory {
                name: p.source_name.clone(),
                synthetic: p.synthetic,
                lines: p.context_lines(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{LogLevel, millis_to_instant};
    use std::sync::Arc;

    fn event(ts: i64, text: &str) -> LogEvent {
        LogEvent::new(millis_to_instant(ts), LogLevel::Log, text)
    }

    fn registry(capacity: usize) -> Registry {
        Registry::new(GridConfig {
            pane_capacity: capacity,
        })
    }

    #[test]
    fn test_add_duplicate_is_noop() {
        let reg = registry(10);
        assert!(reg.add_pane("a", None, false));
        reg.route_batch("a", &[event(1, "x")]);
        assert!(!reg.add_pane("a", Some("https://a.example.com"), true));

        let pane = reg.pane("a").unwrap();
        assert_eq!(reg.len(), 1);
        assert_eq!(pane.line_count, 1);
        assert!(!pane.synthetic);
        assert_eq!(pane.source_url, None);
    }

    #[test]
    fn test_initial_status() {
        let reg = registry(10);
        reg.add_pane("live", None, false);
        reg.add_pane("local", Some("http://localhost:8787"), true);
        assert_eq!(reg.pane("live").unwrap().status, PaneStatus::Connecting);
        assert_eq!(reg.pane("local").unwrap().status, PaneStatus::Connected);
    }

    #[test]
    fn test_route_to_removed_pane_is_noop() {
        let reg = registry(10);
        reg.add_pane("a", None, false);
        reg.add_pane("b", None, false);
        reg.route_batch("b", &[event(1, "keep")]);
        assert!(reg.remove_pane("a"));

        assert!(!reg.route_batch("a", &[event(2, "lost")]));
        assert!(!reg.remove_pane("a"));

        let snapshot = reg.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].source_name, "b");
        assert_eq!(snapshot[0].lines, vec![event(1, "keep")]);
    }

    #[test]
    fn test_pane_history_bounded() {
        let reg = registry(3);
        reg.add_pane("a", None, false);
        for i in 0..5 {
            reg.route_batch("a", &[event(i, &format!("l{}", i))]);
        }
        let pane = reg.pane("a").unwrap();
        assert_eq!(pane.line_count, 3);
        let texts: Vec<_> = pane.lines.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["l2", "l3", "l4"]);
    }

    #[test]
    fn test_status_transitions() {
        let reg = registry(10);
        reg.add_pane("a", None, false);
        assert!(reg.set_connected("a"));
        assert!(!reg.set_connected("a"));
        assert!(reg.set_stopped("a"));
        assert!(!reg.set_error("a", "late failure"));
        assert!(!reg.set_connected("a"));
        assert_eq!(reg.pane("a").unwrap().status, PaneStatus::Stopped);
    }

    #[test]
    fn test_stop_while_connecting() {
        let reg = registry(10);
        reg.add_pane("a", None, false);
        assert!(reg.set_stopped("a"));
        assert!(!reg.set_connected("a"));
        assert!(!reg.set_error("a", "late failure"));

        let pane = reg.pane("a").unwrap();
        assert_eq!(pane.status, PaneStatus::Stopped);
        assert!(!pane.active);
        assert!(pane.error_message.is_none());
    }

    #[test]
    fn test_error_is_terminal_until_readded() {
        let reg = registry(10);
        reg.add_pane("a", None, false);
        assert!(reg.set_error("a", "refused"));
        assert!(!reg.set_connected("a"));

        let pane = reg.pane("a").unwrap();
        assert_eq!(pane.status, PaneStatus::Error);
        assert_eq!(pane.error_message.as_deref(), Some("refused"));

        reg.remove_pane("a");
        reg.add_pane("a", None, false);
        assert_eq!(reg.pane("a").unwrap().status, PaneStatus::Connecting);
        assert!(reg.set_connected("a"));
    }

    #[test]
    fn test_active_count() {
        let reg = registry(10);
        reg.add_pane("a", None, false);
        reg.add_pane("b", None, false);
        reg.set_connected("a");
        reg.set_connected("b");
        assert_eq!(reg.active_count(), 0);

        reg.route_batch("a", &[event(1, "x")]);
        assert_eq!(reg.active_count(), 1);

        reg.set_stopped("a");
        assert_eq!(reg.active_count(), 0);
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let reg = registry(10);
        reg.add_pane("a", None, false);
        reg.route_batch("a", &[event(1, "first")]);
        let before = reg.snapshot();
        reg.route_batch("a", &[event(2, "second")]);
        assert_eq!(before[0].line_count, 1);
        assert_eq!(before[0].lines.len(), 1);
        assert_eq!(reg.pane("a").unwrap().line_count, 2);
    }

    #[test]
    fn test_selection_drives_context() {
        let reg = registry(10);
        reg.add_pane("a", None, false);
        reg.add_pane("b", None, true);
        reg.route_batch("a", &[event(1, "hello")]);
        reg.route_batch("b", &[event(2, "world!")]);
        reg.set_selected("b", true);

        let sources = reg.context_sources();
        assert_eq!(sources.len(), 2);
        assert!(!sources[0].selected);
        assert_eq!(sources[1].char_estimate, 6);

        let histories = reg.selected_histories();
        assert_eq!(histories.len(), 1);
        assert_eq!(histories[0].name, "b");
        assert!(histories[0].synthetic);
        assert_eq!(histories[0].lines[0].source_name, "b");
        assert!(!reg.set_selected("missing", true));
    }

    #[test]
    fn test_context_lines_keep_text_regardless_of_level() {
        let reg = registry(10);
        reg.add_pane("A", None, true);
        reg.route_batch(
            "A",
            &[
                LogEvent::new(millis_to_instant(1), LogLevel::Error, "db down"),
                LogEvent::new(millis_to_instant(2), LogLevel::Warn, "slow"),
            ],
        );
        reg.set_selected("A", true);

        let histories = reg.selected_histories();
        let lines = &histories[0].lines;
        assert_eq!(lines[0].text, "db down");
        assert!(!crate::context::is_error_indicative(&lines[0].text));
        assert_eq!(
            crate::context::build_prompt(&histories, 1_000),
            "[A] db down\n[A] slow"
        );
    }

    #[test]
    fn test_concurrent_route_and_remove() {
        let reg = Arc::new(registry(50));
        reg.add_pane("stay", None, false);

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let reg = Arc::clone(&reg);
                std::thread::spawn(move || {
                    for i in 0..200 {
                        let name = format!("churn{}", t);
                        reg.add_pane(&name, None, false);
                        reg.route_batch(&name, &[event(i, "x")]);
                        reg.route_batch("stay", &[event(i, "y")]);
                        reg.remove_pane(&name);
                        reg.route_batch(&name, &[event(i, "late")]);
                        let _ = reg.snapshot();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(reg.len(), 1);
        assert_eq!(reg.pane("stay").unwrap().line_count, 50);
    }
}
