//! The control loop tying sessions, panes and the conversation together
//!
//! A [`Workspace`] is driven from one place. Everything slow (creating
//! tails, reading frames, streaming a reply) runs in background tasks and
//! reports back through bounded channels that [`Workspace::poll`] drains
//! without waiting.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::StreamExt;
use tailgrid_ai::{ChatMessage, Inference, StreamChunk};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    context::{self, ContextSource},
    conversation::Conversation,
    error::{Error, Result, StartError},
    event::LogEvent,
    provision::{self, TailProvisioner},
    registry::{GridConfig, PaneSnapshot, Registry},
    session::{LiveSession, SessionConfig},
};

/// Instructions sent ahead of every conversation
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a debugging assistant for serverless applications. \
You are given recent log lines from one or more workers, each prefixed with the worker name in \
brackets. Answer the user's question using the logs. Point at specific lines when you can, and \
say so when the logs do not contain enough information.";

/// Workspace configuration
#[derive(Debug, Clone)]
pub struct WorkspaceConfig {
    pub session: SessionConfig,
    pub grid: GridConfig,
    /// Character budget for the log transcript in a prompt
    pub char_budget: usize,
    pub system_prompt: String,
    /// Reply chunks buffered between the streaming task and `poll`
    pub response_buffer: usize,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            grid: GridConfig::default(),
            char_budget: 12_000,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            response_buffer: 64,
        }
    }
}

/// Changes applied during a [`Workspace::poll`], for the presentation layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkspaceEvent {
    /// A live session is up and its pane is connected
    SourceConnected { source: String },
    /// Starting a session failed; the pane is in error
    SourceFailed { source: String, message: String },
    /// A session ended on its own; the pane is stopped
    SourceStopped { source: String },
    /// New lines were routed to a pane
    Lines { source: String, events: Vec<LogEvent> },
    /// A fragment of the assistant reply
    ResponseChunk { text: String },
    /// The reply completed
    ResponseDone,
    /// The reply failed; recorded in the conversation
    ResponseFailed { message: String },
}

struct PendingStart {
    result: oneshot::Receiver<std::result::Result<LiveSession, StartError>>,
}

struct ResponseTask {
    cancel: CancellationToken,
    chunks: mpsc::Receiver<StreamChunk>,
    _task: JoinHandle<()>,
}

/// Owns every live session, the pane registry and the conversation
pub struct Workspace {
    config: WorkspaceConfig,
    registry: Arc<Registry>,
    provisioner: Arc<dyn TailProvisioner>,
    inference: Arc<dyn Inference>,
    pending: BTreeMap<String, PendingStart>,
    sessions: BTreeMap<String, LiveSession>,
    conversation: Conversation,
    response: Option<ResponseTask>,
}

impl Workspace {
    pub fn new(
        config: WorkspaceConfig,
        provisioner: Arc<dyn TailProvisioner>,
        inference: Arc<dyn Inference>,
    ) -> Self {
        let registry = Arc::new(Registry::new(config.grid.clone()));
        Self {
            config,
            registry,
            provisioner,
            inference,
            pending: BTreeMap::new(),
            sessions: BTreeMap::new(),
            conversation: Conversation::new(),
            response: None,
        }
    }

    pub fn config(&self) -> &WorkspaceConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn snapshot(&self) -> Vec<PaneSnapshot> {
        self.registry.snapshot()
    }

    pub fn context_sources(&self) -> Vec<ContextSource> {
        self.registry.context_sources()
    }

    /// Whether a session for `source` is starting or running
    pub fn is_running(&self, source: &str) -> bool {
        self.pending.contains_key(source) || self.sessions.contains_key(source)
    }

    /// Full session-side history for a source. Unlike the conduit this
    /// never misses a batch, up to the session's capacity.
    pub fn session_history(&self, source: &str) -> Option<Vec<LogEvent>> {
        self.sessions.get(source).map(LiveSession::history)
    }

    // --- Sources ---

    /// Start tailing `source`, adding its pane if needed.
    ///
    /// Returns immediately; the outcome shows up in a later [`poll`](Self::poll).
    /// A pane left stopped or in error is replaced by a fresh one.
    pub fn start_source(&mut self, source: &str) -> Result<()> {
        if self.is_running(source) {
            return Err(Error::DuplicateSource(source.to_string()));
        }
        if let Some(pane) = self.registry.pane(source) {
            if pane.synthetic {
                return Err(Error::Other(format!(
                    "{} receives lines out-of-band and cannot be tailed",
                    source
                )));
            }
            if pane.status.is_terminal() {
                self.registry.remove_pane(source);
            }
        }
        self.registry.add_pane(source, None, false);

        let (tx, rx) = oneshot::channel();
        let provisioner = Arc::clone(&self.provisioner);
        let config = self.config.session.clone();
        let name = source.to_string();
        tokio::spawn(async move {
            let result = LiveSession::start(provisioner.as_ref(), &name, &config).await;
            // Nobody is waiting any more: tear the fresh session down again.
            if let Err(Ok(session)) = tx.send(result) {
                session.stop();
                provision::delete_tail_best_effort(
                    provisioner,
                    name,
                    session.session_id().to_string(),
                    config.teardown_timeout,
                )
                .await;
            }
        });

        self.pending.insert(source.to_string(), PendingStart { result: rx });
        tracing::info!("Starting tail for {}", source);
        Ok(())
    }

    /// Stop the session for `source`. Returns whether anything was running.
    pub fn stop_source(&mut self, source: &str) -> bool {
        let mut stopped = self.pending.remove(source).is_some();
        if let Some(session) = self.sessions.remove(source) {
            self.teardown(session);
            stopped = true;
        }
        if stopped {
            self.registry.set_stopped(source);
        }
        stopped
    }

    /// Add a pane. Live sources start tailing right away; synthetic ones
    /// wait for [`ingest`](Self::ingest). Returns `false` if the pane existed.
    pub fn add_source(&mut self, source: &str, url: Option<&str>, synthetic: bool) -> Result<bool> {
        if !self.registry.add_pane(source, url, synthetic) {
            return Ok(false);
        }
        if !synthetic {
            self.start_source(source)?;
        }
        Ok(true)
    }

    /// Stop and forget a source. Returns whether its pane existed.
    pub fn remove_source(&mut self, source: &str) -> bool {
        self.stop_source(source);
        self.registry.remove_pane(source)
    }

    /// Route out-of-band lines to a pane
    pub fn ingest(&self, source: &str, events: &[LogEvent]) -> bool {
        self.registry.route_batch(source, events)
    }

    pub fn select_source(&self, source: &str) -> bool {
        self.registry.set_selected(source, true)
    }

    pub fn deselect_source(&self, source: &str) -> bool {
        self.registry.set_selected(source, false)
    }

    fn teardown(&self, session: LiveSession) {
        session.stop();
        tokio::spawn(provision::delete_tail_best_effort(
            Arc::clone(&self.provisioner),
            session.source_name().to_string(),
            session.session_id().to_string(),
            self.config.session.teardown_timeout,
        ));
    }

    // --- Conversation ---

    /// Ask a question about the selected sources' logs. The reply streams
    /// in through [`poll`](Self::poll).
    pub fn send_message(&mut self, text: &str) -> Result<()> {
        if self.response.is_some() {
            return Err(Error::Other("a reply is still streaming".into()));
        }

        let sources = self.registry.selected_histories();
        let transcript = context::build_prompt(&sources, self.config.char_budget);

        let mut messages = vec![ChatMessage::system(self.config.system_prompt.clone())];
        messages.extend(self.conversation.history());
        messages.push(ChatMessage::user(user_turn(text, &transcript)));

        self.conversation.push_user(text);
        self.conversation.begin_stream();

        let cancel = CancellationToken::new();
        let mut stream = self.inference.stream_response(&messages, cancel.clone());
        let (tx, chunks) = mpsc::channel(self.config.response_buffer.max(1));
        let task = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                loop {
                    let chunk = tokio::select! {
                        _ = cancel.cancelled() => break,
                        chunk = stream.next() => chunk,
                    };
                    let Some(chunk) = chunk else { break };
                    if tx.send(chunk).await.is_err() {
                        break;
                    }
                }
            })
        };

        tracing::debug!(
            "Sent question with {} sources, {} transcript chars",
            sources.len(),
            transcript.len()
        );
        self.response = Some(ResponseTask {
            cancel,
            chunks,
            _task: task,
        });
        Ok(())
    }

    /// Cancel the in-flight reply, keeping whatever arrived so far.
    pub fn cancel_response(&mut self) -> bool {
        let Some(response) = self.response.take() else {
            return false;
        };
        response.cancel.cancel();
        self.conversation.finish_stream();
        true
    }

    /// Drop the conversation and any in-flight reply
    pub fn new_conversation(&mut self) {
        self.cancel_response();
        self.conversation.clear();
    }

    // --- Polling ---

    /// Apply everything the background tasks have reported so far.
    pub fn poll(&mut self) -> Vec<WorkspaceEvent> {
        let mut events = Vec::new();
        self.poll_starts(&mut events);
        self.poll_sessions(&mut events);
        self.poll_response(&mut events);
        events
    }

    fn poll_starts(&mut self, events: &mut Vec<WorkspaceEvent>) {
        let names: Vec<String> = self.pending.keys().cloned().collect();
        for name in names {
            let outcome = match self.pending.get_mut(&name) {
                Some(pending) => pending.result.try_recv(),
                None => continue,
            };
            let outcome = match outcome {
                Err(oneshot::error::TryRecvError::Empty) => continue,
                Err(oneshot::error::TryRecvError::Closed) => {
                    Err("start task ended unexpectedly".to_string())
                }
                Ok(Err(e)) => Err(e.to_string()),
                Ok(Ok(session)) => Ok(session),
            };
            self.pending.remove(&name);

            match outcome {
                Ok(session) => {
                    if self.registry.set_connected(&name) {
                        tracing::info!("Tail for {} connected", name);
                        self.sessions.insert(name.clone(), session);
                        events.push(WorkspaceEvent::SourceConnected { source: name });
                    } else {
                        self.teardown(session);
                    }
                }
                Err(message) => {
                    tracing::warn!("Tail for {} failed to start: {}", name, message);
                    self.registry.set_error(&name, message.clone());
                    events.push(WorkspaceEvent::SourceFailed {
                        source: name,
                        message,
                    });
                }
            }
        }
    }

    fn poll_sessions(&mut self, events: &mut Vec<WorkspaceEvent>) {
        let mut ended = Vec::new();
        for (name, session) in self.sessions.iter_mut() {
            loop {
                match session.try_next_batch() {
                    Ok(batch) => {
                        self.registry.route_batch(name, &batch);
                        events.push(WorkspaceEvent::Lines {
                            source: name.clone(),
                            events: batch,
                        });
                    }
                    Err(mpsc::error::TryRecvError::Empty) => break,
                    Err(mpsc::error::TryRecvError::Disconnected) => {
                        ended.push(name.clone());
                        break;
                    }
                }
            }
        }

        for name in ended {
            if let Some(session) = self.sessions.remove(&name) {
                self.registry.set_stopped(&name);
                self.teardown(session);
                events.push(WorkspaceEvent::SourceStopped { source: name });
            }
        }
    }

    fn poll_response(&mut self, events: &mut Vec<WorkspaceEvent>) {
        let Some(response) = self.response.as_mut() else {
            return;
        };
        let finished = loop {
            match response.chunks.try_recv() {
                Ok(StreamChunk::Text { text }) => {
                    self.conversation.append_chunk(&text);
                    events.push(WorkspaceEvent::ResponseChunk { text });
                }
                Ok(StreamChunk::Error { message }) => {
                    self.conversation.fail_stream(format!("Error: {}", message));
                    events.push(WorkspaceEvent::ResponseFailed { message });
                    break true;
                }
                Err(mpsc::error::TryRecvError::Empty) => break false,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    self.conversation.finish_stream();
                    events.push(WorkspaceEvent::ResponseDone);
                    break true;
                }
            }
        };
        if finished {
            self.response = None;
        }
    }

    /// Stop everything, wait for connections to close and (bounded) for the
    /// remote tails to be deleted.
    pub async fn shutdown(&mut self) {
        self.cancel_response();
        self.pending.clear();

        let sessions = std::mem::take(&mut self.sessions);
        let teardowns = sessions.into_values().map(|mut session| {
            self.registry.set_stopped(session.source_name());
            let provisioner = Arc::clone(&self.provisioner);
            let timeout = self.config.session.teardown_timeout;
            async move {
                session.shutdown().await;
                provision::delete_tail_best_effort(
                    provisioner,
                    session.source_name().to_string(),
                    session.session_id().to_string(),
                    timeout,
                )
                .await;
            }
        });
        futures::future::join_all(teardowns).await;
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if let Some(response) = self.response.take() {
            response.cancel.cancel();
        }
    }
}

/// The user turn sent to the model: the question, then the log transcript
fn user_turn(question: &str, transcript: &str) -> String {
    if transcript.is_empty() {
        question.to_string()
    } else {
        format!("{}\n\nLogs:\n{}", question, transcript)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        event::{LogLevel, millis_to_instant},
        provision::TailInfo,
        registry::PaneStatus,
        session::{CONFIG_FRAME, CONNECTION_CLOSED, TAIL_PROTOCOL},
    };
    use async_trait::async_trait;
    use futures::{SinkExt, stream};
    use parking_lot::Mutex;
    use std::time::Duration;
    use tailgrid_ai::ChunkStream;
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::{
        handshake::server::{ErrorResponse, Request, Response},
        http::{HeaderValue, header::SEC_WEBSOCKET_PROTOCOL},
        protocol::Message,
    };

    struct FakeTails {
        url: Option<String>,
        deleted: Mutex<Vec<String>>,
    }

    impl FakeTails {
        fn failing() -> Arc<Self> {
            Arc::new(Self {
                url: None,
                deleted: Mutex::new(Vec::new()),
            })
        }

        fn at(url: String) -> Arc<Self> {
            Arc::new(Self {
                url: Some(url),
                deleted: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl TailProvisioner for FakeTails {
        async fn create_tail(&self, source: &str) -> Result<TailInfo> {
            match &self.url {
                Some(url) => Ok(TailInfo {
                    id: format!("{}-tail", source),
                    url: url.clone(),
                    expires_at: String::new(),
                }),
                None => Err(Error::Provision("unknown script".into())),
            }
        }

        async fn delete_tail(&self, _source: &str, tail_id: &str) -> Result<()> {
            self.deleted.lock().push(tail_id.to_string());
            Ok(())
        }
    }

    struct ScriptedInference {
        chunks: Vec<StreamChunk>,
        hang: bool,
        seen: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedInference {
        fn new(chunks: Vec<StreamChunk>, hang: bool) -> Arc<Self> {
            Arc::new(Self {
                chunks,
                hang,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    impl Inference for ScriptedInference {
        fn stream_response(&self, messages: &[ChatMessage], _cancel: CancellationToken) -> ChunkStream {
            self.seen.lock().push(messages.to_vec());
            let items = stream::iter(self.chunks.clone());
            if self.hang {
                Box::pin(items.chain(stream::pending()))
            } else {
                Box::pin(items)
            }
        }
    }

    fn workspace(tails: Arc<FakeTails>, inference: Arc<ScriptedInference>) -> Workspace {
        Workspace::new(WorkspaceConfig::default(), tails, inference)
    }

    async fn poll_until(
        ws: &mut Workspace,
        done: impl Fn(&[WorkspaceEvent]) -> bool,
    ) -> Vec<WorkspaceEvent> {
        let mut all = Vec::new();
        for _ in 0..300 {
            all.extend(ws.poll());
            if done(&all) {
                return all;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached, events so far: {:?}", all);
    }

    fn event(ts: i64, text: &str) -> LogEvent {
        LogEvent::new(millis_to_instant(ts), LogLevel::Log, text)
    }

    #[tokio::test]
    async fn test_start_failure_marks_pane_error() {
        let mut ws = workspace(FakeTails::failing(), ScriptedInference::new(vec![], false));
        ws.start_source("api").unwrap();
        assert_eq!(ws.registry().pane("api").unwrap().status, PaneStatus::Connecting);

        let events = poll_until(&mut ws, |e| {
            e.iter().any(|e| matches!(e, WorkspaceEvent::SourceFailed { .. }))
        })
        .await;

        let WorkspaceEvent::SourceFailed { source, message } = &events[0] else {
            panic!("unexpected {:?}", events);
        };
        assert_eq!(source, "api");
        assert!(message.contains("unknown script"));

        let pane = ws.registry().pane("api").unwrap();
        assert_eq!(pane.status, PaneStatus::Error);
        assert!(!ws.is_running("api"));
    }

    #[tokio::test]
    async fn test_duplicate_start_rejected() {
        let mut ws = workspace(FakeTails::failing(), ScriptedInference::new(vec![], false));
        ws.start_source("api").unwrap();
        assert!(matches!(
            ws.start_source("api"),
            Err(Error::DuplicateSource(_))
        ));
    }

    #[tokio::test]
    async fn test_stop_before_start_completes() {
        let mut ws = workspace(FakeTails::failing(), ScriptedInference::new(vec![], false));
        ws.start_source("api").unwrap();
        assert!(ws.stop_source("api"));
        assert!(!ws.stop_source("api"));
        assert_eq!(ws.registry().pane("api").unwrap().status, PaneStatus::Stopped);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(ws.poll().is_empty());
    }

    #[tokio::test]
    async fn test_synthetic_source_ingest() {
        let mut ws = workspace(FakeTails::failing(), ScriptedInference::new(vec![], false));
        assert!(ws.add_source("dev", Some("http://localhost:8787"), true).unwrap());
        assert!(!ws.add_source("dev", None, true).unwrap());
        assert!(!ws.is_running("dev"));

        assert!(ws.ingest("dev", &[event(1, "hello")]));
        assert!(!ws.ingest("missing", &[event(1, "lost")]));
        assert_eq!(ws.registry().pane("dev").unwrap().line_count, 1);
        assert!(ws.start_source("dev").is_err());

        assert!(ws.remove_source("dev"));
        assert!(ws.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_reply_streams_into_conversation() {
        let inference = ScriptedInference::new(
            vec![StreamChunk::text("Hel"), StreamChunk::text("lo")],
            false,
        );
        let mut ws = workspace(FakeTails::failing(), inference.clone());
        ws.add_source("dev", None, true).unwrap();
        ws.ingest("dev", &[event(1, "Error: boom")]);
        ws.select_source("dev");

        ws.send_message("what broke?").unwrap();
        assert!(ws.send_message("again").is_err());

        let events = poll_until(&mut ws, |e| e.contains(&WorkspaceEvent::ResponseDone)).await;
        assert_eq!(
            events,
            vec![
                WorkspaceEvent::ResponseChunk { text: "Hel".into() },
                WorkspaceEvent::ResponseChunk { text: "lo".into() },
                WorkspaceEvent::ResponseDone,
            ]
        );

        let entries = ws.conversation().entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message, ChatMessage::user("what broke?"));
        assert_eq!(entries[1].message, ChatMessage::assistant("Hello"));

        let seen = inference.seen.lock();
        let sent = &seen[0];
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].role, tailgrid_ai::Role::System);
        assert_eq!(sent[1].content, "what broke?\n\nLogs:\n[dev] Error: boom");
    }

    #[tokio::test]
    async fn test_follow_up_carries_history_without_logs_when_unselected() {
        let inference = ScriptedInference::new(vec![StreamChunk::text("ok")], false);
        let mut ws = workspace(FakeTails::failing(), inference.clone());

        ws.send_message("first").unwrap();
        poll_until(&mut ws, |e| e.contains(&WorkspaceEvent::ResponseDone)).await;
        ws.send_message("second").unwrap();
        poll_until(&mut ws, |e| e.contains(&WorkspaceEvent::ResponseDone)).await;

        let seen = inference.seen.lock();
        let contents: Vec<_> = seen[1].iter().map(|m| m.content.as_str()).collect();
        assert_eq!(&contents[1..], &["first", "ok", "second"]);
    }

    #[tokio::test]
    async fn test_reply_failure_recorded() {
        let inference = ScriptedInference::new(
            vec![StreamChunk::text("par"), StreamChunk::error("HTTP 500")],
            false,
        );
        let mut ws = workspace(FakeTails::failing(), inference);
        ws.send_message("q").unwrap();

        let events = poll_until(&mut ws, |e| {
            e.iter().any(|e| matches!(e, WorkspaceEvent::ResponseFailed { .. }))
        })
        .await;
        assert_eq!(events.len(), 2);

        let entries = ws.conversation().entries();
        assert_eq!(entries.len(), 3);
        assert!(entries[2].is_error);
        assert_eq!(entries[2].message.content, "Error: HTTP 500");
        assert!(!ws.conversation().is_streaming());

        // Conversation stays usable.
        assert!(ws.send_message("retry").is_ok());
    }

    #[tokio::test]
    async fn test_cancel_reply_stops_chunks() {
        let inference = ScriptedInference::new(vec![StreamChunk::text("first")], true);
        let mut ws = workspace(FakeTails::failing(), inference);
        ws.send_message("q").unwrap();

        poll_until(&mut ws, |e| !e.is_empty()).await;
        assert!(ws.cancel_response());
        assert!(!ws.cancel_response());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(ws.poll().is_empty());

        let entries = ws.conversation().entries();
        assert_eq!(entries.last().unwrap().message, ChatMessage::assistant("first"));
        assert!(!entries.iter().any(|e| e.is_error));
    }

    #[tokio::test]
    async fn test_new_conversation_clears() {
        let inference = ScriptedInference::new(vec![StreamChunk::text("x")], true);
        let mut ws = workspace(FakeTails::failing(), inference);
        ws.send_message("q").unwrap();
        ws.new_conversation();
        assert!(ws.conversation().is_empty());
        assert!(ws.send_message("fresh").is_ok());
    }

    fn log_frame(ts: i64, text: &str) -> String {
        serde_json::json!({
            "outcome": "ok",
            "scriptName": "a",
            "eventTimestamp": ts,
            "logs": [{"message": [text], "level": "log", "timestamp": ts}],
            "exceptions": []
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_disconnect_stops_pane_with_one_system_line() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let callback =
                |_req: &Request, mut resp: Response| -> std::result::Result<Response, ErrorResponse> {
                    resp.headers_mut()
                        .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(TAIL_PROTOCOL));
                    Ok(resp)
                };
            let mut ws = tokio_tungstenite::accept_hdr_async(tcp, callback)
                .await
                .unwrap();
            let config = ws.next().await.unwrap().unwrap();
            assert_eq!(config.to_text().unwrap(), CONFIG_FRAME);
            for (i, text) in ["one", "two", "three"].iter().enumerate() {
                ws.send(Message::Text(log_frame(i as i64, text).into()))
                    .await
                    .unwrap();
            }
            ws.close(None).await.unwrap();
        });

        let tails = FakeTails::at(format!("ws://{}/", addr));
        let mut ws = workspace(tails.clone(), ScriptedInference::new(vec![], false));
        ws.start_source("A").unwrap();

        let events = poll_until(&mut ws, |e| {
            e.iter().any(|e| matches!(e, WorkspaceEvent::SourceStopped { .. }))
        })
        .await;
        server.await.unwrap();

        assert_eq!(
            events.first(),
            Some(&WorkspaceEvent::SourceConnected { source: "A".into() })
        );
        let pane = ws.registry().pane("A").unwrap();
        assert_eq!(pane.status, PaneStatus::Stopped);
        let texts: Vec<_> = pane.lines.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["one", "two", "three", CONNECTION_CLOSED]);
        assert_eq!(
            pane.lines
                .iter()
                .filter(|e| e.level == LogLevel::System)
                .count(),
            1
        );
        assert!(!ws.is_running("A"));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*tails.deleted.lock(), vec!["A-tail".to_string()]);
    }

    #[tokio::test]
    async fn test_session_history_keeps_batches_the_conduit_dropped() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (go_tx, go_rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let callback =
                |_req: &Request, mut resp: Response| -> std::result::Result<Response, ErrorResponse> {
                    resp.headers_mut()
                        .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(TAIL_PROTOCOL));
                    Ok(resp)
                };
            let mut ws = tokio_tungstenite::accept_hdr_async(tcp, callback)
                .await
                .unwrap();
            ws.next().await.unwrap().unwrap();
            go_rx.await.unwrap();
            for (i, text) in ["one", "two", "three", "four", "five"].iter().enumerate() {
                ws.send(Message::Text(log_frame(i as i64, text).into()))
                    .await
                    .unwrap();
            }
            while let Some(Ok(_)) = ws.next().await {}
        });

        let config = WorkspaceConfig {
            session: SessionConfig {
                conduit_capacity: 1,
                ..Default::default()
            },
            ..Default::default()
        };
        let tails = FakeTails::at(format!("ws://{}/", addr));
        let mut ws = Workspace::new(config, tails, ScriptedInference::new(vec![], false));
        ws.start_source("A").unwrap();
        poll_until(&mut ws, |e| {
            e.iter().any(|e| matches!(e, WorkspaceEvent::SourceConnected { .. }))
        })
        .await;
        go_tx.send(()).unwrap();

        // No polling while the frames arrive, so the conduit fills after one batch
        for _ in 0..300 {
            if ws.session_history("A").map(|h| h.len()) == Some(5) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        ws.poll();

        let pane = ws.registry().pane("A").unwrap();
        let pane_texts: Vec<_> = pane.lines.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(pane_texts, vec!["one"]);

        let history = ws.session_history("A").unwrap();
        let texts: Vec<_> = history.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["one", "two", "three", "four", "five"]);
        assert!(ws.session_history("B").is_none());

        ws.shutdown().await;
        server.await.unwrap();
    }
}
