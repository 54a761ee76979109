//! Live tail sessions
//!
//! A [`LiveSession`] owns one WebSocket connection to one remote log source.
//! A background task reads and decodes frames, appends them to a bounded
//! history and offers each batch to a bounded conduit without ever waiting
//! on the consumer. A batch that does not fit in the conduit is dropped from
//! the conduit only; [`LiveSession::history`] still has it.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, Stream, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{
    self,
    client::IntoClientRequest,
    http::{HeaderValue, header::SEC_WEBSOCKET_PROTOCOL},
    protocol::Message,
};
use tokio_util::sync::CancellationToken;

use crate::{
    error::{Error, StartError, StartStep},
    event::{LogEvent, TailEnvelope},
    history::BoundedHistory,
    provision::TailProvisioner,
};

/// Sub-protocol negotiated with the tail endpoint
pub const TAIL_PROTOCOL: &str = "trace-v1";

/// First frame sent after connecting
pub const CONFIG_FRAME: &str = r#"{"debug":false}"#;

/// Text of the event appended when the connection drops on its own
pub const CONNECTION_CLOSED: &str = "connection closed";

/// A batch of events decoded from one frame
pub type Batch = Vec<LogEvent>;

/// Session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Number of events kept in the session history
    pub history_capacity: usize,
    /// Number of undelivered batches the conduit holds before dropping
    pub conduit_capacity: usize,
    /// Deadline for creating the remote tail
    pub provision_timeout: Duration,
    /// Deadline for the WebSocket handshake
    pub connect_timeout: Duration,
    /// Deadline for deleting the remote tail on teardown
    pub teardown_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            history_capacity: 500,
            conduit_capacity: 64,
            provision_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
            teardown_timeout: Duration::from_secs(5),
        }
    }
}

/// Connection state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Connecting,
    Connected,
    Stopped,
}

/// State shared between the session handle and its read task
struct SessionShared {
    history: Mutex<BoundedHistory<LogEvent>>,
    status: Mutex<SessionStatus>,
}

impl SessionShared {
    fn new(capacity: usize) -> Self {
        Self {
            history: Mutex::new(BoundedHistory::new(capacity)),
            status: Mutex::new(SessionStatus::Connecting),
        }
    }

    fn set_status(&self, status: SessionStatus) {
        *self.status.lock() = status;
    }

    /// Append to history, then offer to the conduit without waiting
    fn deliver(&self, batch: Batch, tx: &mpsc::Sender<Batch>) {
        if batch.is_empty() {
            return;
        }
        self.history.lock().extend(batch.iter().cloned());

        match tx.try_send(batch) {
            Ok(()) => {}
            Err(TrySendError::Full(batch)) => {
                tracing::debug!("Conduit full, dropped batch of {} events", batch.len());
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!("Conduit closed, batch kept in history only");
            }
        }
    }
}

/// Why the read loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopExit {
    Cancelled,
    Disconnected,
}

/// Decode one WebSocket message into events. `None` means the frame was
/// not a tail event and should be skipped.
fn decode_message(message: &Message) -> Option<Batch> {
    let parsed = match message {
        Message::Text(text) => TailEnvelope::parse(text.as_str()),
        Message::Binary(bytes) => TailEnvelope::parse_slice(bytes),
        _ => return None,
    };
    match parsed {
        Ok(envelope) => Some(envelope.into_events()),
        Err(e) => {
            tracing::debug!("Dropping undecodable tail frame: {}", e);
            None
        }
    }
}

/// Read frames until cancelled or the connection ends.
async fn read_loop<S>(
    frames: &mut S,
    shared: &SessionShared,
    tx: &mpsc::Sender<Batch>,
    cancel: &CancellationToken,
) -> LoopExit
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return LoopExit::Cancelled,
            next = frames.next() => next,
        };

        let message = match next {
            Some(Ok(Message::Close(frame))) => {
                tracing::debug!("Tail closed by remote: {:?}", frame);
                None
            }
            Some(Ok(message)) => Some(message),
            Some(Err(e)) => {
                tracing::debug!("Tail read failed: {}", e);
                None
            }
            None => None,
        };

        let Some(message) = message else {
            if cancel.is_cancelled() {
                return LoopExit::Cancelled;
            }
            shared.deliver(vec![LogEvent::system(CONNECTION_CLOSED)], tx);
            return LoopExit::Disconnected;
        };

        if let Some(batch) = decode_message(&message) {
            shared.deliver(batch, tx);
        }
    }
}

/// One streaming connection to one remote log source
pub struct LiveSession {
    session_id: String,
    source_name: String,
    expiry: String,
    shared: Arc<SessionShared>,
    batches: mpsc::Receiver<Batch>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl LiveSession {
    /// Create a remote tail for `source`, connect to it and start reading.
    ///
    /// Credentials are carried by `provisioner`. On failure nothing is left
    /// running; the error names the step that failed.
    pub async fn start(
        provisioner: &dyn TailProvisioner,
        source: &str,
        config: &SessionConfig,
    ) -> Result<LiveSession, StartError> {
        let tail = tokio::time::timeout(config.provision_timeout, provisioner.create_tail(source))
            .await
            .map_err(|_| {
                StartError::new(StartStep::Provision, Error::Timeout(config.provision_timeout))
            })?
            .map_err(|e| StartError::new(StartStep::Provision, e))?;

        tracing::info!("Created tail {} for {}, connecting", tail.id, source);

        let mut request = tail
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| StartError::new(StartStep::Connect, e))?;
        request
            .headers_mut()
            .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(TAIL_PROTOCOL));

        let (socket, _response) =
            tokio::time::timeout(config.connect_timeout, tokio_tungstenite::connect_async(request))
                .await
                .map_err(|_| {
                    StartError::new(StartStep::Connect, Error::Timeout(config.connect_timeout))
                })?
                .map_err(|e| StartError::new(StartStep::Connect, e))?;

        let (mut sink, mut stream) = socket.split();
        sink.send(Message::Text(CONFIG_FRAME.to_string().into()))
            .await
            .map_err(|e| StartError::new(StartStep::Configure, e))?;

        let shared = Arc::new(SessionShared::new(config.history_capacity));
        shared.set_status(SessionStatus::Connected);

        let (tx, batches) = mpsc::channel(config.conduit_capacity.max(1));
        let cancel = CancellationToken::new();

        let task = {
            let shared = Arc::clone(&shared);
            let cancel = cancel.clone();
            let source = source.to_string();
            tokio::spawn(async move {
                let exit = read_loop(&mut stream, &shared, &tx, &cancel).await;
                if exit == LoopExit::Disconnected {
                    shared.set_status(SessionStatus::Stopped);
                    tracing::info!("Tail for {} disconnected", source);
                }
                // Closing may stall on a dead peer; don't let that keep the task alive.
                let _ = tokio::time::timeout(Duration::from_secs(1), sink.close()).await;
            })
        };

        Ok(LiveSession {
            session_id: tail.id,
            source_name: source.to_string(),
            expiry: tail.expires_at,
            shared,
            batches,
            cancel,
            task: Some(task),
        })
    }

    /// Remote session identifier
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Routing key of this session
    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    /// Remote expiry, as reported at creation
    pub fn expiry(&self) -> &str {
        &self.expiry
    }

    pub fn status(&self) -> SessionStatus {
        *self.shared.status.lock()
    }

    /// Copy of the bounded history, oldest first
    pub fn history(&self) -> Vec<LogEvent> {
        self.shared.history.lock().to_vec()
    }

    /// Take the next delivered batch without waiting.
    ///
    /// `Disconnected` means the read loop has ended and every delivered
    /// batch has been taken.
    pub fn try_next_batch(&mut self) -> Result<Batch, TryRecvError> {
        self.batches.try_recv()
    }

    /// Wait for the next delivered batch
    pub async fn next_batch(&mut self) -> Option<Batch> {
        self.batches.recv().await
    }

    /// Stop reading and close the connection. Safe to call more than once.
    pub fn stop(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        self.shared.set_status(SessionStatus::Stopped);
        tracing::info!("Stopped tail for {}", self.source_name);
    }

    /// Stop and wait for the read task to close the connection
    pub async fn shutdown(&mut self) {
        self.stop();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!("Read task for {} ended abnormally: {}", self.source_name, e);
            }
        }
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
