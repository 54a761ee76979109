//! tailgrid-core: Live log tailing and context assembly
//!
//! This crate owns the streaming tail sessions, the pane registry that
//! multiplexes them, and the logic that turns buffered log history into a
//! prompt for the inference endpoint.

pub mod context;
pub mod conversation;
pub mod error;
pub mod event;
pub mod history;
pub mod provision;
pub mod registry;
pub mod session;
pub mod workspace;

pub use context::{AssembledContext, ContextLine, ContextSource, SourceHistory, build_prompt};
pub use conversation::{Conversation, ConversationEntry};
pub use error::{Error, Result, StartError, StartStep};
pub use event::{LogEvent, LogLevel};
pub use history::BoundedHistory;
pub use provision::{CloudflareTails, TailInfo, TailProvisioner};
pub use registry::{GridConfig, PaneSnapshot, PaneStatus, Registry};
pub use session::{LiveSession, SessionConfig, SessionStatus};
pub use workspace::{Workspace, WorkspaceConfig, WorkspaceEvent};
