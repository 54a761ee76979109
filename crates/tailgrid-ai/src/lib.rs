//! tailgrid-ai: Streaming client for text-generation endpoints
//!
//! Sends a chat transcript to an inference endpoint and decodes the
//! server-sent event response into incremental text chunks.

pub mod client;
pub mod error;
pub mod stream;
pub mod types;

pub use client::{DEFAULT_MODEL, Inference, InferenceClient, InferenceConfig};
pub use error::{Error, Result};
pub use stream::{ChunkStream, StreamChunk};
pub use types::*;
