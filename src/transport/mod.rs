use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod stdio;

pub use stdio::StdioTransport;

/// Opaque reference to bytes held by the transport (a file id, a path —
/// whatever the adapter resolves in `fetch_file`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceHandle(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BotCommand {
    Start,
    Help,
    Formats,
}

/// Inbound events delivered by the transport collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    /// A file was uploaded. `file_name` is absent for photo-style uploads,
    /// which get a synthesized name during staging.
    FileUpload {
        session_key: String,
        file_name: Option<String>,
        size_bytes: u64,
        source: SourceHandle,
    },
    /// The user picked a target format from an offered list.
    FormatSelection {
        session_key: String,
        target_ext: String,
    },
    Command {
        session_key: String,
        command: BotCommand,
    },
}

impl InboundEvent {
    pub fn session_key(&self) -> &str {
        match self {
            InboundEvent::FileUpload { session_key, .. }
            | InboundEvent::FormatSelection { session_key, .. }
            | InboundEvent::Command { session_key, .. } => session_key,
        }
    }
}

/// Outbound side of the transport collaborator. Rendering (buttons, message
/// formatting, document delivery) is the adapter's concern; the engine only
/// produces these calls.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send_text(&self, session_key: &str, body: &str) -> Result<()>;

    /// Offer an ordered list of target extensions as selectable actions.
    async fn offer_choices(&self, session_key: &str, prompt: &str, options: &[String])
        -> Result<()>;

    async fn send_document(
        &self,
        session_key: &str,
        file_name: &str,
        bytes: Vec<u8>,
        caption: &str,
    ) -> Result<()>;

    /// Materialize the bytes behind a staged source handle.
    async fn fetch_file(&self, source: &SourceHandle) -> Result<Vec<u8>>;
}
