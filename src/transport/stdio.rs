use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::{ChatTransport, SourceHandle};

/// Line-delimited JSON adapter for local runs: outbound actions are written
/// to stdout, source handles are resolved as filesystem paths, and delivered
/// documents are written into an output directory. Real chat backends plug
/// in through the same `ChatTransport` seam.
pub struct StdioTransport {
    stdout: Mutex<tokio::io::Stdout>,
    out_dir: PathBuf,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OutboundAction<'a> {
    Text {
        session_key: &'a str,
        body: &'a str,
    },
    Choices {
        session_key: &'a str,
        prompt: &'a str,
        options: &'a [String],
    },
    Document {
        session_key: &'a str,
        file_name: &'a str,
        caption: &'a str,
        path: String,
    },
}

impl StdioTransport {
    pub fn new(out_dir: PathBuf) -> Self {
        Self {
            stdout: Mutex::new(tokio::io::stdout()),
            out_dir,
        }
    }

    async fn emit(&self, action: &OutboundAction<'_>) -> Result<()> {
        let mut line = serde_json::to_vec(action).context("failed to encode outbound action")?;
        line.push(b'\n');
        let mut stdout = self.stdout.lock().await;
        stdout
            .write_all(&line)
            .await
            .context("failed to write outbound action")?;
        stdout.flush().await.context("failed to flush stdout")?;
        Ok(())
    }
}

#[async_trait]
impl ChatTransport for StdioTransport {
    async fn send_text(&self, session_key: &str, body: &str) -> Result<()> {
        self.emit(&OutboundAction::Text { session_key, body }).await
    }

    async fn offer_choices(
        &self,
        session_key: &str,
        prompt: &str,
        options: &[String],
    ) -> Result<()> {
        self.emit(&OutboundAction::Choices {
            session_key,
            prompt,
            options,
        })
        .await
    }

    async fn send_document(
        &self,
        session_key: &str,
        file_name: &str,
        bytes: Vec<u8>,
        caption: &str,
    ) -> Result<()> {
        tokio::fs::create_dir_all(&self.out_dir)
            .await
            .context("failed to create delivery directory")?;
        let path = self.out_dir.join(file_name);
        tokio::fs::write(&path, bytes)
            .await
            .context("failed to write delivered document")?;
        self.emit(&OutboundAction::Document {
            session_key,
            file_name,
            caption,
            path: path.to_string_lossy().into_owned(),
        })
        .await
    }

    async fn fetch_file(&self, source: &SourceHandle) -> Result<Vec<u8>> {
        tokio::fs::read(&source.0)
            .await
            .with_context(|| format!("failed to read source file {}", source.0))
    }
}
