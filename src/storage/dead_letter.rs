//! Dead-letter trail for records the pipeline drops.
//!
//! ## Format
//!
//! One JSON object per line:
//!
//! ```text
//! {"at":"2024-05-01T12:00:00Z","reason":"...","topic":"logs","partition":0,"offset":42,"payload":"..."}
//! ```
//!
//! Without a configured file the line is emitted under the `dead_letter` log
//! target instead. Writing here never fails the caller.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::error::Result;
use crate::source::Delivery;

/// One dropped record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub at: DateTime<Utc>,
    pub reason: String,
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    /// Payload as text; invalid UTF-8 is replaced
    pub payload: String,
}

impl DeadLetterEntry {
    pub fn new(delivery: &Delivery, reason: impl Into<String>) -> Self {
        Self {
            at: Utc::now(),
            reason: reason.into(),
            topic: delivery.position.topic.clone(),
            partition: delivery.position.partition,
            offset: delivery.position.offset,
            payload: String::from_utf8_lossy(&delivery.payload).into_owned(),
        }
    }
}

/// Append-only dead-letter destination.
#[derive(Debug, Clone, Default)]
pub struct DeadLetterLog {
    path: Option<PathBuf>,
}

impl DeadLetterLog {
    /// Write entries to `path`, or only log them when `None`.
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    pub fn log_only() -> Self {
        Self::default()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Record a dropped delivery.
    pub async fn record(&self, delivery: &Delivery, reason: &str) {
        let entry = DeadLetterEntry::new(delivery, reason);
        let line = match serde_json::to_string(&entry) {
            Ok(line) => line,
            Err(e) => {
                log::error!("Could not encode dead-letter entry for {}: {e}", delivery.position);
                return;
            }
        };

        match &self.path {
            Some(path) => {
                if let Err(e) = append_line(path, &line).await {
                    log::error!(
                        "Failed to write dead-letter entry to {}: {e}",
                        path.display()
                    );
                    log::warn!(target: "dead_letter", "{line}");
                }
            }
            None => log::warn!(target: "dead_letter", "{line}"),
        }
    }
}

async fn append_line(path: &Path, line: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    // Entry and newline go out in a single write.
    file.write_all(&framed(line)).await?;
    file.flush().await?;
    Ok(())
}

/// `line` with its terminating newline.
fn framed(line: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(line.len() + 1);
    bytes.extend_from_slice(line.as_bytes());
    bytes.push(b'\n');
    bytes
}
