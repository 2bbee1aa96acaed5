//! Audit trail — one JSON record per processed message.
//!
//! Events are append-only. The file sink writes JSON Lines (UTF-8,
//! non-ASCII left unescaped), one file per run named
//! `run_YYYYMMDD_HHMMSS.jsonl`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Local;
use serde::{Deserialize, Serialize};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::AuditError;
use crate::pipeline::types::{Classification, NormalizedMessage, PrefilterVerdict};

/// Local timestamp with second precision, no offset (`2025-09-01T10:00:00`).
pub fn timestamp_now() -> String {
    Local::now().format("%Y-%m-%dT%H:%M:%S").to_string()
}

/// One immutable record per message per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub ts: String,
    pub message_id: String,
    #[serde(rename = "threadId")]
    pub thread_id: Option<String>,
    pub subject: String,
    pub from: String,
    #[serde(flatten)]
    pub outcome: AuditOutcome,
}

/// Either the decisions taken for a message, or why processing failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AuditOutcome {
    Decision(DecisionRecord),
    Failure { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub query: String,
    pub prefilter: PrefilterVerdict,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<Classification>,
    pub draft_created: bool,
    /// Always present; `null` unless a draft was saved.
    pub draft_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draft_preview: Option<String>,
    pub dry_run: bool,
}

impl AuditEvent {
    fn for_message(message: &NormalizedMessage, outcome: AuditOutcome) -> Self {
        Self {
            ts: timestamp_now(),
            message_id: message.id.clone(),
            thread_id: message.thread_id.clone(),
            subject: message.subject.clone(),
            from: message.from.clone(),
            outcome,
        }
    }

    pub fn decision(message: &NormalizedMessage, record: DecisionRecord) -> Self {
        Self::for_message(message, AuditOutcome::Decision(record))
    }

    pub fn failure(message: &NormalizedMessage, error: impl Into<String>) -> Self {
        Self::for_message(
            message,
            AuditOutcome::Failure {
                error: error.into(),
            },
        )
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, AuditOutcome::Failure { .. })
    }

    pub fn record(&self) -> Option<&DecisionRecord> {
        match &self.outcome {
            AuditOutcome::Decision(record) => Some(record),
            AuditOutcome::Failure { .. } => None,
        }
    }
}

/// Append-only destination for audit events.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, event: &AuditEvent) -> Result<(), AuditError>;

    /// Human-readable location for the run summary.
    fn location(&self) -> String;
}

/// JSON Lines audit file.
pub struct JsonlAuditLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlAuditLog {
    /// Create `run_YYYYMMDD_HHMMSS.jsonl` in `dir`, creating `dir` if needed.
    pub async fn create_in(dir: impl AsRef<Path>) -> Result<Self, AuditError> {
        let dir = dir.as_ref();
        tokio::fs::create_dir_all(dir).await?;
        let name = format!("run_{}.jsonl", Local::now().format("%Y%m%d_%H%M%S"));
        Self::open(dir.join(name)).await
    }

    /// Open (or create) `path` for appending.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, AuditError> {
        let path = path.into();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        debug!(path = %path.display(), "Opened audit log");
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AuditSink for JsonlAuditLog {
    async fn append(&self, event: &AuditEvent) -> Result<(), AuditError> {
        let mut line = serde_json::to_string(event)?;
        line.push('\n');

        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}
