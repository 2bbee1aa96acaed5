//! Mailbox collaborators — fetch raw messages, save reply drafts.
//!
//! Backends are pure I/O. They hand the pipeline `RawMessage`s in a
//! transport-neutral shape (a part tree with base64url-encoded bodies) and
//! accept `DraftRequest`s back. No triage logic lives here.

pub mod gmail;
pub mod local;

pub use gmail::GmailMailbox;
pub use local::LocalMailbox;

use std::sync::Arc;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Mailbox as Address, Mailboxes};

use crate::config::{MailboxConfig, MailboxKind};
use crate::error::MailboxError;
use crate::pipeline::types::NormalizedMessage;

// ── Raw message ─────────────────────────────────────────────────────

/// A message header as delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// One node of a MIME part tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessagePart {
    /// Lower-case MIME type, e.g. `text/plain` or `multipart/alternative`.
    pub mime_type: String,
    pub headers: Vec<Header>,
    /// Body bytes, base64url-encoded (padding optional).
    pub data: Option<String>,
    pub parts: Vec<MessagePart>,
}

/// A message as fetched from the mailbox, before normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawMessage {
    pub id: String,
    pub thread_id: Option<String>,
    pub snippet: String,
    /// Root of the part tree; top-level headers live here.
    pub payload: MessagePart,
}

// ── Draft request ───────────────────────────────────────────────────

/// A reply draft to be saved in the mailbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftRequest {
    /// Thread to attach the draft to, if the mailbox supports threads.
    pub thread_id: Option<String>,
    pub to: String,
    pub subject: String,
    pub body: String,
}

impl DraftRequest {
    /// Build a reply to `message`.
    ///
    /// Replies go to Reply-To when present, otherwise From, reduced to the
    /// first bare address when it parses as a mailbox list. The subject gains
    /// a `Re: ` prefix unless it already has one.
    pub fn reply(message: &NormalizedMessage, body: &str) -> Self {
        let target = if message.reply_to.trim().is_empty() {
            message.from.trim()
        } else {
            message.reply_to.trim()
        };
        let to = target
            .parse::<Mailboxes>()
            .ok()
            .and_then(|list| list.iter().next().map(|mailbox| mailbox.email.to_string()))
            .unwrap_or_else(|| target.to_string());

        let subject = message.subject.trim();
        let subject = if subject.to_lowercase().starts_with("re:") {
            subject.to_string()
        } else {
            format!("Re: {subject}").trim().to_string()
        };

        Self {
            thread_id: message.thread_id.clone(),
            to,
            subject,
            body: body.to_string(),
        }
    }
}

/// Render a draft as an RFC 5322 plain-text message.
pub fn compose_draft_mime(from: &str, draft: &DraftRequest) -> Result<Vec<u8>, MailboxError> {
    let from: Address = from
        .parse()
        .map_err(|e| MailboxError::DraftBuild(format!("invalid from address '{from}': {e}")))?;
    let to: Address = draft
        .to
        .parse()
        .map_err(|e| MailboxError::DraftBuild(format!("invalid to address '{}': {e}", draft.to)))?;

    let message = lettre::Message::builder()
        .from(from)
        .to(to)
        .subject(draft.subject.clone())
        .header(ContentType::TEXT_PLAIN)
        .body(draft.body.clone())
        .map_err(|e| MailboxError::DraftBuild(e.to_string()))?;

    Ok(message.formatted())
}

// ── Mailbox trait ───────────────────────────────────────────────────

/// A mailbox the pipeline reads from and saves drafts into.
#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Backend name (e.g. "gmail", "local").
    fn name(&self) -> &str;

    /// Fetch up to `max_results` messages matching `query`.
    async fn fetch(&self, query: &str, max_results: u32) -> Result<Vec<RawMessage>, MailboxError>;

    /// Save a draft and return its mailbox identifier.
    ///
    /// Never called in dry-run mode.
    async fn create_draft(&self, draft: &DraftRequest) -> Result<String, MailboxError>;
}

/// Open the configured mailbox backend.
pub async fn connect(config: &MailboxConfig) -> Result<Arc<dyn Mailbox>, MailboxError> {
    let mailbox: Arc<dyn Mailbox> = match config.kind {
        MailboxKind::Gmail => Arc::new(GmailMailbox::connect(config).await?),
        MailboxKind::Local => Arc::new(LocalMailbox::new(&config.local_dir, &config.local_from)),
    };
    Ok(mailbox)
}
