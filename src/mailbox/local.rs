//! Local mailbox — a directory of `.eml` files.
//!
//! Messages are read in file-name order; the file stem is the message id.
//! Drafts are written as `.eml` files under `<dir>/drafts/`. The search
//! query is not interpreted.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::prelude::*;
use mail_parser::{Address, MessageParser, MimeHeaders, PartType};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::MailboxError;
use crate::mailbox::{DraftRequest, Header, Mailbox, MessagePart, RawMessage, compose_draft_mime};

const NAME: &str = "local";

/// Approximate length of the generated snippet.
const SNIPPET_CHARS: usize = 200;

/// Mailbox backed by a local directory.
#[derive(Debug, Clone)]
pub struct LocalMailbox {
    dir: PathBuf,
    from: String,
}

impl LocalMailbox {
    /// `from` is the sender address written into saved drafts.
    pub fn new(dir: impl Into<PathBuf>, from: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            from: from.into(),
        }
    }

    pub fn drafts_dir(&self) -> PathBuf {
        self.dir.join("drafts")
    }

    async fn message_paths(&self) -> Result<Vec<PathBuf>, MailboxError> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_eml = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("eml"));
            if is_eml && entry.file_type().await?.is_file() {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }
}

/// Parse one RFC 5322 message into the transport-neutral shape.
pub fn parse_eml(id: &str, raw: &[u8]) -> Option<RawMessage> {
    let message = MessageParser::default().parse(raw)?;

    let mut headers = Vec::new();
    if let Some(subject) = message.subject() {
        headers.push(Header::new("Subject", subject));
    }
    if let Some(from) = render_address(message.from()) {
        headers.push(Header::new("From", from));
    }
    if let Some(reply_to) = render_address(message.reply_to()) {
        headers.push(Header::new("Reply-To", reply_to));
    }
    if let Some(date) = message.date() {
        headers.push(Header::new("Date", date.to_rfc822()));
    }
    if let Some(message_id) = message.message_id() {
        headers.push(Header::new("Message-ID", format!("<{message_id}>")));
    }

    let mut payload = message
        .parts
        .first()
        .map(|root| convert_part(&message, root))
        .unwrap_or_default();
    payload.headers = headers;

    let snippet = message
        .body_text(0)
        .map(|text| {
            text.split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
                .chars()
                .take(SNIPPET_CHARS)
                .collect()
        })
        .unwrap_or_default();

    Some(RawMessage {
        id: id.to_string(),
        thread_id: None,
        snippet,
        payload,
    })
}

fn convert_part(message: &mail_parser::Message<'_>, part: &mail_parser::MessagePart<'_>) -> MessagePart {
    let declared = MimeHeaders::content_type(part).map(|ct| match ct.subtype() {
        Some(sub) => format!("{}/{}", ct.ctype(), sub),
        None => ct.ctype().to_string(),
    });

    let (default_mime, data, children) = match &part.body {
        PartType::Text(text) => ("text/plain", Some(encode(text.as_bytes())), Vec::new()),
        PartType::Html(html) => ("text/html", Some(encode(html.as_bytes())), Vec::new()),
        PartType::Binary(bytes) | PartType::InlineBinary(bytes) => {
            ("application/octet-stream", Some(encode(bytes)), Vec::new())
        }
        PartType::Message(_) => ("message/rfc822", None, Vec::new()),
        PartType::Multipart(ids) => (
            "multipart/mixed",
            None,
            ids.iter()
                .filter_map(|id| message.part(*id))
                .map(|child| convert_part(message, child))
                .collect(),
        ),
    };

    MessagePart {
        mime_type: declared
            .unwrap_or_else(|| default_mime.to_string())
            .to_lowercase(),
        headers: Vec::new(),
        data,
        parts: children,
    }
}

fn encode(bytes: &[u8]) -> String {
    BASE64_URL_SAFE_NO_PAD.encode(bytes)
}

/// Render an address header as `Name <addr>, ...`.
fn render_address(addr: Option<&Address<'_>>) -> Option<String> {
    let render = |a: &mail_parser::Addr<'_>| match (a.name.as_deref(), a.address.as_deref()) {
        (Some(name), Some(address)) if !name.is_empty() => Some(format!("{name} <{address}>")),
        (_, Some(address)) => Some(address.to_string()),
        (Some(name), None) => Some(name.to_string()),
        (None, None) => None,
    };

    let rendered: Vec<String> = match addr? {
        Address::List(addrs) => addrs.iter().filter_map(render).collect(),
        Address::Group(groups) => groups
            .iter()
            .flat_map(|g| g.addresses.iter().filter_map(render))
            .collect(),
    };

    (!rendered.is_empty()).then(|| rendered.join(", "))
}

#[async_trait]
impl Mailbox for LocalMailbox {
    fn name(&self) -> &str {
        NAME
    }

    async fn fetch(&self, query: &str, max_results: u32) -> Result<Vec<RawMessage>, MailboxError> {
        debug!(query, dir = %self.dir.display(), "Local mailbox ignores the search query");

        let mut messages = Vec::new();
        for path in self.message_paths().await? {
            if messages.len() >= max_results as usize {
                break;
            }
            let raw = tokio::fs::read(&path).await?;
            let id = file_id(&path);
            match parse_eml(&id, &raw) {
                Some(message) => messages.push(message),
                None => warn!(path = %path.display(), "Skipping unparseable message file"),
            }
        }

        Ok(messages)
    }

    async fn create_draft(&self, draft: &DraftRequest) -> Result<String, MailboxError> {
        let mime = compose_draft_mime(&self.from, draft)?;
        let id = Uuid::new_v4().to_string();

        let dir = self.drafts_dir();
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(format!("{id}.eml"));
        tokio::fs::write(&path, mime).await?;

        info!(path = %path.display(), "Saved draft");
        Ok(id)
    }
}

fn file_id(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}
