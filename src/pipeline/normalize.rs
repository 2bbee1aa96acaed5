//! Header/body normalizer — turns a `RawMessage` into a `NormalizedMessage`.
//!
//! Pure string handling, no I/O:
//! - header values are flattened to a single line (CR/LF → space, runs of
//!   whitespace collapsed, trimmed)
//! - header lookup is case-insensitive, first match wins
//! - the body is the first non-empty `text/plain` part in depth-first order,
//!   falling back to the first non-empty `text/plain` or `text/html` leaf

use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};

use crate::mailbox::{Header, MessagePart, RawMessage};
use crate::pipeline::types::NormalizedMessage;

/// URL-safe base64 that accepts bodies with or without padding.
const BODY_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

pub const DEFAULT_SUBJECT: &str = "No Subject";
pub const DEFAULT_SENDER: &str = "Unknown Sender";
pub const DEFAULT_DATE: &str = "Unknown Date";

/// Flatten a header value to a single clean line.
pub fn clean_header_value(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Case-insensitive header lookup; first match wins.
///
/// Returns the sanitized value, or the sanitized `default` when absent.
pub fn get_header(headers: &[Header], name: &str, default: &str) -> String {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| clean_header_value(&h.value))
        .unwrap_or_else(|| clean_header_value(default))
}

/// Decode base64url body data to text (invalid UTF-8 is replaced).
///
/// Undecodable data yields an empty string.
pub fn decode_body_data(data: &str) -> String {
    match BODY_ENGINE.decode(data.trim()) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => {
            tracing::debug!(error = %e, "Skipping undecodable body part");
            String::new()
        }
    }
}

/// Extract the body text from a part tree.
pub fn extract_body(root: &MessagePart) -> String {
    let mut fallback: Option<String> = None;
    if let Some(text) = find_plain_text(root, &mut fallback) {
        return text;
    }
    fallback.unwrap_or_default()
}

/// Depth-first walk returning the first non-empty `text/plain` part.
///
/// Records the first non-empty `text/plain`/`text/html` leaf in `fallback`.
fn find_plain_text(part: &MessagePart, fallback: &mut Option<String>) -> Option<String> {
    let mime = part.mime_type.to_lowercase();

    if let Some(data) = part.data.as_deref().filter(|d| !d.is_empty()) {
        let is_plain = mime == "text/plain";
        let is_leaf_text = part.parts.is_empty() && (is_plain || mime == "text/html");

        if is_plain || is_leaf_text {
            let text = decode_body_data(data).trim().to_string();
            if !text.is_empty() {
                if is_plain {
                    return Some(text);
                }
                if fallback.is_none() {
                    *fallback = Some(text);
                }
            }
        }
    }

    part.parts
        .iter()
        .find_map(|child| find_plain_text(child, fallback))
}

/// Build the canonical record for one fetched message.
pub fn normalize(raw: &RawMessage) -> NormalizedMessage {
    let headers = &raw.payload.headers;

    let snippet = clean_header_value(&raw.snippet);
    let body = extract_body(&raw.payload);
    let text = if body.is_empty() {
        snippet.clone()
    } else {
        body.clone()
    };

    NormalizedMessage {
        id: raw.id.clone(),
        thread_id: raw.thread_id.clone().filter(|t| !t.is_empty()),
        subject: get_header(headers, "Subject", DEFAULT_SUBJECT),
        from: get_header(headers, "From", DEFAULT_SENDER),
        reply_to: get_header(headers, "Reply-To", ""),
        date: get_header(headers, "Date", DEFAULT_DATE),
        snippet,
        body,
        text,
    }
}
