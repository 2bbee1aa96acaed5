//! Shared types for the triage pipeline.

use serde::{Deserialize, Serialize};

// ── Normalized message ──────────────────────────────────────────────

/// Canonical, read-only view of a fetched message.
///
/// Built once by the normalizer. Header-derived fields are single-line
/// (no CR/LF, whitespace collapsed) so they can be embedded in prompts and
/// audit records as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedMessage {
    pub id: String,
    pub thread_id: Option<String>,
    pub subject: String,
    pub from: String,
    pub reply_to: String,
    pub date: String,
    pub snippet: String,
    /// Decoded body text (may span lines).
    pub body: String,
    /// `body` if non-empty, otherwise `snippet`.
    pub text: String,
}

impl NormalizedMessage {
    /// Single-line preview of the text for progress logs.
    pub fn preview(&self, max_chars: usize) -> String {
        self.text
            .chars()
            .take(max_chars)
            .collect::<String>()
            .replace(['\r', '\n'], " ")
    }
}

// ── Prefilter verdict ───────────────────────────────────────────────

/// Why the prefilter reached its verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrefilterReason {
    BlockedSenderPattern,
    BlockedSubjectPattern,
    BlockedBodyPattern,
    AllowHint,
    DefaultCandidate,
}

impl PrefilterReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BlockedSenderPattern => "blocked_sender_pattern",
            Self::BlockedSubjectPattern => "blocked_subject_pattern",
            Self::BlockedBodyPattern => "blocked_body_pattern",
            Self::AllowHint => "allow_hint",
            Self::DefaultCandidate => "default_candidate",
        }
    }
}

impl std::fmt::Display for PrefilterReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Prefilter decision: does this message reach the model at all?
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefilterVerdict {
    pub candidate: bool,
    pub reason: PrefilterReason,
}

impl PrefilterVerdict {
    pub fn accept(reason: PrefilterReason) -> Self {
        Self {
            candidate: true,
            reason,
        }
    }

    pub fn reject(reason: PrefilterReason) -> Self {
        Self {
            candidate: false,
            reason,
        }
    }
}

// ── Classification ──────────────────────────────────────────────────

/// Message category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Inquiry,
    Complaint,
    General,
    Ignore,
}

impl Category {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "inquiry" => Some(Self::Inquiry),
            "complaint" => Some(Self::Complaint),
            "general" => Some(Self::General),
            "ignore" => Some(Self::Ignore),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inquiry => "inquiry",
            Self::Complaint => "complaint",
            Self::General => "general",
            Self::Ignore => "ignore",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reply priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
    None,
}

impl Priority {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "high" => Some(Self::High),
            "medium" => Some(Self::Medium),
            "low" => Some(Self::Low),
            "none" => Some(Self::None),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::None => "none",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Field values as parsed from model output, before any override.
///
/// `category`, `priority` and `should_reply` are lower-cased; `intent` keeps
/// its original case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawClassification {
    pub category: String,
    pub priority: String,
    pub should_reply: String,
    pub intent: String,
    pub raw: String,
}

impl Default for RawClassification {
    fn default() -> Self {
        Self {
            category: "general".into(),
            priority: "medium".into(),
            should_reply: "no".into(),
            intent: "Unknown".into(),
            raw: String::new(),
        }
    }
}

impl From<&Classification> for RawClassification {
    fn from(c: &Classification) -> Self {
        Self {
            category: c.category.as_str().into(),
            priority: c.priority.as_str().into(),
            should_reply: yes_no::as_str(c.should_reply).into(),
            intent: c.intent.clone(),
            raw: c.raw.clone(),
        }
    }
}

/// Final triage judgment after deterministic overrides.
///
/// Invariant: `category == Ignore` implies `!should_reply` and
/// `priority == None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub category: Category,
    pub priority: Priority,
    #[serde(with = "yes_no")]
    pub should_reply: bool,
    pub intent: String,
    /// Unmodified model output.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub raw: String,
}

/// Serializes a reply flag as the literal strings `"yes"` / `"no"`.
pub mod yes_no {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn as_str(value: bool) -> &'static str {
        if value { "yes" } else { "no" }
    }

    pub fn serialize<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(as_str(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(value == "yes")
    }
}
