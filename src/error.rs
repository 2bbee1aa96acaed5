//! Error types for Mail Triage.

use std::time::Duration;

/// Top-level error type for a triage run.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Mailbox error: {0}")]
    Mailbox(#[from] MailboxError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Audit error: {0}")]
    Audit(#[from] AuditError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Mailbox transport errors (fetching messages, creating drafts).
#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("Authentication failed for mailbox {name}: {reason}")]
    AuthFailed { name: String, reason: String },

    #[error("Mailbox {name} connection failed: {reason}")]
    Connection { name: String, reason: String },

    #[error("Mailbox {name} API error ({status}): {body}")]
    Api {
        name: String,
        status: u16,
        body: String,
    },

    #[error("Mailbox {name} rate limited, retry after {retry_after:?}")]
    RateLimited {
        name: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Failed to build draft: {0}")]
    DraftBuild(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Model {model} not available on provider {provider}")]
    ModelNotAvailable { provider: String, model: String },
}

/// Audit log errors.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Per-message pipeline errors.
///
/// These never abort a run; the processor turns them into error audit events.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Classification failed: {0}")]
    Classification(#[source] LlmError),

    #[error("Draft generation failed: {0}")]
    DraftGeneration(#[source] LlmError),

    #[error("Draft generation failed: model returned an empty draft")]
    EmptyDraft,

    #[error("Draft creation failed: {0}")]
    DraftCreation(#[from] MailboxError),
}

/// Result type alias for a triage run.
pub type Result<T> = std::result::Result<T, Error>;
