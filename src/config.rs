//! Configuration types.
//!
//! Everything is read from environment variables once at startup and passed
//! into the pipeline as plain structs. Parsing goes through a lookup function
//! so tests can feed a map instead of mutating the process environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Default mailbox search query.
pub const DEFAULT_QUERY: &str = "label:LENAH is:unread";

/// Default persona used to sign drafted replies.
pub const DEFAULT_ASSISTANT_NAME: &str = "LENAH Assistant";

/// Sampling options for one model role (classification or drafting).
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    /// Model identifier on the inference server (e.g. "phi3:mini").
    pub model: String,
    pub temperature: f32,
    /// Context window size in tokens.
    pub num_ctx: u32,
    /// Maximum tokens to generate.
    pub num_predict: u32,
}

/// Inference server configuration.
#[derive(Debug, Clone)]
pub struct InferenceConfig {
    /// Base URL of the Ollama server.
    pub base_url: String,
    /// HTTP timeout for a single completion.
    pub timeout: Duration,
    pub classify: ModelConfig,
    pub draft: ModelConfig,
}

/// Which mailbox backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxKind {
    Gmail,
    Local,
}

/// Mailbox backend configuration.
#[derive(Debug, Clone)]
pub struct MailboxConfig {
    pub kind: MailboxKind,
    /// Authorized-user OAuth file (client id/secret + refresh token).
    pub gmail_token_path: PathBuf,
    /// Pre-issued access token; skips the refresh flow when set.
    pub gmail_access_token: Option<SecretString>,
    /// Directory of `.eml` files for the local mailbox.
    pub local_dir: PathBuf,
    /// From address written into locally saved drafts.
    pub local_from: String,
}

/// Settings the triage processor itself depends on.
#[derive(Debug, Clone)]
pub struct TriageConfig {
    /// Mailbox search query, recorded in every audit event.
    pub query: String,
    /// Generate drafts but never save them to the mailbox.
    pub dry_run: bool,
    /// Upper bound on messages fetched per run.
    pub max_results: u32,
    /// Directory for per-run audit logs.
    pub audit_dir: PathBuf,
    /// Sign-off used in drafted replies.
    pub assistant_name: String,
    /// Verdict for messages no prefilter rule matches.
    pub default_candidate: bool,
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            query: DEFAULT_QUERY.to_string(),
            dry_run: true,
            max_results: 10,
            audit_dir: PathBuf::from("runs"),
            assistant_name: DEFAULT_ASSISTANT_NAME.to_string(),
            default_candidate: true,
        }
    }
}

/// Full application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub triage: TriageConfig,
    pub inference: InferenceConfig,
    pub mailbox: MailboxConfig,
}

impl AppConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup: &lookup };

        let triage = TriageConfig {
            query: env.string("GMAIL_QUERY", DEFAULT_QUERY),
            dry_run: env.flag("DRY_RUN", true)?,
            max_results: env.parse("MAX_RESULTS", 10)?,
            audit_dir: PathBuf::from(env.string("AUDIT_DIR", "runs")),
            assistant_name: env.string("ASSISTANT_NAME", DEFAULT_ASSISTANT_NAME),
            default_candidate: env.flag("PREFILTER_DEFAULT_CANDIDATE", true)?,
        };

        if triage.max_results == 0 {
            return Err(ConfigError::InvalidValue {
                key: "MAX_RESULTS".into(),
                message: "must be at least 1".into(),
            });
        }

        let inference = InferenceConfig {
            base_url: env.string("OLLAMA_URL", "http://localhost:11434"),
            timeout: Duration::from_secs(env.parse("OLLAMA_TIMEOUT_SECS", 120)?),
            classify: ModelConfig {
                model: env.string("OLLAMA_CLASSIFY_MODEL", "phi3:mini"),
                temperature: env.parse("OLLAMA_CLASSIFY_TEMPERATURE", 0.0)?,
                num_ctx: env.parse("OLLAMA_CLASSIFY_NUM_CTX", 4096)?,
                num_predict: env.parse("OLLAMA_CLASSIFY_NUM_PREDICT", 120)?,
            },
            draft: ModelConfig {
                model: env.string("OLLAMA_DRAFT_MODEL", "phi3:mini"),
                temperature: env.parse("OLLAMA_DRAFT_TEMPERATURE", 0.2)?,
                num_ctx: env.parse("OLLAMA_DRAFT_NUM_CTX", 8192)?,
                num_predict: env.parse("OLLAMA_DRAFT_NUM_PREDICT", 350)?,
            },
        };

        let kind = match env.string("MAILBOX", "gmail").to_lowercase().as_str() {
            "gmail" => MailboxKind::Gmail,
            "local" => MailboxKind::Local,
            other => {
                return Err(ConfigError::InvalidValue {
                    key: "MAILBOX".into(),
                    message: format!("expected 'gmail' or 'local', got '{other}'"),
                });
            }
        };

        let mailbox = MailboxConfig {
            kind,
            gmail_token_path: PathBuf::from(env.string("GMAIL_TOKEN_PATH", "token.json")),
            gmail_access_token: env.optional("GMAIL_ACCESS_TOKEN").map(SecretString::from),
            local_dir: PathBuf::from(env.string("LOCAL_MAILBOX_DIR", "mail")),
            local_from: env.string("LOCAL_MAILBOX_FROM", "assistant@localhost"),
        };

        Ok(Self {
            triage,
            inference,
            mailbox,
        })
    }
}

/// Typed accessors over a key lookup.
struct Env<'a, F> {
    lookup: &'a F,
}

impl<F> Env<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Non-empty trimmed value, if set.
    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.optional(key).unwrap_or_else(|| default.to_string())
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.optional(key) {
            None => Ok(default),
            Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("'{raw}': {e}"),
            }),
        }
    }

    /// Boolean flag. Unrecognized spellings are rejected rather than read as
    /// false, so a typo in `DRY_RUN` can never switch drafting on.
    fn flag(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.optional(key) {
            None => Ok(default),
            Some(raw) => parse_flag(&raw).ok_or_else(|| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("'{raw}' is not a boolean (use true/false, yes/no, 1/0)"),
            }),
        }
    }
}

/// Parse a boolean flag value (`1/true/yes/y`, `0/false/no/n`).
pub fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "y" => Some(true),
        "0" | "false" | "no" | "n" => Some(false),
        _ => None,
    }
}
