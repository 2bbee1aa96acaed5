//! Classifier adapter — LLM triage plus deterministic overrides.
//!
//! The model answers four labeled lines. Parsing never fails: missing or
//! garbled lines keep their defaults. `normalize` then has the last word,
//! always biased toward not replying:
//! - bulk/marketing signals force `ignore / none / no`
//! - `ignore` forces `should_reply = no` and `priority = none`
//! - anything but an exact `yes` is `no`
//! - intent is clamped to 140 characters

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::ModelConfig;
use crate::error::PipelineError;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};
use crate::pipeline::types::{
    Category, Classification, NormalizedMessage, Priority, RawClassification,
};

/// Characters of message text embedded in prompts.
pub const PROMPT_CONTENT_CHARS: usize = 2000;

/// Characters of message text scanned by the safety net.
const SAFETY_NET_CONTENT_CHARS: usize = 4000;

/// Maximum intent length after normalization (before the ellipsis).
pub const INTENT_MAX_CHARS: usize = 140;

/// Intent used when an ignored message has no meaningful one.
pub const NO_ACTION_INTENT: &str = "No action needed";

/// Signals that a message is bulk or marketing mail, whatever the model says.
const BULK_SIGNALS: &[&str] = &[
    "unsubscribe",
    "manage preferences",
    "newsletter",
    "promotion",
    "promo",
    "sale ends",
];

/// Classifies candidate messages with an LLM.
pub struct Classifier {
    llm: Arc<dyn LlmProvider>,
    options: ModelConfig,
}

impl Classifier {
    pub fn new(llm: Arc<dyn LlmProvider>, options: ModelConfig) -> Self {
        Self { llm, options }
    }

    /// Classify one message. Only the LLM call itself can fail.
    pub async fn classify(
        &self,
        message: &NormalizedMessage,
    ) -> Result<Classification, PipelineError> {
        let request = CompletionRequest::new(vec![ChatMessage::user(
            build_classification_prompt(message),
        )])
        .with_model_options(&self.options);

        debug!(id = %message.id, model = self.llm.model_name(), "Calling LLM for classification");

        let response = self
            .llm
            .complete(request)
            .await
            .map_err(PipelineError::Classification)?;

        debug!(
            id = %message.id,
            input_tokens = response.input_tokens,
            output_tokens = response.output_tokens,
            raw = %response.content.trim(),
            "Raw classification output"
        );
        let parsed = parse_classification(&response.content);
        let classification = normalize(parsed, message);

        info!(
            id = %message.id,
            category = %classification.category,
            priority = %classification.priority,
            should_reply = classification.should_reply,
            intent = %classification.intent,
            "Classification returned"
        );

        Ok(classification)
    }
}

// ── Prompt construction ─────────────────────────────────────────────

/// First `max_chars` characters of the message text.
pub fn truncated_text(message: &NormalizedMessage, max_chars: usize) -> String {
    message.text.chars().take(max_chars).collect()
}

/// Build the four-line triage prompt.
pub fn build_classification_prompt(message: &NormalizedMessage) -> String {
    format!(
        "You are an email triage assistant.\n\n\
         Email Subject: {subject}\n\
         From: {from}\n\
         Content (truncated): {content}\n\n\
         Respond with ONLY these four lines (no extra text):\n\
         Category: [inquiry / complaint / general / ignore]\n\
         Priority: [high / medium / low / none]\n\
         Should_Reply: [yes / no]\n\
         Intent: [max 12 words, no commentary]\n\n\
         Rules:\n\
         - Newsletters, promotions, marketing, surveys, automated notifications, verification codes, job alerts, spam → Category: ignore and Should_Reply: no\n\
         - If you are not sure, choose Should_Reply: no",
        subject = message.subject,
        from = message.from,
        content = truncated_text(message, PROMPT_CONTENT_CHARS),
    )
}

// ── Response parsing ────────────────────────────────────────────────

/// Parse the model's labeled lines. Never fails.
pub fn parse_classification(raw: &str) -> RawClassification {
    let raw = raw.trim();
    let mut out = RawClassification {
        raw: raw.to_string(),
        ..Default::default()
    };

    for line in raw.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let lower = line.to_lowercase();
        let Some((_, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();

        if lower.starts_with("category:") {
            out.category = value.to_lowercase();
        } else if lower.starts_with("priority:") {
            out.priority = value.to_lowercase();
        } else if lower.starts_with("should_reply:") {
            out.should_reply = value.to_lowercase();
        } else if lower.starts_with("intent:") {
            out.intent = value.to_string();
        }
    }

    out
}

// ── Normalization ───────────────────────────────────────────────────

/// Apply the deterministic overrides to parsed model output.
///
/// Pure and idempotent: normalizing the `RawClassification` of an already
/// normalized result yields the same result.
pub fn normalize(raw: RawClassification, message: &NormalizedMessage) -> Classification {
    let mut category = Category::parse(enum_value(&raw.category)).unwrap_or(Category::General);
    let mut priority = Priority::parse(enum_value(&raw.priority)).unwrap_or(Priority::Medium);
    let mut should_reply = raw.should_reply == "yes";
    let mut intent = raw.intent.trim().to_string();

    if has_bulk_signals(message) {
        debug!(id = %message.id, "Safety net: bulk/marketing signal, forcing ignore");
        category = Category::Ignore;
    }

    if category == Category::Ignore {
        should_reply = false;
        priority = Priority::None;
        if intent.is_empty() || intent.eq_ignore_ascii_case("unknown") {
            intent = NO_ACTION_INTENT.to_string();
        }
    }

    Classification {
        category,
        priority,
        should_reply,
        intent: clamp_intent(&intent),
        raw: raw.raw,
    }
}

/// Strip decoration models like to add around enum values ("[inquiry]", "low.").
fn enum_value(value: &str) -> &str {
    value.trim_matches(|c: char| c.is_whitespace() || matches!(c, '[' | ']' | '.' | '"' | '*'))
}

/// Does subject + sender + the first 4000 chars of text carry a bulk signal?
pub fn has_bulk_signals(message: &NormalizedMessage) -> bool {
    let blob = format!(
        "{} {} {}",
        message.subject,
        message.from,
        truncated_text(message, SAFETY_NET_CONTENT_CHARS)
    )
    .to_lowercase();
    BULK_SIGNALS.iter().any(|signal| blob.contains(signal))
}

/// Clamp an intent to 140 chars: 137 chars (trailing space trimmed) + "...".
pub fn clamp_intent(intent: &str) -> String {
    let intent = intent.trim();
    if intent.chars().count() <= INTENT_MAX_CHARS {
        return intent.to_string();
    }
    let head: String = intent.chars().take(INTENT_MAX_CHARS - 3).collect();
    format!("{}...", head.trim_end())
}
