//! Prefilter rules engine — decides whether a message reaches the LLM.
//!
//! Rules are an ordered table of (field, pattern set, verdict, reason);
//! the first matching rule wins:
//! 1. automated/bulk sender → reject
//! 2. promotional/security-code subject → reject
//! 3. same patterns in the body → reject
//! 4. domain allow-hints in subject or body → accept
//! 5. nothing matched → the configured default (accept unless tightened)
//!
//! Allow-hints never block anything. They only label why a message was let
//! through; the real fallback is asking the model.

use regex::RegexSet;
use tracing::debug;

use crate::pipeline::types::{NormalizedMessage, PrefilterReason, PrefilterVerdict};

/// Automated and bulk sender markers.
pub const BLOCK_SENDER_PATTERNS: &[&str] = &[
    r"\bnoreply\b",
    r"\bno-reply\b",
    r"\bdo-not-reply\b",
    r"\bnewsletter\b",
    r"\bjobalerts\b",
    r"\bmailer\b",
    r"\bmarketing\b",
    r"\bsurvey\b",
    r"\bresearch\b",
    r"\bopinium\b",
];

/// Promotional, security-code and bulk markers (subject and body).
pub const BLOCK_SUBJECT_PATTERNS: &[&str] = &[
    r"\bverification\b",
    r"\bauthentication\b",
    r"\bsecurity\b",
    r"\bOTP\b",
    r"\bcode\b",
    r"\bdiscount\b",
    r"\boffer\b",
    r"\bsale\b",
    r"\bdeal\b",
    r"\blast chance\b",
    r"\bdigest\b",
    r"\bbriefing\b",
    r"\bnewsletter\b",
    r"\bjob alert\b",
    r"\bsurvey\b",
    r"\bprize\s*draw\b",
    r"\bwe(?:\s+would|\s*['’]d)\s+love\s+to\s+hear\s+from\s+you\b",
    r"\bcalling\s+for\b",
    r"\bexclusive\b",
    r"\blimited time\b",
    r"\bends today\b",
    r"\bpromotion\b",
    r"\bpromo\b",
    r"\bfree\b",
    r"\bsign\s*up\b",
];

/// Lettings/property terms that suggest a real enquiry.
pub const ALLOW_HINT_PATTERNS: &[&str] = &[
    r"\bview(?:ing)?\b",
    r"\bbook(?:ing)?\b",
    r"\bappointment\b",
    r"\bavailability\b",
    r"\benquir(?:y|ies)\b",
    r"\binterested\b",
    r"\bproperty\b",
    r"\bflat\b",
    r"\bhouse\b",
    r"\bpostcode\b",
    r"\brent\b",
    r"\blease\b",
    r"\btenanc(?:y|ies)\b",
    r"\bdeposit\b",
    r"\bmove(?:\s|-)?in\b",
    r"\bmove(?:\s|-)?out\b",
    r"\brepair\b",
    r"\bmaintenance\b",
    r"\bleak\b",
    r"\bbroken\b",
    r"\bkeys?\b",
    r"\bboiler\b",
    r"\bheating\b",
    r"\bmould\b",
    r"\bdamp\b",
    r"\bcomplaint\b",
    r"\brefund\b",
    r"\bcancel\b",
    r"\baddress\b",
];

/// Which message field(s) a rule matches against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleField {
    Sender,
    Subject,
    Body,
    SubjectOrBody,
}

/// A single prefilter rule with a compiled, case-insensitive pattern set.
#[derive(Debug, Clone)]
pub struct PrefilterRule {
    /// Which message field to match.
    pub field: RuleField,
    /// Compiled patterns; any match triggers the rule.
    pub patterns: RegexSet,
    /// Verdict when the rule matches.
    pub candidate: bool,
    pub reason: PrefilterReason,
}

impl PrefilterRule {
    /// Compile a rule. Patterns are matched case-insensitively.
    pub fn new(
        field: RuleField,
        patterns: &[&str],
        candidate: bool,
        reason: PrefilterReason,
    ) -> Result<Self, regex::Error> {
        let patterns = RegexSet::new(patterns.iter().map(|p| format!("(?i){p}")))?;
        Ok(Self {
            field,
            patterns,
            candidate,
            reason,
        })
    }

    fn matches(&self, message: &NormalizedMessage) -> bool {
        match self.field {
            RuleField::Sender => self.patterns.is_match(&message.from),
            RuleField::Subject => self.patterns.is_match(&message.subject),
            RuleField::Body => self.patterns.is_match(&message.text),
            RuleField::SubjectOrBody => {
                self.patterns.is_match(&message.subject) || self.patterns.is_match(&message.text)
            }
        }
    }
}

/// Ordered prefilter rule table.
#[derive(Debug, Clone)]
pub struct RulesEngine {
    rules: Vec<PrefilterRule>,
    /// Verdict when no rule matches.
    default_candidate: bool,
}

impl RulesEngine {
    /// Create a rules engine with the built-in block and allow-hint tables.
    pub fn default_rules() -> Self {
        let rules = vec![
            builtin(
                RuleField::Sender,
                BLOCK_SENDER_PATTERNS,
                false,
                PrefilterReason::BlockedSenderPattern,
            ),
            builtin(
                RuleField::Subject,
                BLOCK_SUBJECT_PATTERNS,
                false,
                PrefilterReason::BlockedSubjectPattern,
            ),
            builtin(
                RuleField::Body,
                BLOCK_SUBJECT_PATTERNS,
                false,
                PrefilterReason::BlockedBodyPattern,
            ),
            builtin(
                RuleField::SubjectOrBody,
                ALLOW_HINT_PATTERNS,
                true,
                PrefilterReason::AllowHint,
            ),
        ];

        Self {
            rules,
            default_candidate: true,
        }
    }

    /// Create an empty rules engine (everything gets the default verdict).
    pub fn empty() -> Self {
        Self {
            rules: Vec::new(),
            default_candidate: true,
        }
    }

    /// Set the verdict for messages no rule matches.
    pub fn with_default_candidate(mut self, candidate: bool) -> Self {
        self.default_candidate = candidate;
        self
    }

    /// Append a custom rule (evaluated after existing rules).
    pub fn add_rule(
        &mut self,
        field: RuleField,
        patterns: &[&str],
        candidate: bool,
        reason: PrefilterReason,
    ) -> Result<(), regex::Error> {
        self.rules
            .push(PrefilterRule::new(field, patterns, candidate, reason)?);
        Ok(())
    }

    /// Evaluate a message. Pure: same message, same verdict.
    pub fn evaluate(&self, message: &NormalizedMessage) -> PrefilterVerdict {
        for rule in &self.rules {
            if rule.matches(message) {
                debug!(
                    id = %message.id,
                    sender = %message.from,
                    reason = %rule.reason,
                    candidate = rule.candidate,
                    "Message matched prefilter rule"
                );
                return PrefilterVerdict {
                    candidate: rule.candidate,
                    reason: rule.reason,
                };
            }
        }

        PrefilterVerdict {
            candidate: self.default_candidate,
            reason: PrefilterReason::DefaultCandidate,
        }
    }
}

impl Default for RulesEngine {
    fn default() -> Self {
        Self::default_rules()
    }
}

fn builtin(
    field: RuleField,
    patterns: &[&str],
    candidate: bool,
    reason: PrefilterReason,
) -> PrefilterRule {
    PrefilterRule::new(field, patterns, candidate, reason)
        .expect("built-in prefilter patterns compile")
}
