//! Triage pipeline.
//!
//! Every fetched message flows through:
//! 1. `normalize::normalize()` — raw transport message → canonical record
//! 2. `RulesEngine::evaluate()` — fast pattern matching (no LLM)
//! 3. `Classifier::classify()` — LLM triage plus deterministic overrides
//! 4. `DraftComposer::compose()` — reply body, only when a reply is warranted
//! 5. `TriageProcessor` — sequencing, dry-run gate, one audit event per message
//!
//! **Nothing is sent.** At most a draft is saved, and never in dry-run mode.

pub mod classifier;
pub mod composer;
pub mod normalize;
pub mod processor;
pub mod rules;
pub mod types;
