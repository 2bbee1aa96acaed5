//! Triage processor — runs every fetched message through the pipeline.
//!
//! **Core invariant: no draft is saved in dry-run mode.** Dry runs generate
//! and preview drafts only; `Mailbox::create_draft` is never called.
//!
//! Flow, per message:
//! 1. Rules engine (fast, no LLM) → rejected messages stop here
//! 2. LLM classification with deterministic overrides
//! 3. Draft composition when a reply is warranted
//! 4. Exactly one audit event, written when the message is done
//!
//! Per-message failures become error audit events and the batch continues.
//! Fetch and audit-write failures abort the run.

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::audit::{AuditEvent, AuditOutcome, AuditSink, DecisionRecord, JsonlAuditLog};
use crate::config::{AppConfig, TriageConfig};
use crate::error::{AuditError, PipelineError};
use crate::llm::create_provider;
use crate::mailbox::{self, DraftRequest, Mailbox};
use crate::pipeline::classifier::Classifier;
use crate::pipeline::composer::DraftComposer;
use crate::pipeline::normalize::normalize;
use crate::pipeline::rules::RulesEngine;
use crate::pipeline::types::{Classification, NormalizedMessage};

/// Characters of a dry-run draft kept in the audit event.
pub const DRAFT_PREVIEW_CHARS: usize = 800;

/// Characters of a dry-run draft shown in the log.
const LOG_PREVIEW_CHARS: usize = 400;

/// Characters of message text shown in per-message progress logs.
const PROGRESS_PREVIEW_CHARS: usize = 120;

/// Counts for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub total: usize,
    /// Stopped by the prefilter.
    pub rejected: usize,
    /// Reached the classifier and completed.
    pub classified: usize,
    /// Saved as mailbox drafts.
    pub drafted: usize,
    /// Generated in dry-run mode, preview only.
    pub previewed: usize,
    pub failed: usize,
    pub audit_path: String,
}

impl RunSummary {
    fn new(audit_path: String) -> Self {
        Self {
            audit_path,
            ..Default::default()
        }
    }

    fn record(&mut self, event: &AuditEvent) {
        self.total += 1;
        match &event.outcome {
            AuditOutcome::Failure { .. } => self.failed += 1,
            AuditOutcome::Decision(record) => {
                if !record.prefilter.candidate {
                    self.rejected += 1;
                    return;
                }
                self.classified += 1;
                if record.draft_created {
                    self.drafted += 1;
                }
                if record.draft_preview.is_some() {
                    self.previewed += 1;
                }
            }
        }
    }
}

/// Triage processor — prefilter, classify, draft, audit.
pub struct TriageProcessor {
    mailbox: Arc<dyn Mailbox>,
    rules: RulesEngine,
    classifier: Classifier,
    composer: DraftComposer,
    audit: Arc<dyn AuditSink>,
    config: TriageConfig,
}

impl TriageProcessor {
    pub fn new(
        mailbox: Arc<dyn Mailbox>,
        rules: RulesEngine,
        classifier: Classifier,
        composer: DraftComposer,
        audit: Arc<dyn AuditSink>,
        config: TriageConfig,
    ) -> Self {
        Self {
            mailbox,
            rules,
            classifier,
            composer,
            audit,
            config,
        }
    }

    /// Wire a processor from application config.
    ///
    /// The audit file is created only after the mailbox and both models are
    /// ready, so a failed setup leaves no empty run file behind.
    pub async fn from_config(config: &AppConfig) -> crate::error::Result<Self> {
        let mailbox = mailbox::connect(&config.mailbox).await?;
        let classify_llm = create_provider(&config.inference, &config.inference.classify)?;
        let draft_llm = create_provider(&config.inference, &config.inference.draft)?;

        let triage = &config.triage;
        let rules = RulesEngine::default_rules().with_default_candidate(triage.default_candidate);
        let audit = JsonlAuditLog::create_in(&triage.audit_dir).await?;
        info!(path = %audit.path().display(), "Audit log opened");

        Ok(Self::new(
            mailbox,
            rules,
            Classifier::new(classify_llm, config.inference.classify.clone()),
            DraftComposer::new(draft_llm, config.inference.draft.clone(), &triage.assistant_name),
            Arc::new(audit),
            triage.clone(),
        ))
    }

    /// Fetch a batch from the mailbox and process it.
    pub async fn run(&self) -> crate::error::Result<RunSummary> {
        let raw = self
            .mailbox
            .fetch(&self.config.query, self.config.max_results)
            .await?;
        info!(
            mailbox = self.mailbox.name(),
            query = %self.config.query,
            count = raw.len(),
            "Fetched messages"
        );

        let messages: Vec<NormalizedMessage> = raw.iter().map(normalize).collect();
        Ok(self.process_batch(&messages).await?)
    }

    /// Process messages in order, one audit event each.
    ///
    /// Only an audit write failure stops the batch.
    pub async fn process_batch(
        &self,
        messages: &[NormalizedMessage],
    ) -> Result<RunSummary, AuditError> {
        let count = messages.len();
        let mut summary = RunSummary::new(self.audit.location());

        for (index, message) in messages.iter().enumerate() {
            info!(
                index = index + 1,
                total = count,
                id = %message.id,
                subject = %message.subject,
                from = %message.from,
                preview = %message.preview(PROGRESS_PREVIEW_CHARS),
                "Processing message"
            );

            let event = self.process(message).await;
            summary.record(&event);
            self.audit.append(&event).await?;
        }

        info!(
            total = summary.total,
            rejected = summary.rejected,
            classified = summary.classified,
            drafted = summary.drafted,
            previewed = summary.previewed,
            failed = summary.failed,
            "Batch processing complete"
        );
        Ok(summary)
    }

    /// Process one message. Never fails: errors become an error event.
    pub async fn process(&self, message: &NormalizedMessage) -> AuditEvent {
        match self.decide(message).await {
            Ok(record) => AuditEvent::decision(message, record),
            Err(e) => {
                error!(id = %message.id, error = %e, "Error processing message");
                AuditEvent::failure(message, e.to_string())
            }
        }
    }

    async fn decide(&self, message: &NormalizedMessage) -> Result<DecisionRecord, PipelineError> {
        let verdict = self.rules.evaluate(message);
        let mut record = DecisionRecord {
            query: self.config.query.clone(),
            prefilter: verdict,
            classification: None,
            draft_created: false,
            draft_id: None,
            draft_preview: None,
            dry_run: self.config.dry_run,
        };

        if !verdict.candidate {
            info!(id = %message.id, reason = %verdict.reason, "Skipping LLM (prefilter)");
            return Ok(record);
        }

        let classification = self.classifier.classify(message).await?;
        record.classification = Some(Classification {
            raw: String::new(),
            ..classification.clone()
        });

        if !classification.should_reply {
            return Ok(record);
        }

        let draft = self.composer.compose(message, &classification).await?;

        if self.config.dry_run {
            info!(
                id = %message.id,
                preview = %log_preview(&draft),
                "DRY_RUN: draft generated, not saved"
            );
            record.draft_preview = Some(draft.chars().take(DRAFT_PREVIEW_CHARS).collect());
        } else {
            let request = DraftRequest::reply(message, &draft);
            let draft_id = self.mailbox.create_draft(&request).await?;
            if draft_id.is_empty() {
                warn!(id = %message.id, "Mailbox returned an empty draft id");
            }
            info!(id = %message.id, draft_id = %draft_id, to = %request.to, "Draft created");
            record.draft_created = true;
            record.draft_id = Some(draft_id);
        }

        Ok(record)
    }
}

fn log_preview(draft: &str) -> String {
    let head: String = draft.chars().take(LOG_PREVIEW_CHARS).collect();
    if draft.chars().count() > LOG_PREVIEW_CHARS {
        format!("{head}...")
    } else {
        head
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use base64::Engine;

    use crate::config::ModelConfig;
    use crate::error::{Error, LlmError, MailboxError};
    use crate::llm::{CompletionRequest, CompletionResponse, FinishReason, LlmProvider};
    use crate::mailbox::{Header, MessagePart, RawMessage};
    use crate::pipeline::types::{Category, Priority, PrefilterReason};

    // ── Mocks ───────────────────────────────────────────────────

    /// Mock LLM returning a fixed reply; fails when the prompt contains `fail_on`.
    struct MockLlm {
        reply: String,
        fail_on: Option<&'static str>,
        calls: AtomicUsize,
    }

    impl MockLlm {
        fn new(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.into(),
                fail_on: None,
                calls: AtomicUsize::new(0),
            })
        }

        fn failing_on(reply: &str, marker: &'static str) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.into(),
                fail_on: Some(marker),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl LlmProvider for MockLlm {
        fn model_name(&self) -> &str {
            "mock"
        }

        async fn complete(
            &self,
            request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let should_fail = self
                .fail_on
                .is_some_and(|marker| request.messages.iter().any(|m| m.content.contains(marker)));
            if should_fail {
                return Err(LlmError::RequestFailed {
                    provider: "mock".into(),
                    reason: "connection refused".into(),
                });
            }
            Ok(CompletionResponse {
                content: self.reply.clone(),
                input_tokens: 10,
                output_tokens: 10,
                finish_reason: FinishReason::Stop,
            })
        }
    }

    #[derive(Default)]
    struct MockMailbox {
        messages: Vec<RawMessage>,
        fail_fetch: bool,
        fail_draft: bool,
        drafts: Mutex<Vec<DraftRequest>>,
    }

    #[async_trait::async_trait]
    impl Mailbox for MockMailbox {
        fn name(&self) -> &str {
            "mock"
        }

        async fn fetch(
            &self,
            _query: &str,
            max_results: u32,
        ) -> Result<Vec<RawMessage>, MailboxError> {
            if self.fail_fetch {
                return Err(MailboxError::Connection {
                    name: "mock".into(),
                    reason: "offline".into(),
                });
            }
            Ok(self
                .messages
                .iter()
                .take(max_results as usize)
                .cloned()
                .collect())
        }

        async fn create_draft(&self, draft: &DraftRequest) -> Result<String, MailboxError> {
            if self.fail_draft {
                return Err(MailboxError::Api {
                    name: "mock".into(),
                    status: 500,
                    body: "backend error".into(),
                });
            }
            let mut drafts = self.drafts.lock().unwrap();
            drafts.push(draft.clone());
            Ok(format!("draft-{}", drafts.len()))
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<AuditEvent>>,
        fail: bool,
    }

    impl RecordingSink {
        fn events(&self) -> Vec<AuditEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl AuditSink for RecordingSink {
        async fn append(&self, event: &AuditEvent) -> Result<(), AuditError> {
            if self.fail {
                return Err(AuditError::Io(std::io::Error::other("disk full")));
            }
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }

        fn location(&self) -> String {
            "memory".into()
        }
    }

    // ── Helpers ─────────────────────────────────────────────────

    const REPLY_YES: &str =
        "Category: complaint\nPriority: high\nShould_Reply: yes\nIntent: Boiler leak repair";
    const REPLY_NO: &str =
        "Category: general\nPriority: low\nShould_Reply: no\nIntent: FYI update";

    fn raw(id: &str, from: &str, subject: &str, body: &str) -> RawMessage {
        RawMessage {
            id: id.into(),
            thread_id: Some(format!("thread-{id}")),
            snippet: String::new(),
            payload: MessagePart {
                mime_type: "text/plain".into(),
                headers: vec![Header::new("From", from), Header::new("Subject", subject)],
                data: Some(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(body)),
                parts: vec![],
            },
        }
    }

    fn boiler() -> RawMessage {
        raw(
            "m1",
            "Tenant <tenant@example.com>",
            "Leaking boiler in flat 4",
            "The boiler is leaking, please arrange a repair.",
        )
    }

    fn newsletter() -> RawMessage {
        raw(
            "m2",
            "newsletter@acme.com",
            "Weekly Digest",
            "This week's top stories",
        )
    }

    fn model() -> ModelConfig {
        ModelConfig {
            model: "mock".into(),
            temperature: 0.0,
            num_ctx: 4096,
            num_predict: 120,
        }
    }

    fn processor(
        mailbox: Arc<MockMailbox>,
        classify: Arc<MockLlm>,
        draft: Arc<MockLlm>,
        sink: Arc<RecordingSink>,
        dry_run: bool,
    ) -> TriageProcessor {
        let config = TriageConfig {
            dry_run,
            ..TriageConfig::default()
        };
        TriageProcessor::new(
            mailbox,
            RulesEngine::default_rules(),
            Classifier::new(classify, model()),
            DraftComposer::new(draft, model(), config.assistant_name.clone()),
            sink,
            config,
        )
    }

    // ── Tests ───────────────────────────────────────────────────

    #[tokio::test]
    async fn prefilter_rejection_skips_llm() {
        let mailbox = Arc::new(MockMailbox {
            messages: vec![newsletter()],
            ..Default::default()
        });
        let classify = MockLlm::new(REPLY_YES);
        let draft = MockLlm::new("Hello");
        let sink = Arc::new(RecordingSink::default());
        let p = processor(mailbox, classify.clone(), draft.clone(), sink.clone(), true);

        let summary = p.run().await.unwrap();
        assert_eq!(summary.total, 1);
        assert_eq!(summary.rejected, 1);
        assert_eq!(classify.calls(), 0);
        assert_eq!(draft.calls(), 0);

        let events = sink.events();
        assert_eq!(events.len(), 1);
        let record = events[0].record().unwrap();
        assert!(!record.prefilter.candidate);
        assert_eq!(record.prefilter.reason, PrefilterReason::BlockedSenderPattern);
        assert!(record.classification.is_none());
        assert!(!record.draft_created);
        assert!(record.draft_id.is_none());
    }

    #[tokio::test]
    async fn dry_run_previews_without_creating_draft() {
        let mailbox = Arc::new(MockMailbox {
            messages: vec![boiler()],
            ..Default::default()
        });
        let long_draft = "Thanks for letting us know. ".repeat(100);
        let classify = MockLlm::new(REPLY_YES);
        let draft = MockLlm::new(&long_draft);
        let sink = Arc::new(RecordingSink::default());
        let p = processor(mailbox.clone(), classify, draft.clone(), sink.clone(), true);

        let summary = p.run().await.unwrap();
        assert_eq!(summary.classified, 1);
        assert_eq!(summary.previewed, 1);
        assert_eq!(summary.drafted, 0);
        assert_eq!(draft.calls(), 1);
        assert!(mailbox.drafts.lock().unwrap().is_empty());

        let events = sink.events();
        let record = events[0].record().unwrap();
        assert_eq!(record.prefilter.reason, PrefilterReason::AllowHint);
        assert!(record.dry_run);
        assert!(!record.draft_created);
        assert!(record.draft_id.is_none());
        let preview = record.draft_preview.as_deref().unwrap();
        assert_eq!(preview.chars().count(), DRAFT_PREVIEW_CHARS);
        assert!(long_draft.trim().starts_with(preview.trim_end()));

        let c = record.classification.as_ref().unwrap();
        assert_eq!(c.category, Category::Complaint);
        assert!(c.should_reply);
        assert!(c.raw.is_empty());
    }

    #[tokio::test]
    async fn live_run_creates_threaded_reply_draft() {
        let mut message = boiler();
        message
            .payload
            .headers
            .push(Header::new("Reply-To", "Lettings <lettings@example.com>"));
        let mailbox = Arc::new(MockMailbox {
            messages: vec![message],
            ..Default::default()
        });
        let sink = Arc::new(RecordingSink::default());
        let p = processor(
            mailbox.clone(),
            MockLlm::new(REPLY_YES),
            MockLlm::new("We will send an engineer."),
            sink.clone(),
            false,
        );

        let summary = p.run().await.unwrap();
        assert_eq!(summary.drafted, 1);
        assert_eq!(summary.previewed, 0);

        let drafts = mailbox.drafts.lock().unwrap().clone();
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].to, "lettings@example.com");
        assert_eq!(drafts[0].subject, "Re: Leaking boiler in flat 4");
        assert_eq!(drafts[0].thread_id.as_deref(), Some("thread-m1"));
        assert_eq!(drafts[0].body, "We will send an engineer.");

        let events = sink.events();
        let record = events[0].record().unwrap();
        assert!(record.draft_created);
        assert!(!record.dry_run);
        assert_eq!(record.draft_id.as_deref(), Some("draft-1"));
        assert!(record.draft_preview.is_none());
    }

    #[tokio::test]
    async fn no_reply_skips_composer() {
        let mailbox = Arc::new(MockMailbox {
            messages: vec![boiler()],
            ..Default::default()
        });
        let draft = MockLlm::new("Hello");
        let sink = Arc::new(RecordingSink::default());
        let p = processor(mailbox.clone(), MockLlm::new(REPLY_NO), draft.clone(), sink.clone(), false);

        let summary = p.run().await.unwrap();
        assert_eq!(summary.classified, 1);
        assert_eq!(draft.calls(), 0);
        assert!(mailbox.drafts.lock().unwrap().is_empty());
        let record = sink.events()[0].record().cloned().unwrap();
        assert_eq!(record.classification.unwrap().priority, Priority::Low);
        assert!(!record.draft_created);
    }

    #[tokio::test]
    async fn ignore_verdict_never_drafts() {
        let mailbox = Arc::new(MockMailbox {
            messages: vec![boiler()],
            ..Default::default()
        });
        let draft = MockLlm::new("Hello");
        let sink = Arc::new(RecordingSink::default());
        let p = processor(
            mailbox.clone(),
            MockLlm::new("Category: ignore\nPriority: high\nShould_Reply: yes\nIntent: spam"),
            draft.clone(),
            sink.clone(),
            false,
        );

        p.run().await.unwrap();
        assert_eq!(draft.calls(), 0);
        let record = sink.events()[0].record().cloned().unwrap();
        let c = record.classification.unwrap();
        assert_eq!(c.category, Category::Ignore);
        assert!(!c.should_reply);
        assert!(!record.draft_created);
    }

    #[tokio::test]
    async fn classification_failure_is_isolated() {
        let failing = raw(
            "m0",
            "Tenant <t@example.com>",
            "FAIL: deposit question",
            "When is my deposit returned?",
        );
        let mailbox = Arc::new(MockMailbox {
            messages: vec![failing, boiler()],
            ..Default::default()
        });
        let sink = Arc::new(RecordingSink::default());
        let p = processor(
            mailbox,
            MockLlm::failing_on(REPLY_NO, "FAIL:"),
            MockLlm::new("Hello"),
            sink.clone(),
            true,
        );

        let summary = p.run().await.unwrap();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.classified, 1);

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert!(events[0].is_failure());
        assert_eq!(events[0].message_id, "m0");
        match &events[0].outcome {
            AuditOutcome::Failure { error } => assert!(error.contains("connection refused")),
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(!events[1].is_failure());
    }

    #[tokio::test]
    async fn draft_creation_failure_becomes_error_event() {
        let mailbox = Arc::new(MockMailbox {
            messages: vec![boiler()],
            fail_draft: true,
            ..Default::default()
        });
        let sink = Arc::new(RecordingSink::default());
        let p = processor(mailbox, MockLlm::new(REPLY_YES), MockLlm::new("Hi"), sink.clone(), false);

        let summary = p.run().await.unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.drafted, 0);
        let events = sink.events();
        match &events[0].outcome {
            AuditOutcome::Failure { error } => {
                assert!(error.starts_with("Draft creation failed"));
                assert!(error.contains("backend error"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn one_event_per_message_in_order() {
        let mailbox = Arc::new(MockMailbox {
            messages: vec![newsletter(), boiler(), newsletter()],
            ..Default::default()
        });
        let sink = Arc::new(RecordingSink::default());
        let p = processor(mailbox, MockLlm::new(REPLY_YES), MockLlm::new("Hi"), sink.clone(), true);

        let summary = p.run().await.unwrap();
        let ids: Vec<String> = sink.events().into_iter().map(|e| e.message_id).collect();
        assert_eq!(ids, vec!["m2", "m1", "m2"]);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.rejected, 2);
        assert_eq!(summary.audit_path, "memory");
    }

    #[tokio::test]
    async fn fetch_failure_aborts_run() {
        let mailbox = Arc::new(MockMailbox {
            fail_fetch: true,
            ..Default::default()
        });
        let sink = Arc::new(RecordingSink::default());
        let p = processor(mailbox, MockLlm::new(REPLY_YES), MockLlm::new("Hi"), sink.clone(), true);

        let err = p.run().await.unwrap_err();
        assert!(matches!(err, Error::Mailbox(_)));
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn audit_failure_aborts_run() {
        let mailbox = Arc::new(MockMailbox {
            messages: vec![newsletter(), boiler()],
            ..Default::default()
        });
        let sink = Arc::new(RecordingSink {
            fail: true,
            ..Default::default()
        });
        let classify = MockLlm::new(REPLY_YES);
        let p = processor(mailbox, classify.clone(), MockLlm::new("Hi"), sink, true);

        let err = p.run().await.unwrap_err();
        assert!(matches!(err, Error::Audit(_)));
        assert_eq!(classify.calls(), 0);
    }

    #[tokio::test]
    async fn max_results_bounds_batch() {
        let mailbox = Arc::new(MockMailbox {
            messages: vec![newsletter(), newsletter(), newsletter()],
            ..Default::default()
        });
        let sink = Arc::new(RecordingSink::default());
        let mut p = processor(mailbox, MockLlm::new(REPLY_YES), MockLlm::new("Hi"), sink.clone(), true);
        p.config.max_results = 2;

        let summary = p.run().await.unwrap();
        assert_eq!(summary.total, 2);
    }

    #[test]
    fn log_preview_truncates_with_ellipsis() {
        assert_eq!(log_preview("short"), "short");
        let long = "x".repeat(500);
        let preview = log_preview(&long);
        assert_eq!(preview.chars().count(), LOG_PREVIEW_CHARS + 3);
        assert!(preview.ends_with("..."));
    }
}
