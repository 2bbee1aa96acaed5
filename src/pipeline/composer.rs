//! Draft composer — reply-generation prompt and LLM call.
//!
//! Returns the model's reply body as opaque prose. No post-processing beyond
//! trimming; the text is shown or saved as-is.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::ModelConfig;
use crate::error::PipelineError;
use crate::llm::{ChatMessage, CompletionRequest, FinishReason, LlmProvider};
use crate::pipeline::classifier::{PROMPT_CONTENT_CHARS, truncated_text};
use crate::pipeline::types::{Classification, NormalizedMessage};

/// Writes reply drafts for messages classified as needing one.
pub struct DraftComposer {
    llm: Arc<dyn LlmProvider>,
    options: ModelConfig,
    assistant_name: String,
}

impl DraftComposer {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        options: ModelConfig,
        assistant_name: impl Into<String>,
    ) -> Self {
        Self {
            llm,
            options,
            assistant_name: assistant_name.into(),
        }
    }

    /// Generate a reply body. An empty completion is an error.
    pub async fn compose(
        &self,
        message: &NormalizedMessage,
        classification: &Classification,
    ) -> Result<String, PipelineError> {
        let prompt = build_draft_prompt(message, classification, &self.assistant_name);
        let request = CompletionRequest::new(vec![ChatMessage::user(prompt)])
            .with_model_options(&self.options);

        debug!(id = %message.id, model = self.llm.model_name(), "Calling LLM for draft");

        let response = self
            .llm
            .complete(request)
            .await
            .map_err(PipelineError::DraftGeneration)?;

        let draft = response.content.trim().to_string();
        if draft.is_empty() {
            return Err(PipelineError::EmptyDraft);
        }
        if response.finish_reason == FinishReason::Length {
            warn!(
                id = %message.id,
                max_tokens = self.options.num_predict,
                "Draft hit the token limit and may be cut short"
            );
        }

        info!(
            id = %message.id,
            chars = draft.chars().count(),
            input_tokens = response.input_tokens,
            output_tokens = response.output_tokens,
            "Draft generated"
        );
        Ok(draft)
    }
}

/// Build the reply-generation prompt.
pub fn build_draft_prompt(
    message: &NormalizedMessage,
    classification: &Classification,
    assistant_name: &str,
) -> String {
    format!(
        "You are a professional email assistant.\n\n\
         Context:\n\
         - Category: {category}\n\
         - Priority: {priority}\n\
         - Intent: {intent}\n\n\
         Email:\n\
         Subject: {subject}\n\
         From: {from}\n\
         Content (truncated): {content}\n\n\
         Write a professional, friendly reply email.\n\
         - Keep it concise and helpful\n\
         - Do not include a subject line, just the email body\n\
         - Do not invent facts or promises\n\
         - Mention a human will follow up if needed\n\
         - Sign off as \"{assistant_name}\"",
        category = classification.category,
        priority = classification.priority,
        intent = classification.intent,
        subject = message.subject,
        from = message.from,
        content = truncated_text(message, PROMPT_CONTENT_CHARS),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::error::LlmError;
    use crate::llm::{CompletionResponse, FinishReason};
    use crate::pipeline::types::{Category, Priority};

    fn message() -> NormalizedMessage {
        NormalizedMessage {
            id: "m1".into(),
            thread_id: None,
            subject: "Viewing on Saturday?".into(),
            from: "Bob <bob@example.com>".into(),
            reply_to: String::new(),
            date: "Unknown Date".into(),
            snippet: String::new(),
            body: "Is the flat on Elm Road still available for a viewing?".into(),
            text: "Is the flat on Elm Road still available for a viewing?".into(),
        }
    }

    fn classification() -> Classification {
        Classification {
            category: Category::Inquiry,
            priority: Priority::Medium,
            should_reply: true,
            intent: "Wants to book a viewing".into(),
            raw: String::new(),
        }
    }

    fn options() -> ModelConfig {
        ModelConfig {
            model: "mock-draft".into(),
            temperature: 0.2,
            num_ctx: 8192,
            num_predict: 350,
        }
    }

    /// Mock LLM that records the last request and returns fixed text.
    struct MockDraftLlm {
        reply: String,
        finish_reason: FinishReason,
        last_request: Mutex<Option<CompletionRequest>>,
    }

    impl MockDraftLlm {
        fn new(reply: &str) -> Self {
            Self {
                reply: reply.into(),
                finish_reason: FinishReason::Stop,
                last_request: Mutex::new(None),
            }
        }

        fn cut_off(reply: &str) -> Self {
            Self {
                finish_reason: FinishReason::Length,
                ..Self::new(reply)
            }
        }
    }

    #[async_trait::async_trait]
    impl LlmProvider for MockDraftLlm {
        fn model_name(&self) -> &str {
            "mock-draft"
        }

        async fn complete(
            &self,
            request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            *self.last_request.lock().unwrap() = Some(request);
            Ok(CompletionResponse {
                content: self.reply.clone(),
                input_tokens: 200,
                output_tokens: 60,
                finish_reason: self.finish_reason,
            })
        }
    }

    #[test]
    fn prompt_embeds_context_and_persona() {
        let prompt = build_draft_prompt(&message(), &classification(), "Acme Lettings");
        assert!(prompt.contains("- Category: inquiry"));
        assert!(prompt.contains("- Priority: medium"));
        assert!(prompt.contains("- Intent: Wants to book a viewing"));
        assert!(prompt.contains("Subject: Viewing on Saturday?"));
        assert!(prompt.contains("Elm Road"));
        assert!(prompt.contains("Sign off as \"Acme Lettings\""));
        assert!(prompt.contains("Do not invent facts or promises"));
    }

    #[tokio::test]
    async fn compose_trims_and_uses_draft_options() {
        let llm = Arc::new(MockDraftLlm::new("\n  Hi Bob,\n\nThanks!\n\nLENAH Assistant  \n"));
        let composer = DraftComposer::new(llm.clone(), options(), "LENAH Assistant");

        let draft = composer.compose(&message(), &classification()).await.unwrap();
        assert_eq!(draft, "Hi Bob,\n\nThanks!\n\nLENAH Assistant");

        let request = llm.last_request.lock().unwrap().take().unwrap();
        assert_eq!(request.temperature, Some(0.2));
        assert_eq!(request.max_tokens, Some(350));
        assert_eq!(request.context_window, Some(8192));
    }

    #[tokio::test]
    async fn compose_rejects_empty_draft() {
        let llm = Arc::new(MockDraftLlm::new("   \n"));
        let composer = DraftComposer::new(llm, options(), "LENAH Assistant");
        let err = composer.compose(&message(), &classification()).await.unwrap_err();
        assert!(matches!(err, PipelineError::EmptyDraft));
    }

    #[tokio::test]
    async fn compose_keeps_draft_cut_off_at_token_limit() {
        let llm = Arc::new(MockDraftLlm::cut_off("Hi Bob,\n\nThe flat is still"));
        let composer = DraftComposer::new(llm, options(), "LENAH Assistant");
        let draft = composer.compose(&message(), &classification()).await.unwrap();
        assert_eq!(draft, "Hi Bob,\n\nThe flat is still");
    }
}
