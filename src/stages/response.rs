//! Response stage: the main answer-model call.
//!
//! Blocking mode asks for one JSON document and classifies it. Streaming
//! mode pipes the raw token stream through [`StreamFieldExtractor`],
//! emitting decoded `assistant.text` deltas live while accumulating the full
//! document for the validator.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;

use crate::config::PipelineConfig;
use crate::context::{AgentContext, ContextDelta, RawAnswer};
use crate::events::{EventSink, PipelineEvent};
use crate::message::ChatMessage;
use crate::providers::{CompletionClient, ModelProfile, ProviderError, TokenChunk};
use crate::stream::{ExtractOutcome, StreamFieldExtractor, classify};

use super::Stage;

const ANSWER_PROMPT: &str = r#"You are an AI agent representing the site owner's resume and portfolio, with vector search access to their experience and background content.
The audience is hiring managers, recruiters, HR, or anyone just browsing.

**Context from portfolio content:**
{context_text}

**Current UI state:**
- Client view: {client_view}
- Server recommended view: {server_view}
- Producing artifacts: {producing_artifacts}

**Rules:**
- Speak as an agent representing the site owner, in third person. Never roleplay as them.
- Use retrieved text as the source of truth for experience/project claims.
- Background type content may flavor tone or illustrate experience, but must not introduce facts.
- If insufficient info, ask 1-2 short clarifying questions and provide 2-4 chips that are plausible short answers to them.
- Keep responses short and scannable. Never invent metrics or achievements.

**Response JSON:**
{"assistant": {"text": "..."}, "ui": {"view": "chat"|"split", "split": {"activeTab": "brief"|"experience"}}, "hints": {"suggestTab": null|"brief"|"experience"}, "chips": ["..."], "artifacts": {"fitBrief": {"title": "...", "sections": [{"id": "need|proof|risks|plan|questions", "title": "...", "content": "..."}]}, "relevantExperience": {"groups": [{"title": "...", "items": [{"slug": "slug-from-retrieval", "type": "experience"|"project", "title": "...", "company": "...", "role": "...", "period": "...", "bullets": ["..."], "whyRelevant": "..."}]}]}}}

**Artifact rules (only when view is "split"):**
- relevantExperience items: only slugs that appear in retrieved chunk labels, type "experience" or "project", never "background".
- Chunk labels are formatted [type:slug:chunkId]; use ONLY the middle part as the slug. From [experience:positium:0] the slug is "positium".
- Take title/company/role/period exactly from chunk metadata; leave them empty when absent, never infer.
- 2-4 grounded bullets per item, outcomes and metrics only when present in retrieved text.

Return ONLY valid JSON (no surrounding prose or code fences)."#;

/// Generates the structured answer, optionally streaming deltas live.
pub struct ResponseStage {
    completions: Arc<dyn CompletionClient>,
    config: PipelineConfig,
}

impl ResponseStage {
    pub fn new(completions: Arc<dyn CompletionClient>, config: PipelineConfig) -> Self {
        Self {
            completions,
            config,
        }
    }

    fn build_messages(&self, ctx: &AgentContext) -> Vec<ChatMessage> {
        let producing_artifacts = ctx.committed_view || ctx.router_ui.view.is_split();
        let prompt = ANSWER_PROMPT
            .replace("{context_text}", &ctx.context_text)
            .replace("{client_view}", ctx.client_view.as_str())
            .replace("{server_view}", ctx.router_ui.view.as_str())
            .replace(
                "{producing_artifacts}",
                if producing_artifacts { "yes" } else { "no" },
            );

        let mut messages = vec![ChatMessage::system(prompt)];
        for m in ctx.transcript_window(self.config.answer_message_window) {
            messages.push(ChatMessage::new(m.role, m.text.clone()));
        }
        messages
    }

    async fn run_blocking(&self, ctx: &AgentContext) -> Result<ContextDelta, ProviderError> {
        let messages = self.build_messages(ctx);
        let completion = self
            .completions
            .complete_json(&messages, ModelProfile::Answer)
            .await?;

        let (answer, streamed_text) = into_raw_answer(classify(&completion.text, String::new()));
        let mut delta = ContextDelta {
            answer: Some(answer),
            streamed_text: Some(streamed_text),
            ..Default::default()
        };
        if let Some(tokens) = completion.output_tokens {
            delta = delta.with_usage(self.name(), tokens);
        }
        Ok(delta)
    }

    async fn run_streaming(
        &self,
        ctx: &AgentContext,
        events: &EventSink,
    ) -> Result<ContextDelta, ProviderError> {
        let messages = self.build_messages(ctx);
        let mut stream = self
            .completions
            .stream_answer(&messages, ctx.reasoning_enabled)
            .await?;

        let mut extractor = StreamFieldExtractor::new();
        let mut reasoning = String::new();
        let mut output_tokens: Option<u64> = None;

        while let Some(item) = stream.next().await {
            match item {
                Ok(TokenChunk::Text(fragment)) => {
                    let delta = extractor.feed(&fragment);
                    if !delta.is_empty() {
                        events.emit(PipelineEvent::Text { delta });
                    }
                }
                Ok(TokenChunk::Reasoning(fragment)) => {
                    if !fragment.is_empty() {
                        reasoning.push_str(&fragment);
                        events.emit(PipelineEvent::Reasoning { delta: fragment });
                    }
                }
                Ok(TokenChunk::Usage { output_tokens: n }) => {
                    output_tokens = Some(n);
                }
                Err(err) => {
                    // The transport is already committed; salvage what
                    // streamed and let the validator shape a safe reply.
                    tracing::error!(stage = self.name(), error = %err, "token stream failed");
                    events.emit(PipelineEvent::Error {
                        message: "answer generation was interrupted".into(),
                    });
                    break;
                }
            }
        }

        let (answer, streamed_text) = into_raw_answer(extractor.finish());
        let mut delta = ContextDelta {
            answer: Some(answer),
            streamed_text: Some(streamed_text),
            reasoning_text: Some(reasoning),
            ..Default::default()
        };
        if let Some(tokens) = output_tokens {
            delta = delta.with_usage(self.name(), tokens);
        }
        Ok(delta)
    }
}

#[async_trait]
impl Stage for ResponseStage {
    fn name(&self) -> &'static str {
        "answer"
    }

    async fn run(
        &self,
        ctx: &AgentContext,
        events: &EventSink,
    ) -> Result<ContextDelta, ProviderError> {
        if events.is_streaming() {
            self.run_streaming(ctx, events).await
        } else {
            self.run_blocking(ctx).await
        }
    }
}

fn into_raw_answer(outcome: ExtractOutcome) -> (RawAnswer, String) {
    match outcome {
        ExtractOutcome::Parsed {
            document,
            streamed_text,
        } => (RawAnswer::Parsed(document), streamed_text),
        ExtractOutcome::Fallback {
            text,
            chips,
            streamed_text,
        } => (RawAnswer::Fallback { text, chips }, streamed_text),
        ExtractOutcome::Empty => (RawAnswer::Empty, String::new()),
    }
}
