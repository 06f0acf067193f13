//! Router stage: one cheap model call that rewrites the user's intent into a
//! retrieval query and proposes a UI directive.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::PipelineConfig;
use crate::context::{AgentContext, ContextDelta};
use crate::contract::{ActiveTab, Hints, UiDirective};
use crate::events::EventSink;
use crate::message::ChatMessage;
use crate::providers::{CompletionClient, ModelProfile, ProviderError};
use crate::stream::strip_code_fences;

use super::Stage;

const TRANSCRIPT_LINE_CAP: usize = 220;

const ROUTER_PROMPT: &str = r#"You are a router for a portfolio chat system with vector search access to the site owner's experience and background.
The audience is hiring managers, recruiters, HR, or anyone just browsing.
Analyze the user's message and conversation context, then return this JSON:

{"retrievalQuery": "...", "ui": {"view": "chat"|"split", "split": {"activeTab": "brief"|"experience"}}, "hints": {"suggestTab": null|"brief"|"experience"}}

Fields:
- retrievalQuery: rewritten query optimized for vector search over experience/project content (1-2 sentences)
- ui.view: recommend "split" when the user asks for evidence/experience, or after ~2+ user turns with meaningful context. If the client is already in "split", keep it there.
- ui.split.activeTab: "brief" or "experience" (only when view is "split")
- hints.suggestTab: subtle hint for which tab to focus, or null

Context:
- Current message count: {message_count}
- Current view: {current_view}{page_context}
- Recent transcript (most recent last):
{recent_context}

Return ONLY valid JSON, no markdown formatting."#;

/// Decides the retrieval query and UI intent for this turn.
pub struct RouterStage {
    completions: Arc<dyn CompletionClient>,
    config: PipelineConfig,
}

impl RouterStage {
    pub fn new(completions: Arc<dyn CompletionClient>, config: PipelineConfig) -> Self {
        Self {
            completions,
            config,
        }
    }

    fn build_prompt(&self, ctx: &AgentContext) -> String {
        let page_context = ctx
            .page_path
            .as_deref()
            .map(|p| format!("\nUser is currently on page: {p}"))
            .unwrap_or_default();

        let lines: Vec<String> = ctx
            .transcript_window(self.config.router_transcript_window)
            .into_iter()
            .filter(|m| !m.text.trim().is_empty())
            .map(|m| {
                let mut text = m.text.split_whitespace().collect::<Vec<_>>().join(" ");
                if text.chars().count() > TRANSCRIPT_LINE_CAP {
                    text = super::truncate_chars(&text, TRANSCRIPT_LINE_CAP);
                    text.push('…');
                }
                format!("- {}: {}", m.role.as_str(), text)
            })
            .collect();
        let recent_context = if lines.is_empty() {
            "(none)".to_string()
        } else {
            lines.join("\n")
        };

        ROUTER_PROMPT
            .replace("{message_count}", &ctx.messages.len().to_string())
            .replace("{current_view}", ctx.client_view.as_str())
            .replace("{page_context}", &page_context)
            .replace("{recent_context}", &recent_context)
    }
}

#[async_trait]
impl Stage for RouterStage {
    fn name(&self) -> &'static str {
        "router"
    }

    async fn run(
        &self,
        ctx: &AgentContext,
        _events: &EventSink,
    ) -> Result<ContextDelta, ProviderError> {
        let prompt = self.build_prompt(ctx);
        let messages = [
            ChatMessage::system(prompt),
            ChatMessage::user(ctx.last_user_text.clone()),
        ];
        let completion = self
            .completions
            .complete_json(&messages, ModelProfile::Router)
            .await?;

        // The router's output is advisory; anything unparseable falls back
        // to searching for the user's literal words in plain chat.
        let parsed: Value = serde_json::from_str(strip_code_fences(&completion.text))
            .unwrap_or(Value::Null);
        if !parsed.is_object() {
            tracing::warn!(stage = self.name(), "unparseable router output, using defaults");
        }

        let retrieval_query = parsed
            .get("retrievalQuery")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .unwrap_or(&ctx.last_user_text)
            .to_string();

        let router_ui = match parsed.get("ui") {
            Some(ui) if ui.is_object() => UiDirective::from_value(ui),
            _ => UiDirective::chat(),
        };

        let suggest_tab = ActiveTab::coerce(
            parsed
                .get("hints")
                .and_then(|h| h.get("suggestTab"))
                .and_then(Value::as_str),
        );

        tracing::debug!(
            stage = self.name(),
            query = %retrieval_query,
            view = router_ui.view.as_str(),
            "routed"
        );

        let mut delta = ContextDelta {
            retrieval_query: Some(retrieval_query),
            router_ui: Some(router_ui),
            router_hints: Some(Hints {
                suggest_share: false,
                suggest_tab,
            }),
            ..Default::default()
        };
        if let Some(tokens) = completion.output_tokens {
            delta = delta.with_usage(self.name(), tokens);
        }
        Ok(delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{ChatRequest, ViewMode};
    use crate::providers::{Completion, TokenStream};

    struct CannedRouter {
        reply: String,
    }

    #[async_trait]
    impl CompletionClient for CannedRouter {
        async fn complete_json(
            &self,
            _messages: &[ChatMessage],
            _profile: ModelProfile,
        ) -> Result<Completion, ProviderError> {
            Ok(Completion {
                text: self.reply.clone(),
                output_tokens: Some(7),
            })
        }

        async fn stream_answer(
            &self,
            _messages: &[ChatMessage],
            _reasoning: bool,
        ) -> Result<TokenStream, ProviderError> {
            Err(ProviderError::Backend {
                provider: "test",
                message: "not streamable".into(),
            })
        }
    }

    fn ctx(text: &str) -> AgentContext {
        AgentContext::from_request(&ChatRequest {
            conversation_id: "c1".into(),
            client: None,
            messages: vec![ChatMessage::user(text)],
        })
    }

    async fn run_router(reply: &str, ctx: &AgentContext) -> ContextDelta {
        let stage = RouterStage::new(
            Arc::new(CannedRouter {
                reply: reply.into(),
            }),
            PipelineConfig::default(),
        );
        stage.run(ctx, &EventSink::disabled()).await.unwrap()
    }

    #[tokio::test]
    async fn parses_well_formed_output() {
        let reply = r#"{"retrievalQuery": "product leadership in telecom",
            "ui": {"view": "split", "split": {"activeTab": "experience"}},
            "hints": {"suggestTab": "experience"}}"#;
        let ctx = ctx("have you led products?");
        let delta = run_router(reply, &ctx).await;

        assert_eq!(
            delta.retrieval_query.as_deref(),
            Some("product leadership in telecom")
        );
        assert_eq!(delta.router_ui.unwrap().view, ViewMode::Split);
        assert_eq!(
            delta.router_hints.unwrap().suggest_tab,
            Some(ActiveTab::Experience)
        );
        assert_eq!(delta.usage, vec![("router".to_string(), 7)]);
    }

    #[tokio::test]
    async fn malformed_output_falls_back_to_defaults() {
        let ctx = ctx("tell me about projects");
        let delta = run_router("sorry, I can't do JSON today", &ctx).await;

        assert_eq!(
            delta.retrieval_query.as_deref(),
            Some("tell me about projects")
        );
        assert_eq!(delta.router_ui.unwrap(), UiDirective::chat());
        assert_eq!(delta.router_hints.unwrap().suggest_tab, None);
    }

    #[tokio::test]
    async fn fenced_output_is_unwrapped() {
        let reply = "```json\n{\"retrievalQuery\": \"q\", \"ui\": {\"view\": \"chat\"}}\n```";
        let ctx = ctx("hi");
        let delta = run_router(reply, &ctx).await;
        assert_eq!(delta.retrieval_query.as_deref(), Some("q"));
    }

    #[test]
    fn prompt_clamps_long_transcript_lines() {
        let stage = RouterStage::new(
            Arc::new(CannedRouter {
                reply: String::new(),
            }),
            PipelineConfig::default(),
        );
        let long = "word ".repeat(100);
        let ctx = ctx(&long);
        let prompt = stage.build_prompt(&ctx);
        let line = prompt
            .lines()
            .find(|l| l.starts_with("- user:"))
            .expect("transcript line present");
        assert!(line.chars().count() < TRANSCRIPT_LINE_CAP + 20);
        assert!(line.ends_with('…'));
    }
}
