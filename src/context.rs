//! Shared pipeline state and the deltas stages produce.
//!
//! Stages never mutate [`AgentContext`] directly. Each one reads an immutable
//! snapshot and returns a [`ContextDelta`]; the orchestrator folds deltas in
//! stage order with last-write-wins per field. That keeps every stage a pure
//! function of its inputs and makes the data flow between stages explicit.

use std::collections::BTreeMap;

use crate::chunks::RetrievalSet;
use crate::contract::{ActiveTab, ChatRequest, ChatResponse, Hints, UiDirective, ViewMode};
use crate::message::{ChatMessage, Role};

/// The answer model's output, after stream classification but before
/// validation.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum RawAnswer {
    /// No answer produced yet (or the model emitted nothing at all).
    #[default]
    Empty,
    /// The full output parsed as a JSON object.
    Parsed(serde_json::Value),
    /// The output was not valid JSON; the streamed projection (or raw text)
    /// stands in as the reply, with any chips salvaged from the tail.
    Fallback { text: String, chips: Vec<String> },
}

/// Everything the pipeline knows about one chat turn.
#[derive(Clone, Debug, Default)]
pub struct AgentContext {
    pub conversation_id: String,
    /// Full transcript as received; stages apply their own windows.
    pub messages: Vec<ChatMessage>,
    /// Text of the most recent user message, with a neutral stand-in when
    /// the transcript carries none.
    pub last_user_text: String,

    // Client-reported state.
    pub client_view: ViewMode,
    pub client_active_tab: Option<ActiveTab>,
    pub page_path: Option<String>,
    pub page_active_slug: Option<String>,
    pub reasoning_enabled: bool,
    /// True when the client is already rendering the split view. A committed
    /// view is never demoted, even when this turn produces no artifacts.
    pub committed_view: bool,

    // Written by stages.
    pub retrieval_query: String,
    pub router_ui: UiDirective,
    pub router_hints: Hints,
    pub retrieval: RetrievalSet,
    pub context_text: String,
    pub answer: RawAnswer,
    /// Assistant text observed live on the stream, used as the fallback
    /// reply so users never see text differing from what streamed.
    pub streamed_text: String,
    pub reasoning_text: String,
    pub response: Option<ChatResponse>,
    pub usage_by_stage: BTreeMap<String, u64>,
}

impl AgentContext {
    /// Seeds a context from an inbound request.
    #[must_use]
    pub fn from_request(req: &ChatRequest) -> Self {
        let last_user_text = req
            .messages
            .iter()
            .rev()
            .find(|m| m.has_role(Role::User))
            .map(|m| m.text.clone())
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| "hello".to_string());

        let client = req.client.clone().unwrap_or_default();
        let ui = client.ui.unwrap_or_default();
        let client_view = ui.view.unwrap_or_default();
        let client_active_tab = ui.split.and_then(|s| s.active_tab);
        let (page_path, page_active_slug) = client
            .page
            .map(|p| (p.path, p.active_slug))
            .unwrap_or_default();

        Self {
            conversation_id: req.conversation_id.clone(),
            messages: req.messages.clone(),
            last_user_text,
            committed_view: client_view.is_split(),
            client_view,
            client_active_tab,
            page_path,
            page_active_slug,
            reasoning_enabled: client.reasoning_enabled.unwrap_or(true),
            ..Self::default()
        }
    }

    /// Last `window` messages, excluding system entries.
    #[must_use]
    pub fn transcript_window(&self, window: usize) -> Vec<&ChatMessage> {
        let filtered: Vec<&ChatMessage> = self
            .messages
            .iter()
            .filter(|m| !m.has_role(Role::System))
            .collect();
        let start = filtered.len().saturating_sub(window);
        filtered[start..].to_vec()
    }

    /// Folds one stage's output into the context. Later stages overwrite
    /// earlier values field by field; usage entries accumulate.
    pub fn apply(&mut self, delta: ContextDelta) {
        if let Some(v) = delta.retrieval_query {
            self.retrieval_query = v;
        }
        if let Some(v) = delta.router_ui {
            self.router_ui = v;
        }
        if let Some(v) = delta.router_hints {
            self.router_hints = v;
        }
        if let Some(v) = delta.retrieval {
            self.retrieval = v;
        }
        if let Some(v) = delta.context_text {
            self.context_text = v;
        }
        if let Some(v) = delta.answer {
            self.answer = v;
        }
        if let Some(v) = delta.streamed_text {
            self.streamed_text = v;
        }
        if let Some(v) = delta.reasoning_text {
            self.reasoning_text = v;
        }
        if let Some(v) = delta.response {
            self.response = Some(v);
        }
        for (stage, tokens) in delta.usage {
            *self.usage_by_stage.entry(stage).or_default() += tokens;
        }
    }
}

/// One stage's contribution to the context. `None` fields leave the current
/// value in place.
#[derive(Clone, Debug, Default)]
pub struct ContextDelta {
    pub retrieval_query: Option<String>,
    pub router_ui: Option<UiDirective>,
    pub router_hints: Option<Hints>,
    pub retrieval: Option<RetrievalSet>,
    pub context_text: Option<String>,
    pub answer: Option<RawAnswer>,
    pub streamed_text: Option<String>,
    pub reasoning_text: Option<String>,
    pub response: Option<ChatResponse>,
    /// `(stage name, output tokens)` pairs to add to the usage tally.
    pub usage: Vec<(String, u64)>,
}

impl ContextDelta {
    /// Records token usage under a stage name.
    #[must_use]
    pub fn with_usage(mut self, stage: &str, output_tokens: u64) -> Self {
        self.usage.push((stage.to_string(), output_tokens));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{ClientInfo, ClientUiState, SplitState};

    fn request(messages: Vec<ChatMessage>) -> ChatRequest {
        ChatRequest {
            conversation_id: "c1".into(),
            client: None,
            messages,
        }
    }

    #[test]
    fn seeds_last_user_text_with_fallback() {
        let ctx = AgentContext::from_request(&request(vec![
            ChatMessage::user("first"),
            ChatMessage::assistant("reply"),
            ChatMessage::user("  "),
        ]));
        assert_eq!(ctx.last_user_text, "hello");

        let ctx = AgentContext::from_request(&request(vec![
            ChatMessage::user("old"),
            ChatMessage::user("latest question"),
        ]));
        assert_eq!(ctx.last_user_text, "latest question");
    }

    #[test]
    fn committed_view_tracks_client_split() {
        let mut req = request(vec![ChatMessage::user("hi")]);
        req.client = Some(ClientInfo {
            ui: Some(ClientUiState {
                view: Some(ViewMode::Split),
                split: Some(SplitState {
                    active_tab: Some(ActiveTab::Experience),
                }),
            }),
            ..Default::default()
        });
        let ctx = AgentContext::from_request(&req);
        assert!(ctx.committed_view);
        assert_eq!(ctx.client_active_tab, Some(ActiveTab::Experience));

        let ctx = AgentContext::from_request(&request(vec![ChatMessage::user("hi")]));
        assert!(!ctx.committed_view);
        assert!(ctx.reasoning_enabled);
    }

    #[test]
    fn transcript_window_skips_system_and_trims() {
        let ctx = AgentContext::from_request(&request(vec![
            ChatMessage::system("rules"),
            ChatMessage::user("one"),
            ChatMessage::assistant("two"),
            ChatMessage::user("three"),
        ]));
        let window = ctx.transcript_window(2);
        assert_eq!(window.len(), 2);
        assert_eq!(window[0].text, "two");
        assert_eq!(window[1].text, "three");
    }

    #[test]
    fn apply_is_last_write_wins_and_accumulates_usage() {
        let mut ctx = AgentContext::default();
        ctx.apply(ContextDelta {
            retrieval_query: Some("first".into()),
            ..Default::default()
        });
        ctx.apply(
            ContextDelta {
                retrieval_query: Some("second".into()),
                ..Default::default()
            }
            .with_usage("router", 10),
        );
        ctx.apply(ContextDelta::default().with_usage("router", 5));

        assert_eq!(ctx.retrieval_query, "second");
        assert_eq!(ctx.usage_by_stage["router"], 15);
    }
}
