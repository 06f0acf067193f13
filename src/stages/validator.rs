//! Validator stage: repairs the combined router/answer output into the one
//! contract shape the client is allowed to see.
//!
//! Nothing the model asserted is trusted past this point. Slugs are
//! re-checked against store truth, item metadata is overridden from the
//! store record, and a split view with nothing to show is downgraded to
//! chat. Repairs happen in place; this stage never errors on model output.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::chunks::{ChunkKind, ItemRecord};
use crate::context::{AgentContext, ContextDelta, RawAnswer};
use crate::contract::{
    ActiveTab, Artifacts, AssistantBlock, ChatResponse, ExperienceGroup, ExperienceItem, FitBrief,
    FitBriefSection, Hints, UiDirective, ViewMode,
};
use crate::events::EventSink;
use crate::providers::{ProviderError, VectorStore};

use super::{Stage, truncate_chars};

/// Shown instead of an empty or missing reply.
pub const APOLOGY_TEXT: &str = "Whoa... a problem occurred! Please try that again.";

const MAX_CHIPS: usize = 6;
const MAX_SECTIONS: usize = 10;
const MAX_GROUPS: usize = 5;
const MAX_ITEMS_PER_GROUP: usize = 10;
const MAX_BULLETS: usize = 6;
const MAX_SECTION_TITLE: usize = 100;
const MAX_SECTION_CONTENT: usize = 2000;
const MAX_META: usize = 200;
const MAX_PERIOD: usize = 100;
const MAX_WHY: usize = 500;

/// Reconciles stage outputs into the final [`ChatResponse`].
pub struct ValidatorStage {
    store: Arc<dyn VectorStore>,
}

impl ValidatorStage {
    pub fn new(store: Arc<dyn VectorStore>) -> Self {
        Self { store }
    }

    async fn lookup(&self, slug: &str) -> Result<Option<ItemRecord>, ProviderError> {
        Ok(self
            .store
            .get_by_slug(slug)
            .await?
            .as_ref()
            .and_then(ItemRecord::from_payload))
    }

    /// Re-grounds one asserted experience item. `None` means dropped.
    async fn validate_item(&self, raw: &Value) -> Result<Option<ExperienceItem>, ProviderError> {
        let slug = raw
            .get("slug")
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or_default()
            .to_string();
        if slug.is_empty() {
            return Ok(None);
        }
        let kind = raw
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("experience");
        if !matches!(kind, "experience" | "project") {
            return Ok(None);
        }

        // Dropped, never relabeled: an unknown, background, or hidden slug
        // removes the whole item.
        let Some(record) = self.lookup(&slug).await? else {
            tracing::debug!(slug, "dropping item: no store record");
            return Ok(None);
        };
        if !ItemRecord::is_ui_visible(Some(&record)) {
            tracing::debug!(slug, "dropping item: not ui-visible");
            return Ok(None);
        }

        let bullets = string_list(raw.get("bullets"), MAX_BULLETS);
        let why_relevant = raw
            .get("whyRelevant")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| truncate_chars(s, MAX_WHY));

        // Store truth overrides every metadata field the model asserted.
        Ok(Some(ExperienceItem {
            slug,
            kind: match record.kind {
                ChunkKind::Project => "project".to_string(),
                _ => "experience".to_string(),
            },
            title: record
                .title
                .as_deref()
                .map(|t| truncate_chars(t, MAX_META))
                .unwrap_or_default(),
            company: record.company.as_deref().map(|c| truncate_chars(c, MAX_META)),
            role: record.role.as_deref().map(|r| truncate_chars(r, MAX_META)),
            period: record.period.as_deref().map(|p| truncate_chars(p, MAX_PERIOD)),
            bullets,
            why_relevant,
        }))
    }

    async fn validate_artifacts(&self, raw: &Value) -> Result<Artifacts, ProviderError> {
        let mut artifacts = Artifacts::default();

        if let Some(brief_raw) = raw.get("fitBrief").filter(|v| v.is_object()) {
            let sections: Vec<FitBriefSection> = brief_raw
                .get("sections")
                .and_then(Value::as_array)
                .map(|list| {
                    list.iter()
                        .take(MAX_SECTIONS)
                        .filter_map(section_from_value)
                        .collect()
                })
                .unwrap_or_default();
            artifacts.fit_brief = Some(FitBrief {
                title: truncate_chars(
                    brief_raw
                        .get("title")
                        .and_then(Value::as_str)
                        .filter(|t| !t.trim().is_empty())
                        .unwrap_or("Fit Brief"),
                    MAX_META,
                ),
                sections,
            });
        }

        if let Some(exp_raw) = raw.get("relevantExperience").filter(|v| v.is_object()) {
            let mut groups = Vec::new();
            let groups_raw = exp_raw
                .get("groups")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default();
            for group in groups_raw.iter().take(MAX_GROUPS) {
                let items_raw = group
                    .get("items")
                    .and_then(Value::as_array)
                    .map(Vec::as_slice)
                    .unwrap_or_default();
                let mut items = Vec::new();
                for item in items_raw.iter().take(MAX_ITEMS_PER_GROUP) {
                    if let Some(valid) = self.validate_item(item).await? {
                        items.push(valid);
                    }
                }
                if items.is_empty() {
                    continue;
                }
                groups.push(ExperienceGroup {
                    title: truncate_chars(
                        group
                            .get("title")
                            .and_then(Value::as_str)
                            .filter(|t| !t.trim().is_empty())
                            .unwrap_or("Relevant"),
                        MAX_META,
                    ),
                    items,
                });
            }
            if !groups.is_empty() {
                artifacts.relevant_experience = Some(crate::contract::RelevantExperience { groups });
            }
        }

        Ok(artifacts)
    }
}

#[async_trait]
impl Stage for ValidatorStage {
    fn name(&self) -> &'static str {
        "validator"
    }

    async fn run(
        &self,
        ctx: &AgentContext,
        _events: &EventSink,
    ) -> Result<ContextDelta, ProviderError> {
        let answer_out = answer_value(ctx);

        // 1. Assistant text. Prefer the parsed document, then whatever the
        // client already saw streamed, then the apology.
        let assistant_text = answer_out
            .get("assistant")
            .and_then(|a| a.get("text"))
            .and_then(Value::as_str)
            .filter(|t| !t.trim().is_empty())
            .map(str::to_string)
            .or_else(|| {
                let streamed = ctx.streamed_text.trim();
                (!streamed.is_empty()).then(|| streamed.to_string())
            })
            .unwrap_or_else(|| {
                tracing::warn!(stage = self.name(), "empty assistant text, substituting apology");
                APOLOGY_TEXT.to_string()
            });

        // 2. View, with the monotonicity override.
        let proposed = match answer_out.get("ui").filter(|v| v.is_object()) {
            Some(raw) => UiDirective::from_value(raw),
            None => ctx.router_ui.clone(),
        };
        let view = if ctx.committed_view {
            ViewMode::Split
        } else {
            proposed.view
        };

        // 3. Active tab fallback chain: answer, client, brief.
        let mut ui = if view.is_split() {
            let tab = proposed
                .split
                .map(|s| s.active_tab)
                .or(ctx.client_active_tab)
                .unwrap_or_default();
            UiDirective::split(tab)
        } else {
            UiDirective::chat()
        };

        // 4. Hints.
        let suggest_tab = match answer_out.get("hints").filter(|v| v.is_object()) {
            Some(raw) => ActiveTab::coerce(raw.get("suggestTab").and_then(Value::as_str)),
            None => ctx.router_hints.suggest_tab,
        };

        // 5. Chips.
        let chips = string_list(answer_out.get("chips"), MAX_CHIPS);

        // 6. Artifacts, only meaningful in split view.
        let mut artifacts = if ui.view.is_split() {
            self.validate_artifacts(
                answer_out
                    .get("artifacts")
                    .filter(|v| v.is_object())
                    .unwrap_or(&Value::Null),
            )
            .await?
        } else {
            Artifacts::default()
        };

        // 7. Final downgrade guard: an empty split screen is a contract
        // violation unless the client already committed to split.
        if ui.view.is_split() && !ctx.committed_view && artifacts.is_empty() {
            tracing::debug!(stage = self.name(), "empty split, downgrading to chat");
            ui = UiDirective::chat();
            artifacts = Artifacts::default();
        }

        let response = ChatResponse {
            assistant: AssistantBlock {
                text: assistant_text,
            },
            ui,
            hints: Hints {
                suggest_share: false,
                suggest_tab,
            },
            chips,
            artifacts,
            usage: None,
            reasoning: (!ctx.reasoning_text.is_empty()).then(|| ctx.reasoning_text.clone()),
        };

        Ok(ContextDelta {
            response: Some(response),
            ..Default::default()
        })
    }
}

/// The answer as a JSON object, however the response stage left it.
fn answer_value(ctx: &AgentContext) -> Value {
    match &ctx.answer {
        RawAnswer::Parsed(doc) => doc.clone(),
        RawAnswer::Fallback { text, chips } => serde_json::json!({
            "assistant": {"text": text},
            "chips": chips,
        }),
        RawAnswer::Empty => Value::Null,
    }
}

fn section_from_value(raw: &Value) -> Option<FitBriefSection> {
    let field = |key: &str| {
        raw.get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    Some(FitBriefSection {
        id: field("id")?,
        title: truncate_chars(&field("title")?, MAX_SECTION_TITLE),
        content: truncate_chars(&field("content")?, MAX_SECTION_CONTENT),
    })
}

/// Coerces a JSON value into trimmed non-empty strings, capped.
fn string_list(raw: Option<&Value>, cap: usize) -> Vec<String> {
    raw.and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .take(cap)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::ChatRequest;
    use crate::message::ChatMessage;
    use rustc_hash::FxHashMap;
    use serde_json::json;

    struct ItemStore {
        items: FxHashMap<String, Value>,
    }

    impl ItemStore {
        fn with(items: &[(&str, Value)]) -> Self {
            Self {
                items: items
                    .iter()
                    .map(|(slug, payload)| (slug.to_string(), payload.clone()))
                    .collect(),
            }
        }
    }

    #[async_trait]
    impl VectorStore for ItemStore {
        async fn search(
            &self,
            _vector: &[f32],
            _limit: usize,
        ) -> Result<Vec<crate::chunks::SearchHit>, ProviderError> {
            Ok(vec![])
        }

        async fn get_by_slug(&self, slug: &str) -> Result<Option<Value>, ProviderError> {
            Ok(self.items.get(slug).cloned())
        }
    }

    fn base_ctx() -> AgentContext {
        AgentContext::from_request(&ChatRequest {
            conversation_id: "c1".into(),
            client: None,
            messages: vec![ChatMessage::user("question")],
        })
    }

    async fn finalize(ctx: &AgentContext, store: ItemStore) -> ChatResponse {
        let stage = ValidatorStage::new(Arc::new(store));
        stage
            .run(ctx, &EventSink::disabled())
            .await
            .unwrap()
            .response
            .unwrap()
    }

    #[tokio::test]
    async fn empty_answer_gets_apology_and_chat() {
        let ctx = base_ctx();
        let resp = finalize(&ctx, ItemStore::with(&[])).await;
        assert_eq!(resp.assistant.text, APOLOGY_TEXT);
        assert_eq!(resp.ui, UiDirective::chat());
        assert!(resp.chips.is_empty());
        assert!(resp.artifacts.is_empty());
    }

    #[tokio::test]
    async fn streamed_text_beats_apology() {
        let mut ctx = base_ctx();
        ctx.answer = RawAnswer::Parsed(json!({"ui": {"view": "chat"}}));
        ctx.streamed_text = "partial but real".into();
        let resp = finalize(&ctx, ItemStore::with(&[])).await;
        assert_eq!(resp.assistant.text, "partial but real");
    }

    #[tokio::test]
    async fn committed_view_is_never_demoted() {
        let mut ctx = base_ctx();
        ctx.committed_view = true;
        ctx.client_active_tab = Some(ActiveTab::Experience);
        ctx.answer = RawAnswer::Parsed(json!({
            "assistant": {"text": "hi"},
            "ui": {"view": "chat"},
        }));
        let resp = finalize(&ctx, ItemStore::with(&[])).await;
        // Split sticks even with zero artifacts and a chat-proposing model.
        assert_eq!(resp.ui, UiDirective::split(ActiveTab::Experience));
    }

    #[tokio::test]
    async fn tab_falls_back_to_client_then_brief() {
        let mut ctx = base_ctx();
        ctx.answer = RawAnswer::Parsed(json!({
            "assistant": {"text": "hi"},
            "ui": {"view": "split"},
            "artifacts": {"fitBrief": {"title": "T", "sections": [
                {"id": "need", "title": "Need", "content": "stuff"}
            ]}},
        }));

        ctx.client_active_tab = Some(ActiveTab::Experience);
        let resp = finalize(&ctx, ItemStore::with(&[])).await;
        assert_eq!(resp.ui, UiDirective::split(ActiveTab::Experience));

        ctx.client_active_tab = None;
        let resp = finalize(&ctx, ItemStore::with(&[])).await;
        assert_eq!(resp.ui, UiDirective::split(ActiveTab::Brief));
    }

    #[tokio::test]
    async fn empty_split_downgrades_to_chat() {
        let mut ctx = base_ctx();
        ctx.answer = RawAnswer::Parsed(json!({
            "assistant": {"text": "hi"},
            "ui": {"view": "split", "split": {"activeTab": "brief"}},
            "artifacts": {"fitBrief": {"title": "T", "sections": []}},
        }));
        let resp = finalize(&ctx, ItemStore::with(&[])).await;
        assert_eq!(resp.ui, UiDirective::chat());
        assert!(resp.artifacts.is_empty());
    }

    #[tokio::test]
    async fn ungrounded_items_are_dropped_entirely() {
        let mut ctx = base_ctx();
        ctx.answer = RawAnswer::Parsed(json!({
            "assistant": {"text": "hi"},
            "ui": {"view": "split", "split": {"activeTab": "experience"}},
            "artifacts": {"relevantExperience": {"groups": [{
                "title": "Leadership",
                "items": [
                    {"slug": "experience:foo:0", "type": "experience", "title": "X"},
                    {"slug": "ghost", "type": "experience", "title": "Y"},
                    {"slug": "hidden", "type": "project", "title": "Z"},
                    {"slug": "bg", "type": "experience", "title": "W"},
                    {"slug": "real", "type": "experience", "title": "model says"},
                ],
            }]}},
        }));
        let store = ItemStore::with(&[
            ("hidden", json!({"slug": "hidden", "type": "project", "uiVisible": false})),
            ("bg", json!({"slug": "bg", "type": "background"})),
            (
                "real",
                json!({
                    "slug": "real",
                    "type": "experience",
                    "title": "Store Title",
                    "company": "Store Co",
                    "role": "Store Role",
                    "period": "2020-2023",
                }),
            ),
        ]);
        let resp = finalize(&ctx, store).await;

        let groups = &resp.artifacts.relevant_experience.as_ref().unwrap().groups;
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].items.len(), 1);
        let item = &groups[0].items[0];
        assert_eq!(item.slug, "real");
        // Metadata comes from the store, not the model.
        assert_eq!(item.title, "Store Title");
        assert_eq!(item.company.as_deref(), Some("Store Co"));
        assert_eq!(item.role.as_deref(), Some("Store Role"));
        assert_eq!(item.period.as_deref(), Some("2020-2023"));
    }

    #[tokio::test]
    async fn groups_with_no_surviving_items_vanish() {
        let mut ctx = base_ctx();
        ctx.answer = RawAnswer::Parsed(json!({
            "assistant": {"text": "hi"},
            "ui": {"view": "split"},
            "artifacts": {"relevantExperience": {"groups": [{
                "title": "Only ghosts",
                "items": [{"slug": "ghost", "type": "experience"}],
            }]}},
        }));
        let resp = finalize(&ctx, ItemStore::with(&[])).await;
        assert!(resp.artifacts.relevant_experience.is_none());
        // Which in turn trips the downgrade guard.
        assert_eq!(resp.ui, UiDirective::chat());
    }

    #[tokio::test]
    async fn sections_require_all_fields_and_caps_apply() {
        let mut ctx = base_ctx();
        let long_content = "x".repeat(3000);
        ctx.answer = RawAnswer::Parsed(json!({
            "assistant": {"text": "hi"},
            "ui": {"view": "split", "split": {"activeTab": "brief"}},
            "chips": ["  keep  ", "", "a", "b", "c", "d", "e", "f"],
            "artifacts": {"fitBrief": {"title": "T", "sections": [
                {"id": "need", "title": "Need", "content": long_content},
                {"id": "", "title": "No id", "content": "c"},
                {"title": "Missing id", "content": "c"},
            ]}},
        }));
        let resp = finalize(&ctx, ItemStore::with(&[])).await;

        assert_eq!(resp.chips.len(), 6);
        assert_eq!(resp.chips[0], "keep");
        let brief = resp.artifacts.fit_brief.unwrap();
        assert_eq!(brief.sections.len(), 1);
        assert_eq!(brief.sections[0].content.chars().count(), 2000);
    }

    #[tokio::test]
    async fn fallback_answer_carries_text_and_chips() {
        let mut ctx = base_ctx();
        ctx.answer = RawAnswer::Fallback {
            text: "Plain reply.".into(),
            chips: vec!["More".into()],
        };
        let resp = finalize(&ctx, ItemStore::with(&[])).await;
        assert_eq!(resp.assistant.text, "Plain reply.");
        assert_eq!(resp.chips, vec!["More"]);
        assert_eq!(resp.ui, UiDirective::chat());
    }

    #[tokio::test]
    async fn reasoning_trace_is_echoed() {
        let mut ctx = base_ctx();
        ctx.answer = RawAnswer::Parsed(json!({"assistant": {"text": "hi"}}));
        ctx.reasoning_text = "chain of thought".into();
        let resp = finalize(&ctx, ItemStore::with(&[])).await;
        assert_eq!(resp.reasoning.as_deref(), Some("chain of thought"));
    }
}
