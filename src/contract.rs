//! Wire contract for the chat endpoint.
//!
//! Everything a browser sends or receives is defined here. The response side
//! is deliberately strict: the [`ValidatorStage`](crate::stages::validator)
//! only ever emits values these types can represent, so a deserialization
//! failure on the client side means a server bug, not model noise.
//!
//! Model-produced values arrive as loose JSON and are funneled through the
//! `coerce` constructors, which map anything unrecognized to the safe
//! default instead of erroring.

use serde::{Deserialize, Serialize};

use crate::message::ChatMessage;

// ── Request ────────────────────────────────────────────────────────────

/// One chat turn from the browser. Requires at least one message; the
/// orchestrator rejects empty transcripts before any stage runs.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub conversation_id: String,
    #[serde(default)]
    pub client: Option<ClientInfo>,
    pub messages: Vec<ChatMessage>,
}

/// Client-reported state accompanying a request.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    #[serde(default)]
    pub ui: Option<ClientUiState>,
    #[serde(default)]
    pub page: Option<ClientPage>,
    /// Extended-reasoning toggle; defaults to enabled when absent.
    #[serde(default)]
    pub reasoning_enabled: Option<bool>,
}

/// The UI state the client last rendered.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientUiState {
    #[serde(default)]
    pub view: Option<ViewMode>,
    #[serde(default)]
    pub split: Option<SplitState>,
}

/// Split-pane state (active tab) as last seen by the client.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitState {
    #[serde(default)]
    pub active_tab: Option<ActiveTab>,
}

/// Where on the site the visitor currently is.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientPage {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub active_slug: Option<String>,
}

// ── UI directive ───────────────────────────────────────────────────────

/// Top-level UI mode. `Split` shows conversation plus artifacts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    #[default]
    Chat,
    Split,
}

impl ViewMode {
    /// Maps a model-produced string to a view, defaulting to chat.
    #[must_use]
    pub fn coerce(raw: Option<&str>) -> Self {
        match raw {
            Some("split") => ViewMode::Split,
            _ => ViewMode::Chat,
        }
    }

    #[must_use]
    pub fn is_split(&self) -> bool {
        matches!(self, ViewMode::Split)
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ViewMode::Chat => "chat",
            ViewMode::Split => "split",
        }
    }
}

/// Which side-panel tab is in focus.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActiveTab {
    #[default]
    Brief,
    Experience,
}

impl ActiveTab {
    /// Maps a model-produced string to a tab; unrecognized values yield None
    /// so callers can apply their own fallback chain.
    #[must_use]
    pub fn coerce(raw: Option<&str>) -> Option<Self> {
        match raw {
            Some("brief") => Some(ActiveTab::Brief),
            Some("experience") => Some(ActiveTab::Experience),
            _ => None,
        }
    }
}

/// The server's UI instruction for this turn.
///
/// Carries the monotonicity invariant: once a conversation has shown the
/// split view, no later directive demotes it back to chat.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiDirective {
    pub view: ViewMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub split: Option<SplitDirective>,
}

impl UiDirective {
    /// Plain chat directive, the universal fallback.
    #[must_use]
    pub fn chat() -> Self {
        Self {
            view: ViewMode::Chat,
            split: None,
        }
    }

    /// Split directive with the given tab.
    #[must_use]
    pub fn split(tab: ActiveTab) -> Self {
        Self {
            view: ViewMode::Split,
            split: Some(SplitDirective { active_tab: tab }),
        }
    }

    /// Lenient parse of a model-produced `ui` object. Unknown views coerce
    /// to chat; the split tab is kept only when the view is split.
    #[must_use]
    pub fn from_value(raw: &serde_json::Value) -> Self {
        let view = ViewMode::coerce(raw.get("view").and_then(|v| v.as_str()));
        let split = if view.is_split() {
            ActiveTab::coerce(
                raw.get("split")
                    .and_then(|s| s.get("activeTab"))
                    .and_then(|t| t.as_str()),
            )
            .map(|active_tab| SplitDirective { active_tab })
        } else {
            None
        };
        Self { view, split }
    }
}

/// Split-pane directive payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitDirective {
    pub active_tab: ActiveTab,
}

// ── Hints & chips ──────────────────────────────────────────────────────

/// Soft suggestions the client may act on but is free to ignore.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hints {
    pub suggest_share: bool,
    pub suggest_tab: Option<ActiveTab>,
}

// ── Artifacts ──────────────────────────────────────────────────────────

/// Structured side-panel content, rebuilt fresh every request from model
/// output cross-checked against store truth. Never persisted.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifacts {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fit_brief: Option<FitBrief>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevant_experience: Option<RelevantExperience>,
}

impl Artifacts {
    /// True when neither artifact survived validation with content.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        let brief_empty = self
            .fit_brief
            .as_ref()
            .is_none_or(|b| b.sections.is_empty());
        let exp_empty = self
            .relevant_experience
            .as_ref()
            .is_none_or(|r| r.groups.is_empty());
        brief_empty && exp_empty
    }
}

/// The "Fit Brief" artifact: a short structured read on how the candidate
/// fits the visitor's need.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FitBrief {
    pub title: String,
    pub sections: Vec<FitBriefSection>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FitBriefSection {
    pub id: String,
    pub title: String,
    pub content: String,
}

/// Grouped experience/project evidence, grounded against the store.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelevantExperience {
    pub groups: Vec<ExperienceGroup>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperienceGroup {
    pub title: String,
    pub items: Vec<ExperienceItem>,
}

/// A single grounded evidence item. Title/company/role/period always come
/// from store-truth metadata, never from model output.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperienceItem {
    pub slug: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub company: Option<String>,
    pub role: Option<String>,
    pub period: Option<String>,
    pub bullets: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub why_relevant: Option<String>,
}

// ── Response ───────────────────────────────────────────────────────────

/// Token usage accounting, aggregated best-effort by stage name.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub output_tokens: u64,
    pub by_agent: std::collections::BTreeMap<String, AgentUsage>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentUsage {
    pub output_tokens: u64,
}

/// The assistant's conversational reply.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssistantBlock {
    pub text: String,
}

/// The full validated response for one chat turn.
///
/// Invariants enforced by the validator before this is constructed:
/// - `assistant.text` is never empty,
/// - `ui.view == Split` implies non-empty artifacts or a client that was
///   already in split,
/// - every experience item's slug resolves to a UI-visible store record.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub assistant: AssistantBlock,
    pub ui: UiDirective,
    pub hints: Hints,
    pub chips: Vec<String>,
    pub artifacts: Artifacts,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    /// Accumulated reasoning trace, echoed when the model produced one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}
