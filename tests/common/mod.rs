//! Shared fixtures for pipeline integration tests: scripted providers, a
//! canned vector store, and request builders.

#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream;
use rustc_hash::FxHashMap;
use serde_json::{Value, json};

use foliochat::chunks::SearchHit;
use foliochat::config::PipelineConfig;
use foliochat::contract::{
    ChatRequest, ClientInfo, ClientUiState, SplitState, ViewMode,
};
use foliochat::limiter::{RateLimitConfig, RateLimiter};
use foliochat::message::ChatMessage;
use foliochat::orchestrator::ChatPipeline;
use foliochat::providers::{
    Completion, CompletionClient, EmbeddingClient, ModelProfile, ProviderError, TokenChunk,
    TokenStream, VectorStore,
};

/// Embedder that returns the same vector for every query.
pub struct FixedEmbedder;

#[async_trait]
impl EmbeddingClient for FixedEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, ProviderError> {
        Ok(vec![0.25, 0.5, 0.75])
    }
}

/// Completion model scripted per profile: one router reply, one answer
/// reply. The answer streams char by char on the streaming path.
pub struct ScriptedModel {
    pub router_reply: String,
    pub answer_reply: String,
    pub reasoning: Vec<String>,
}

impl ScriptedModel {
    pub fn new(router_reply: &str, answer_reply: &str) -> Self {
        Self {
            router_reply: router_reply.to_string(),
            answer_reply: answer_reply.to_string(),
            reasoning: vec![],
        }
    }
}

#[async_trait]
impl CompletionClient for ScriptedModel {
    async fn complete_json(
        &self,
        _messages: &[ChatMessage],
        profile: ModelProfile,
    ) -> Result<Completion, ProviderError> {
        let text = match profile {
            ModelProfile::Router => self.router_reply.clone(),
            ModelProfile::Answer => self.answer_reply.clone(),
        };
        Ok(Completion {
            text,
            output_tokens: Some(match profile {
                ModelProfile::Router => 5,
                ModelProfile::Answer => 20,
            }),
        })
    }

    async fn stream_answer(
        &self,
        _messages: &[ChatMessage],
        _reasoning: bool,
    ) -> Result<TokenStream, ProviderError> {
        let mut chunks: Vec<Result<TokenChunk, ProviderError>> = self
            .reasoning
            .iter()
            .map(|r| Ok(TokenChunk::Reasoning(r.clone())))
            .collect();
        chunks.extend(
            self.answer_reply
                .chars()
                .map(|c| Ok(TokenChunk::Text(c.to_string()))),
        );
        chunks.push(Ok(TokenChunk::Usage { output_tokens: 20 }));
        Ok(stream::iter(chunks).boxed())
    }
}

/// In-memory store with fixed search hits and slug payloads.
pub struct CannedStore {
    pub hits: Vec<SearchHit>,
    pub items: FxHashMap<String, Value>,
}

impl CannedStore {
    pub fn new(hits: Vec<SearchHit>, items: &[(&str, Value)]) -> Self {
        Self {
            hits,
            items: items
                .iter()
                .map(|(slug, payload)| (slug.to_string(), payload.clone()))
                .collect(),
        }
    }
}

#[async_trait]
impl VectorStore for CannedStore {
    async fn search(&self, _vector: &[f32], _limit: usize) -> Result<Vec<SearchHit>, ProviderError> {
        Ok(self.hits.clone())
    }

    async fn get_by_slug(&self, slug: &str) -> Result<Option<Value>, ProviderError> {
        Ok(self.items.get(slug).cloned())
    }
}

/// Store whose every call fails, for error-path tests.
pub struct FailingStore;

#[async_trait]
impl VectorStore for FailingStore {
    async fn search(&self, _vector: &[f32], _limit: usize) -> Result<Vec<SearchHit>, ProviderError> {
        Err(ProviderError::Backend {
            provider: "canned",
            message: "search unavailable".into(),
        })
    }

    async fn get_by_slug(&self, _slug: &str) -> Result<Option<Value>, ProviderError> {
        Err(ProviderError::Backend {
            provider: "canned",
            message: "lookup unavailable".into(),
        })
    }
}

pub fn chunk_hit(kind: &str, slug: &str, chunk_id: u32, score: f32) -> SearchHit {
    SearchHit {
        score,
        payload: json!({
            "type": kind,
            "slug": slug,
            "chunkId": chunk_id,
            "section": "summary",
            "text": format!("{slug} chunk {chunk_id}"),
            "title": format!("{slug} title"),
        }),
    }
}

/// A store seeded with one visible experience item under slug `positium`.
pub fn grounded_store() -> CannedStore {
    CannedStore::new(
        vec![
            chunk_hit("experience", "positium", 0, 0.95),
            chunk_hit("experience", "positium", 1, 0.90),
            chunk_hit("background", "values", 0, 0.70),
        ],
        &[(
            "positium",
            json!({
                "slug": "positium",
                "type": "experience",
                "title": "Lead PM",
                "company": "Positium",
                "role": "Product Lead",
                "period": "2019-2023",
            }),
        )],
    )
}

pub fn request(messages: Vec<ChatMessage>) -> ChatRequest {
    ChatRequest {
        conversation_id: "conv-1".into(),
        client: None,
        messages,
    }
}

pub fn split_client() -> ClientInfo {
    ClientInfo {
        ui: Some(ClientUiState {
            view: Some(ViewMode::Split),
            split: Some(SplitState { active_tab: None }),
        }),
        ..Default::default()
    }
}

pub fn pipeline(model: ScriptedModel, store: impl VectorStore + 'static) -> Arc<ChatPipeline> {
    Arc::new(ChatPipeline::new(
        Arc::new(FixedEmbedder),
        Arc::new(model),
        Arc::new(store),
        PipelineConfig::default(),
        Arc::new(RateLimiter::new(RateLimitConfig::default())),
    ))
}

/// Router reply that keeps the conversation in plain chat.
pub const CHAT_ROUTER: &str =
    r#"{"retrievalQuery": "product leadership", "ui": {"view": "chat"}, "hints": {"suggestTab": null}}"#;

/// Router reply that proposes the split view on the experience tab.
pub const SPLIT_ROUTER: &str = r#"{"retrievalQuery": "product leadership",
    "ui": {"view": "split", "split": {"activeTab": "experience"}},
    "hints": {"suggestTab": "experience"}}"#;
