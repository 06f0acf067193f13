//! Collaborator seams: the embedding model, the completion model, and the
//! vector store are opaque to the pipeline and injected as trait objects.
//!
//! The pipeline never retries or pools these itself; it only distinguishes
//! "the backing collection is missing" (a deployment problem, 503-class)
//! from any other backend failure (500-class).

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use thiserror::Error;

use crate::chunks::SearchHit;
use crate::message::ChatMessage;

/// Errors raised by any external collaborator.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The vector collection/index backing retrieval does not exist.
    /// Surfaced distinctly so operators see "run ingestion" instead of a
    /// generic internal error.
    #[error("vector collection '{name}' is missing; run content ingestion before serving chat")]
    MissingCollection { name: String },

    /// Any other backend failure (network, auth, quota, 5xx).
    #[error("{provider} backend error: {message}")]
    Backend {
        provider: &'static str,
        message: String,
    },

    /// The collaborator returned a payload the client adapter could not
    /// decode at the transport level.
    #[error("malformed payload from {provider}: {message}")]
    MalformedPayload {
        provider: &'static str,
        message: String,
    },
}

/// Which model settings a completion call should use.
///
/// Router calls want the cheapest low-latency settings; answer calls get the
/// full model with a larger token budget.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelProfile {
    Router,
    Answer,
}

/// A finished (non-streaming) completion.
#[derive(Clone, Debug)]
pub struct Completion {
    /// Raw model text; expected to be a JSON document but never trusted.
    pub text: String,
    /// Output-token count when the provider reports one.
    pub output_tokens: Option<u64>,
}

/// One item of a live generation stream.
#[derive(Clone, Debug, PartialEq)]
pub enum TokenChunk {
    /// A fragment of the model's main output.
    Text(String),
    /// A fragment of the model's reasoning trace, passed through verbatim.
    Reasoning(String),
    /// Usage report, typically delivered once near the end of the stream.
    Usage { output_tokens: u64 },
}

/// A boxed live token stream from the completion model.
pub type TokenStream = BoxStream<'static, Result<TokenChunk, ProviderError>>;

/// Turns text into an embedding vector.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;
}

/// Chat-completion model with a JSON-constrained output mode.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Requests a complete JSON document in one shot.
    async fn complete_json(
        &self,
        messages: &[ChatMessage],
        profile: ModelProfile,
    ) -> Result<Completion, ProviderError>;

    /// Opens a live token stream for the answer call. `reasoning` asks the
    /// model to interleave a reasoning trace when it supports one.
    async fn stream_answer(
        &self,
        messages: &[ChatMessage],
        reasoning: bool,
    ) -> Result<TokenStream, ProviderError>;
}

/// Vector store holding content chunks and item metadata.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Top-`limit` scored chunk payloads for a query vector, descending
    /// relevance.
    async fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<SearchHit>, ProviderError>;

    /// Store-truth payload for one item slug, absent when unknown.
    async fn get_by_slug(&self, slug: &str)
    -> Result<Option<serde_json::Value>, ProviderError>;
}
