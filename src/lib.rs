//! # Foliochat: Grounded Portfolio Chat Pipeline
//!
//! Foliochat is the request pipeline behind a portfolio site's chat: it
//! classifies visitor intent, retrieves relevant content chunks, asks a
//! language model for a grounded structured answer, and repairs that answer
//! against a strict UI contract before it reaches a browser.
//!
//! ## Core Concepts
//!
//! - **Stages**: Router → Retrieval → Response → Validator, each a pure
//!   function from a context snapshot to a [`context::ContextDelta`]
//! - **Streaming projection**: [`stream::StreamFieldExtractor`] lifts the
//!   `assistant.text` field out of a live token stream, character by
//!   character, while the full JSON document accumulates for validation
//! - **Grounding**: every experience item the model asserts is re-checked
//!   against vector-store truth; metadata is overridden, never trusted
//! - **Admission control**: [`limiter::RateLimiter`] runs four sliding-window
//!   gates before any model call happens
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use foliochat::config::PipelineConfig;
//! use foliochat::contract::ChatRequest;
//! use foliochat::limiter::{RateLimitConfig, RateLimiter};
//! use foliochat::message::ChatMessage;
//! use foliochat::orchestrator::ChatPipeline;
//! # use foliochat::providers::{CompletionClient, EmbeddingClient, VectorStore};
//! # fn clients() -> (Arc<dyn EmbeddingClient>, Arc<dyn CompletionClient>, Arc<dyn VectorStore>) { unimplemented!() }
//!
//! # async fn run() -> Result<(), foliochat::error::PipelineError> {
//! let (embeddings, completions, store) = clients();
//! let pipeline = ChatPipeline::new(
//!     embeddings,
//!     completions,
//!     store,
//!     PipelineConfig::from_env(),
//!     Arc::new(RateLimiter::new(RateLimitConfig::from_env())),
//! );
//!
//! let request = ChatRequest {
//!     conversation_id: "conv-1".into(),
//!     client: None,
//!     messages: vec![ChatMessage::user("Have you led regulated delivery?")],
//! };
//! let response = pipeline.run("203.0.113.7", &request).await?;
//! println!("{}", response.assistant.text);
//! # Ok(())
//! # }
//! ```
//!
//! For live output, [`orchestrator::ChatPipeline::run_streaming`] returns an
//! [`events::EventStream`] of `ui`, `text`, `reasoning`, and `done` frames.

pub mod chunks;
pub mod config;
pub mod context;
pub mod contract;
pub mod error;
pub mod events;
pub mod limiter;
pub mod message;
pub mod orchestrator;
pub mod providers;
pub mod stages;
pub mod stream;
pub mod telemetry;
