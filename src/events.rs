//! Live pipeline events for streaming clients.
//!
//! Serialized as `{"event": "...", "data": ...}` frames so they drop straight
//! into an SSE or chunked-JSON transport. `Done` always carries the same
//! validated [`ChatResponse`] the blocking path would return, and is always
//! the final frame.

use flume::Sender;
use serde::{Deserialize, Serialize};

use crate::contract::{ChatResponse, Hints, UiDirective};

/// One frame on the live stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
pub enum PipelineEvent {
    /// Early UI directive, emitted right after retrieval so the client can
    /// open the split view before any answer text arrives.
    Ui { ui: UiDirective, hints: Hints },
    /// A fragment of the model's reasoning trace.
    Reasoning { delta: String },
    /// A fragment of the assistant's reply text.
    Text { delta: String },
    /// A terminal failure; a `Done` frame still follows with a safe response.
    Error { message: String },
    /// The final validated response. Closes the stream.
    Done(Box<ChatResponse>),
}

/// Event emitter handed to stages.
///
/// Sends are best-effort: a client that disconnected mid-stream drops the
/// receiver, and the pipeline finishes the turn regardless.
#[derive(Clone)]
pub struct EventSink {
    sender: Option<Sender<PipelineEvent>>,
}

impl EventSink {
    /// Sink that forwards to a live channel.
    #[must_use]
    pub fn streaming(sender: Sender<PipelineEvent>) -> Self {
        Self {
            sender: Some(sender),
        }
    }

    /// Sink for the blocking path; every emit is a no-op.
    #[must_use]
    pub fn disabled() -> Self {
        Self { sender: None }
    }

    /// True when a client is (or was) listening.
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.sender.is_some()
    }

    pub fn emit(&self, event: PipelineEvent) {
        if let Some(sender) = &self.sender
            && sender.send(event).is_err()
        {
            tracing::debug!("event receiver dropped; continuing without a listener");
        }
    }
}

/// Consumer handle for a live pipeline run.
pub struct EventStream {
    receiver: flume::Receiver<PipelineEvent>,
}

impl EventStream {
    pub(crate) fn new(receiver: flume::Receiver<PipelineEvent>) -> Self {
        Self { receiver }
    }

    /// Next frame, or `None` once the producer finished.
    pub async fn next(&mut self) -> Option<PipelineEvent> {
        self.receiver.recv_async().await.ok()
    }

    /// Adapts the handle into a [`futures_util::Stream`] of frames.
    pub fn into_stream(self) -> impl futures_util::Stream<Item = PipelineEvent> + Send + 'static {
        self.receiver.into_stream()
    }
}
