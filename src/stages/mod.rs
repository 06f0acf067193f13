//! The pipeline stages.
//!
//! Each stage is a pure function of the context snapshot it receives: it
//! reads, calls its collaborators, and returns a [`ContextDelta`]. Malformed
//! model output is absorbed inside the stage as safe defaults; only backing
//! service failures escape as errors.

use async_trait::async_trait;

use crate::context::{AgentContext, ContextDelta};
use crate::events::EventSink;
use crate::providers::ProviderError;

mod response;
mod retrieval;
mod router;
pub mod validator;

pub use response::ResponseStage;
pub use retrieval::RetrievalStage;
pub use router::RouterStage;
pub use validator::ValidatorStage;

/// One step of the pipeline.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Stable stage name, used for usage accounting and log spans.
    fn name(&self) -> &'static str;

    /// Computes this stage's contribution from the context so far. `events`
    /// is live on the streaming path and a no-op sink otherwise.
    async fn run(
        &self,
        ctx: &AgentContext,
        events: &EventSink,
    ) -> Result<ContextDelta, ProviderError>;
}

/// Truncates to at most `max` characters, on char boundaries.
pub(crate) fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
