//! Pipeline-level error taxonomy.
//!
//! Only three things can fail a whole turn: admission control, a backing
//! service, or a contract violation in the request itself. Malformed model
//! output is never an error at this level; stages degrade it to safe
//! defaults internally.

use thiserror::Error;

use crate::limiter::DenyReason;
use crate::providers::ProviderError;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Admission control denied the request.
    #[error("rate limited ({}): retry after {retry_after_secs}s", reason.as_str())]
    RateLimited {
        reason: DenyReason,
        retry_after_secs: u64,
    },

    /// A backing service (model, embeddings, vector store) failed.
    #[error(transparent)]
    Backend(#[from] ProviderError),

    /// The request violates the wire contract.
    #[error("invalid request: {0}")]
    Contract(String),

    /// The pipeline finished without producing a response. Should not occur
    /// given the validator's repair rules.
    #[error("internal pipeline error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// HTTP status an edge layer should map this error to.
    #[must_use]
    pub fn status_hint(&self) -> u16 {
        match self {
            PipelineError::RateLimited { .. } => 429,
            PipelineError::Backend(ProviderError::MissingCollection { .. }) => 503,
            PipelineError::Backend(_) => 500,
            PipelineError::Contract(_) => 400,
            PipelineError::Internal(_) => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_hints() {
        let err = PipelineError::RateLimited {
            reason: DenyReason::Burst,
            retry_after_secs: 60,
        };
        assert_eq!(err.status_hint(), 429);

        let err = PipelineError::Backend(ProviderError::MissingCollection {
            name: "portfolio".into(),
        });
        assert_eq!(err.status_hint(), 503);

        let err = PipelineError::Backend(ProviderError::Backend {
            provider: "model",
            message: "timeout".into(),
        });
        assert_eq!(err.status_hint(), 500);

        assert_eq!(
            PipelineError::Contract("messages must be non-empty".into()).status_hint(),
            400
        );
    }
}
