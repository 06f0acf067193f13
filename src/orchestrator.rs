//! Pipeline orchestration: admission, stage sequencing, and the blocking and
//! streaming entry points.
//!
//! Stages run strictly in order and none is ever skipped; every stage
//! tolerates default upstream values, so a degraded router still feeds a
//! working retrieval pass. On the streaming path, failures after the
//! transport has committed become `error` frames and the turn still closes
//! with a safe `done` frame.

use std::sync::Arc;

use crate::config::PipelineConfig;
use crate::context::AgentContext;
use crate::contract::{ActiveTab, AgentUsage, AssistantBlock, ChatRequest, ChatResponse, Usage};
use crate::error::PipelineError;
use crate::events::{EventSink, EventStream, PipelineEvent};
use crate::limiter::RateLimiter;
use crate::providers::{CompletionClient, EmbeddingClient, VectorStore};
use crate::stages::{
    ResponseStage, RetrievalStage, RouterStage, Stage, ValidatorStage, validator::APOLOGY_TEXT,
};

const CHAT_ROUTE: &str = "/chat";

/// The full request pipeline behind the chat endpoint.
pub struct ChatPipeline {
    limiter: Arc<RateLimiter>,
    router: RouterStage,
    retrieval: RetrievalStage,
    response: ResponseStage,
    validator: ValidatorStage,
}

impl ChatPipeline {
    pub fn new(
        embeddings: Arc<dyn EmbeddingClient>,
        completions: Arc<dyn CompletionClient>,
        store: Arc<dyn VectorStore>,
        config: PipelineConfig,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            limiter,
            router: RouterStage::new(completions.clone(), config.clone()),
            retrieval: RetrievalStage::new(embeddings, store.clone(), config.clone()),
            response: ResponseStage::new(completions, config),
            validator: ValidatorStage::new(store),
        }
    }

    fn admit(&self, client_id: &str, req: &ChatRequest) -> Result<(), PipelineError> {
        if req.messages.is_empty() {
            return Err(PipelineError::Contract(
                "messages must contain at least one entry".into(),
            ));
        }
        self.limiter
            .check(client_id, CHAT_ROUTE, Some(&req.conversation_id))
            .map_err(|reason| PipelineError::RateLimited {
                reason,
                retry_after_secs: self.limiter.retry_after(reason),
            })
    }

    /// Runs the full pipeline and returns the validated response.
    #[tracing::instrument(skip_all, fields(conversation = %req.conversation_id))]
    pub async fn run(
        &self,
        client_id: &str,
        req: &ChatRequest,
    ) -> Result<ChatResponse, PipelineError> {
        self.admit(client_id, req)?;

        let mut ctx = AgentContext::from_request(req);
        let sink = EventSink::disabled();
        for stage in self.stages() {
            let delta = stage.run(&ctx, &sink).await?;
            ctx.apply(delta);
        }

        let mut response = ctx
            .response
            .take()
            .ok_or_else(|| PipelineError::Internal("validator produced no response".into()))?;
        response.usage = usage_summary(&ctx);
        Ok(response)
    }

    /// Runs the pipeline live. Admission and contract checks happen before
    /// the stream opens, so denials surface as plain errors; everything after
    /// that arrives as frames, closing with `done`.
    pub fn run_streaming(
        self: Arc<Self>,
        client_id: &str,
        req: ChatRequest,
    ) -> Result<EventStream, PipelineError> {
        self.admit(client_id, &req)?;

        let (tx, rx) = flume::unbounded();
        let pipeline = Arc::clone(&self);
        tokio::spawn(async move {
            pipeline.drive(req, EventSink::streaming(tx)).await;
        });
        Ok(EventStream::new(rx))
    }

    async fn drive(&self, req: ChatRequest, sink: EventSink) {
        let mut ctx = AgentContext::from_request(&req);

        for stage in [&self.router as &dyn Stage, &self.retrieval] {
            match stage.run(&ctx, &sink).await {
                Ok(delta) => ctx.apply(delta),
                Err(err) => {
                    tracing::error!(stage = stage.name(), error = %err, "stage failed");
                    sink.emit(PipelineEvent::Error {
                        message: err.to_string(),
                    });
                    sink.emit(PipelineEvent::Done(Box::new(safe_response(&ctx))));
                    return;
                }
            }
        }

        sink.emit(PipelineEvent::Ui {
            ui: early_ui(&ctx),
            hints: ctx.router_hints.clone(),
        });

        // The response stage absorbs mid-stream token failures itself; an
        // error here means the stream never opened.
        match self.response.run(&ctx, &sink).await {
            Ok(delta) => ctx.apply(delta),
            Err(err) => {
                tracing::error!(stage = self.response.name(), error = %err, "stage failed");
                sink.emit(PipelineEvent::Error {
                    message: err.to_string(),
                });
            }
        }

        match self.validator.run(&ctx, &sink).await {
            Ok(delta) => ctx.apply(delta),
            Err(err) => {
                tracing::error!(stage = self.validator.name(), error = %err, "stage failed");
                sink.emit(PipelineEvent::Error {
                    message: err.to_string(),
                });
            }
        }

        let mut response = ctx.response.take().unwrap_or_else(|| safe_response(&ctx));
        response.usage = usage_summary(&ctx);
        sink.emit(PipelineEvent::Done(Box::new(response)));
    }

    fn stages(&self) -> [&dyn Stage; 4] {
        [
            &self.router,
            &self.retrieval,
            &self.response,
            &self.validator,
        ]
    }

    /// Current limiter counters, for a health/metrics endpoint.
    #[must_use]
    pub fn limiter_stats(&self) -> crate::limiter::LimiterStats {
        self.limiter.stats()
    }
}

/// The early `ui` frame: router's directive with the monotonicity override
/// applied, emitted before any answer text exists.
fn early_ui(ctx: &AgentContext) -> crate::contract::UiDirective {
    use crate::contract::{UiDirective, ViewMode};

    let view = if ctx.committed_view {
        ViewMode::Split
    } else {
        ctx.router_ui.view
    };
    if view.is_split() {
        let tab = ctx
            .router_ui
            .split
            .as_ref()
            .map(|s| s.active_tab)
            .or(ctx.client_active_tab)
            .unwrap_or(ActiveTab::Brief);
        UiDirective::split(tab)
    } else {
        UiDirective::chat()
    }
}

/// Minimal response used when a stage failed after the stream committed.
/// A client already in the split view stays there; demoting the view is
/// reserved for the validator's empty-split check.
fn safe_response(ctx: &AgentContext) -> ChatResponse {
    use crate::contract::UiDirective;

    let ui = if ctx.committed_view {
        UiDirective::split(ctx.client_active_tab.unwrap_or(ActiveTab::Brief))
    } else {
        UiDirective::chat()
    };
    ChatResponse {
        assistant: AssistantBlock {
            text: APOLOGY_TEXT.to_string(),
        },
        ui,
        ..ChatResponse::default()
    }
}

/// Folds per-stage token counts into the response usage block. `None` when
/// no stage reported anything, keeping the field off the wire.
fn usage_summary(ctx: &AgentContext) -> Option<Usage> {
    if ctx.usage_by_stage.is_empty() {
        return None;
    }
    let by_agent: std::collections::BTreeMap<String, AgentUsage> = ctx
        .usage_by_stage
        .iter()
        .map(|(name, tokens)| {
            (
                name.clone(),
                AgentUsage {
                    output_tokens: *tokens,
                },
            )
        })
        .collect();
    Some(Usage {
        output_tokens: ctx.usage_by_stage.values().sum(),
        by_agent,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{UiDirective, ViewMode};

    fn ctx_with(view: ViewMode, committed: bool) -> AgentContext {
        let mut ctx = AgentContext::default();
        ctx.router_ui = match view {
            ViewMode::Split => UiDirective::split(ActiveTab::Experience),
            ViewMode::Chat => UiDirective::chat(),
        };
        ctx.committed_view = committed;
        ctx
    }

    #[test]
    fn early_ui_honors_committed_view() {
        let ctx = ctx_with(ViewMode::Chat, true);
        assert_eq!(early_ui(&ctx), UiDirective::split(ActiveTab::Brief));

        let ctx = ctx_with(ViewMode::Split, false);
        assert_eq!(early_ui(&ctx), UiDirective::split(ActiveTab::Experience));

        let ctx = ctx_with(ViewMode::Chat, false);
        assert_eq!(early_ui(&ctx), UiDirective::chat());
    }

    #[test]
    fn safe_response_keeps_committed_split() {
        let mut ctx = AgentContext::default();
        ctx.committed_view = true;
        ctx.client_active_tab = Some(ActiveTab::Experience);
        assert_eq!(
            safe_response(&ctx).ui,
            UiDirective::split(ActiveTab::Experience)
        );

        ctx.client_active_tab = None;
        assert_eq!(safe_response(&ctx).ui, UiDirective::split(ActiveTab::Brief));

        assert_eq!(safe_response(&AgentContext::default()).ui, UiDirective::chat());
    }

    #[test]
    fn usage_summary_totals_by_stage() {
        let mut ctx = AgentContext::default();
        assert!(usage_summary(&ctx).is_none());

        ctx.usage_by_stage.insert("router".into(), 10);
        ctx.usage_by_stage.insert("answer".into(), 32);
        let usage = usage_summary(&ctx).unwrap();
        assert_eq!(usage.output_tokens, 42);
        assert_eq!(usage.by_agent["answer"].output_tokens, 32);
    }
}
