//! Retrieval stage: embed the routed query, search the store, and shape the
//! results into the capped working set later stages consume.

use std::sync::Arc;

use async_trait::async_trait;
use rustc_hash::FxHashMap;

use crate::chunks::{self, ItemRecord, RetrievalSet};
use crate::config::PipelineConfig;
use crate::context::{AgentContext, ContextDelta};
use crate::contract::UiDirective;
use crate::events::EventSink;
use crate::providers::{EmbeddingClient, ProviderError, VectorStore};

use super::Stage;

/// How many distinct top main-chunk slugs the split-view guard probes.
const GUARD_PROBE_CAP: usize = 6;

/// Embeds, searches, ranks related slugs, and applies the split-view guard.
pub struct RetrievalStage {
    embeddings: Arc<dyn EmbeddingClient>,
    store: Arc<dyn VectorStore>,
    config: PipelineConfig,
}

impl RetrievalStage {
    pub fn new(
        embeddings: Arc<dyn EmbeddingClient>,
        store: Arc<dyn VectorStore>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            embeddings,
            store,
            config,
        }
    }

    /// Looks up store-truth records for each slug, once per distinct slug.
    async fn lookup_items(
        &self,
        slugs: impl IntoIterator<Item = String>,
    ) -> Result<FxHashMap<String, Option<ItemRecord>>, ProviderError> {
        let mut items = FxHashMap::default();
        for slug in slugs {
            if items.contains_key(&slug) {
                continue;
            }
            let record = self
                .store
                .get_by_slug(&slug)
                .await?
                .as_ref()
                .and_then(ItemRecord::from_payload);
            items.insert(slug, record);
        }
        Ok(items)
    }
}

#[async_trait]
impl Stage for RetrievalStage {
    fn name(&self) -> &'static str {
        "retrieval"
    }

    async fn run(
        &self,
        ctx: &AgentContext,
        _events: &EventSink,
    ) -> Result<ContextDelta, ProviderError> {
        let query = if ctx.retrieval_query.trim().is_empty() {
            &ctx.last_user_text
        } else {
            &ctx.retrieval_query
        };

        let vector = self.embeddings.embed(query).await?;
        let hits = self.store.search(&vector, self.config.retrieval_k).await?;

        let chunks = chunks::build_working_set(
            &hits,
            self.config.max_main_chunks,
            self.config.max_background_chunks,
        );
        let ranked = chunks::rank_related_slugs(&chunks, self.config.related_slug_cap);

        let set = RetrievalSet {
            chunks,
            related_slugs: ranked.clone(),
        };
        let probe: Vec<String> = set
            .main_slugs(GUARD_PROBE_CAP)
            .into_iter()
            .map(str::to_string)
            .collect();
        let items = self
            .lookup_items(ranked.iter().cloned().chain(probe.iter().cloned()))
            .await?;

        // Related slugs must survive store-truth visibility, same rule the
        // validator applies to experience items.
        let related_slugs: Vec<String> = ranked
            .into_iter()
            .filter(|slug| ItemRecord::is_ui_visible(items.get(slug).and_then(Option::as_ref)))
            .collect();

        // Guard: never recommend split with nothing visible to show. The
        // committed view wins over the guard.
        let mut router_ui = None;
        if ctx.router_ui.view.is_split() && !ctx.committed_view {
            let any_visible = probe
                .iter()
                .any(|slug| ItemRecord::is_ui_visible(items.get(slug).and_then(Option::as_ref)));
            if !any_visible {
                tracing::debug!(stage = self.name(), "split guard: downgrading to chat");
                router_ui = Some(UiDirective::chat());
            }
        }

        let context_text = build_context_text(&set);
        tracing::debug!(
            stage = self.name(),
            chunks = set.chunks.len(),
            related = related_slugs.len(),
            "retrieved"
        );

        Ok(ContextDelta {
            retrieval: Some(RetrievalSet {
                chunks: set.chunks,
                related_slugs,
            }),
            context_text: Some(context_text),
            router_ui,
            ..Default::default()
        })
    }
}

/// Flattens the working set into the prompt context block: one labelled
/// chunk per paragraph, separated by rules.
fn build_context_text(set: &RetrievalSet) -> String {
    set.chunks
        .iter()
        .map(|c| format!("{}\n{}", c.context_label(), c.text))
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}
