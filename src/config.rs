//! Pipeline tuning knobs, loadable from the environment.

/// Retrieval and prompt-window configuration for the pipeline.
///
/// Defaults match production; `from_env` overrides the retrieval knobs from
/// the same variables ingestion and deployment scripts use.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// How many points to pull from the vector store per query.
    pub retrieval_k: usize,
    /// Cap on experience/project chunks in the working set.
    pub max_main_chunks: usize,
    /// Cap on background chunks in the working set.
    pub max_background_chunks: usize,
    /// Cap on related slugs computed from the working set.
    pub related_slug_cap: usize,
    /// Transcript window shown to the router.
    pub router_transcript_window: usize,
    /// Message window forwarded to the answer model.
    pub answer_message_window: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            retrieval_k: 40,
            max_main_chunks: 10,
            max_background_chunks: 2,
            related_slug_cap: 6,
            router_transcript_window: 8,
            answer_message_window: 12,
        }
    }
}

impl PipelineConfig {
    /// Loads configuration from the environment (reading `.env` first):
    /// `RETRIEVAL_K`, `MAX_MAIN_CHUNKS`, `MAX_BACKGROUND_CHUNKS`.
    /// Unparseable or absent values keep their defaults.
    #[must_use]
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let mut cfg = Self::default();
        cfg.retrieval_k = env_usize("RETRIEVAL_K", cfg.retrieval_k);
        cfg.max_main_chunks = env_usize("MAX_MAIN_CHUNKS", cfg.max_main_chunks);
        cfg.max_background_chunks = env_usize("MAX_BACKGROUND_CHUNKS", cfg.max_background_chunks);
        cfg
    }
}

pub(crate) fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

pub(crate) fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
