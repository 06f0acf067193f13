//! Retrieved-chunk working set: typed chunks, bucket caps, and the
//! related-slug ranker.
//!
//! Store payloads arrive as loose JSON; everything here parses defensively
//! and drops what it cannot use rather than erroring, so one malformed
//! point never sinks a retrieval pass.

use serde_json::Value;

/// Semantic type of one retrievable content unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChunkKind {
    Experience,
    Project,
    Background,
}

impl ChunkKind {
    /// Parses a payload `type` value; anything unrecognized counts as
    /// experience, matching ingestion's default.
    #[must_use]
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some("project") => ChunkKind::Project,
            Some("background") => ChunkKind::Background,
            _ => ChunkKind::Experience,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkKind::Experience => "experience",
            ChunkKind::Project => "project",
            ChunkKind::Background => "background",
        }
    }

    /// Experience and project chunks are "main" content; background only
    /// flavors the prompt and never becomes an artifact.
    #[must_use]
    pub fn is_main(&self) -> bool {
        !matches!(self, ChunkKind::Background)
    }
}

/// One scored point returned by the vector store, payload still opaque.
#[derive(Clone, Debug)]
pub struct SearchHit {
    pub score: f32,
    pub payload: Value,
}

/// A typed, immutable retrieval unit produced from a store payload.
#[derive(Clone, Debug, PartialEq)]
pub struct RetrievedChunk {
    pub kind: ChunkKind,
    pub slug: String,
    pub chunk_id: u32,
    pub section: String,
    pub text: String,
    pub score: f32,
    pub title: Option<String>,
    pub company: Option<String>,
    pub role: Option<String>,
    pub period: Option<String>,
}

impl RetrievedChunk {
    /// Parses a chunk out of a search hit. Returns `None` when the payload
    /// lacks a slug or text, which makes it useless for grounding.
    #[must_use]
    pub fn from_hit(hit: &SearchHit) -> Option<Self> {
        let payload = &hit.payload;
        let slug = str_field(payload, "slug")?;
        let text = str_field(payload, "text")?;
        Some(Self {
            kind: ChunkKind::parse(payload.get("type").and_then(Value::as_str)),
            slug,
            chunk_id: payload
                .get("chunkId")
                .and_then(Value::as_u64)
                .unwrap_or(0) as u32,
            section: payload
                .get("section")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string(),
            text,
            score: hit.score,
            title: opt_str_field(payload, "title"),
            company: opt_str_field(payload, "company"),
            role: opt_str_field(payload, "role"),
            period: opt_str_field(payload, "period"),
        })
    }

    /// Source label used in the flattened prompt context, e.g.
    /// `[experience:positium:0] title:"…" section:"…"`.
    #[must_use]
    pub fn context_label(&self) -> String {
        let mut label = format!("[{}:{}:{}]", self.kind.as_str(), self.slug, self.chunk_id);
        for (name, value) in [
            ("title", self.title.as_deref()),
            ("company", self.company.as_deref()),
            ("role", self.role.as_deref()),
            ("period", self.period.as_deref()),
        ] {
            if let Some(v) = value {
                label.push_str(&format!(" {name}:\"{v}\""));
            }
        }
        if !self.section.is_empty() {
            label.push_str(&format!(" section:\"{}\"", self.section));
        }
        label
    }
}

fn str_field(payload: &Value, key: &str) -> Option<String> {
    let s = payload.get(key)?.as_str()?.trim();
    if s.is_empty() {
        return None;
    }
    Some(s.to_string())
}

fn opt_str_field(payload: &Value, key: &str) -> Option<String> {
    payload
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

// ── Working set ────────────────────────────────────────────────────────

/// The capped, ordered retrieval working set handed to later stages.
///
/// `chunks` holds main chunks first, then background chunks, each bucket in
/// store-returned (descending relevance) order. `related_slugs` has already
/// been filtered against store truth by the retrieval stage.
#[derive(Clone, Debug, Default)]
pub struct RetrievalSet {
    pub chunks: Vec<RetrievedChunk>,
    pub related_slugs: Vec<String>,
}

impl RetrievalSet {
    /// Slugs of the distinct top main chunks, in first-seen order, capped.
    /// Used by the split-view guard to probe store visibility.
    #[must_use]
    pub fn main_slugs(&self, cap: usize) -> Vec<&str> {
        let mut seen = rustc_hash::FxHashSet::default();
        let mut out = Vec::new();
        for c in &self.chunks {
            if !c.kind.is_main() || !seen.insert(c.slug.as_str()) {
                continue;
            }
            out.push(c.slug.as_str());
            if out.len() >= cap {
                break;
            }
        }
        out
    }
}

/// Partitions raw hits into the capped working set.
///
/// Main (experience/project) chunks precede background chunks in the output;
/// this is an ordering rule for prompt assembly, not a re-ranking — within
/// each bucket the store's relevance order is untouched.
#[must_use]
pub fn build_working_set(
    hits: &[SearchHit],
    max_main: usize,
    max_background: usize,
) -> Vec<RetrievedChunk> {
    let mut main = Vec::new();
    let mut background = Vec::new();
    for hit in hits {
        let Some(chunk) = RetrievedChunk::from_hit(hit) else {
            continue;
        };
        if chunk.kind.is_main() {
            main.push(chunk);
        } else {
            background.push(chunk);
        }
    }
    main.truncate(max_main);
    background.truncate(max_background);
    main.extend(background);
    main
}

/// Ranks main-chunk slugs by `(occurrence count, max score)` descending.
///
/// Uses a stable sort, so slugs tied on both keys keep first-seen order.
/// That tie-break is an implementation artifact, not a public ordering
/// contract. Background chunks never contribute.
#[must_use]
pub fn rank_related_slugs(chunks: &[RetrievedChunk], cap: usize) -> Vec<String> {
    let mut order: Vec<String> = Vec::new();
    let mut stats: rustc_hash::FxHashMap<&str, (u32, f32)> = rustc_hash::FxHashMap::default();
    for c in chunks {
        if !c.kind.is_main() {
            continue;
        }
        let entry = stats.entry(c.slug.as_str()).or_insert_with(|| {
            order.push(c.slug.clone());
            (0, 0.0)
        });
        entry.0 += 1;
        if c.score > entry.1 {
            entry.1 = c.score;
        }
    }

    let mut ranked: Vec<(String, u32, f32)> = order
        .into_iter()
        .map(|slug| {
            let (count, max) = stats[slug.as_str()];
            (slug, count, max)
        })
        .collect();
    // Stable: exact (count, maxScore) ties keep first-seen order.
    ranked.sort_by(|a, b| (b.1, b.2).partial_cmp(&(a.1, a.2)).unwrap_or(std::cmp::Ordering::Equal));
    ranked.into_iter().take(cap).map(|(slug, ..)| slug).collect()
}

// ── Store-truth items ──────────────────────────────────────────────────

/// Store-truth record for a content item, looked up by slug.
///
/// Metadata from this record overrides whatever the model asserted, which
/// is what keeps artifact titles and periods hallucination-free.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ItemRecord {
    pub slug: String,
    pub kind: ChunkKind,
    pub title: Option<String>,
    pub company: Option<String>,
    pub role: Option<String>,
    pub period: Option<String>,
    pub ui_visible: bool,
}

impl ItemRecord {
    /// Parses an item payload; `uiVisible` defaults to true when absent.
    #[must_use]
    pub fn from_payload(payload: &Value) -> Option<Self> {
        let slug = str_field(payload, "slug")?;
        Some(Self {
            slug,
            kind: ChunkKind::parse(payload.get("type").and_then(Value::as_str)),
            title: opt_str_field(payload, "title"),
            company: opt_str_field(payload, "company"),
            role: opt_str_field(payload, "role"),
            period: opt_str_field(payload, "period"),
            ui_visible: payload
                .get("uiVisible")
                .and_then(Value::as_bool)
                .unwrap_or(true),
        })
    }

    /// An item may appear in the UI only if it exists, is not background,
    /// and is not explicitly hidden.
    #[must_use]
    pub fn is_ui_visible(record: Option<&ItemRecord>) -> bool {
        match record {
            Some(item) => item.kind != ChunkKind::Background && item.ui_visible,
            None => false,
        }
    }
}
