//! Recall Engine: filter → three parallel scorers → weighted fuse with
//! time-decay → optional reranker (spec §4.6).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use libsql::{Connection, params};
use serde::{Deserialize, Serialize};

use crate::collaborators::Embedder;
use crate::config::{PipelineConfig, RecallWeights};
use crate::db::Accessor;
use crate::error::RecallError;
use crate::graph;
use crate::index::{fts, vector};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecallFilter {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub tags: Option<Vec<String>>,
    pub who: Option<String>,
    pub pinned: Option<bool>,
    pub importance_min: Option<f64>,
    pub since: Option<DateTime<Utc>>,
    #[serde(rename = "minScore")]
    pub min_score: Option<f64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecallSource {
    Hybrid,
    Vector,
    Keyword,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecallHit {
    pub id: String,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub importance: f64,
    pub score: f64,
    pub source: RecallSource,
    #[serde(skip)]
    pub updated_at: DateTime<Utc>,
}

struct Candidate {
    id: String,
    content: String,
    kind: String,
    importance: f64,
    pinned: bool,
    updated_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

pub struct RecallEngine {
    accessor: Arc<Accessor>,
    embedder: Arc<dyn Embedder>,
}

impl RecallEngine {
    pub fn new(accessor: Arc<Accessor>, embedder: Arc<dyn Embedder>) -> Self {
        Self { accessor, embedder }
    }

    pub fn embedding_dimensions(&self) -> usize {
        self.embedder.dimensions()
    }

    /// Run recall for `query` under `filter`, honoring `cfg`'s fusion
    /// weights, pinned boost, half-life, and reranker settings (spec §4.6).
    pub async fn recall(&self, query: &str, filter: RecallFilter, cfg: &PipelineConfig) -> Result<Vec<RecallHit>, RecallError> {
        let query = query.trim().to_string();
        let limit = filter.limit.unwrap_or(10).clamp(1, 500);
        let filter_clone = filter.clone();

        let candidates = self
            .accessor
            .with_read(move |conn| async move { load_candidates(&conn, &filter_clone).await })
            .await?;

        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        if query.is_empty() {
            // Edge case (spec §4.6): empty query with filters is a
            // filter-only listing ordered by (updated_at desc, id asc);
            // empty query with no filters returns nothing, which the empty
            // candidate set above already handles.
            let mut by_recency: Vec<&Candidate> = candidates.iter().collect();
            by_recency.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
            let ordered: Vec<RecallHit> = by_recency
                .into_iter()
                .take(limit as usize)
                .map(|c| RecallHit {
                    id: c.id.clone(),
                    content: c.content.clone(),
                    kind: c.kind.clone(),
                    importance: c.importance,
                    score: 0.0,
                    source: RecallSource::Keyword,
                    updated_at: c.updated_at,
                })
                .collect();
            return Ok(ordered);
        }

        let keyword_hits = self
            .accessor
            .with_read({
                let query = query.clone();
                move |conn| async move { fts::keyword_search(&conn, &query, 500).await }
            })
            .await?;

        let query_embedding = self.embedder.embed(&query).await.ok();
        let vector_hits = match &query_embedding {
            Some(vec) => {
                let vec = vec.clone();
                self.accessor
                    .with_read(move |conn| async move { vector::nearest_neighbors(&conn, &vec, 500).await })
                    .await?
            }
            None => Vec::new(),
        };

        let graph_boost_weight = cfg.graph_boost_weight;
        let graph_boosts = self
            .accessor
            .with_read({
                let ids: Vec<String> = candidates.iter().map(|c| c.id.clone()).collect();
                move |conn| async move { graph_boosts_for(&conn, &ids, graph_boost_weight).await }
            })
            .await?;

        let weights = cfg.recall_weights;
        let now = Utc::now();
        let half_life = cfg.recall_half_life_secs.max(1.0);

        let mut scored: Vec<RecallHit> = candidates
            .into_iter()
            .map(|c| {
                let keyword_score = keyword_hits.iter().find(|h| h.memory_id == c.id).map(|h| h.score).unwrap_or(0.0);
                let vector_score = vector_hits.iter().find(|h| h.memory_id == c.id).map(|h| h.score).unwrap_or(0.0);
                let graph_score = graph_boosts.get(&c.id).copied().unwrap_or(0.0);

                let fused = fuse(&weights, keyword_score, vector_score, graph_score);
                let pinned_bonus = if c.pinned { cfg.pinned_boost } else { 0.0 };
                let age_secs = (now - c.created_at).num_seconds().max(0) as f64;
                let decay = (-age_secs / half_life).exp();
                let score = (fused + pinned_bonus) * decay;

                let source = if vector_score > 0.0 && keyword_score > 0.0 {
                    RecallSource::Hybrid
                } else if vector_score > 0.0 {
                    RecallSource::Vector
                } else {
                    RecallSource::Keyword
                };

                RecallHit { id: c.id, content: c.content, kind: c.kind, importance: c.importance, score, source, updated_at: c.updated_at }
            })
            .collect();

        sort_hits(&mut scored);

        if cfg.reranker_enabled {
            if let Some(query_vec) = &query_embedding {
                scored = self.rerank(scored, query_vec, cfg).await;
            }
        }

        let min_score = filter.min_score.unwrap_or(f64::MIN);
        scored.retain(|h| h.score >= min_score);
        scored.truncate(limit as usize);
        Ok(scored)
    }

    /// Re-score the top-N by cosine similarity against a fresh embedding of
    /// each candidate's content, falling back to the fused order on timeout
    /// (spec §4.6 step 4).
    async fn rerank(&self, fused: Vec<RecallHit>, query_vec: &[f32], cfg: &PipelineConfig) -> Vec<RecallHit> {
        let top_n = cfg.reranker_top_n.min(fused.len());
        let (head, tail) = fused.split_at(top_n);
        let mut head = head.to_vec();
        let tail = tail.to_vec();

        let timeout = std::time::Duration::from_millis(cfg.reranker_timeout_ms);
        let reranked = tokio::time::timeout(timeout, self.rerank_inner(&mut head, query_vec)).await;

        match reranked {
            Ok(()) => {
                sort_hits(&mut head);
                head.into_iter().chain(tail).collect()
            }
            Err(_) => {
                tracing::warn!("reranker timed out, falling back to fused order");
                head.into_iter().chain(tail).collect()
            }
        }
    }

    async fn rerank_inner(&self, hits: &mut [RecallHit], query_vec: &[f32]) {
        for hit in hits.iter_mut() {
            if let Ok(fresh) = self.embedder.embed(&hit.content).await {
                hit.score = cosine_similarity(query_vec, &fresh);
            }
        }
    }
}

fn fuse(weights: &RecallWeights, keyword: f64, vector: f64, graph: f64) -> f64 {
    weights.keyword * keyword + weights.vector * vector + weights.graph * graph
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        (dot / (norm_a * norm_b)) as f64
    }
}

/// Stable by (score desc, updated_at desc, id asc); a memory never appears
/// twice because candidates are deduplicated by id before scoring (spec §4.6).
fn sort_hits(hits: &mut [RecallHit]) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.updated_at.cmp(&a.updated_at))
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Per-candidate graph boost (spec §4.6 "a memory gains a fixed fraction ...
/// for each entity shared with ... the candidate pool's hottest entities").
/// Entity extraction from the query itself only runs on the Generator-backed
/// extract worker, not synchronously during recall, so the "hottest
/// entities" leg of that either/or is the one available here: an entity
/// counts as hot once more than one candidate in the pool mentions it, and
/// each candidate earns `graph_boost_weight` per hot entity it shares.
async fn graph_boosts_for(
    conn: &Connection,
    ids: &[String],
    graph_boost_weight: f64,
) -> Result<std::collections::HashMap<String, f64>, crate::error::AccessorError> {
    use std::collections::HashMap;

    if graph_boost_weight == 0.0 {
        return Ok(HashMap::new());
    }

    let mut entities_by_memory: HashMap<String, Vec<String>> = HashMap::new();
    let mut pool_freq: HashMap<String, i64> = HashMap::new();
    for id in ids {
        let entities = graph::entities_for_memory(conn, id).await.map_err(|e| match e {
            crate::error::GraphError::Database(a) => a,
        })?;
        for entity_id in &entities {
            *pool_freq.entry(entity_id.clone()).or_insert(0) += 1;
        }
        entities_by_memory.insert(id.clone(), entities);
    }

    let mut boosts = HashMap::new();
    for (id, entities) in &entities_by_memory {
        let shared_count = entities.iter().filter(|e| pool_freq.get(e.as_str()).copied().unwrap_or(0) >= 2).count() as f64;
        if shared_count > 0.0 {
            boosts.insert(id.clone(), graph_boost_weight * shared_count);
        }
    }
    Ok(boosts)
}

async fn load_candidates(conn: &Connection, filter: &RecallFilter) -> Result<Vec<Candidate>, crate::error::AccessorError> {
    let mut sql = "SELECT id, content, type, importance, pinned, updated_at, created_at
         FROM memories WHERE is_deleted = 0"
        .to_string();

    if filter.kind.is_some() {
        sql.push_str(" AND type = ?1");
    }
    if filter.who.is_some() {
        sql.push_str(" AND who = ?2");
    }
    if filter.pinned.is_some() {
        sql.push_str(" AND pinned = ?3");
    }
    if filter.importance_min.is_some() {
        sql.push_str(" AND importance >= ?4");
    }
    if filter.since.is_some() {
        sql.push_str(" AND created_at >= ?5");
    }
    sql.push_str(" ORDER BY updated_at DESC LIMIT 2000");

    let p = params![
        filter.kind.clone().unwrap_or_default(),
        filter.who.clone().unwrap_or_default(),
        filter.pinned.unwrap_or(false),
        filter.importance_min.unwrap_or(0.0),
        filter.since.map(|d| d.to_rfc3339()).unwrap_or_default(),
    ];

    let mut rows = conn.query(&sql, p).await?;
    let mut out = Vec::new();
    while let Some(row) = rows.next().await? {
        let updated_at: String = row.get(5)?;
        let created_at: String = row.get(6)?;
        let candidate = Candidate {
            id: row.get(0)?,
            content: row.get(1)?,
            kind: row.get(2)?,
            importance: row.get(3)?,
            pinned: row.get(4)?,
            updated_at: DateTime::parse_from_rfc3339(&updated_at).map(|d| d.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now()),
            created_at: DateTime::parse_from_rfc3339(&created_at).map(|d| d.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now()),
        };
        if let Some(tags) = &filter.tags {
            if !tags.is_empty() {
                // Tag filter applied in Rust: the tags column is a flat
                // comma-joined string, not worth a LIKE per tag in SQL.
                let mut tag_rows = conn
                    .query("SELECT tags FROM memories WHERE id = ?1", params![candidate.id.clone()])
                    .await?;
                let has_match = if let Some(row) = tag_rows.next().await? {
                    let raw: String = row.get(0)?;
                    let memory_tags = crate::memory::model::split_tags(&raw);
                    tags.iter().any(|t| memory_tags.contains(t))
                } else {
                    false
                };
                if !has_match {
                    continue;
                }
            }
        }
        out.push(candidate);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_similarity_identical_vectors_is_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn fuse_uses_configured_weights() {
        let weights = RecallWeights { keyword: 0.4, vector: 0.5, graph: 0.1 };
        assert!((fuse(&weights, 1.0, 0.0, 0.0) - 0.4).abs() < 1e-9);
        assert!((fuse(&weights, 0.0, 1.0, 0.0) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn sort_is_stable_by_score_then_id() {
        let now = Utc::now();
        let mut hits = vec![
            RecallHit { id: "b".into(), content: String::new(), kind: "fact".into(), importance: 0.5, score: 1.0, source: RecallSource::Keyword, updated_at: now },
            RecallHit { id: "a".into(), content: String::new(), kind: "fact".into(), importance: 0.5, score: 1.0, source: RecallSource::Keyword, updated_at: now },
        ];
        sort_hits(&mut hits);
        assert_eq!(hits[0].id, "a");
    }

    #[test]
    fn sort_prefers_more_recently_updated_on_tied_score() {
        let older = Utc::now() - chrono::Duration::seconds(60);
        let newer = Utc::now();
        let mut hits = vec![
            RecallHit { id: "a".into(), content: String::new(), kind: "fact".into(), importance: 0.5, score: 1.0, source: RecallSource::Keyword, updated_at: older },
            RecallHit { id: "b".into(), content: String::new(), kind: "fact".into(), importance: 0.5, score: 1.0, source: RecallSource::Keyword, updated_at: newer },
        ];
        sort_hits(&mut hits);
        assert_eq!(hits[0].id, "b", "tied score should prefer the more recently updated memory before falling back to id");
    }
}
