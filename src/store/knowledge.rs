//! Vector + lexical index, upsert, hybrid search, with an in-memory reference
//! implementation grounded structurally on `features/history.rs::MemoryManager`:
//! an append/replace API over a fixed-dimension vector column,
//! `DistanceType::Cosine`-style similarity (`1 - distance`), and a hybrid
//! path blending vector score with a lexical score, the way
//! `MemoryManager::search_history` already blends LanceDB cosine distance
//! with a keyword-match boost. A Postgres/tsvector-style `textRank` is
//! treated as an external collaborator out of scope here; this reference
//! store instead computes a simple term-frequency lexical score so
//! `HybridSearch` has one real implementation to test against.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::core::types::{Chunk, SourceType, TenantId};

#[derive(Debug, thiserror::Error)]
pub enum KnowledgeStoreError {
    #[error("knowledge store backend error: {0}")]
    Backend(String),
}

/// Default minimum similarity for vector/hybrid search.
pub const DEFAULT_MIN_SIMILARITY: f64 = 0.3;
/// Default result limit.
pub const DEFAULT_LIMIT: usize = 5;
/// Vector-score weight in the hybrid blend.
pub const HYBRID_VECTOR_WEIGHT: f64 = 0.7;
/// Lexical-score weight in the hybrid blend.
pub const HYBRID_TEXT_WEIGHT: f64 = 0.3;

#[derive(Debug, Clone)]
pub struct SourceSummary {
    pub source_key: String,
    pub page_count: u64,
    pub last_ingested_at: DateTime<Utc>,
}

/// Vector + lexical index over chunks.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Within one (tenant, source_url), replaces the existing chunk set
    /// atomically.
    async fn upsert(&self, chunks: Vec<Chunk>) -> Result<(), KnowledgeStoreError>;

    async fn search(
        &self,
        tenant: &str,
        query_embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<(Chunk, f64)>, KnowledgeStoreError>;

    async fn hybrid_search(
        &self,
        tenant: &str,
        query_embedding: &[f32],
        query_text: &str,
        limit: usize,
    ) -> Result<Vec<(Chunk, f64)>, KnowledgeStoreError>;

    async fn search_filtered(
        &self,
        tenant: &str,
        query_embedding: &[f32],
        query_text: &str,
        limit: usize,
        source_type: Option<SourceType>,
    ) -> Result<Vec<(Chunk, f64)>, KnowledgeStoreError>;

    async fn delete_by_source(&self, tenant: &str, url_or_root: &str) -> Result<u64, KnowledgeStoreError>;

    async fn list_sources(&self, tenant: &str) -> Result<Vec<SourceSummary>, KnowledgeStoreError>;
}

#[derive(Default)]
pub struct InMemoryKnowledgeStore {
    chunks: RwLock<HashMap<TenantId, Vec<Chunk>>>,
}

impl InMemoryKnowledgeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| *x as f64 * *y as f64).sum();
    let norm_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Simple term-frequency lexical score in [0, 1]: fraction of query terms
/// (lowercased, length ≥ 3) present in the chunk text, standing in for
/// the Postgres `tsvector` rank the original spec names as an external
/// collaborator.
fn lexical_rank(query_text: &str, chunk_text: &str) -> f64 {
    let terms: Vec<String> = query_text
        .split_whitespace()
        .map(|w| w.to_ascii_lowercase())
        .filter(|w| w.len() >= 3)
        .collect();
    if terms.is_empty() {
        return 0.0;
    }
    let lower_chunk = chunk_text.to_ascii_lowercase();
    let hits = terms.iter().filter(|t| lower_chunk.contains(t.as_str())).count();
    hits as f64 / terms.len() as f64
}

#[async_trait]
impl KnowledgeStore for InMemoryKnowledgeStore {
    async fn upsert(&self, chunks: Vec<Chunk>) -> Result<(), KnowledgeStoreError> {
        if chunks.is_empty() {
            return Ok(());
        }
        let mut guard = self.chunks.write().map_err(|_| lock_err())?;

        let mut by_source: HashMap<(TenantId, String), Vec<Chunk>> = HashMap::new();
        for chunk in chunks {
            by_source
                .entry((chunk.tenant_id.clone(), chunk.source_url.clone()))
                .or_default()
                .push(chunk);
        }

        for ((tenant, source_url), new_chunks) in by_source {
            let bucket = guard.entry(tenant).or_default();
            bucket.retain(|c| c.source_url != source_url);
            bucket.extend(new_chunks);
        }
        Ok(())
    }

    async fn search(
        &self,
        tenant: &str,
        query_embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<(Chunk, f64)>, KnowledgeStoreError> {
        self.search_filtered(tenant, query_embedding, "", limit, None).await
    }

    async fn hybrid_search(
        &self,
        tenant: &str,
        query_embedding: &[f32],
        query_text: &str,
        limit: usize,
    ) -> Result<Vec<(Chunk, f64)>, KnowledgeStoreError> {
        self.search_filtered(tenant, query_embedding, query_text, limit, None)
            .await
    }

    async fn search_filtered(
        &self,
        tenant: &str,
        query_embedding: &[f32],
        query_text: &str,
        limit: usize,
        source_type: Option<SourceType>,
    ) -> Result<Vec<(Chunk, f64)>, KnowledgeStoreError> {
        let guard = self.chunks.read().map_err(|_| lock_err())?;
        let Some(candidates) = guard.get(tenant) else {
            return Ok(Vec::new());
        };

        // Empty query falls back to pure vector search.
        let use_hybrid = !query_text.trim().is_empty();

        let mut scored: Vec<(Chunk, f64)> = candidates
            .iter()
            .filter(|c| source_type.map(|st| c.source_type == st).unwrap_or(true))
            .map(|c| {
                let vector_sim = cosine_similarity(query_embedding, &c.embedding);
                let score = if use_hybrid {
                    HYBRID_VECTOR_WEIGHT * vector_sim
                        + HYBRID_TEXT_WEIGHT * lexical_rank(query_text, &c.chunk_text)
                } else {
                    vector_sim
                };
                (c.clone(), score)
            })
            .filter(|(_, score)| *score > DEFAULT_MIN_SIMILARITY)
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }

    async fn delete_by_source(&self, tenant: &str, url_or_root: &str) -> Result<u64, KnowledgeStoreError> {
        let mut guard = self.chunks.write().map_err(|_| lock_err())?;
        let Some(bucket) = guard.get_mut(tenant) else {
            return Ok(0);
        };
        let before = bucket.len();
        bucket.retain(|c| {
            c.source_url != url_or_root && c.source_root.as_deref() != Some(url_or_root)
        });
        Ok((before - bucket.len()) as u64)
    }

    async fn list_sources(&self, tenant: &str) -> Result<Vec<SourceSummary>, KnowledgeStoreError> {
        let guard = self.chunks.read().map_err(|_| lock_err())?;
        let Some(candidates) = guard.get(tenant) else {
            return Ok(Vec::new());
        };

        let mut groups: HashMap<String, (u64, DateTime<Utc>)> = HashMap::new();
        for chunk in candidates {
            let key = chunk
                .source_root
                .clone()
                .unwrap_or_else(|| chunk.source_url.clone());
            let entry = groups.entry(key).or_insert((0, chunk.metadata.ingested_at));
            entry.0 += 1;
            if chunk.metadata.ingested_at > entry.1 {
                entry.1 = chunk.metadata.ingested_at;
            }
        }

        Ok(groups
            .into_iter()
            .map(|(source_key, (page_count, last_ingested_at))| SourceSummary {
                source_key,
                page_count,
                last_ingested_at,
            })
            .collect())
    }
}

fn lock_err() -> KnowledgeStoreError {
    KnowledgeStoreError::Backend("knowledge store lock poisoned".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ChunkMetadata;

    fn chunk(tenant: &str, source_url: &str, embedding: Vec<f32>, text: &str) -> Chunk {
        Chunk {
            id: uuid::Uuid::new_v4(),
            tenant_id: tenant.to_string(),
            source_url: source_url.to_string(),
            source_title: "title".to_string(),
            source_root: None,
            source_type: SourceType::Direct,
            chunk_text: text.to_string(),
            chunk_index: 0,
            embedding,
            metadata: ChunkMetadata {
                title: "title".to_string(),
                source_root: None,
                page_url: source_url.to_string(),
                source_type: SourceType::Direct,
                ingested_at: Utc::now(),
                extras: HashMap::new(),
            },
        }
    }

    #[tokio::test]
    async fn upsert_replaces_existing_source_chunks_atomically() {
        let store = InMemoryKnowledgeStore::new();
        store
            .upsert(vec![chunk("t1", "https://x/a", vec![1.0, 0.0], "old text")])
            .await
            .unwrap();
        store
            .upsert(vec![chunk("t1", "https://x/a", vec![1.0, 0.0], "new text")])
            .await
            .unwrap();

        let results = store.search("t1", &[1.0, 0.0], 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0.chunk_text, "new text");
    }

    #[tokio::test]
    async fn empty_query_hybrid_search_matches_pure_vector_search() {
        let store = InMemoryKnowledgeStore::new();
        store
            .upsert(vec![chunk("t1", "https://x/a", vec![1.0, 0.0], "rust programming guide")])
            .await
            .unwrap();

        let vector_only = store.search("t1", &[1.0, 0.0], 5).await.unwrap();
        let hybrid_empty = store.hybrid_search("t1", &[1.0, 0.0], "", 5).await.unwrap();
        assert_eq!(vector_only.len(), hybrid_empty.len());
        assert_eq!(vector_only[0].1, hybrid_empty[0].1);
    }

    #[tokio::test]
    async fn delete_by_source_removes_matching_rows() {
        let store = InMemoryKnowledgeStore::new();
        store
            .upsert(vec![chunk("t1", "https://x/a", vec![1.0, 0.0], "text")])
            .await
            .unwrap();
        let deleted = store.delete_by_source("t1", "https://x/a").await.unwrap();
        assert_eq!(deleted, 1);
        let results = store.search("t1", &[1.0, 0.0], 10).await.unwrap();
        assert!(results.is_empty());
    }
}
