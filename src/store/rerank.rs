//! Cross-encoder or RRF fallback reranking, grounded in
//! `nlp/rerank.rs`'s `Reranker` (tokenize/score_result/rerank shape),
//! generalized from its title/content keyword-overlap scorer to a
//! standard reciprocal-rank-fusion blend, and to delegate to a
//! cross-encoder `RerankClient` when one is configured.

use std::collections::HashMap;

use crate::core::providers::RerankClient;
use crate::core::types::Chunk;

/// RRF constant.
const RRF_K: f64 = 60.0;

/// A candidate chunk carrying its precomputed vector similarity, as
/// handed in from the Knowledge Store search.
#[derive(Debug, Clone)]
pub struct RerankCandidate {
    pub chunk: Chunk,
    pub similarity: f64,
}

/// Reranks `candidates` against `query`: prefers `cross_encoder` when
/// given, scoring query+document pairs and rewriting similarity with the
/// returned relevance score; falls back to Reciprocal Rank Fusion of
/// vector rank and keyword-overlap rank on any client error or absence.
pub async fn rerank(
    query: &str,
    candidates: Vec<RerankCandidate>,
    cross_encoder: Option<&dyn RerankClient>,
) -> Vec<RerankCandidate> {
    if candidates.is_empty() {
        return Vec::new();
    }

    if let Some(client) = cross_encoder {
        let texts: Vec<String> = candidates.iter().map(|c| c.chunk.chunk_text.clone()).collect();
        match client.score(query, &texts).await {
            Ok(scores) if scores.len() == candidates.len() => {
                let mut rescored: Vec<RerankCandidate> = candidates
                    .into_iter()
                    .zip(scores)
                    .map(|(mut c, score)| {
                        c.similarity = score;
                        c
                    })
                    .collect();
                rescored.sort_by(|a, b| {
                    b.similarity.partial_cmp(&a.similarity).unwrap_or(std::cmp::Ordering::Equal)
                });
                return rescored;
            }
            _ => {
                tracing::warn!("cross-encoder rerank failed or mismatched, falling back to RRF");
            }
        }
    }

    rrf_fallback(query, candidates)
}

fn rrf_fallback(query: &str, mut candidates: Vec<RerankCandidate>) -> Vec<RerankCandidate> {
    let terms: Vec<String> = query
        .split_whitespace()
        .map(|w| w.to_ascii_lowercase())
        .filter(|w| w.len() >= 3)
        .collect();

    let mut by_vector: Vec<usize> = (0..candidates.len()).collect();
    by_vector.sort_by(|&a, &b| {
        candidates[b]
            .similarity
            .partial_cmp(&candidates[a].similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let mut vector_rank = vec![0usize; candidates.len()];
    for (rank, &idx) in by_vector.iter().enumerate() {
        vector_rank[idx] = rank;
    }

    let keyword_fraction: Vec<f64> = candidates
        .iter()
        .map(|c| {
            if terms.is_empty() {
                0.0
            } else {
                let lower = c.chunk.chunk_text.to_ascii_lowercase();
                let hits = terms.iter().filter(|t| lower.contains(t.as_str())).count();
                hits as f64 / terms.len() as f64
            }
        })
        .collect();

    let mut by_keyword: Vec<usize> = (0..candidates.len()).collect();
    by_keyword.sort_by(|&a, &b| {
        keyword_fraction[b]
            .partial_cmp(&keyword_fraction[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let mut keyword_rank = vec![0usize; candidates.len()];
    for (rank, &idx) in by_keyword.iter().enumerate() {
        keyword_rank[idx] = rank;
    }

    let mut scores = vec![0.0f64; candidates.len()];
    for i in 0..candidates.len() {
        scores[i] = 1.0 / (RRF_K + vector_rank[i] as f64) + 1.0 / (RRF_K + keyword_rank[i] as f64);
    }

    for (candidate, score) in candidates.iter_mut().zip(scores.iter()) {
        candidate.similarity = *score;
    }
    candidates.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap_or(std::cmp::Ordering::Equal));
    candidates
}

/// Caps chunks per `source_url` at `max_per_source`, then truncates to
/// `limit`.
pub fn dedup_and_truncate(
    candidates: Vec<RerankCandidate>,
    max_per_source: usize,
    limit: usize,
) -> Vec<RerankCandidate> {
    let mut per_source: HashMap<String, usize> = HashMap::new();
    let mut out = Vec::new();

    for candidate in candidates {
        let count = per_source.entry(candidate.chunk.source_url.clone()).or_insert(0);
        if *count >= max_per_source {
            continue;
        }
        *count += 1;
        out.push(candidate);
        if out.len() >= limit {
            break;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ChunkMetadata, SourceType};
    use chrono::Utc;

    fn candidate(source_url: &str, text: &str, similarity: f64) -> RerankCandidate {
        RerankCandidate {
            chunk: Chunk {
                id: uuid::Uuid::new_v4(),
                tenant_id: "t1".to_string(),
                source_url: source_url.to_string(),
                source_title: "title".to_string(),
                source_root: None,
                source_type: SourceType::Direct,
                chunk_text: text.to_string(),
                chunk_index: 0,
                embedding: vec![],
                metadata: ChunkMetadata {
                    title: "title".to_string(),
                    source_root: None,
                    page_url: source_url.to_string(),
                    source_type: SourceType::Direct,
                    ingested_at: Utc::now(),
                    extras: Default::default(),
                },
            },
            similarity,
        }
    }

    #[tokio::test]
    async fn nil_candidates_returns_empty() {
        let result = rerank("query", Vec::new(), None).await;
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn no_cross_encoder_falls_back_to_rrf_deterministically() {
        let candidates = vec![
            candidate("https://x/a", "rust programming guide", 0.9),
            candidate("https://x/b", "cooking recipes", 0.5),
        ];
        let result = rerank("rust programming", candidates, None).await;
        assert_eq!(result[0].chunk.source_url, "https://x/a");
    }

    #[test]
    fn dedup_caps_per_source_and_truncates() {
        let candidates = vec![
            candidate("https://x/a", "one", 0.9),
            candidate("https://x/a", "two", 0.8),
            candidate("https://x/a", "three", 0.7),
            candidate("https://x/b", "four", 0.6),
        ];
        let result = dedup_and_truncate(candidates, 2, 3);
        assert_eq!(result.len(), 3);
        let from_a = result.iter().filter(|c| c.chunk.source_url == "https://x/a").count();
        assert_eq!(from_a, 2);
    }
}
