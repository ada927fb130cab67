//! Orchestrates chunk → filter → enrich → batch embed,
//! producing the final [`Chunk`] rows a [`crate::store::KnowledgeStore`]
//! upsert expects.

use chrono::Utc;
use uuid::Uuid;

use crate::core::errors::CoreError;
use crate::core::providers::{EmbeddingProvider, LlmProvider};
use crate::core::types::{Chunk, ChunkMetadata, SourceType, TenantId};
use crate::embed::chunker::{assemble_chunks, split_blocks, DEFAULT_TOKEN_LIMIT, DEFAULT_TOKEN_OVERLAP};
use crate::embed::context;
use crate::embed::filter::filter_chunks;

/// Batch limits for the embedding provider.
pub const MAX_BATCH_CHUNKS: usize = 2048;
pub const MAX_BATCH_TOKENS: usize = 250_000;

pub struct EmbedDocument {
    pub tenant: TenantId,
    pub source_url: String,
    pub source_title: String,
    pub source_root: Option<String>,
    pub source_type: SourceType,
    pub content: String,
}

/// Runs the full pipeline for one document and returns its embedded
/// chunks, or [`CoreError::NoChunks`] if every chunk was filtered out.
pub async fn embed_document(
    doc: EmbedDocument,
    embedder: &dyn EmbeddingProvider,
    llm: Option<&dyn LlmProvider>,
    token_limit: usize,
    token_overlap: usize,
) -> Result<Vec<Chunk>, CoreError> {
    let blocks = split_blocks(&doc.content);
    let raw_chunks = assemble_chunks(&blocks, token_limit, token_overlap);
    let filtered = filter_chunks(raw_chunks, token_limit);

    if filtered.is_empty() {
        return Err(CoreError::NoChunks);
    }

    let display_texts: Vec<String> = filtered.iter().map(|c| c.text.clone()).collect();

    let embed_texts = if let Some(llm) = llm {
        match context::generate_context_lines(llm, &doc.source_title, &doc.content, &display_texts).await {
            Some(lines) => display_texts
                .iter()
                .zip(lines.iter())
                .map(|(text, line)| context::with_context_prefix(text, line))
                .collect(),
            None => display_texts.clone(),
        }
    } else {
        display_texts.clone()
    };

    let embeddings = embed_in_batches(embedder, &embed_texts).await?;

    if embeddings.len() != display_texts.len() {
        return Err(CoreError::EmbedError(format!(
            "embedding count mismatch: expected {}, got {}",
            display_texts.len(),
            embeddings.len()
        )));
    }

    let ingested_at = Utc::now();
    let chunks = display_texts
        .into_iter()
        .zip(embeddings)
        .enumerate()
        .map(|(index, (text, embedding))| Chunk {
            id: Uuid::new_v4(),
            tenant_id: doc.tenant.clone(),
            source_url: doc.source_url.clone(),
            source_title: doc.source_title.clone(),
            source_root: doc.source_root.clone(),
            source_type: doc.source_type,
            chunk_text: text,
            chunk_index: index,
            embedding,
            metadata: ChunkMetadata {
                title: doc.source_title.clone(),
                source_root: doc.source_root.clone(),
                page_url: doc.source_url.clone(),
                source_type: doc.source_type,
                ingested_at,
                extras: Default::default(),
            },
        })
        .collect();

    Ok(chunks)
}

/// Splits `texts` into batches respecting both `MAX_BATCH_CHUNKS` and
/// `MAX_BATCH_TOKENS`, calling the provider once per batch and
/// concatenating results in order.
async fn embed_in_batches(
    embedder: &dyn EmbeddingProvider,
    texts: &[String],
) -> Result<Vec<Vec<f32>>, CoreError> {
    let mut out = Vec::with_capacity(texts.len());
    let mut batch: Vec<String> = Vec::new();
    let mut batch_tokens = 0usize;

    for text in texts {
        let tokens = crate::embed::chunker::estimate_tokens(text);
        let would_overflow = batch.len() >= MAX_BATCH_CHUNKS || batch_tokens + tokens > MAX_BATCH_TOKENS;
        if would_overflow && !batch.is_empty() {
            out.extend(embedder.embed_batch(&batch).await?);
            batch.clear();
            batch_tokens = 0;
        }
        batch.push(text.clone());
        batch_tokens += tokens;
    }
    if !batch.is_empty() {
        out.extend(embedder.embed_batch(&batch).await?);
    }

    Ok(out)
}

/// Convenience wrapper applying the default token limit/overlap.
pub async fn embed_document_default(
    doc: EmbedDocument,
    embedder: &dyn EmbeddingProvider,
    llm: Option<&dyn LlmProvider>,
) -> Result<Vec<Chunk>, CoreError> {
    embed_document(doc, embedder, llm, DEFAULT_TOKEN_LIMIT, DEFAULT_TOKEN_OVERLAP).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FakeEmbedder {
        dims: usize,
    }

    #[async_trait]
    impl EmbeddingProvider for FakeEmbedder {
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CoreError> {
            Ok(texts.iter().map(|_| vec![0.1; self.dims]).collect())
        }
        fn dimensions(&self) -> usize {
            self.dims
        }
    }

    #[tokio::test]
    async fn embeds_document_into_chunks_in_order() {
        let embedder = FakeEmbedder { dims: 4 };
        let content = "word ".repeat(200);
        let doc = EmbedDocument {
            tenant: "t1".to_string(),
            source_url: "https://x/a".to_string(),
            source_title: "Title".to_string(),
            source_root: None,
            source_type: SourceType::Direct,
            content,
        };
        let chunks = embed_document_default(doc, &embedder, None).await.unwrap();
        assert!(!chunks.is_empty());
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, i);
            assert_eq!(chunk.embedding.len(), 4);
        }
    }

    #[tokio::test]
    async fn all_chunks_filtered_returns_no_chunks_error() {
        let embedder = FakeEmbedder { dims: 4 };
        let doc = EmbedDocument {
            tenant: "t1".to_string(),
            source_url: "https://x/a".to_string(),
            source_title: "Title".to_string(),
            source_root: None,
            source_type: SourceType::Direct,
            content: "hi".to_string(),
        };
        let result = embed_document_default(doc, &embedder, None).await;
        assert!(matches!(result, Err(CoreError::NoChunks)));
    }
}
