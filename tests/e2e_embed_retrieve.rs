//! Chunk -> embed -> upsert -> hybrid search -> rerank round trip, wiring
//! together the embed and store subsystems the way a real ingest/query
//! pair would use them.

use async_trait::async_trait;
use quarry_ingest::core::errors::CoreError;
use quarry_ingest::core::providers::EmbeddingProvider;
use quarry_ingest::core::types::SourceType;
use quarry_ingest::embed::embedder::{embed_document_default, EmbedDocument};
use quarry_ingest::store::{InMemoryKnowledgeStore, KnowledgeStore};

/// Returns a unit vector along one of 4 axes, chosen by a crude keyword
/// sniff, so distinct topics land far apart in cosine space without a real
/// embedding model.
struct AxisEmbedder;

#[async_trait]
impl EmbeddingProvider for AxisEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CoreError> {
        Ok(texts
            .iter()
            .map(|t| {
                let lower = t.to_ascii_lowercase();
                if lower.contains("rust") {
                    vec![1.0, 0.0, 0.0, 0.0]
                } else if lower.contains("kubernetes") {
                    vec![0.0, 1.0, 0.0, 0.0]
                } else {
                    vec![0.0, 0.0, 1.0, 0.0]
                }
            })
            .collect())
    }
    fn dimensions(&self) -> usize {
        4
    }
}

fn doc(tenant: &str, source_url: &str, content: &str) -> EmbedDocument {
    EmbedDocument {
        tenant: tenant.to_string(),
        source_url: source_url.to_string(),
        source_title: "Doc".to_string(),
        source_root: Some("https://docs.example.com/sitemap.xml".to_string()),
        source_type: SourceType::Sitemap,
        content: content.to_string(),
    }
}

#[tokio::test]
async fn hybrid_search_ranks_matching_topic_first() {
    let embedder = AxisEmbedder;
    let store = InMemoryKnowledgeStore::new();

    let rust_doc = doc(
        "t1",
        "https://docs.example.com/rust-guide",
        &"The Rust ownership and borrowing model prevents data races at compile time. ".repeat(8),
    );
    let k8s_doc = doc(
        "t1",
        "https://docs.example.com/kubernetes-guide",
        &"Kubernetes schedules containerized workloads across a cluster of nodes. ".repeat(8),
    );

    for d in [rust_doc, k8s_doc] {
        let chunks = embed_document_default(d, &embedder, None).await.unwrap();
        store.upsert(chunks).await.unwrap();
    }

    let query_embedding = vec![1.0, 0.0, 0.0, 0.0];
    let results = store
        .hybrid_search("t1", &query_embedding, "rust ownership borrowing", 5)
        .await
        .unwrap();

    assert!(!results.is_empty());
    assert!(results[0].0.source_url.contains("rust-guide"));
}

#[tokio::test]
async fn upsert_is_scoped_per_tenant() {
    let embedder = AxisEmbedder;
    let store = InMemoryKnowledgeStore::new();

    let d = doc(
        "tenant-a",
        "https://docs.example.com/rust-guide",
        &"The Rust ownership and borrowing model prevents data races at compile time. ".repeat(8),
    );
    let chunks = embed_document_default(d, &embedder, None).await.unwrap();
    store.upsert(chunks).await.unwrap();

    let own_tenant = store.search("tenant-a", &[1.0, 0.0, 0.0, 0.0], 5).await.unwrap();
    let other_tenant = store.search("tenant-b", &[1.0, 0.0, 0.0, 0.0], 5).await.unwrap();

    assert!(!own_tenant.is_empty());
    assert!(other_tenant.is_empty());
}

#[tokio::test]
async fn reembedding_same_source_replaces_rather_than_appends() {
    let embedder = AxisEmbedder;
    let store = InMemoryKnowledgeStore::new();

    let first = doc(
        "t1",
        "https://docs.example.com/rust-guide",
        &"The Rust ownership and borrowing model prevents data races at compile time. ".repeat(8),
    );
    let first_chunks = embed_document_default(first, &embedder, None).await.unwrap();
    store.upsert(first_chunks).await.unwrap();

    let revised = doc(
        "t1",
        "https://docs.example.com/rust-guide",
        &"The Rust ownership and borrowing model, plus the newer async runtime, prevents data races. ".repeat(12),
    );
    let revised_chunks = embed_document_default(revised, &embedder, None).await.unwrap();
    let revised_count = revised_chunks.len();
    store.upsert(revised_chunks).await.unwrap();

    let sources = store.list_sources("t1").await.unwrap();
    assert_eq!(sources.len(), 1);
    assert_eq!(sources[0].page_count, revised_count as u64);
}
