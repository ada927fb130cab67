//! Shared application state, grounded in `AppState`
//! (`core/app_state.rs`): a single `Arc`-wrapped struct threading the HTTP
//! client, caches, and external-collaborator handles through every
//! subsystem, constructed once at startup and cloned cheaply per task.

use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::core::config::QuarryConfig;
use crate::core::health::HealthTracker;
use crate::core::metrics::MetricsSink;
use crate::core::providers::{EmbeddingProvider, LlmProvider, RerankClient};
use crate::crawl::robots::RobotsHandler;
use crate::store::knowledge::KnowledgeStore;
use crate::store::page_cache::PageCacheStore;

/// Everything a crawl/schedule/embed task needs, assembled once at
/// startup. Cloned via `Arc` into worker tasks rather than passed by
/// reference, mirroring the `Arc<AppState>` handler pattern this crate's
/// subsystems share.
pub struct AppState {
    pub http_client: reqwest::Client,
    pub config: QuarryConfig,
    pub metrics: Arc<MetricsSink>,
    pub health: Arc<HealthTracker>,
    pub page_cache: Arc<dyn PageCacheStore>,
    pub knowledge_store: Arc<dyn KnowledgeStore>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub llm: Option<Arc<dyn LlmProvider>>,
    pub reranker: Option<Arc<dyn RerankClient>>,
    /// Caps total concurrent crawl cycles (across tenants) at 3, acquired
    /// by `DrainCycle::run` for the duration of a cycle.
    pub admin_crawl_limit: Arc<Semaphore>,
    /// Per-host robots.txt rules, consulted by the crawler before every
    /// non-local fetch and by the drain loop for crawl-delay pacing.
    pub robots: Arc<RobotsHandler>,
}

impl AppState {
    pub fn new(
        http_client: reqwest::Client,
        config: QuarryConfig,
        page_cache: Arc<dyn PageCacheStore>,
        knowledge_store: Arc<dyn KnowledgeStore>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        let robots = Arc::new(RobotsHandler::with_delay_bounds(
            crate::core::config::CRAWLER_USER_AGENT.to_string(),
            config.crawl.resolve_min_crawl_delay(),
            config.crawl.resolve_max_crawl_delay(),
        ));
        Self {
            http_client,
            config,
            metrics: Arc::new(MetricsSink::new()),
            health: Arc::new(HealthTracker::new()),
            page_cache,
            knowledge_store,
            embedder,
            llm: None,
            reranker: None,
            admin_crawl_limit: Arc::new(Semaphore::new(3)),
            robots,
        }
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmProvider>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_reranker(mut self, reranker: Arc<dyn RerankClient>) -> Self {
        self.reranker = Some(reranker);
        self
    }
}
