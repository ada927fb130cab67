//! File-based config loader (`quarry-ingest.json`) with env-var fallback,
//! grounded in `ShadowConfig`'s `load_shadow_config` pattern: every field
//! is `Option<T>`, resolved `JSON field -> ENV_VAR -> default`.

use std::path::Path;

/// Crawl pacing / concurrency knobs.
#[derive(serde::Deserialize, Default, Clone, Debug)]
pub struct CrawlConfig {
    /// Worker-pool size for a crawl batch. Default: 3.
    pub concurrency: Option<usize>,
    /// Minimum per-host crawl delay floor. Default: 2s.
    pub min_crawl_delay_secs: Option<u64>,
    /// Maximum crawl delay honored from robots.txt. Default: 10s.
    pub max_crawl_delay_secs: Option<u64>,
    /// Full-cycle interval used for staleness/tick-interval math. Default: 24h.
    pub cycle_interval_secs: Option<u64>,
    /// Per-request HTTP timeout. Default: 30s.
    pub http_timeout_secs: Option<u64>,
}

impl CrawlConfig {
    pub fn resolve_concurrency(&self) -> usize {
        resolve_usize(self.concurrency, "QUARRY_CRAWL_CONCURRENCY", 3)
    }
    pub fn resolve_min_crawl_delay(&self) -> std::time::Duration {
        std::time::Duration::from_secs(resolve_u64(
            self.min_crawl_delay_secs,
            "QUARRY_MIN_CRAWL_DELAY_SECS",
            2,
        ))
    }
    pub fn resolve_max_crawl_delay(&self) -> std::time::Duration {
        std::time::Duration::from_secs(resolve_u64(
            self.max_crawl_delay_secs,
            "QUARRY_MAX_CRAWL_DELAY_SECS",
            10,
        ))
    }
    pub fn resolve_cycle_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(resolve_u64(
            self.cycle_interval_secs,
            "QUARRY_CYCLE_INTERVAL_SECS",
            24 * 3600,
        ))
    }
    pub fn resolve_http_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(resolve_u64(
            self.http_timeout_secs,
            "QUARRY_HTTP_TIMEOUT_SECS",
            30,
        ))
    }
}

/// Chunker/embedder limits.
#[derive(serde::Deserialize, Default, Clone, Debug)]
pub struct EmbedConfig {
    pub token_limit: Option<usize>,
    pub token_overlap: Option<usize>,
    pub max_batch_chunks: Option<usize>,
    pub max_batch_tokens: Option<usize>,
    pub contextual_enrichment: Option<bool>,
}

impl EmbedConfig {
    pub fn resolve_token_limit(&self) -> usize {
        resolve_usize(self.token_limit, "QUARRY_EMBED_TOKEN_LIMIT", 500)
    }
    pub fn resolve_token_overlap(&self) -> usize {
        resolve_usize(self.token_overlap, "QUARRY_EMBED_TOKEN_OVERLAP", 50)
    }
    pub fn resolve_max_batch_chunks(&self) -> usize {
        resolve_usize(self.max_batch_chunks, "QUARRY_EMBED_MAX_BATCH_CHUNKS", 2048)
    }
    pub fn resolve_max_batch_tokens(&self) -> usize {
        resolve_usize(
            self.max_batch_tokens,
            "QUARRY_EMBED_MAX_BATCH_TOKENS",
            250_000,
        )
    }
    pub fn resolve_contextual_enrichment(&self) -> bool {
        if let Some(b) = self.contextual_enrichment {
            return b;
        }
        std::env::var("QUARRY_CONTEXTUAL_ENRICHMENT")
            .map(|v| matches!(v.trim(), "1" | "true" | "yes" | "on"))
            .unwrap_or(false)
    }
}

/// Retriever/reranker limits.
#[derive(serde::Deserialize, Default, Clone, Debug)]
pub struct RetrieveConfig {
    pub min_similarity: Option<f64>,
    pub default_limit: Option<usize>,
    pub max_per_source: Option<usize>,
}

impl RetrieveConfig {
    pub fn resolve_min_similarity(&self) -> f64 {
        resolve_f64(self.min_similarity, "QUARRY_MIN_SIMILARITY", 0.3)
    }
    pub fn resolve_default_limit(&self) -> usize {
        resolve_usize(self.default_limit, "QUARRY_DEFAULT_LIMIT", 5)
    }
    pub fn resolve_max_per_source(&self) -> usize {
        resolve_usize(self.max_per_source, "QUARRY_MAX_PER_SOURCE", 3)
    }
}

/// Embedding/LLM provider endpoint config,
/// grounded in `ShadowDeepResearchConfig`'s resolution shape.
#[derive(serde::Deserialize, Default, Clone, Debug)]
pub struct ProviderConfig {
    pub llm_base_url: Option<String>,
    pub llm_api_key: Option<String>,
    pub llm_model: Option<String>,
    pub embedding_model: Option<String>,
    pub embedding_dimensions: Option<usize>,
}

impl ProviderConfig {
    /// API key: JSON field → `OPENAI_API_KEY` env var → `None`.
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(k) = &self.llm_api_key {
            return Some(k.trim().to_string());
        }
        std::env::var("OPENAI_API_KEY").ok().filter(|v| !v.trim().is_empty())
    }

    /// Base URL: JSON field → `OPENAI_BASE_URL` env var → `https://api.openai.com/v1`.
    pub fn resolve_base_url(&self) -> String {
        if let Some(u) = &self.llm_base_url {
            if !u.trim().is_empty() {
                return u.clone();
            }
        }
        std::env::var("OPENAI_BASE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string())
    }

    /// Chat model: JSON field → `QUARRY_LLM_MODEL` env var → `gpt-4o-mini`.
    pub fn resolve_chat_model(&self) -> String {
        if let Some(m) = &self.llm_model {
            if !m.trim().is_empty() {
                return m.clone();
            }
        }
        std::env::var("QUARRY_LLM_MODEL").ok().filter(|v| !v.trim().is_empty()).unwrap_or_else(|| "gpt-4o-mini".to_string())
    }

    /// Embedding model: JSON field → `QUARRY_EMBEDDING_MODEL` env var → `text-embedding-3-small`.
    pub fn resolve_embedding_model(&self) -> String {
        if let Some(m) = &self.embedding_model {
            if !m.trim().is_empty() {
                return m.clone();
            }
        }
        std::env::var("QUARRY_EMBEDDING_MODEL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "text-embedding-3-small".to_string())
    }

    /// Embedding vector width: JSON field → `QUARRY_EMBEDDING_DIMENSIONS` env var → 1536.
    pub fn resolve_embedding_dimensions(&self) -> usize {
        resolve_usize(self.embedding_dimensions, "QUARRY_EMBEDDING_DIMENSIONS", 1536)
    }
}

/// Top-level config loaded from `quarry-ingest.json`.
#[derive(serde::Deserialize, Default, Clone, Debug)]
pub struct QuarryConfig {
    #[serde(default)]
    pub crawl: CrawlConfig,
    #[serde(default)]
    pub embed: EmbedConfig,
    #[serde(default)]
    pub retrieve: RetrieveConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
}

/// Load `quarry-ingest.json` from standard locations.
///
/// Search order (first found wins):
/// 1. `./quarry-ingest.json` (process cwd)
/// 2. `../quarry-ingest.json` (one level up)
/// 3. `QUARRY_CONFIG` env var path
///
/// Missing file -> `QuarryConfig::default()` (silent, all env-var fallbacks
/// apply). Parse error -> log a warning, return `QuarryConfig::default()`.
pub fn load_config() -> QuarryConfig {
    let mut candidates: Vec<std::path::PathBuf> = vec![
        std::path::PathBuf::from("quarry-ingest.json"),
        std::path::PathBuf::from("../quarry-ingest.json"),
    ];
    if let Ok(env_path) = std::env::var("QUARRY_CONFIG") {
        candidates.insert(0, std::path::PathBuf::from(env_path));
    }

    for path in &candidates {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<QuarryConfig>(&contents) {
                Ok(cfg) => {
                    tracing::info!("quarry-ingest.json loaded from {}", path.display());
                    return cfg;
                }
                Err(e) => {
                    tracing::warn!(
                        "quarry-ingest.json parse error at {}: {} — using defaults",
                        path.display(),
                        e
                    );
                    return QuarryConfig::default();
                }
            },
            Err(_) => continue,
        }
    }

    QuarryConfig::default()
}

fn resolve_usize(field: Option<usize>, env_var: &str, default: usize) -> usize {
    if let Some(v) = field {
        return v;
    }
    std::env::var(env_var)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn resolve_u64(field: Option<u64>, env_var: &str, default: u64) -> u64 {
    if let Some(v) = field {
        return v;
    }
    std::env::var(env_var)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn resolve_f64(field: Option<f64>, env_var: &str, default: f64) -> f64 {
    if let Some(v) = field {
        return v;
    }
    std::env::var(env_var)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Crawler user agent: fixed string.
pub const CRAWLER_USER_AGENT: &str = "QuarryIngestBot/1.0 (+https://example.invalid/bot)";

/// Whether `path` exists, used by setup-style preflight checks.
pub fn path_exists(path: &str) -> bool {
    Path::new(path).exists()
}
