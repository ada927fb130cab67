use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A tenant identifier. Kept as an opaque string rather than a newtype with
/// validation — the multi-tenant boundary is enforced by callers threading
/// this value through every store/cache key, not by the type itself.
pub type TenantId = String;

/// Sitemap `changefreq` hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeFreq {
    Always,
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Yearly,
    Never,
}

impl ChangeFreq {
    pub fn parse_str(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "always" => Some(Self::Always),
            "hourly" => Some(Self::Hourly),
            "daily" => Some(Self::Daily),
            "weekly" => Some(Self::Weekly),
            "monthly" => Some(Self::Monthly),
            "yearly" => Some(Self::Yearly),
            "never" => Some(Self::Never),
            _ => None,
        }
    }

    /// Priority-score bonus contributed by this changefreq hint.
    pub fn priority_bonus(self) -> f64 {
        match self {
            Self::Always => 8.0,
            Self::Hourly => 6.0,
            Self::Daily => 4.0,
            Self::Weekly => 2.0,
            Self::Monthly | Self::Yearly | Self::Never => 0.0,
        }
    }
}

/// How a page entered the crawl set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Local,
    Direct,
    Sitemap,
    Discovered,
}

impl SourceType {
    /// Base priority-score contribution.
    pub fn base_score(self) -> f64 {
        match self {
            Self::Local => 100.0,
            Self::Direct => 50.0,
            Self::Sitemap => 10.0,
            Self::Discovered => 5.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Direct => "direct",
            Self::Sitemap => "sitemap",
            Self::Discovered => "discovered",
        }
    }
}

/// Outcome of processing one page through the crawler's state machine
///. Closed enum — nine variants, no catch-all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageStatus {
    PageFetched,
    PageSkipped304,
    PageSkippedHash,
    PageSkippedTTL,
    PageFailed,
    PageEmbedded,
    PageDisallowed,
    PageNoChunks,
    PageExcluded,
}

/// One source definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// Sitemap URL to expand.
    Sitemap { url: String },
    /// A single page, optionally force-rendered.
    Direct { url: String, render: bool },
    /// A local file, resolved relative to a configured root directory.
    Local { path: std::path::PathBuf },
}

impl Source {
    /// Canonical dedup key for this source.
    pub fn key(&self) -> String {
        match self {
            Source::Local { path } => format!("local://{}", path.display()),
            Source::Direct { url, .. } => url.clone(),
            Source::Sitemap { url } => url.clone(),
        }
    }

    pub fn source_type(&self) -> SourceType {
        match self {
            Source::Local { .. } => SourceType::Local,
            Source::Direct { .. } => SourceType::Direct,
            Source::Sitemap { .. } => SourceType::Sitemap,
        }
    }
}

/// Sitemap-derived hints attached to a discovered page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SitemapHints {
    /// In [0, 1].
    pub priority: Option<f64>,
    pub changefreq: Option<ChangeFreq>,
    pub lastmod: Option<DateTime<Utc>>,
}

/// Result of fetching one page.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub title: String,
    pub content: String,
    /// SHA-256 hex of the normalized extracted text.
    pub content_hash: String,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub not_modified: bool,
    pub raw_bytes: Vec<u8>,
    pub raw_size: u64,
}

/// Persisted per-(tenant, page_url) crawl state.
#[derive(Debug, Clone, PartialEq)]
pub struct PageCacheRow {
    pub tenant: TenantId,
    pub page_url: String,
    pub content_hash: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub raw_size: Option<u64>,
    pub last_fetched_at: DateTime<Utc>,
    pub sitemap_priority: Option<f64>,
    pub sitemap_changefreq: Option<ChangeFreq>,
    pub consecutive_unchanged: u32,
    pub consecutive_failures: u32,
    pub source_type: SourceType,
    pub source_root: Option<String>,
}

impl PageCacheRow {
    /// A freshly-discovered row with no fetch history yet.
    pub fn new_unfetched(
        tenant: TenantId,
        page_url: String,
        source_type: SourceType,
        source_root: Option<String>,
        hints: SitemapHints,
    ) -> Self {
        Self {
            tenant,
            page_url,
            content_hash: None,
            etag: None,
            last_modified: None,
            raw_size: None,
            last_fetched_at: zero_time(),
            sitemap_priority: hints.priority,
            sitemap_changefreq: hints.changefreq,
            consecutive_unchanged: 0,
            consecutive_failures: 0,
            source_type,
            source_root,
        }
    }

    pub fn never_crawled(&self) -> bool {
        self.last_fetched_at == zero_time()
    }
}

/// Sentinel "zero" timestamp used to mean "never fetched".
pub fn zero_time() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(0, 0).expect("epoch is representable")
}

/// A chunk of embeddable text plus its vector and provenance metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: uuid::Uuid,
    pub tenant_id: TenantId,
    pub source_url: String,
    pub source_title: String,
    pub source_root: Option<String>,
    pub source_type: SourceType,
    pub chunk_text: String,
    pub chunk_index: usize,
    pub embedding: Vec<f32>,
    pub metadata: ChunkMetadata,
}

/// Recognized metadata keys plus an open overflow bag.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub title: String,
    pub source_root: Option<String>,
    pub page_url: String,
    pub source_type: SourceType,
    pub ingested_at: DateTime<Utc>,
    #[serde(default)]
    pub extras: HashMap<String, serde_json::Value>,
}

/// In-memory crawl-queue entry.
#[derive(Debug, Clone)]
pub struct CrawlItem {
    pub page_url: String,
    pub source_root: Option<String>,
    pub source_type: SourceType,
    pub render: bool,
    pub last_fetched_at: DateTime<Utc>,
    pub hints: SitemapHints,
    pub consecutive_unchanged: u32,
    pub consecutive_failures: u32,
    pub score: f64,
}

/// Per-host robots rules.
#[derive(Debug, Clone, PartialEq)]
pub struct RobotsRules {
    pub crawl_delay: std::time::Duration,
    pub disallow: Vec<String>,
    pub fetched_at: DateTime<Utc>,
}

/// Outcome of one page's processing, folded into a batch/cycle summary.
#[derive(Debug, Clone)]
pub struct CrawlOutcome {
    pub page_url: String,
    pub status: PageStatus,
    pub error: Option<String>,
}

/// Aggregate result of draining a crawl batch.
#[derive(Debug, Clone, Default)]
pub struct CrawlResult {
    pub outcomes: Vec<CrawlOutcome>,
}

impl CrawlResult {
    pub fn count(&self, status: PageStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }
}
