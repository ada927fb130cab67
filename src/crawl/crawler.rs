//! Per-page crawl orchestration, following
//! `tools/crawl.rs::crawl_website`'s BFS/worker-pool shape
//! (`futures::stream::iter(..).buffer_unordered(n)`), generalized from
//! "one crawl job over one site" to "one page's full
//! fetch → extract → embed → upsert pipeline", invoked per item by the
//! scheduler's drain loop.

use std::sync::Arc;

use chrono::Utc;
use sha2::{Digest, Sha256};

use crate::core::app_state::AppState;
use crate::core::errors::CoreError;
use crate::core::types::{FetchResult, PageCacheRow, PageStatus, SourceType};
use crate::crawl::extractor;
use crate::crawl::links;
use crate::crawl::robots::RobotsHandler;
use crate::crawl::spa;
use crate::net::fetcher::{ConditionalHeaders, Fetcher};

/// One page to process, as handed off by the scheduler's drain loop.
pub struct CrawlTask {
    pub tenant: String,
    pub page_url: String,
    pub source_root: Option<String>,
    pub source_type: SourceType,
    pub render: bool,
    pub sitemap_lastmod: Option<chrono::DateTime<Utc>>,
}

/// Applies the exclude-pattern check, grounded in
/// `CrawlConfig::default()`'s exclude-pattern list
/// (`tools/crawl.rs`) — substrings identifying non-content URLs.
const DEFAULT_EXCLUDE_SUBSTRINGS: &[&str] = &[
    "/wp-admin", "/wp-login", "/cdn-cgi/", "/__webpack_hmr", ".xml", ".pdf", ".zip",
];

fn is_excluded(url: &str) -> bool {
    DEFAULT_EXCLUDE_SUBSTRINGS.iter().any(|s| url.contains(s))
}

/// Runs the full per-page state machine and returns the outcome, the
/// extracted content ready for embedding on success, and any same-host
/// links discovered in the page body.
pub async fn process_page(
    state: &Arc<AppState>,
    fetcher: &Fetcher,
    renderer: Option<&dyn crate::crawl::renderer::Renderer>,
    task: CrawlTask,
) -> (PageStatus, Option<FetchResult>, Option<String>, Vec<String>) {
    match process_page_inner(state, fetcher, renderer, &task).await {
        Ok((status, fetch, discovered)) => (status, fetch, None, discovered),
        Err(CoreError::Ssrf(msg)) => (PageStatus::PageDisallowed, None, Some(msg), Vec::new()),
        Err(CoreError::Cancelled) => (PageStatus::PageFailed, None, Some("cancelled".into()), Vec::new()),
        Err(e) => (PageStatus::PageFailed, None, Some(e.to_string()), Vec::new()),
    }
}

async fn process_page_inner(
    state: &Arc<AppState>,
    fetcher: &Fetcher,
    renderer: Option<&dyn crate::crawl::renderer::Renderer>,
    task: &CrawlTask,
) -> Result<(PageStatus, Option<FetchResult>, Vec<String>), CoreError> {
    if task.source_type == SourceType::Local {
        return process_local_page(state, task).await;
    }

    let parsed = url::Url::parse(&task.page_url)
        .map_err(|e| CoreError::InvalidInput(e.to_string()))?;

    crate::net::ssrf::precheck(&parsed).await?;

    if is_excluded(&task.page_url) {
        return Ok((PageStatus::PageExcluded, None, Vec::new()));
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| CoreError::InvalidInput("url missing host".into()))?;
    let robots_rules = state.robots.rules_for(&state.http_client, host).await;
    if !RobotsHandler::is_allowed(&robots_rules, parsed.path()) {
        return Ok((PageStatus::PageDisallowed, None, Vec::new()));
    }

    let cached = state
        .page_cache
        .get(&task.tenant, &task.page_url)
        .await
        .map_err(|e| CoreError::StoreError(e.to_string()))?;

    if let (Some(cached), Some(lastmod)) = (&cached, task.sitemap_lastmod) {
        if cached.last_fetched_at > lastmod {
            return Ok((PageStatus::PageSkippedTTL, None, Vec::new()));
        }
    }

    let conditional = cached
        .as_ref()
        .map(|row| ConditionalHeaders {
            if_none_match: row.etag.clone(),
            if_modified_since: row.last_modified.clone(),
        })
        .unwrap_or_default();

    let mut rendered_already = false;

    if task.render && renderer.is_some() {
        if let Some(short_circuit) =
            try_hash_short_circuit(state, fetcher, &task.page_url, &cached).await?
        {
            return Ok((short_circuit, None, Vec::new()));
        }
    }

    let mut fetch_result = if task.render && renderer.is_some() {
        let html = renderer.unwrap().render(&task.page_url).await?;
        rendered_already = true;
        fetch_result_from_html(&html, None, None)
    } else {
        let raw = fetcher.get(&task.page_url, &conditional).await?;
        if raw.not_modified {
            let mut refreshed = cached.clone().ok_or_else(|| {
                CoreError::InvalidInput("304 received with no cached row".into())
            })?;
            refreshed.last_fetched_at = Utc::now();
            state
                .page_cache
                .upsert(refreshed)
                .await
                .map_err(|e| CoreError::StoreError(e.to_string()))?;
            return Ok((PageStatus::PageSkipped304, None, Vec::new()));
        }
        let html = String::from_utf8_lossy(&raw.body).to_string();
        fetch_result_from_html(&html, raw.etag, raw.last_modified)
    };

    if !rendered_already {
        if let Some(renderer) = renderer {
            let needs = spa::needs_render(&fetch_result.content)
                || spa::is_empty_shell(&extractor::extract_html(&task.page_url, &fetch_result.content).markdown);
            if needs {
                if let Some(short_circuit) =
                    try_hash_short_circuit(state, fetcher, &task.page_url, &cached).await?
                {
                    return Ok((short_circuit, None, Vec::new()));
                }
                let html = renderer.render(&task.page_url).await?;
                let rendered = fetch_result_from_html(&html, fetch_result.etag.clone(), fetch_result.last_modified.clone());
                let rendered_extracted = extractor::extract_html(&task.page_url, &rendered.content);
                if spa::is_empty_shell(&rendered_extracted.markdown) {
                    // Rendered extraction remains empty-shell: keep the plain result.
                } else {
                    fetch_result = rendered;
                }
            }
        }
    }

    let discovered = links::discover_links(&parsed, &fetch_result.content);

    let extracted = extractor::extract_html(&task.page_url, &fetch_result.content);
    let normalized = extractor::normalize_whitespace(&extracted.markdown);
    let content_hash = sha256_hex(&normalized);

    if let Some(cached) = &cached {
        if cached.content_hash.as_deref() == Some(content_hash.as_str()) {
            let mut refreshed = cached.clone();
            refreshed.last_fetched_at = Utc::now();
            state
                .page_cache
                .upsert(refreshed)
                .await
                .map_err(|e| CoreError::StoreError(e.to_string()))?;
            return Ok((PageStatus::PageSkippedHash, None, discovered));
        }
    }

    let result = FetchResult {
        title: extracted.title,
        content: normalized,
        content_hash,
        etag: fetch_result.etag,
        last_modified: fetch_result.last_modified,
        not_modified: false,
        raw_bytes: fetch_result.raw_bytes,
        raw_size: fetch_result.raw_size,
    };

    Ok((PageStatus::PageFetched, Some(result), discovered))
}

/// Local-file variant of the per-page state machine: no SSRF/robots/conditional-HTTP concerns apply, but the same
/// extract → normalize → hash → skip-if-unchanged pipeline as the HTTP
/// path runs, so local and crawled pages share one downstream contract.
async fn process_local_page(
    state: &Arc<AppState>,
    task: &CrawlTask,
) -> Result<(PageStatus, Option<FetchResult>, Vec<String>), CoreError> {
    let path = task
        .page_url
        .strip_prefix("local://")
        .ok_or_else(|| CoreError::InvalidInput("local source key missing local:// prefix".into()))?;

    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| CoreError::InvalidInput(format!("reading local file {path}: {e}")))?;

    let cached = state
        .page_cache
        .get(&task.tenant, &task.page_url)
        .await
        .map_err(|e| CoreError::StoreError(e.to_string()))?;

    let extracted = extractor::extract_plain(&raw);
    let normalized = extractor::normalize_whitespace(&extracted.markdown);
    let content_hash = sha256_hex(&normalized);

    if let Some(cached) = &cached {
        if cached.content_hash.as_deref() == Some(content_hash.as_str()) {
            let mut refreshed = cached.clone();
            refreshed.last_fetched_at = Utc::now();
            state
                .page_cache
                .upsert(refreshed)
                .await
                .map_err(|e| CoreError::StoreError(e.to_string()))?;
            return Ok((PageStatus::PageSkippedHash, None, Vec::new()));
        }
    }

    let raw_bytes = raw.into_bytes();
    let result = FetchResult {
        title: extracted.title,
        content: normalized,
        content_hash,
        etag: None,
        last_modified: None,
        not_modified: false,
        raw_size: raw_bytes.len() as u64,
        raw_bytes,
    };

    Ok((PageStatus::PageFetched, Some(result), Vec::new()))
}

/// HEAD-based short-circuit: if Content-Length matches the cached raw
/// size and the cache already has a content hash, skip the render/fetch
/// entirely, refreshing the cached row's `last_fetched_at` as any other
/// successfully-processed page would.
async fn try_hash_short_circuit(
    state: &Arc<AppState>,
    fetcher: &Fetcher,
    url: &str,
    cached: &Option<PageCacheRow>,
) -> Result<Option<PageStatus>, CoreError> {
    let Some(cached) = cached else {
        return Ok(None);
    };
    let Some(cached_hash) = &cached.content_hash else {
        return Ok(None);
    };
    if cached_hash.is_empty() {
        return Ok(None);
    }

    let head = fetcher.head(url).await?;
    if head.content_length.is_some() && head.content_length == cached.raw_size {
        let mut refreshed = cached.clone();
        refreshed.last_fetched_at = Utc::now();
        state
            .page_cache
            .upsert(refreshed)
            .await
            .map_err(|e| CoreError::StoreError(e.to_string()))?;
        return Ok(Some(PageStatus::PageSkippedHash));
    }
    Ok(None)
}

fn fetch_result_from_html(
    html: &str,
    etag: Option<String>,
    last_modified: Option<String>,
) -> FetchResult {
    FetchResult {
        title: String::new(),
        content: html.to_string(),
        content_hash: String::new(),
        etag,
        last_modified,
        not_modified: false,
        raw_bytes: html.as_bytes().to_vec(),
        raw_size: html.len() as u64,
    }
}

fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excludes_known_non_content_paths() {
        assert!(is_excluded("https://docs.example.com/sitemap.xml"));
        assert!(is_excluded("https://docs.example.com/wp-admin/edit"));
        assert!(!is_excluded("https://docs.example.com/guide/intro"));
    }

    #[test]
    fn content_hash_is_stable_sha256_hex() {
        let a = sha256_hex("hello world");
        let b = sha256_hex("hello world");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }
}
