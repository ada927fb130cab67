//! `quarryd` — runs the crawl/embed/retrieve pipeline as a standing
//! process, polling a plain-text source list on a fixed cycle. There is
//! no HTTP admin surface; wiring and signal handling follow
//! `mcp-server/src/main.rs`'s tracing-init / graceful-shutdown shape.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use quarry_ingest::core::app_state::AppState;
use quarry_ingest::core::config::{self, QuarryConfig};
use quarry_ingest::core::providers::OpenAiCompatibleProvider;
use quarry_ingest::core::types::{CrawlItem, PageCacheRow, SitemapHints, Source, SourceType};
use quarry_ingest::crawl::sitemap::{self, FileEntry};
use quarry_ingest::net::fetcher::Fetcher;
use quarry_ingest::net::ssrf::build_guarded_client;
use quarry_ingest::schedule::DrainCycle;
use quarry_ingest::store::{InMemoryKnowledgeStore, InMemoryPageCacheStore};

fn parse_args() -> (String, PathBuf, bool) {
    let mut tenant = std::env::var("QUARRY_TENANT").unwrap_or_else(|_| "default".to_string());
    let mut sources_file = PathBuf::from(
        std::env::var("QUARRY_SOURCES_FILE").unwrap_or_else(|_| "quarry-sources.txt".to_string()),
    );
    let mut once = false;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--tenant" => {
                if let Some(v) = args.next() {
                    tenant = v;
                }
            }
            "--sources-file" => {
                if let Some(v) = args.next() {
                    sources_file = PathBuf::from(v);
                }
            }
            "--once" => once = true,
            _ => {}
        }
    }

    (tenant, sources_file, once)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let (tenant, sources_file, once) = parse_args();
    let cfg: QuarryConfig = config::load_config();

    let http_client = build_guarded_client(cfg.crawl.resolve_http_timeout(), config::CRAWLER_USER_AGENT)?;
    let fetcher = Fetcher::new(http_client.clone());

    let embedder = Arc::new(OpenAiCompatibleProvider::new(
        http_client.clone(),
        cfg.provider.resolve_base_url(),
        cfg.provider.resolve_api_key(),
        cfg.provider.resolve_chat_model(),
        cfg.provider.resolve_embedding_model(),
        cfg.provider.resolve_embedding_dimensions(),
    ));

    let mut state = AppState::new(
        http_client.clone(),
        cfg.clone(),
        Arc::new(InMemoryPageCacheStore::new()),
        Arc::new(InMemoryKnowledgeStore::new()),
        embedder.clone(),
    );
    if cfg.provider.resolve_api_key().is_some() {
        state = state.with_llm(embedder);
    } else {
        warn!("no LLM API key configured — contextual chunk enrichment disabled");
    }
    let state = Arc::new(state);

    info!(tenant = %tenant, sources_file = %sources_file.display(), "starting quarryd");

    loop {
        let cycle_started = std::time::Instant::now();

        match run_cycle(&state, &fetcher, &tenant, &sources_file).await {
            Ok(result) => {
                let snapshot = state.metrics.snapshot();
                info!(
                    pages_processed = result.outcomes.len(),
                    elapsed_ms = cycle_started.elapsed().as_millis() as u64,
                    ?snapshot,
                    "crawl cycle complete"
                );
            }
            Err(e) => warn!("crawl cycle failed: {e:#}"),
        }

        if once {
            break;
        }

        tokio::select! {
            _ = tokio::time::sleep(cfg.crawl.resolve_cycle_interval()) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("received shutdown signal");
                break;
            }
        }
    }

    Ok(())
}

/// Builds the crawl queue from the plain-text source file, drains it once,
/// and returns the cycle's outcomes.
async fn run_cycle(
    state: &Arc<AppState>,
    fetcher: &Fetcher,
    tenant: &str,
    sources_file: &std::path::Path,
) -> anyhow::Result<quarry_ingest::core::types::CrawlResult> {
    let body = tokio::fs::read_to_string(sources_file).await?;
    let local_root = sources_file.parent().unwrap_or_else(|| std::path::Path::new("."));
    let entries = sitemap::parse_file_entries(&body, local_root);

    let mut items = Vec::new();
    for entry in entries {
        let render = matches!(&entry, FileEntry::Page { render: true, .. });
        let source: Source = entry.into();
        items.extend(expand_source(state, fetcher, tenant, &source, render).await?);
    }

    items.extend(discovered_items_for_tenant(state, tenant).await?);

    let items = quarry_ingest::schedule::dedup_by_url(items);
    let cycle_interval = state.config.crawl.resolve_cycle_interval();
    let queue = quarry_ingest::schedule::build_queue(items, chrono::Utc::now(), chrono::Duration::from_std(cycle_interval)?);

    let drain = DrainCycle::new(Arc::clone(state), fetcher.clone(), None, tenant.to_string());
    Ok(drain.run(queue).await)
}

/// Expands one configured [`Source`] into queueable [`CrawlItem`]s,
/// consulting cached state for staleness and sitemap expansion.
async fn expand_source(
    state: &Arc<AppState>,
    fetcher: &Fetcher,
    tenant: &str,
    source: &Source,
    render: bool,
) -> anyhow::Result<Vec<CrawlItem>> {
    match source {
        Source::Local { .. } => {
            let key = source.key();
            seed_if_absent(state, tenant, &key, SourceType::Local, None).await?;
            Ok(vec![item_for(state, tenant, &key, SourceType::Local, None, render).await])
        }
        Source::Direct { url, render: force_render } => {
            seed_if_absent(state, tenant, url, SourceType::Direct, None).await?;
            Ok(vec![item_for(state, tenant, url, SourceType::Direct, None, render || *force_render).await])
        }
        Source::Sitemap { url } => expand_sitemap(state, fetcher, tenant, url).await,
    }
}

/// Fetches and expands a sitemap into page-level [`CrawlItem`]s, following
/// `sitemapindex` links up to the fetch/page caps.
async fn expand_sitemap(
    state: &Arc<AppState>,
    fetcher: &Fetcher,
    tenant: &str,
    root_url: &str,
) -> anyhow::Result<Vec<CrawlItem>> {
    let mut pending = vec![root_url.to_string()];
    let mut fetched = 0usize;
    let mut items = Vec::new();

    while let Some(url) = pending.pop() {
        if fetched >= sitemap::MAX_SITEMAP_FETCHES {
            break;
        }
        fetched += 1;

        let raw = fetcher.get(&url, &Default::default()).await?;
        let body = String::from_utf8_lossy(&raw.body).to_string();
        match sitemap::parse_sitemap_xml(&body) {
            Ok(sitemap::SitemapDocument::Index { locs }) => pending.extend(locs),
            Ok(sitemap::SitemapDocument::UrlSet { urls }) => {
                for page in urls.into_iter().take(sitemap::MAX_PAGES_PER_SITEMAP) {
                    seed_if_absent(state, tenant, &page.loc, SourceType::Sitemap, Some(root_url)).await?;
                    items.push(
                        item_for_hints(state, tenant, &page.loc, SourceType::Sitemap, Some(root_url.to_string()), false, page.hints)
                            .await,
                    );
                }
            }
            Err(e) => warn!("sitemap parse error for {url}: {e}"),
        }
    }

    Ok(items)
}

/// Pulls this tenant's previously-discovered (same-host link crawl) pages
/// out of the page cache and turns them into queueable items, so pages a
/// prior cycle found via in-page links keep getting scheduled even though
/// they were never listed in the source file.
async fn discovered_items_for_tenant(state: &Arc<AppState>, tenant: &str) -> anyhow::Result<Vec<CrawlItem>> {
    let rows = state.page_cache.list_for_tenant(tenant).await?;
    Ok(rows
        .into_iter()
        .filter(|row| row.source_type == SourceType::Discovered)
        .map(|row| CrawlItem {
            page_url: row.page_url,
            source_root: row.source_root,
            source_type: SourceType::Discovered,
            render: false,
            last_fetched_at: row.last_fetched_at,
            hints: SitemapHints {
                priority: row.sitemap_priority,
                changefreq: row.sitemap_changefreq,
                lastmod: None,
            },
            consecutive_unchanged: row.consecutive_unchanged,
            consecutive_failures: row.consecutive_failures,
            score: 0.0,
        })
        .collect())
}

async fn seed_if_absent(
    state: &Arc<AppState>,
    tenant: &str,
    page_url: &str,
    source_type: SourceType,
    source_root: Option<&str>,
) -> anyhow::Result<()> {
    if state.page_cache.get(tenant, page_url).await?.is_some() {
        return Ok(());
    }
    let row = PageCacheRow::new_unfetched(
        tenant.to_string(),
        page_url.to_string(),
        source_type,
        source_root.map(str::to_string),
        Default::default(),
    );
    state.page_cache.upsert(row).await?;
    Ok(())
}

async fn item_for(
    state: &Arc<AppState>,
    tenant: &str,
    page_url: &str,
    source_type: SourceType,
    source_root: Option<String>,
    render: bool,
) -> CrawlItem {
    item_for_hints(state, tenant, page_url, source_type, source_root, render, Default::default()).await
}

async fn item_for_hints(
    state: &Arc<AppState>,
    tenant: &str,
    page_url: &str,
    source_type: SourceType,
    source_root: Option<String>,
    render: bool,
    hints: quarry_ingest::core::types::SitemapHints,
) -> CrawlItem {
    let cached = state.page_cache.get(tenant, page_url).await.ok().flatten();
    let (last_fetched_at, consecutive_unchanged, consecutive_failures) = cached
        .map(|row| (row.last_fetched_at, row.consecutive_unchanged, row.consecutive_failures))
        .unwrap_or_else(|| (quarry_ingest::core::types::zero_time(), 0, 0));

    CrawlItem {
        page_url: page_url.to_string(),
        source_root,
        source_type,
        render,
        last_fetched_at,
        hints,
        consecutive_unchanged,
        consecutive_failures,
        score: 0.0,
    }
}
