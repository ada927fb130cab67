//! Cross-cutting invariants that hold regardless of which subsystem
//! produced the data: closed status set, scheduler ordering guarantees,
//! and chunk/char-cap bounds.

use chrono::Utc;
use quarry_ingest::core::types::{
    zero_time, ChangeFreq, CrawlItem, PageStatus, SitemapHints, SourceType,
};
use quarry_ingest::embed::chunker::{assemble_chunks, char_cap, split_blocks};
use quarry_ingest::schedule::{build_queue, dedup_by_url};
use quarry_ingest::store::knowledge::DEFAULT_MIN_SIMILARITY;

fn item(page_url: &str, source_type: SourceType, last_fetched_at: chrono::DateTime<Utc>, hints: SitemapHints) -> CrawlItem {
    CrawlItem {
        page_url: page_url.to_string(),
        source_root: None,
        source_type,
        render: false,
        last_fetched_at,
        hints,
        consecutive_unchanged: 0,
        consecutive_failures: 0,
        score: 0.0,
    }
}

/// `PageStatus` is a closed, 9-variant enum — this match has
/// no catch-all, so the test fails to compile the day a variant is added
/// or removed without this file being updated.
#[test]
fn page_status_is_exhaustively_nine_variants() {
    fn describe(status: PageStatus) -> &'static str {
        match status {
            PageStatus::PageFetched => "fetched",
            PageStatus::PageSkipped304 => "skipped_304",
            PageStatus::PageSkippedHash => "skipped_hash",
            PageStatus::PageSkippedTTL => "skipped_ttl",
            PageStatus::PageFailed => "failed",
            PageStatus::PageEmbedded => "embedded",
            PageStatus::PageDisallowed => "disallowed",
            PageStatus::PageNoChunks => "no_chunks",
            PageStatus::PageExcluded => "excluded",
        }
    }
    assert_eq!(describe(PageStatus::PageFetched), "fetched");
    assert_eq!(describe(PageStatus::PageExcluded), "excluded");
}

/// A mixed batch of never-crawled and previously-seen pages across every
/// source type sorts strictly by descending score, and duplicate URLs
/// (e.g. a page listed both directly and via sitemap) collapse to one
/// entry keeping the first-seen source.
#[test]
fn build_queue_orders_mixed_batch_and_dedups_cross_source_urls() {
    let now = Utc::now();
    let interval = chrono::Duration::hours(24);

    let never_crawled_local = item("https://x/local-doc", SourceType::Local, zero_time(), SitemapHints::default());
    let stale_direct = item(
        "https://x/stale-direct",
        SourceType::Direct,
        now - chrono::Duration::hours(48),
        SitemapHints::default(),
    );
    let fresh_sitemap = item(
        "https://x/fresh-sitemap",
        SourceType::Sitemap,
        now - chrono::Duration::minutes(5),
        SitemapHints { priority: Some(0.5), changefreq: Some(ChangeFreq::Daily), lastmod: None },
    );
    let duplicate_as_direct = item("https://x/dup", SourceType::Direct, now, SitemapHints::default());
    let duplicate_as_sitemap = item(
        "https://x/dup",
        SourceType::Sitemap,
        zero_time(),
        SitemapHints { priority: Some(1.0), changefreq: Some(ChangeFreq::Always), lastmod: None },
    );

    let items = vec![
        fresh_sitemap.clone(),
        duplicate_as_direct,
        never_crawled_local.clone(),
        stale_direct.clone(),
        duplicate_as_sitemap,
    ];

    let deduped = dedup_by_url(items);
    assert_eq!(deduped.len(), 4, "the dup URL must collapse to a single entry");

    let queue = build_queue(deduped, now, interval);

    // Strictly non-increasing scores (stable sort descending).
    for pair in queue.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }

    // The never-crawled local page (base 100 + never-crawled bonus 80)
    // outranks everything else regardless of staleness or sitemap hints.
    assert_eq!(queue[0].page_url, "https://x/local-doc");

    // The duplicate kept its first-seen source (Direct), not the
    // higher-scoring Sitemap variant that appeared later in the input.
    let dup = queue.iter().find(|i| i.page_url == "https://x/dup").unwrap();
    assert_eq!(dup.source_type, SourceType::Direct);
}

/// Every assembled chunk's byte length stays within `char_cap(token_limit)`,
/// even when a single paragraph, on its own, would overflow it.
#[test]
fn assembled_chunks_never_exceed_the_character_cap() {
    let token_limit = 50;
    let cap = char_cap(token_limit);

    let oversized_paragraph = "supercalifragilisticexpialidocious ".repeat(400);
    let text = format!("# Heading\n\n{oversized_paragraph}\n\nshort trailing paragraph with a few words");
    let blocks = split_blocks(&text);
    let chunks = assemble_chunks(&blocks, token_limit, 10);

    assert!(!chunks.is_empty());
    for chunk in &chunks {
        assert!(
            chunk.text.len() <= cap,
            "chunk of {} bytes exceeds the {cap}-byte cap",
            chunk.text.len()
        );
    }
}

/// `DEFAULT_MIN_SIMILARITY` is the documented floor; a
/// regression lowering or raising it silently would change every
/// retrieval result's recall without any other test catching it.
#[test]
fn default_min_similarity_matches_documented_floor() {
    assert_eq!(DEFAULT_MIN_SIMILARITY, 0.3);
}
