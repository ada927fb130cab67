//! Priority scoring and queue construction, grounded on
//! `tools/crawl.rs::crawl_website`'s BFS-wave shape generalized from a
//! single-site crawl into a cross-source priority queue, and on
//! `features/antibot.rs`'s `RequestDelay` pacing-timer pattern for the
//! drain cadence in [`crate::schedule::drain`].

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::core::types::{CrawlItem, SitemapHints, SourceType};

/// Never-crawled bonus; also triggers early return.
const NEVER_CRAWLED_BONUS: f64 = 80.0;
const STALENESS_WEIGHT: f64 = 20.0;
const STALENESS_CAP: f64 = 2.0;
const SITEMAP_PRIORITY_WEIGHT: f64 = 10.0;
const UNCHANGED_PENALTY_PER: f64 = 2.0;
const UNCHANGED_PENALTY_CAP: f64 = 20.0;
const FAILURE_PENALTY_PER: f64 = 5.0;
const FAILURE_PENALTY_CAP: f64 = 30.0;

/// Computes the priority score for one item (higher = earlier). Sitemap
/// priority/changefreq bonuses always apply, including for never-crawled
/// items, so that two never-crawled pages still break their tie by
/// sitemap hints; never-crawled items otherwise skip staleness and
/// unchanged/failure penalties.
pub fn priority_score(
    source_type: SourceType,
    never_crawled: bool,
    age: chrono::Duration,
    cycle_interval: chrono::Duration,
    hints: &SitemapHints,
    consecutive_unchanged: u32,
    consecutive_failures: u32,
) -> f64 {
    let base = source_type.base_score();

    let mut hint_bonus = 0.0;
    if let Some(priority) = hints.priority {
        hint_bonus += priority * SITEMAP_PRIORITY_WEIGHT;
    }
    if let Some(changefreq) = hints.changefreq {
        hint_bonus += changefreq.priority_bonus();
    }

    if never_crawled {
        return base + NEVER_CRAWLED_BONUS + hint_bonus;
    }

    let mut score = base + hint_bonus;

    let interval_secs = cycle_interval.num_seconds().max(1) as f64;
    let age_secs = age.num_seconds().max(0) as f64;
    score += (age_secs / interval_secs).min(STALENESS_CAP) * STALENESS_WEIGHT;

    score -= (UNCHANGED_PENALTY_PER * consecutive_unchanged as f64).min(UNCHANGED_PENALTY_CAP);
    score -= (FAILURE_PENALTY_PER * consecutive_failures as f64).min(FAILURE_PENALTY_CAP);

    score
}

/// Scores a [`CrawlItem`] in place, writing the result to `item.score`.
pub fn score_item(item: &mut CrawlItem, now: DateTime<Utc>, cycle_interval: chrono::Duration) {
    let never_crawled = item.last_fetched_at == crate::core::types::zero_time();
    let age = now.signed_duration_since(item.last_fetched_at);
    item.score = priority_score(
        item.source_type,
        never_crawled,
        age,
        cycle_interval,
        &item.hints,
        item.consecutive_unchanged,
        item.consecutive_failures,
    );
}

/// Deduplicates candidate items by URL, first occurrence wins.
pub fn dedup_by_url(items: Vec<CrawlItem>) -> Vec<CrawlItem> {
    let mut seen: HashMap<String, ()> = HashMap::new();
    let mut out = Vec::new();
    for item in items {
        if seen.insert(item.page_url.clone(), ()).is_none() {
            out.push(item);
        }
    }
    out
}

/// Scores every item and stable-sorts descending by score.
pub fn build_queue(mut items: Vec<CrawlItem>, now: DateTime<Utc>, cycle_interval: chrono::Duration) -> Vec<CrawlItem> {
    for item in items.iter_mut() {
        score_item(item, now, cycle_interval);
    }
    items.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    items
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(source_type: SourceType, last_fetched_at: DateTime<Utc>, hints: SitemapHints) -> CrawlItem {
        CrawlItem {
            page_url: format!("https://x/{:?}", source_type),
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

    #[test]
    fn never_crawled_outranks_high_priority_sitemap_page() {
        let interval = chrono::Duration::hours(24);
        let now = Utc::now();

        let never_crawled = priority_score(
            SourceType::Sitemap,
            true,
            chrono::Duration::zero(),
            interval,
            &SitemapHints { priority: Some(0.1), ..Default::default() },
            0,
            0,
        );
        let already_crawled_high_priority = priority_score(
            SourceType::Sitemap,
            false,
            now.signed_duration_since(now - chrono::Duration::hours(1)),
            interval,
            &SitemapHints { priority: Some(1.0), ..Default::default() },
            0,
            0,
        );
        assert!(never_crawled > already_crawled_high_priority);
    }

    #[test]
    fn higher_sitemap_priority_ranks_first_when_both_never_crawled() {
        // Both never-crawled items get the flat never-crawled bonus, but
        // sitemap priority still stacks on top of it and breaks the tie.
        let interval = chrono::Duration::hours(24);
        let low = priority_score(
            SourceType::Sitemap,
            true,
            chrono::Duration::zero(),
            interval,
            &SitemapHints { priority: Some(0.3), ..Default::default() },
            0,
            0,
        );
        let high = priority_score(
            SourceType::Sitemap,
            true,
            chrono::Duration::zero(),
            interval,
            &SitemapHints { priority: Some(0.9), ..Default::default() },
            0,
            0,
        );
        assert!(low < high);
    }

    #[test]
    fn dedup_keeps_first_occurrence() {
        let mut direct = item(SourceType::Direct, Utc::now(), SitemapHints::default());
        direct.page_url = "https://x/dup".to_string();
        let mut sitemap = item(SourceType::Sitemap, Utc::now(), SitemapHints::default());
        sitemap.page_url = "https://x/dup".to_string();

        let deduped = dedup_by_url(vec![direct, sitemap]);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].source_type, SourceType::Direct);
    }

    #[test]
    fn failure_penalty_is_capped() {
        let interval = chrono::Duration::hours(24);
        let score = priority_score(
            SourceType::Direct,
            false,
            chrono::Duration::zero(),
            interval,
            &SitemapHints::default(),
            0,
            100,
        );
        let capped_score = priority_score(
            SourceType::Direct,
            false,
            chrono::Duration::zero(),
            interval,
            &SitemapHints::default(),
            0,
            6,
        );
        assert_eq!(score, capped_score);
    }
}
