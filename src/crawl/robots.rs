//! robots.txt handling, grounded structurally on
//! `features/antibot.rs::RequestDelay` (min/max delay struct, `from_env`
//! constructor) generalized into a per-host delay map, and on the RFC 9309
//! group-parsing shape shown by standard robots.txt parsers
//! (consecutive `User-agent` lines forming a group, case-insensitive
//! prefix match, `*` fallback). `moka::future::Cache` backs the 1h TTL
//! cache, the same crate used elsewhere in this crate for `search_cache`/`scrape_cache`-style memoization.

use std::time::Duration;

use chrono::Utc;
use moka::future::Cache;

use crate::core::types::RobotsRules;

const CACHE_TTL: Duration = Duration::from_secs(3600);
const DEFAULT_MIN_CRAWL_DELAY: Duration = Duration::from_secs(2);
const DEFAULT_MAX_CRAWL_DELAY: Duration = Duration::from_secs(10);

/// One `User-agent` group parsed out of a robots.txt body.
struct Group {
    agents: Vec<String>,
    disallow: Vec<String>,
    crawl_delay: Option<f64>,
}

/// Parses `body` into RFC 9309 groups: consecutive `User-agent:` lines
/// form one group, followed by its `Disallow`/`Crawl-delay` directives.
fn parse_groups(body: &str) -> Vec<Group> {
    let mut groups = Vec::new();
    let mut current: Option<Group> = None;
    let mut in_agent_block = true;

    for raw_line in body.lines() {
        let line = strip_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim().to_string();

        match key.as_str() {
            "user-agent" => {
                if in_agent_block {
                    if let Some(group) = current.as_mut() {
                        group.agents.push(value.to_ascii_lowercase());
                    } else {
                        current = Some(Group {
                            agents: vec![value.to_ascii_lowercase()],
                            disallow: Vec::new(),
                            crawl_delay: None,
                        });
                    }
                } else {
                    if let Some(group) = current.take() {
                        groups.push(group);
                    }
                    current = Some(Group {
                        agents: vec![value.to_ascii_lowercase()],
                        disallow: Vec::new(),
                        crawl_delay: None,
                    });
                    in_agent_block = true;
                }
            }
            "disallow" => {
                in_agent_block = false;
                if let Some(group) = current.as_mut() {
                    if !value.is_empty() {
                        group.disallow.push(value);
                    }
                }
            }
            "crawl-delay" => {
                in_agent_block = false;
                if let Some(group) = current.as_mut() {
                    group.crawl_delay = value.parse::<f64>().ok();
                }
            }
            _ => {
                in_agent_block = false;
            }
        }
    }
    if let Some(group) = current.take() {
        groups.push(group);
    }
    groups
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(idx) => &line[..idx],
        None => line,
    }
}

/// Selects the group matching `user_agent` by case-insensitive prefix,
/// falling back to the `*` group.
fn select_group<'a>(groups: &'a [Group], user_agent: &str) -> Option<&'a Group> {
    let ua_lower = user_agent.to_ascii_lowercase();
    let specific = groups
        .iter()
        .find(|g| g.agents.iter().any(|a| a != "*" && ua_lower.starts_with(a.as_str())));
    specific.or_else(|| groups.iter().find(|g| g.agents.iter().any(|a| a == "*")))
}

fn build_rules(body: &str, user_agent: &str, min_delay: Duration, max_delay: Duration) -> RobotsRules {
    let groups = parse_groups(body);
    let Some(group) = select_group(&groups, user_agent) else {
        return RobotsRules {
            crawl_delay: min_delay,
            disallow: Vec::new(),
            fetched_at: Utc::now(),
        };
    };

    let delay = group
        .crawl_delay
        .map(Duration::from_secs_f64)
        .unwrap_or(min_delay)
        .clamp(min_delay, max_delay);

    RobotsRules {
        crawl_delay: delay,
        disallow: group.disallow.clone(),
        fetched_at: Utc::now(),
    }
}

/// Per-host robots.txt cache with 1h TTL, fetching and parsing on miss.
pub struct RobotsHandler {
    cache: Cache<String, RobotsRules>,
    user_agent: String,
    min_crawl_delay: Duration,
    max_crawl_delay: Duration,
}

impl RobotsHandler {
    pub fn new(user_agent: String) -> Self {
        Self::with_delay_bounds(user_agent, DEFAULT_MIN_CRAWL_DELAY, DEFAULT_MAX_CRAWL_DELAY)
    }

    pub fn with_delay_bounds(user_agent: String, min: Duration, max: Duration) -> Self {
        Self {
            cache: Cache::builder().time_to_live(CACHE_TTL).build(),
            user_agent,
            min_crawl_delay: min,
            max_crawl_delay: max,
        }
    }

    /// Returns the cached or freshly-fetched rules for `host`.
    pub async fn rules_for(&self, client: &reqwest::Client, host: &str) -> RobotsRules {
        if let Some(rules) = self.cache.get(host).await {
            return rules;
        }

        let robots_url = format!("https://{host}/robots.txt");
        let body = fetch_robots_body(client, &robots_url).await;
        let rules = build_rules(
            &body,
            &self.user_agent,
            self.min_crawl_delay,
            self.max_crawl_delay,
        );
        self.cache.insert(host.to_string(), rules.clone()).await;
        rules
    }

    /// Prefix-checks `path` against the selected group's disallow list.
    pub fn is_allowed(rules: &RobotsRules, path: &str) -> bool {
        !rules.disallow.iter().any(|prefix| path.starts_with(prefix.as_str()))
    }
}

async fn fetch_robots_body(client: &reqwest::Client, url: &str) -> String {
    match client.get(url).send().await {
        Ok(response) if response.status().is_success() => {
            response.text().await.unwrap_or_default()
        }
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_crawl_delay_and_collects_disallow() {
        let body = "User-agent: *\nDisallow: /private\nCrawl-delay: 5\n";
        let rules = build_rules(
            body,
            "QuarryIngestBot/1.0",
            Duration::from_secs(2),
            Duration::from_secs(10),
        );
        assert_eq!(rules.crawl_delay, Duration::from_secs(5));
        assert!(RobotsHandler::is_allowed(&rules, "/public") );
        assert!(!RobotsHandler::is_allowed(&rules, "/private/x"));
    }

    #[test]
    fn falls_back_to_wildcard_group() {
        let body = "User-agent: OtherBot\nDisallow: /x\n\nUser-agent: *\nDisallow: /y\n";
        let rules = build_rules(
            body,
            "QuarryIngestBot/1.0",
            Duration::from_secs(2),
            Duration::from_secs(10),
        );
        assert_eq!(rules.disallow, vec!["/y".to_string()]);
    }

    #[test]
    fn prefers_specific_group_over_wildcard() {
        let body = "User-agent: quarryingestbot\nDisallow: /only-mine\n\nUser-agent: *\nDisallow: /everyone\n";
        let rules = build_rules(
            body,
            "QuarryIngestBot/1.0",
            Duration::from_secs(2),
            Duration::from_secs(10),
        );
        assert_eq!(rules.disallow, vec!["/only-mine".to_string()]);
    }

    #[test]
    fn missing_crawl_delay_uses_min() {
        let body = "User-agent: *\nDisallow: /x\n";
        let rules = build_rules(
            body,
            "QuarryIngestBot/1.0",
            Duration::from_secs(2),
            Duration::from_secs(10),
        );
        assert_eq!(rules.crawl_delay, Duration::from_secs(2));
    }
}
