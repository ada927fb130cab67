//! Same-host link discovery, grounded in
//! `tools/crawl.rs`'s `resolve_url`/`should_crawl`/`normalize_url`,
//! generalized to also strip query strings when deduplicating — an
//! intentional design choice here, not just fragment-stripping.

use std::collections::HashSet;

use scraper::{Html, Selector};
use url::Url;

/// Per-page cap on discovered links.
pub const MAX_LINKS_PER_PAGE: usize = 200;

/// Per-cycle cap on total discovered-candidate links.
pub const MAX_DISCOVERED_PER_CYCLE: usize = 500;

/// Extracts, resolves, and filters same-host links from `html`, relative
/// to `page_url`. Drops fragment-only, `javascript:`, `mailto:` targets
/// and anything resolving to a different host; strips fragment and query
/// from survivors; deduplicates; caps at [`MAX_LINKS_PER_PAGE`].
pub fn discover_links(page_url: &Url, html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("a[href]").expect("static selector parses");

    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::new();

    for element in document.select(&selector) {
        if out.len() >= MAX_LINKS_PER_PAGE {
            break;
        }
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let Some(resolved) = resolve_and_filter(page_url, href) else {
            continue;
        };
        if seen.insert(resolved.clone()) {
            out.push(resolved);
        }
    }

    out
}

fn resolve_and_filter(page_url: &Url, href: &str) -> Option<String> {
    let trimmed = href.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }
    let lower = trimmed.to_ascii_lowercase();
    if lower.starts_with("javascript:") || lower.starts_with("mailto:") || lower.starts_with("tel:")
    {
        return None;
    }

    let mut resolved = page_url.join(trimmed).ok()?;
    if resolved.scheme() != "http" && resolved.scheme() != "https" {
        return None;
    }
    if resolved.host_str() != page_url.host_str() {
        return None;
    }

    resolved.set_fragment(None);
    resolved.set_query(None);
    Some(resolved.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_fragment_and_query() {
        let page = Url::parse("https://docs.example.com/guide/intro").unwrap();
        let html = r#"<a href="/guide/next?utm=1#section">next</a>"#;
        let links = discover_links(&page, html);
        assert_eq!(links, vec!["https://docs.example.com/guide/next"]);
    }

    #[test]
    fn drops_cross_host_and_non_http_links() {
        let page = Url::parse("https://docs.example.com/guide/intro").unwrap();
        let html = concat!(
            r#"<a href="https://other.example.com/x">cross host</a>"#,
            r#"<a href="mailto:a@b.com">mail</a>"#,
            r#"<a href="javascript:void(0)">js</a>"#,
            r#"<a href="#only-fragment">frag</a>"#,
        );
        let links = discover_links(&page, html);
        assert!(links.is_empty());
    }

    #[test]
    fn deduplicates_links() {
        let page = Url::parse("https://docs.example.com/guide/intro").unwrap();
        let html = r#"<a href="/a">one</a><a href="/a?x=1">two</a>"#;
        let links = discover_links(&page, html);
        assert_eq!(links.len(), 1);
    }
}
