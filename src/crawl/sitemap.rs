//! Sitemap file format and XML parsing.
//!
//! Two distinct formats: the plain-text sitemap *file* format (one source
//! entry per line, used to seed the scheduler's source list) and sitemap
//! *XML* (`sitemapindex`/`urlset`, fetched over HTTP and expanded into
//! pages). Grounded in `tools/crawl.rs`'s BFS-over-queue shape, bounded
//! here by explicit per-cycle fetch/page caps.

use chrono::{DateTime, Utc};
use quick_xml::events::Event;
use quick_xml::reader::Reader;

use crate::core::types::{ChangeFreq, SitemapHints, Source};

/// Cross-sitemap BFS cap: at most this many sub-sitemap fetches per
/// expansion.
pub const MAX_SITEMAP_FETCHES: usize = 500;

/// Per-sitemap page cap, applied after expansion (Open Question (b): the
/// distilled spec leaves this post-expansion truncation as a known
/// limitation of very large sitemap trees, not something this crate tries
/// to fix).
pub const MAX_PAGES_PER_SITEMAP: usize = 5000;

/// One entry parsed from a plain-text sitemap file.
#[derive(Debug, Clone, PartialEq)]
pub enum FileEntry {
    Local { path: std::path::PathBuf },
    Page { url: String, render: bool },
}

/// Parses the plain-text sitemap file format: one entry per line, `#`
/// starts a comment, blank lines ignored. Recognized prefixes:
/// `local:<path>`, `page:<url>`, `render:<url>` (`render:` may combine
/// with `page:`, order-insensitive). Environment expansion is disabled —
/// entries are treated as literal text.
pub fn parse_file_entries(body: &str, local_root: &std::path::Path) -> Vec<FileEntry> {
    let mut out = Vec::new();
    for raw_line in body.lines() {
        let line = strip_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }
        if let Some(entry) = parse_file_line(line, local_root) {
            out.push(entry);
        }
    }
    out
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(idx) => &line[..idx],
        None => line,
    }
}

fn parse_file_line(line: &str, local_root: &std::path::Path) -> Option<FileEntry> {
    let mut render = false;
    let mut rest = line;

    loop {
        if let Some(stripped) = rest.strip_prefix("render:") {
            render = true;
            rest = stripped.trim();
            continue;
        }
        break;
    }

    if let Some(path) = rest.strip_prefix("local:") {
        return Some(FileEntry::Local {
            path: local_root.join(path.trim()),
        });
    }
    if let Some(url) = rest.strip_prefix("page:") {
        return Some(FileEntry::Page {
            url: url.trim().to_string(),
            render,
        });
    }
    None
}

impl From<FileEntry> for Source {
    fn from(entry: FileEntry) -> Self {
        match entry {
            FileEntry::Local { path } => Source::Local { path },
            FileEntry::Page { url, render } => Source::Direct { url, render },
        }
    }
}

/// One `<url>` entry extracted from a sitemap `urlset`.
#[derive(Debug, Clone, PartialEq)]
pub struct SitemapUrl {
    pub loc: String,
    pub hints: SitemapHints,
}

/// Result of parsing one sitemap XML document: either more sitemaps to
/// fetch (`sitemapindex`) or pages (`urlset`).
#[derive(Debug, Clone)]
pub enum SitemapDocument {
    Index { locs: Vec<String> },
    UrlSet { urls: Vec<SitemapUrl> },
}

/// Parses one sitemap XML document (`sitemapindex` or `urlset`).
pub fn parse_sitemap_xml(body: &str) -> Result<SitemapDocument, quick_xml::Error> {
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut root: Option<String> = None;
    let mut locs = Vec::new();
    let mut urls = Vec::new();

    let mut current_loc: Option<String> = None;
    let mut current_lastmod: Option<String> = None;
    let mut current_changefreq: Option<String> = None;
    let mut current_priority: Option<String> = None;
    let mut in_entry = false;
    let mut text_buf = String::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Eof => break,
            Event::Start(e) => {
                let name = local_name(e.name().as_ref());
                if root.is_none() {
                    root = Some(name.clone());
                }
                if name == "sitemap" || name == "url" {
                    in_entry = true;
                    current_loc = None;
                    current_lastmod = None;
                    current_changefreq = None;
                    current_priority = None;
                }
                text_buf.clear();
            }
            Event::Text(t) => {
                text_buf.push_str(&t.unescape().unwrap_or_default());
            }
            Event::End(e) => {
                let name = local_name(e.name().as_ref());
                if in_entry {
                    match name.as_str() {
                        "loc" => current_loc = Some(text_buf.trim().to_string()),
                        "lastmod" => current_lastmod = Some(text_buf.trim().to_string()),
                        "changefreq" => current_changefreq = Some(text_buf.trim().to_string()),
                        "priority" => current_priority = Some(text_buf.trim().to_string()),
                        "sitemap" => {
                            if let Some(loc) = current_loc.take() {
                                locs.push(loc);
                            }
                            in_entry = false;
                        }
                        "url" => {
                            if let Some(loc) = current_loc.take() {
                                let hints = SitemapHints {
                                    priority: current_priority.as_deref().and_then(|p| p.parse().ok()),
                                    changefreq: current_changefreq
                                        .as_deref()
                                        .and_then(ChangeFreq::parse_str),
                                    lastmod: current_lastmod
                                        .as_deref()
                                        .and_then(parse_rfc3339),
                                };
                                urls.push(SitemapUrl { loc, hints });
                            }
                            in_entry = false;
                        }
                        _ => {}
                    }
                }
                text_buf.clear();
            }
            _ => {}
        }
        buf.clear();
    }

    match root.as_deref() {
        Some("sitemapindex") => Ok(SitemapDocument::Index { locs }),
        _ => Ok(SitemapDocument::UrlSet { urls }),
    }
}

fn local_name(qname: &[u8]) -> String {
    let s = String::from_utf8_lossy(qname);
    s.rsplit(':').next().unwrap_or(&s).to_string()
}

fn parse_rfc3339(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_file_entries_with_comments_and_blank_lines() {
        let body = "# a comment\n\nlocal:docs/intro.md\npage:https://example.com/a\nrender:page:https://example.com/b\n";
        let entries = parse_file_entries(body, std::path::Path::new("/root"));
        assert_eq!(
            entries,
            vec![
                FileEntry::Local {
                    path: std::path::PathBuf::from("/root/docs/intro.md")
                },
                FileEntry::Page {
                    url: "https://example.com/a".to_string(),
                    render: false
                },
                FileEntry::Page {
                    url: "https://example.com/b".to_string(),
                    render: true
                },
            ]
        );
    }

    #[test]
    fn parses_urlset() {
        let xml = r#"<?xml version="1.0"?>
        <urlset><url><loc>https://example.com/a</loc><priority>0.9</priority><changefreq>daily</changefreq></url></urlset>"#;
        match parse_sitemap_xml(xml).unwrap() {
            SitemapDocument::UrlSet { urls } => {
                assert_eq!(urls.len(), 1);
                assert_eq!(urls[0].loc, "https://example.com/a");
                assert_eq!(urls[0].hints.priority, Some(0.9));
                assert_eq!(urls[0].hints.changefreq, Some(ChangeFreq::Daily));
            }
            _ => panic!("expected urlset"),
        }
    }

    #[test]
    fn parses_sitemapindex() {
        let xml = r#"<sitemapindex><sitemap><loc>https://example.com/sitemap-a.xml</loc></sitemap></sitemapindex>"#;
        match parse_sitemap_xml(xml).unwrap() {
            SitemapDocument::Index { locs } => {
                assert_eq!(locs, vec!["https://example.com/sitemap-a.xml".to_string()]);
            }
            _ => panic!("expected sitemapindex"),
        }
    }
}
