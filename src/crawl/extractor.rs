//! HTML/Markdown extraction, grounded in
//! `scraping/rust_scraper/clean.rs`: a Readability-style primary pass,
//! `html2md` markdown conversion, and a heuristic element-skip-list
//! fallback via `scraper`/`select` when the primary pass comes up short.

use scraper::{Html, Selector};

const SKIP_TAGS: &[&str] = &[
    "script", "style", "noscript", "nav", "footer", "header", "aside", "form", "template",
];

const EXCLUDED_ROLES: &[&str] = &["complementary", "banner", "navigation"];

/// Result of extracting readable content from a fetched page.
#[derive(Debug, Clone, Default)]
pub struct Extracted {
    pub title: String,
    pub markdown: String,
    pub word_count: usize,
}

/// Minimum word count for the Readability-style primary pass to be
/// accepted outright.
const MIN_PRIMARY_WORDS: usize = 50;

/// Extracts readable markdown from an HTML document.
pub fn extract_html(url: &str, html: &str) -> Extracted {
    if let Some(primary) = try_readability(url, html) {
        if primary.word_count >= MIN_PRIMARY_WORDS {
            return primary;
        }
    }
    fallback_extract(html)
}

/// Extracts from a plain-text or markdown document: normalize whitespace,
/// detect a title only from a leading `# ` line within the first 10 lines.
pub fn extract_plain(text: &str) -> Extracted {
    let normalized = normalize_whitespace(text);
    let title = normalized
        .lines()
        .take(10)
        .find_map(|line| line.strip_prefix("# "))
        .unwrap_or_default()
        .trim()
        .to_string();
    let word_count = normalized.split_whitespace().count();
    Extracted {
        title,
        markdown: normalized,
        word_count,
    }
}

fn try_readability(url: &str, html: &str) -> Option<Extracted> {
    let mut cursor = std::io::Cursor::new(html.as_bytes());
    let base_url = url::Url::parse(url).ok()?;
    let product = readability::extractor::extract(&mut cursor, &base_url).ok()?;

    let markdown = normalize_whitespace(&html2md::parse_html(&product.content));
    let word_count = markdown.split_whitespace().count();

    Some(Extracted {
        title: product.title,
        markdown,
        word_count,
    })
}

/// Heuristic readable-text extraction: walk the DOM, skipping
/// `SKIP_TAGS` and hidden/aria-hidden/excluded-role elements, inserting
/// markdown heading markers for `h1..h6` and paragraph breaks for block
/// elements.
fn fallback_extract(html: &str) -> Extracted {
    let document = Html::parse_document(html);
    let body_selector = Selector::parse("body").unwrap();

    let mut out = String::new();
    if let Some(body) = document.select(&body_selector).next() {
        walk_node(&body, &mut out);
    } else {
        walk_node(&document.root_element(), &mut out);
    }

    let markdown = normalize_whitespace(&out);
    let word_count = markdown.split_whitespace().count();
    let title = document
        .select(&Selector::parse("title").unwrap())
        .next()
        .map(|n| n.text().collect::<String>())
        .unwrap_or_default();

    Extracted {
        title,
        markdown,
        word_count,
    }
}

fn walk_node(el: &scraper::ElementRef, out: &mut String) {
    let name = el.value().name();
    if SKIP_TAGS.contains(&name) {
        return;
    }
    if el.value().attr("hidden").is_some() {
        return;
    }
    if el.value().attr("aria-hidden") == Some("true") {
        return;
    }
    if let Some(role) = el.value().attr("role") {
        if EXCLUDED_ROLES.contains(&role) {
            return;
        }
    }

    if let Some(level) = heading_level(name) {
        out.push('\n');
        out.push_str(&"#".repeat(level));
        out.push(' ');
        for child in el.text() {
            out.push_str(child);
        }
        out.push('\n');
        return;
    }

    let is_block = matches!(
        name,
        "p" | "div" | "section" | "article" | "li" | "blockquote" | "pre" | "tr"
    );

    for child in el.children() {
        if let Some(child_el) = scraper::ElementRef::wrap(child) {
            walk_node(&child_el, out);
        } else if let Some(text) = child.value().as_text() {
            out.push_str(text);
        }
    }

    if is_block {
        out.push('\n');
    }
}

fn heading_level(tag: &str) -> Option<usize> {
    match tag {
        "h1" => Some(1),
        "h2" => Some(2),
        "h3" => Some(3),
        "h4" => Some(4),
        "h5" => Some(5),
        "h6" => Some(6),
        _ => None,
    }
}

/// Collapses runs of blank lines to a single blank line and trims each
/// line.
pub fn normalize_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_blank = false;
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            if last_blank {
                continue;
            }
            last_blank = true;
        } else {
            last_blank = false;
        }
        out.push_str(trimmed);
        out.push('\n');
    }
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_blank_line_runs() {
        let input = "line one\n\n\n\nline two   \n\n";
        assert_eq!(normalize_whitespace(input), "line one\n\nline two");
    }

    #[test]
    fn plain_extract_detects_leading_title() {
        let extracted = extract_plain("# My Title\n\nSome body text here.");
        assert_eq!(extracted.title, "My Title");
        assert!(extracted.markdown.contains("Some body text here."));
    }

    #[test]
    fn plain_extract_ignores_title_outside_first_ten_lines() {
        let mut text = String::new();
        for i in 0..11 {
            text.push_str(&format!("line {i}\n"));
        }
        text.push_str("# Too Late\n");
        let extracted = extract_plain(&text);
        assert_eq!(extracted.title, "");
    }

    #[test]
    fn fallback_skips_nav_and_script() {
        let html = r#"<html><body>
            <nav>ignore me</nav>
            <script>ignore()</script>
            <p>Keep this paragraph content for sure.</p>
        </body></html>"#;
        let extracted = fallback_extract(html);
        assert!(extracted.markdown.contains("Keep this paragraph"));
        assert!(!extracted.markdown.contains("ignore me"));
        assert!(!extracted.markdown.contains("ignore()"));
    }
}
