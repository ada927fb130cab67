//! SPA detection, grounded in `clean::looks_like_spa`'s
//! root-div/noscript signal detection and `core/content_quality.rs`'s
//! accumulated-signal scoring pattern, reimplemented with this crate's
//! own point values and threshold.

use regex::Regex;

/// A raw-HTML score at or above this threshold means the page needs a
/// headless render to materialize content.
pub const SPA_SCORE_THRESHOLD: u32 = 4;

/// Extracted text below this word count is an "empty shell", regardless
/// of the raw-HTML score.
pub const EMPTY_SHELL_WORD_THRESHOLD: usize = 10;

/// Scores raw HTML for SPA-shell likelihood.
pub fn spa_score(html: &str) -> u32 {
    let mut score = 0u32;

    let root_div_re = Regex::new(r#"(?i)<div[^>]+id=["']?(root|app|__next)["']?"#).unwrap();
    if root_div_re.is_match(html) {
        score += 3;
    }
    if html.to_ascii_lowercase().contains("<noscript") {
        score += 2;
    }
    let framework_re =
        Regex::new(r#"(?i)content=["']Next\.js["']|data-reactroot|ng-app|data-v-"#).unwrap();
    if framework_re.is_match(html) {
        score += 3;
    }

    let script_bytes = script_content_bytes(html);
    let visible_bytes = visible_text_bytes(html);
    if visible_bytes == 0 || script_bytes > 3 * visible_bytes {
        score += 2;
    }

    let visible_words = visible_text(html).split_whitespace().count();
    if visible_words < 30 {
        score += 2;
    }

    score
}

/// Whether `html`'s raw score meets the rendering threshold.
pub fn needs_render(html: &str) -> bool {
    spa_score(html) >= SPA_SCORE_THRESHOLD
}

/// The secondary "empty shell" heuristic: true when extracted text has
/// fewer than 10 words, applied to already-extracted text
/// rather than raw HTML.
pub fn is_empty_shell(extracted_text: &str) -> bool {
    extracted_text.split_whitespace().count() < EMPTY_SHELL_WORD_THRESHOLD
}

fn script_content_bytes(html: &str) -> usize {
    let document = scraper::Html::parse_document(html);
    let selector = scraper::Selector::parse("script").unwrap();
    document
        .select(&selector)
        .map(|el| el.text().map(str::len).sum::<usize>())
        .sum()
}

fn visible_text(html: &str) -> String {
    const SKIP: &[&str] = &["script", "style", "noscript"];
    let document = scraper::Html::parse_document(html);
    let mut out = String::new();
    collect_visible_text(&document.root_element(), SKIP, &mut out);
    out
}

fn collect_visible_text(el: &scraper::ElementRef, skip: &[&str], out: &mut String) {
    if skip.contains(&el.value().name()) {
        return;
    }
    for child in el.children() {
        if let Some(child_el) = scraper::ElementRef::wrap(child) {
            collect_visible_text(&child_el, skip, out);
        } else if let Some(text) = child.value().as_text() {
            out.push_str(text);
            out.push(' ');
        }
    }
}

fn visible_text_bytes(html: &str) -> usize {
    visible_text(html).len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_react_style_spa_shell() {
        let html = r#"<html><head><meta content="Next.js"></head>
            <body><div id="__next"></div><noscript>enable js</noscript>
            <script>very long bundle of javascript code here</script></body></html>"#;
        assert!(needs_render(html));
    }

    #[test]
    fn static_page_with_enough_text_is_not_spa() {
        let words = "word ".repeat(40);
        let html = format!("<html><body><p>{words}</p></body></html>");
        assert!(!needs_render(&html));
    }

    #[test]
    fn empty_shell_detects_sparse_extracted_text() {
        assert!(is_empty_shell("just a few words"));
        assert!(!is_empty_shell(&"word ".repeat(20)));
    }
}
