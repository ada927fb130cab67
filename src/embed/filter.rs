//! Post-chunk filtering: drops under-sized,
//! navigation-like, and duplicate chunks before they reach embedding.

use std::collections::HashSet;

use crate::embed::chunker::{estimate_tokens, RawChunk};

/// Minimum estimated tokens for a chunk to survive filtering, and the
/// threshold below which the whole min-tokens guard is disabled.
pub const MIN_TOKENS_GUARD_THRESHOLD: usize = 20;

/// Applies the min-tokens, navigation, and duplicate filters in sequence.
/// The min-tokens filter only runs when `token_limit >= 20`; below that
/// it is intentionally disabled rather than substituted with a
/// scaled-down threshold.
pub fn filter_chunks(chunks: Vec<RawChunk>, token_limit: usize) -> Vec<RawChunk> {
    let min_tokens_enabled = token_limit >= MIN_TOKENS_GUARD_THRESHOLD;

    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::new();

    for chunk in chunks {
        if min_tokens_enabled && estimate_tokens(&chunk.text) < MIN_TOKENS_GUARD_THRESHOLD {
            continue;
        }
        if is_navigation_like(&chunk.text) {
            continue;
        }
        let dedup_key = normalize_for_dedup(&chunk.text);
        if !seen.insert(dedup_key) {
            continue;
        }
        out.push(chunk);
    }

    out
}

/// Navigation-like: at least 5 words, and more than half of them have
/// length <= 3.
fn is_navigation_like(text: &str) -> bool {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() < 5 {
        return false;
    }
    let short = words.iter().filter(|w| w.len() <= 3).count();
    short * 2 > words.len()
}

fn normalize_for_dedup(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(text: &str) -> RawChunk {
        RawChunk { text: text.to_string() }
    }

    #[test]
    fn drops_under_token_chunks_when_guard_enabled() {
        let chunks = vec![chunk("a b"), chunk(&"word ".repeat(30))];
        let filtered = filter_chunks(chunks, 500);
        assert_eq!(filtered.len(), 1);
    }

    #[test]
    fn min_tokens_guard_disabled_below_threshold() {
        let chunks = vec![chunk("a b c")];
        let filtered = filter_chunks(chunks, 10);
        assert_eq!(filtered.len(), 1);
    }

    #[test]
    fn drops_navigation_like_chunks() {
        let nav = "Home About Us FAQ Top";
        let content = "This is a real piece of written content about rust programming \
            and the borrow checker, covering ownership rules in some depth.";
        let filtered = filter_chunks(vec![chunk(nav), chunk(content)], 500);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].text, content);
    }

    #[test]
    fn dedups_case_and_whitespace_insensitively() {
        let a = chunk(&format!("{} extra padding words to clear token floor", "Some Content Here"));
        let b = chunk(&format!("{}   extra   padding words to clear token floor", "some content here"));
        let filtered = filter_chunks(vec![a, b], 10);
        assert_eq!(filtered.len(), 1);
    }
}
