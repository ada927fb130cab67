//! Content-aware chunking: block-splitting, token-estimation, and overlap
//! rules implemented fresh, since there is no long-document chunker to
//! adapt elsewhere in this crate's lineage (history summaries are embedded
//! one short string at a time via `features/history.rs`); that file's
//! `chunk_large_content` contributes only the truncate-and-annotate
//! *shape* for size-governance code, not this algorithm.

/// Default token budget per chunk.
pub const DEFAULT_TOKEN_LIMIT: usize = 500;
/// Default overlap, in estimated tokens, pulled from the tail of the
/// previous chunk.
pub const DEFAULT_TOKEN_OVERLAP: usize = 50;

/// One block extracted by [`split_blocks`], with any attached heading
/// prefix already folded in.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub text: String,
    /// Fenced code blocks are kept verbatim and never merged with
    /// neighboring prose into the same chunk.
    pub fenced: bool,
}

/// Splits `text` into blocks on blank lines, attaching `#`-prefixed
/// heading lines to the following block, preserving fenced code regions
/// verbatim, and treating markdown horizontal rules and certain HTML
/// block tags as boundaries.
pub fn split_blocks(text: &str) -> Vec<Block> {
    let lines: Vec<&str> = text.lines().collect();
    let mut blocks = Vec::new();
    let mut current = String::new();
    let mut pending_heading: Option<String> = None;
    let mut i = 0;

    let flush = |current: &mut String, pending_heading: &mut Option<String>, blocks: &mut Vec<Block>| {
        let trimmed = current.trim();
        if !trimmed.is_empty() {
            let mut text = String::new();
            if let Some(h) = pending_heading.take() {
                text.push_str(&h);
                text.push('\n');
            }
            text.push_str(trimmed);
            blocks.push(Block { text, fenced: false });
        }
        current.clear();
    };

    while i < lines.len() {
        let line = lines[i];

        if is_fence_open(line) {
            if !current.trim().is_empty() {
                flush(&mut current, &mut pending_heading, &mut blocks);
            }
            let fence = fence_marker(line);
            let mut fenced = String::new();
            fenced.push_str(line);
            fenced.push('\n');
            i += 1;
            while i < lines.len() {
                fenced.push_str(lines[i]);
                fenced.push('\n');
                let closed = lines[i].trim_start().starts_with(&fence);
                i += 1;
                if closed {
                    break;
                }
            }
            let mut text = String::new();
            if let Some(h) = pending_heading.take() {
                text.push_str(&h);
                text.push('\n');
            }
            text.push_str(fenced.trim_end());
            blocks.push(Block { text, fenced: true });
            continue;
        }

        if is_heading(line) {
            flush(&mut current, &mut pending_heading, &mut blocks);
            pending_heading = Some(line.trim_end().to_string());
            i += 1;
            continue;
        }

        if line.trim().is_empty() {
            flush(&mut current, &mut pending_heading, &mut blocks);
            i += 1;
            continue;
        }

        if is_horizontal_rule(line) || is_html_block_boundary(line) {
            flush(&mut current, &mut pending_heading, &mut blocks);
            i += 1;
            continue;
        }

        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);
        i += 1;
    }
    flush(&mut current, &mut pending_heading, &mut blocks);

    blocks
}

fn is_heading(line: &str) -> bool {
    line.trim_start().starts_with('#')
}

fn is_fence_open(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("```") || trimmed.starts_with("~~~")
}

fn fence_marker(line: &str) -> String {
    let trimmed = line.trim_start();
    if trimmed.starts_with("```") {
        "```".to_string()
    } else {
        "~~~".to_string()
    }
}

/// `---`, `***`, `___` with optional spaces, length >= 3.
fn is_horizontal_rule(line: &str) -> bool {
    let trimmed: String = line.trim().chars().filter(|c| !c.is_whitespace()).collect();
    if trimmed.len() < 3 {
        return false;
    }
    let first = trimmed.chars().next().unwrap();
    matches!(first, '-' | '*' | '_') && trimmed.chars().all(|c| c == first)
}

const HTML_BLOCK_TAGS: &[&str] = &["hr", "div", "section", "article", "nav", "header", "footer"];

fn is_html_block_boundary(line: &str) -> bool {
    let trimmed = line.trim().to_ascii_lowercase();
    HTML_BLOCK_TAGS.iter().any(|tag| {
        trimmed.starts_with(&format!("<{tag}")) || trimmed.starts_with(&format!("</{tag}"))
    })
}

/// Whether `text` is CJK-heavy: a third or more of its characters fall in
/// common CJK unicode ranges.
fn is_cjk_heavy(text: &str) -> bool {
    let total = text.chars().count();
    if total == 0 {
        return false;
    }
    let cjk = text
        .chars()
        .filter(|c| {
            matches!(*c as u32,
                0x4E00..=0x9FFF | 0x3040..=0x30FF | 0xAC00..=0xD7A3 | 0x3400..=0x4DBF)
        })
        .count();
    cjk * 3 >= total
}

/// Estimates token count: `ceil(words * 1.3)`, falling back to
/// `max(by_words, ceil(runes/4))` for single-token blobs or CJK-heavy
/// text, with rune-count as a safety floor.
pub fn estimate_tokens(text: &str) -> usize {
    let words = text.split_whitespace().count();
    let by_words = ((words as f64) * 1.3).ceil() as usize;
    let runes = text.chars().count();
    let rune_floor = ((runes as f64) / 4.0).ceil() as usize;

    if words <= 1 || is_cjk_heavy(text) {
        by_words.max(rune_floor)
    } else {
        by_words
    }
}

/// Character cap for a chunk: `min(token_limit * 4, 24000)`.
pub fn char_cap(token_limit: usize) -> usize {
    (token_limit * 4).min(24_000)
}

/// An assembled chunk of embeddable text, pre-filtering.
#[derive(Debug, Clone, PartialEq)]
pub struct RawChunk {
    pub text: String,
}

/// Greedily accumulates blocks up to `token_limit`, splitting any block
/// that alone exceeds the token limit or character cap, and carrying
/// `token_overlap` estimated tokens from the tail of the previous chunk
/// forward as a prefix when the next chunk starts.
pub fn assemble_chunks(blocks: &[Block], token_limit: usize, token_overlap: usize) -> Vec<RawChunk> {
    let cap = char_cap(token_limit);
    let word_limit = ((token_limit as f64) / 1.3).floor().max(1.0) as usize;
    let word_overlap = ((token_overlap as f64) / 1.3).floor() as usize;

    let mut chunks: Vec<RawChunk> = Vec::new();
    let mut current = String::new();
    let mut current_tokens = 0usize;

    let flush_current = |current: &mut String, current_tokens: &mut usize, chunks: &mut Vec<RawChunk>| {
        if !current.trim().is_empty() {
            chunks.push(RawChunk {
                text: current.trim().to_string(),
            });
        }
        current.clear();
        *current_tokens = 0;
    };

    for block in blocks {
        let block_tokens = estimate_tokens(&block.text);
        let oversized = block_tokens > token_limit || block.text.len() > cap;

        if block.fenced {
            flush_current(&mut current, &mut current_tokens, &mut chunks);
            if oversized {
                let pieces = split_oversized_block(&block.text, word_limit, word_overlap, cap);
                for piece in pieces {
                    chunks.push(RawChunk { text: piece });
                }
            } else {
                chunks.push(RawChunk {
                    text: block.text.clone(),
                });
            }
            continue;
        }

        if oversized {
            flush_current(&mut current, &mut current_tokens, &mut chunks);
            let pieces = split_oversized_block(&block.text, word_limit, word_overlap, cap);
            for piece in pieces {
                chunks.push(RawChunk { text: piece });
            }
            continue;
        }

        if current_tokens + block_tokens > token_limit && !current.is_empty() {
            let overlap_prefix = take_overlap(&current, token_overlap);
            flush_current(&mut current, &mut current_tokens, &mut chunks);
            if !overlap_prefix.is_empty() {
                current.push_str(&overlap_prefix);
                current_tokens = estimate_tokens(&overlap_prefix);
            }
        }

        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(&block.text);
        current_tokens += block_tokens;
    }
    flush_current(&mut current, &mut current_tokens, &mut chunks);

    chunks.into_iter().flat_map(|c| enforce_char_cap(&c.text, cap)).collect()
}

/// Pulls the trailing `token_overlap` estimated tokens of `text` as an
/// overlap prefix for the next chunk, only if the result still fits
/// within the overlap budget.
fn take_overlap(text: &str, token_overlap: usize) -> String {
    if token_overlap == 0 {
        return String::new();
    }
    let words: Vec<&str> = text.split_whitespace().collect();
    let target_words = ((token_overlap as f64) / 1.3).ceil() as usize;
    if target_words == 0 || words.is_empty() {
        return String::new();
    }
    let start = words.len().saturating_sub(target_words);
    words[start..].join(" ")
}

fn split_oversized_block(text: &str, word_limit: usize, word_overlap: usize, cap: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() > 1 {
        let mut out = Vec::new();
        let mut start = 0usize;
        while start < words.len() {
            let end = (start + word_limit).min(words.len());
            let window = words[start..end].join(" ");
            out.extend(enforce_char_cap(&window, cap));
            if end >= words.len() {
                break;
            }
            start = end.saturating_sub(word_overlap).max(start + 1);
        }
        out
    } else {
        split_by_runes(text, word_limit.max(1) * 4)
    }
}

/// Splits `text` into windows of at most `max_chars` runes, used for
/// unsplittable single-word/CJK blobs.
fn split_by_runes(text: &str, max_chars: usize) -> Vec<String> {
    if max_chars == 0 {
        return vec![text.to_string()];
    }
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(max_chars)
        .map(|c| c.iter().collect::<String>())
        .collect()
}

/// Enforces the character cap on an already-assembled chunk: oversized
/// chunks are split at word boundaries, falling back to rune windows for
/// unsplittable words.
fn enforce_char_cap(text: &str, cap: usize) -> Vec<String> {
    if text.len() <= cap {
        return vec![text.to_string()];
    }
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= 1 {
        return split_by_runes(text, cap);
    }

    let mut out = Vec::new();
    let mut current = String::new();
    for word in words {
        if word.len() > cap {
            if !current.is_empty() {
                out.push(current.clone());
                current.clear();
            }
            out.extend(split_by_runes(word, cap));
            continue;
        }
        let candidate_len = current.len() + if current.is_empty() { 0 } else { 1 } + word.len();
        if candidate_len > cap {
            out.push(current.clone());
            current.clear();
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunker_boundary_preserves_code_block_verbatim() {
        let input = "# H\n\npara1\n\n```\ncode\n```\n\npara2";
        let blocks = split_blocks(input);
        let chunks = assemble_chunks(&blocks, 30, 5);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().any(|c| c.text.contains("```\ncode\n```")));
    }

    #[test]
    fn token_estimate_meets_word_and_rune_floor() {
        let cjk = "日本語のテキストです";
        let est = estimate_tokens(cjk);
        let words = cjk.split_whitespace().count();
        let runes = cjk.chars().count();
        assert!(est >= words);
        assert!(est as f64 >= (runes as f64 / 4.0).ceil());
    }

    #[test]
    fn horizontal_rule_is_a_block_boundary() {
        let input = "first block\n\n---\n\nsecond block";
        let blocks = split_blocks(input);
        assert_eq!(blocks.len(), 2);
    }

    #[test]
    fn heading_attaches_as_prefix_to_next_block() {
        let input = "# Title\n\nbody text here";
        let blocks = split_blocks(input);
        assert_eq!(blocks.len(), 1);
        assert!(blocks[0].text.starts_with("# Title"));
    }
}
