//! Optional contextual-prefix chunk enrichment: the contextual summariser
//! consumes chunks and returns numbered lines tolerating `1. `, `1: `,
//! `1) `, and bare-line formats, so the enrichment stays robust to
//! whatever numbered-list style the configured LLM happens to answer in.

use futures::StreamExt;

use crate::core::providers::{LlmProvider, Message};

const CONTEXT_CONTENT_WORDS: usize = 300;

/// Calls the summariser once per document with the title, the first 300
/// words of content, and the chunk list; expects one short line per
/// chunk. On success with a matching line count, returns `Some` prefixes
/// to prepend to each chunk's embed text; `None` on any mismatch or
/// provider error (caller falls back to unenriched chunks).
pub async fn generate_context_lines(
    llm: &dyn LlmProvider,
    title: &str,
    content: &str,
    chunks: &[String],
) -> Option<Vec<String>> {
    if chunks.is_empty() {
        return None;
    }

    let excerpt: String = content.split_whitespace().take(CONTEXT_CONTENT_WORDS).collect::<Vec<_>>().join(" ");
    let prompt = build_prompt(title, &excerpt, chunks);
    let messages = [Message { role: "user".to_string(), content: prompt }];

    let mut stream = llm.complete(&messages, &[]).await.ok()?;
    let mut response = String::new();
    while let Some(piece) = stream.next().await {
        response.push_str(&piece.ok()?);
    }
    let lines = parse_numbered_lines(&response);

    if lines.len() == chunks.len() {
        Some(lines)
    } else {
        None
    }
}

/// Prepends `"Context: <line>\n\n"` to each chunk's embed text; the
/// display text (the original chunk) is left untouched by the caller.
pub fn with_context_prefix(chunk_text: &str, context_line: &str) -> String {
    format!("Context: {context_line}\n\n{chunk_text}")
}

fn build_prompt(title: &str, excerpt: &str, chunks: &[String]) -> String {
    let mut prompt = format!(
        "Document title: {title}\n\nExcerpt:\n{excerpt}\n\nFor each numbered chunk below, \
         write one short context line describing where it fits in the document.\n\n"
    );
    for (i, chunk) in chunks.iter().enumerate() {
        prompt.push_str(&format!("{}. {}\n", i + 1, truncate(chunk, 200)));
    }
    prompt
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.len() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect()
    }
}

/// Parses lines formatted as `1. `, `1: `, `1) `, or bare lines (one
/// context line per input line, numbering is advisory only).
fn parse_numbered_lines(response: &str) -> Vec<String> {
    response
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(strip_numbering)
        .collect()
}

fn strip_numbering(line: &str) -> String {
    let trimmed = line.trim_start();
    let digits_end = trimmed.find(|c: char| !c.is_ascii_digit()).unwrap_or(0);
    if digits_end == 0 {
        return trimmed.to_string();
    }
    let (digits, rest) = trimmed.split_at(digits_end);
    if digits.is_empty() {
        return trimmed.to_string();
    }
    let rest = rest.trim_start();
    if let Some(stripped) = rest.strip_prefix(". ").or_else(|| rest.strip_prefix(": ")).or_else(|| rest.strip_prefix(") ")) {
        stripped.trim().to_string()
    } else if let Some(stripped) = rest.strip_prefix('.').or_else(|| rest.strip_prefix(':')).or_else(|| rest.strip_prefix(')')) {
        stripped.trim().to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mixed_numbering_styles() {
        let response = "1. first line\n2: second line\n3) third line\nbare line\n";
        let lines = parse_numbered_lines(response);
        assert_eq!(
            lines,
            vec![
                "first line".to_string(),
                "second line".to_string(),
                "third line".to_string(),
                "bare line".to_string(),
            ]
        );
    }

    #[test]
    fn context_prefix_keeps_display_text_separate() {
        let prefixed = with_context_prefix("original chunk text", "about installation");
        assert!(prefixed.starts_with("Context: about installation\n\n"));
        assert!(prefixed.ends_with("original chunk text"));
    }
}
