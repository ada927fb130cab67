//! External-collaborator traits.
//!
//! These are the seams the rest of the crate is built against so that a
//! caller can plug in their own embedding model, LLM, or reranker without
//! this crate depending on any particular vendor SDK — the same shape as
//! the `SearchService` trait in `tools/search/service.rs`.

use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::Stream;

use crate::core::errors::CoreError;

/// Turns chunk text into dense vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a batch of texts, returning one vector per input in order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CoreError>;

    /// Dimensionality of vectors this provider returns.
    fn dimensions(&self) -> usize;
}

/// One message in a chat-style conversation sent to an [`LlmProvider`].
#[derive(Debug, Clone, serde::Serialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

/// A callable tool definition passed alongside a completion request.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Boxed, pinned stream of completion text deltas.
pub type CompletionStream = Pin<Box<dyn Stream<Item = Result<String, CoreError>> + Send>>;

/// Generates natural-language text from a message history, used for
/// contextual-prefix chunk enrichment. Streams deltas incrementally rather
/// than buffering the full response; callers that want the whole text
/// concatenate the stream to EOF.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(&self, messages: &[Message], tools: &[ToolSpec]) -> Result<CompletionStream, CoreError>;
}

/// Cross-encoder-style reranker: scores (query, candidate) pairs.
#[async_trait]
pub trait RerankClient: Send + Sync {
    /// Returns one relevance score per candidate, same order as input,
    /// higher is more relevant. Scores need not be normalized.
    async fn score(&self, query: &str, candidates: &[String]) -> Result<Vec<f64>, CoreError>;
}

/// Reference `EmbeddingProvider`/`LlmProvider` backed by an OpenAI-compatible
/// HTTP endpoint (works against `api.openai.com`, Ollama, or LM Studio
/// alike), grounded in `ShadowDeepResearchConfig`'s resolution shape
/// (`llm_base_url`/`llm_api_key`/`llm_model`, field → env var → default)
/// and its `deep_research` synthesis call. Streams chat completions and
/// forwards tool specs; minimal retry.
pub struct OpenAiCompatibleProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    chat_model: String,
    embedding_model: String,
    embedding_dimensions: usize,
}

impl OpenAiCompatibleProvider {
    pub fn new(
        client: reqwest::Client,
        base_url: String,
        api_key: Option<String>,
        chat_model: String,
        embedding_model: String,
        embedding_dimensions: usize,
    ) -> Self {
        Self { client, base_url, api_key, chat_model, embedding_model, embedding_dimensions }
    }

    fn request(&self, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), path);
        let builder = self.client.post(url);
        match &self.api_key {
            Some(key) if !key.is_empty() => builder.bearer_auth(key),
            _ => builder,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiCompatibleProvider {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CoreError> {
        #[derive(serde::Serialize)]
        struct Req<'a> {
            model: &'a str,
            input: &'a [String],
        }
        #[derive(serde::Deserialize)]
        struct Embedding {
            embedding: Vec<f32>,
        }
        #[derive(serde::Deserialize)]
        struct Resp {
            data: Vec<Embedding>,
        }

        let resp = self
            .request("embeddings")
            .json(&Req { model: &self.embedding_model, input: texts })
            .send()
            .await
            .map_err(|e| CoreError::EmbedError(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(CoreError::EmbedError(format!("embedding request failed: {}", resp.status())));
        }

        let parsed: Resp = resp.json().await.map_err(|e| CoreError::EmbedError(e.to_string()))?;
        Ok(parsed.data.into_iter().map(|e| e.embedding).collect())
    }

    fn dimensions(&self) -> usize {
        self.embedding_dimensions
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    async fn complete(&self, messages: &[Message], tools: &[ToolSpec]) -> Result<CompletionStream, CoreError> {
        #[derive(serde::Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: &'a [Message],
            stream: bool,
            #[serde(skip_serializing_if = "<[_]>::is_empty")]
            tools: &'a [ToolSpec],
        }

        let resp = self
            .request("chat/completions")
            .json(&Req { model: &self.chat_model, messages, stream: true, tools })
            .send()
            .await
            .map_err(|e| CoreError::EmbedError(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(CoreError::EmbedError(format!("chat completion request failed: {}", resp.status())));
        }

        Ok(Box::pin(SseCompletionStream::new(resp.bytes_stream())))
    }
}

/// Stream adapter consuming an OpenAI-compatible chat-completions SSE body
/// incrementally, yielding one `content` delta per `data:` line and ending
/// at `data: [DONE]` or stream EOF, whichever comes first.
struct SseCompletionStream {
    inner: Pin<Box<dyn Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>>,
    buffer: String,
    done: bool,
}

impl SseCompletionStream {
    fn new(byte_stream: impl Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static) -> Self {
        Self { inner: Box::pin(byte_stream), buffer: String::new(), done: false }
    }
}

impl Stream for SseCompletionStream {
    type Item = Result<String, CoreError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        loop {
            if let Some(item) = try_parse_sse_line(&mut this.buffer, &mut this.done) {
                return Poll::Ready(Some(item));
            }
            if this.done {
                return Poll::Ready(None);
            }

            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => match std::str::from_utf8(&bytes) {
                    Ok(text) => this.buffer.push_str(text),
                    Err(e) => {
                        return Poll::Ready(Some(Err(CoreError::EmbedError(format!(
                            "invalid utf-8 in completion stream: {e}"
                        )))));
                    }
                },
                Poll::Ready(Some(Err(e))) => {
                    return Poll::Ready(Some(Err(CoreError::EmbedError(e.to_string()))));
                }
                Poll::Ready(None) => {
                    this.done = true;
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Extracts and parses the next complete SSE line out of `buffer`, if any.
/// Sets `*done` on `data: [DONE]`. Returns `None` when the buffer holds no
/// full line yet or the line carried no content delta, leaving the caller's
/// loop to either fetch more bytes or try the next buffered line.
fn try_parse_sse_line(buffer: &mut String, done: &mut bool) -> Option<Result<String, CoreError>> {
    #[derive(serde::Deserialize)]
    struct StreamChunk {
        choices: Vec<StreamChoice>,
    }
    #[derive(serde::Deserialize)]
    struct StreamChoice {
        delta: Delta,
    }
    #[derive(serde::Deserialize)]
    struct Delta {
        #[serde(default)]
        content: Option<String>,
    }

    loop {
        let newline_pos = buffer.find('\n')?;
        let line = buffer[..newline_pos].trim().to_string();
        buffer.drain(..=newline_pos);

        if line.is_empty() {
            continue;
        }
        let data = match line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:")) {
            Some(d) => d.trim(),
            None => continue,
        };
        if data == "[DONE]" {
            *done = true;
            return None;
        }

        match serde_json::from_str::<StreamChunk>(data) {
            Ok(chunk) => {
                let content = chunk.choices.into_iter().next().and_then(|c| c.delta.content).unwrap_or_default();
                if content.is_empty() {
                    continue;
                }
                return Some(Ok(content));
            }
            Err(e) => return Some(Err(CoreError::EmbedError(format!("stream chunk parse error: {e}")))),
        }
    }
}
