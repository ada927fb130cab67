//! Retrying conditional GET/HEAD with body caps, built on
//! `reqwest::Client` the way `RustScraper::new_with_quality_mode`
//! constructs its client (explicit timeout, explicit redirect policy), with
//! retry/backoff via the `backoff` crate.

use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use reqwest::{Client, StatusCode};

use crate::core::config::CRAWLER_USER_AGENT;
use crate::core::errors::CoreError;

const MAX_RETRIES: u32 = 3;
const MAX_REDIRECTS: u8 = 5;
const BODY_CAP_BYTES: u64 = 10 * 1024 * 1024;
const ERROR_BODY_CAP_BYTES: u64 = 1024 * 1024;
const MAX_RETRY_AFTER_SECS: u64 = 120;

const ALLOWED_CONTENT_TYPES: &[&str] = &[
    "text/html",
    "application/xhtml",
    "text/plain",
    "text/markdown",
    "text/x-markdown",
];

/// Conditional headers carried forward across a fetch, e.g. from a
/// previously cached [`crate::core::types::PageCacheRow`].
#[derive(Debug, Clone, Default)]
pub struct ConditionalHeaders {
    pub if_none_match: Option<String>,
    pub if_modified_since: Option<String>,
}

/// Outcome of one GET/HEAD, before extraction.
pub struct RawFetch {
    pub status: StatusCode,
    pub not_modified: bool,
    pub body: Vec<u8>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub content_length: Option<u64>,
}

#[derive(Clone)]
pub struct Fetcher {
    client: Client,
}

impl Fetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// GET `url` with optional conditional headers, retrying transient
    /// failures with exponential backoff (1s/2s/4s, 3 retries) and
    /// honoring `Retry-After` (clamped to 120s). Redirects are followed
    /// manually, capped at 5, stripping conditional headers on a
    /// cross-host hop.
    pub async fn get(
        &self,
        url: &str,
        conditional: &ConditionalHeaders,
    ) -> Result<RawFetch, CoreError> {
        self.fetch(reqwest::Method::GET, url, conditional).await
    }

    /// HEAD `url`, used to check whether `Content-Length` changed since
    /// the cached fetch without downloading the body.
    pub async fn head(&self, url: &str) -> Result<RawFetch, CoreError> {
        self.fetch(reqwest::Method::HEAD, url, &ConditionalHeaders::default())
            .await
    }

    async fn fetch(
        &self,
        method: reqwest::Method,
        url: &str,
        conditional: &ConditionalHeaders,
    ) -> Result<RawFetch, CoreError> {
        let mut backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_secs(1))
            .with_multiplier(2.0)
            .with_max_elapsed_time(None)
            .build();

        let mut attempt = 0u32;
        loop {
            match self
                .fetch_with_redirects(method.clone(), url, conditional)
                .await
            {
                Ok(raw) => return Ok(raw),
                Err(RetryableError::Fatal(e)) => return Err(e),
                Err(RetryableError::Transient(e, retry_after)) => {
                    attempt += 1;
                    if attempt > MAX_RETRIES {
                        return Err(CoreError::Transient(format!(
                            "exhausted retries for {url}: {e}"
                        )));
                    }
                    let wait = retry_after.unwrap_or_else(|| {
                        backoff
                            .next_backoff()
                            .unwrap_or_else(|| Duration::from_secs(4))
                    });
                    tracing::warn!(url, attempt, wait_secs = wait.as_secs(), "retrying fetch");
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    async fn fetch_with_redirects(
        &self,
        method: reqwest::Method,
        url: &str,
        conditional: &ConditionalHeaders,
    ) -> Result<RawFetch, RetryableError> {
        let mut current = url.to_string();
        let mut hops = 0u8;
        let mut active_conditional = conditional.clone();

        loop {
            let parsed = url::Url::parse(&current)
                .map_err(|e| RetryableError::Fatal(CoreError::InvalidInput(e.to_string())))?;

            crate::net::ssrf::precheck(&parsed)
                .await
                .map_err(RetryableError::Fatal)?;

            let mut builder = self.client.request(method.clone(), &current);
            if let Some(etag) = &active_conditional.if_none_match {
                builder = builder.header(reqwest::header::IF_NONE_MATCH, etag);
            }
            if let Some(ims) = &active_conditional.if_modified_since {
                builder = builder.header(reqwest::header::IF_MODIFIED_SINCE, ims);
            }

            let response = builder.send().await.map_err(|e| {
                RetryableError::Transient(format!("request error: {e}"), None)
            })?;

            let status = response.status();

            if status.is_redirection() {
                hops += 1;
                if hops > MAX_REDIRECTS {
                    return Err(RetryableError::Fatal(CoreError::Transient(format!(
                        "too many redirects for {url}"
                    ))));
                }
                let location = response
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| {
                        RetryableError::Fatal(CoreError::Transient(
                            "redirect with no Location header".into(),
                        ))
                    })?;
                let next = parsed.join(location).map_err(|e| {
                    RetryableError::Fatal(CoreError::Transient(format!(
                        "bad redirect location: {e}"
                    )))
                })?;
                if next.host_str() != parsed.host_str() {
                    active_conditional = ConditionalHeaders::default();
                }
                current = next.to_string();
                continue;
            }

            if status == StatusCode::NOT_MODIFIED {
                return Ok(RawFetch {
                    status,
                    not_modified: true,
                    body: Vec::new(),
                    etag: header_string(&response, reqwest::header::ETAG),
                    last_modified: header_string(&response, reqwest::header::LAST_MODIFIED),
                    content_length: response.content_length(),
                });
            }

            if is_transient_status(status) {
                let retry_after = retry_after_duration(&response);
                return Err(RetryableError::Transient(
                    format!("transient status {status}"),
                    retry_after,
                ));
            }

            if !status.is_success() {
                let _ = read_capped(response, ERROR_BODY_CAP_BYTES).await;
                return Err(RetryableError::Fatal(CoreError::Transient(format!(
                    "unretryable status {status} for {url}"
                ))));
            }

            if method == reqwest::Method::GET {
                if let Some(ct) = content_type(&response) {
                    if !content_type_allowed(&ct) {
                        return Err(RetryableError::Fatal(CoreError::UnsupportedContent(ct)));
                    }
                }
            }

            let etag = header_string(&response, reqwest::header::ETAG);
            let last_modified = header_string(&response, reqwest::header::LAST_MODIFIED);
            let content_length = response.content_length();

            let body = if method == reqwest::Method::HEAD {
                Vec::new()
            } else {
                read_capped(response, BODY_CAP_BYTES)
                    .await
                    .map_err(|e| RetryableError::Transient(e, None))?
            };

            return Ok(RawFetch {
                status,
                not_modified: false,
                body,
                etag,
                last_modified,
                content_length,
            });
        }
    }
}

enum RetryableError {
    Fatal(CoreError),
    Transient(String, Option<Duration>),
}

fn is_transient_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn retry_after_duration(response: &reqwest::Response) -> Option<Duration> {
    let raw = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?;
    let secs: u64 = raw.parse().ok()?;
    Some(Duration::from_secs(secs.min(MAX_RETRY_AFTER_SECS)))
}

fn header_string(response: &reqwest::Response, name: reqwest::header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

fn content_type(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// Empty `Content-Type` is treated as HTML.
fn content_type_allowed(content_type: &str) -> bool {
    let base = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    if base.is_empty() {
        return true;
    }
    ALLOWED_CONTENT_TYPES.iter().any(|allowed| base == *allowed)
}

async fn read_capped(response: reqwest::Response, cap: u64) -> Result<Vec<u8>, String> {
    use futures::StreamExt;

    let mut stream = response.bytes_stream();
    let mut buf = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| format!("body read error: {e}"))?;
        buf.extend_from_slice(&chunk);
        if buf.len() as u64 >= cap {
            buf.truncate(cap as usize);
            break;
        }
    }
    Ok(buf)
}

/// Default honest crawler user agent.
pub fn default_user_agent() -> &'static str {
    CRAWLER_USER_AGENT
}
