use thiserror::Error;

/// The closed set of error kinds the core recognises.
///
/// Per-page errors of these kinds are logged and folded into a
/// `CrawlResult`; they never abort a batch. Only `Cancelled` and
/// unrecoverable setup errors (returned as plain `anyhow::Error` from the
/// orchestration layer) stop a batch early.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("blocked by policy: {0}")]
    Ssrf(String),

    #[error("transient network error after retries: {0}")]
    Transient(String),

    #[error("unsupported content-type: {0}")]
    UnsupportedContent(String),

    #[error("extraction produced no usable text")]
    ExtractionEmpty,

    #[error("embedding provider error: {0}")]
    EmbedError(String),

    #[error("no embeddable chunks remained after filtering")]
    NoChunks,

    #[error("knowledge store error: {0}")]
    StoreError(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl CoreError {
    /// Whether this error kind represents a `failed` outcome for tallying
    /// purposes. `NoChunks`/`ExtractionEmpty` are not `failed`.
    pub fn counts_as_failed(&self) -> bool {
        !matches!(self, CoreError::NoChunks | CoreError::ExtractionEmpty)
    }
}
