//! Process-wide counters exposed for observability. No outer HTTP surface
//! is in scope (non-goal), so these are plain atomics a caller can snapshot
//! and log, rather than a `/metrics` endpoint.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct MetricsSink {
    pub pages_fetched: AtomicU64,
    pub pages_skipped_304: AtomicU64,
    pub pages_skipped_hash: AtomicU64,
    pub pages_skipped_ttl: AtomicU64,
    pub pages_failed: AtomicU64,
    pub pages_embedded: AtomicU64,
    pub pages_disallowed: AtomicU64,
    pub pages_no_chunks: AtomicU64,
    pub pages_excluded: AtomicU64,
    pub chunks_embedded: AtomicU64,
    pub embed_batches: AtomicU64,
}

impl MetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_by(&self, counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_outcome(&self, status: crate::core::types::PageStatus) {
        use crate::core::types::PageStatus::*;
        let counter = match status {
            PageFetched => &self.pages_fetched,
            PageSkipped304 => &self.pages_skipped_304,
            PageSkippedHash => &self.pages_skipped_hash,
            PageSkippedTTL => &self.pages_skipped_ttl,
            PageFailed => &self.pages_failed,
            PageEmbedded => &self.pages_embedded,
            PageDisallowed => &self.pages_disallowed,
            PageNoChunks => &self.pages_no_chunks,
            PageExcluded => &self.pages_excluded,
        };
        self.incr(counter);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            pages_fetched: self.pages_fetched.load(Ordering::Relaxed),
            pages_skipped_304: self.pages_skipped_304.load(Ordering::Relaxed),
            pages_skipped_hash: self.pages_skipped_hash.load(Ordering::Relaxed),
            pages_skipped_ttl: self.pages_skipped_ttl.load(Ordering::Relaxed),
            pages_failed: self.pages_failed.load(Ordering::Relaxed),
            pages_embedded: self.pages_embedded.load(Ordering::Relaxed),
            pages_disallowed: self.pages_disallowed.load(Ordering::Relaxed),
            pages_no_chunks: self.pages_no_chunks.load(Ordering::Relaxed),
            pages_excluded: self.pages_excluded.load(Ordering::Relaxed),
            chunks_embedded: self.chunks_embedded.load(Ordering::Relaxed),
            embed_batches: self.embed_batches.load(Ordering::Relaxed),
        }
    }
}

/// Plain-data snapshot of [`MetricsSink`], cheap to log or serialize.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct MetricsSnapshot {
    pub pages_fetched: u64,
    pub pages_skipped_304: u64,
    pub pages_skipped_hash: u64,
    pub pages_skipped_ttl: u64,
    pub pages_failed: u64,
    pub pages_embedded: u64,
    pub pages_disallowed: u64,
    pub pages_no_chunks: u64,
    pub pages_excluded: u64,
    pub chunks_embedded: u64,
    pub embed_batches: u64,
}
