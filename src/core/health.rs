//! Per-source health tracking used by the scheduler's failure backoff.
//! Grounded in `AntiBot`'s atomic-timestamp bookkeeping shape
//! (`features/antibot.rs`), generalized from a single global clock to a
//! per-source-root map.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Default)]
struct SourceHealth {
    consecutive_failures: u32,
    last_failure_at: Option<DateTime<Utc>>,
}

/// Tracks consecutive-failure counts per source root so the scheduler can
/// apply the failure penalty from the priority-score formula and so a
/// persistently broken source root can be deprioritized without a human
/// having to remove it from configuration.
#[derive(Debug, Default)]
pub struct HealthTracker {
    inner: RwLock<HashMap<String, SourceHealth>>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_failure(&self, source_root: &str) {
        let mut guard = self.inner.write().expect("health tracker lock poisoned");
        let entry = guard.entry(source_root.to_string()).or_default();
        entry.consecutive_failures += 1;
        entry.last_failure_at = Some(Utc::now());
    }

    pub fn record_success(&self, source_root: &str) {
        let mut guard = self.inner.write().expect("health tracker lock poisoned");
        guard.remove(source_root);
    }

    pub fn consecutive_failures(&self, source_root: &str) -> u32 {
        self.inner
            .read()
            .expect("health tracker lock poisoned")
            .get(source_root)
            .map(|h| h.consecutive_failures)
            .unwrap_or(0)
    }
}
