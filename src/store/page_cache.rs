//! Per-(tenant, page_url) crawl-state persistence, with an in-memory
//! reference implementation. No SQL layer lives in this crate; the trait
//! shape is generalized from `features/history.rs::MemoryManager`'s
//! store/query surface, not its on-disk format.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::core::types::{PageCacheRow, TenantId};

#[derive(Debug, thiserror::Error)]
pub enum PageCacheError {
    #[error("page cache backend error: {0}")]
    Backend(String),
}

/// Persists per-page crawl state.
#[async_trait]
pub trait PageCacheStore: Send + Sync {
    async fn get(&self, tenant: &str, url: &str) -> Result<Option<PageCacheRow>, PageCacheError>;
    async fn upsert(&self, row: PageCacheRow) -> Result<(), PageCacheError>;
    async fn bulk_upsert(&self, rows: Vec<PageCacheRow>) -> Result<(), PageCacheError>;
    async fn last_fetched_for_source(
        &self,
        tenant: &str,
        source_root: &str,
    ) -> Result<Option<DateTime<Utc>>, PageCacheError>;
    async fn update_crawl_outcome(
        &self,
        tenant: &str,
        url: &str,
        changed: bool,
        failed: bool,
    ) -> Result<(), PageCacheError>;
    async fn list_for_tenant(&self, tenant: &str) -> Result<Vec<PageCacheRow>, PageCacheError>;
    async fn delete_by_source(&self, tenant: &str, source_root: &str) -> Result<u64, PageCacheError>;
    async fn cleanup_stale(
        &self,
        tenant: &str,
        older_than: DateTime<Utc>,
    ) -> Result<u64, PageCacheError>;
}

type Key = (TenantId, String);

/// Reference `PageCacheStore` backed by an in-process `RwLock<HashMap>`.
/// Suitable for tests and single-process deployments; a production
/// deployment would back this with the Postgres/pgvector store the
/// original spec treats as an external collaborator.
#[derive(Default)]
pub struct InMemoryPageCacheStore {
    rows: RwLock<HashMap<Key, PageCacheRow>>,
}

impl InMemoryPageCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PageCacheStore for InMemoryPageCacheStore {
    async fn get(&self, tenant: &str, url: &str) -> Result<Option<PageCacheRow>, PageCacheError> {
        let guard = self.rows.read().map_err(|_| lock_err())?;
        Ok(guard.get(&(tenant.to_string(), url.to_string())).cloned())
    }

    async fn upsert(&self, row: PageCacheRow) -> Result<(), PageCacheError> {
        let mut guard = self.rows.write().map_err(|_| lock_err())?;
        let key = (row.tenant.clone(), row.page_url.clone());
        if let Some(existing) = guard.get(&key) {
            // last_fetched_at is monotonic per key within a cycle.
            if row.last_fetched_at < existing.last_fetched_at {
                return Ok(());
            }
        }
        guard.insert(key, row);
        Ok(())
    }

    async fn bulk_upsert(&self, rows: Vec<PageCacheRow>) -> Result<(), PageCacheError> {
        for row in rows {
            self.upsert(row).await?;
        }
        Ok(())
    }

    async fn last_fetched_for_source(
        &self,
        tenant: &str,
        source_root: &str,
    ) -> Result<Option<DateTime<Utc>>, PageCacheError> {
        let guard = self.rows.read().map_err(|_| lock_err())?;
        Ok(guard
            .values()
            .filter(|r| r.tenant == tenant && r.source_root.as_deref() == Some(source_root))
            .map(|r| r.last_fetched_at)
            .max())
    }

    async fn update_crawl_outcome(
        &self,
        tenant: &str,
        url: &str,
        changed: bool,
        failed: bool,
    ) -> Result<(), PageCacheError> {
        let mut guard = self.rows.write().map_err(|_| lock_err())?;
        if let Some(row) = guard.get_mut(&(tenant.to_string(), url.to_string())) {
            row.consecutive_unchanged = if changed { 0 } else { row.consecutive_unchanged + 1 };
            row.consecutive_failures = if failed { row.consecutive_failures + 1 } else { 0 };
        }
        Ok(())
    }

    async fn list_for_tenant(&self, tenant: &str) -> Result<Vec<PageCacheRow>, PageCacheError> {
        let guard = self.rows.read().map_err(|_| lock_err())?;
        Ok(guard
            .values()
            .filter(|r| r.tenant == tenant)
            .cloned()
            .collect())
    }

    async fn delete_by_source(&self, tenant: &str, source_root: &str) -> Result<u64, PageCacheError> {
        let mut guard = self.rows.write().map_err(|_| lock_err())?;
        let before = guard.len();
        guard.retain(|_, row| {
            !(row.tenant == tenant
                && (row.source_root.as_deref() == Some(source_root) || row.page_url == source_root))
        });
        Ok((before - guard.len()) as u64)
    }

    async fn cleanup_stale(
        &self,
        tenant: &str,
        older_than: DateTime<Utc>,
    ) -> Result<u64, PageCacheError> {
        let mut guard = self.rows.write().map_err(|_| lock_err())?;
        let before = guard.len();
        guard.retain(|_, row| !(row.tenant == tenant && row.last_fetched_at < older_than));
        Ok((before - guard.len()) as u64)
    }
}

fn lock_err() -> PageCacheError {
    PageCacheError::Backend("page cache lock poisoned".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{SitemapHints, SourceType};

    fn row(tenant: &str, url: &str) -> PageCacheRow {
        PageCacheRow::new_unfetched(
            tenant.to_string(),
            url.to_string(),
            SourceType::Direct,
            None,
            SitemapHints::default(),
        )
    }

    #[tokio::test]
    async fn upsert_then_get_round_trips() {
        let store = InMemoryPageCacheStore::new();
        let mut r = row("t1", "https://x/a");
        r.last_fetched_at = Utc::now();
        store.upsert(r.clone()).await.unwrap();
        let fetched = store.get("t1", "https://x/a").await.unwrap().unwrap();
        assert_eq!(fetched.page_url, "https://x/a");
    }

    #[tokio::test]
    async fn upsert_does_not_rewind_last_fetched_at() {
        let store = InMemoryPageCacheStore::new();
        let mut newer = row("t1", "https://x/a");
        newer.last_fetched_at = Utc::now();
        store.upsert(newer.clone()).await.unwrap();

        let mut older = newer.clone();
        older.last_fetched_at = crate::core::types::zero_time();
        store.upsert(older).await.unwrap();

        let fetched = store.get("t1", "https://x/a").await.unwrap().unwrap();
        assert_eq!(fetched.last_fetched_at, newer.last_fetched_at);
    }

    #[tokio::test]
    async fn update_crawl_outcome_resets_or_increments_counters() {
        let store = InMemoryPageCacheStore::new();
        store.upsert(row("t1", "https://x/a")).await.unwrap();
        store
            .update_crawl_outcome("t1", "https://x/a", false, false)
            .await
            .unwrap();
        store
            .update_crawl_outcome("t1", "https://x/a", false, false)
            .await
            .unwrap();
        let fetched = store.get("t1", "https://x/a").await.unwrap().unwrap();
        assert_eq!(fetched.consecutive_unchanged, 2);

        store
            .update_crawl_outcome("t1", "https://x/a", true, true)
            .await
            .unwrap();
        let fetched = store.get("t1", "https://x/a").await.unwrap().unwrap();
        assert_eq!(fetched.consecutive_unchanged, 0);
        assert_eq!(fetched.consecutive_failures, 1);
    }
}
