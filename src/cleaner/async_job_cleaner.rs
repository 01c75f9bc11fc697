//! Async-job cleaner: sweeps `async_jobs` rows past their
//! TTL and reaps jobs stuck in `processing` after the worker crashed before
//! finalising (the counterpart to the log-side stuck-processing case
//! surfaced through `Store::flush`).

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use crate::entity::log_entry::format_iso;
use crate::error::StoreError;
use crate::store::Store;

use super::Cleaner;

const STALE_PROCESSING_THRESHOLD_HOURS: i64 = 24;

pub struct AsyncJobCleaner {
    store: Arc<Store>,
}

impl AsyncJobCleaner {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Cleaner for AsyncJobCleaner {
    async fn run_once(&self) -> Result<(), StoreError> {
        let now = Utc::now();
        let expired = self.store.delete_expired_jobs(&format_iso(now)).await?;
        if expired > 0 {
            tracing::debug!(expired, "async-job sweep removed expired results");
        }

        let cutoff = format_iso(now - Duration::hours(STALE_PROCESSING_THRESHOLD_HOURS));
        let stale = self.store.delete_stale_processing_jobs(&cutoff).await?;
        if stale > 0 {
            tracing::warn!(stale, "async-job sweep reaped jobs stuck in processing");
        }

        Ok(())
    }

    fn interval(&self) -> StdDuration {
        StdDuration::from_secs(60)
    }

    fn timeout(&self) -> StdDuration {
        StdDuration::from_secs(60)
    }

    fn name(&self) -> &'static str {
        "async-job-cleaner"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::async_job::JobStatus;
    use crate::entity::log_entry::now_iso;
    use crate::entity::AsyncJob;
    use crate::store::Dialect;
    use sqlx::any::AnyPoolOptions;

    async fn test_store() -> Arc<Store> {
        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new().max_connections(1).connect("sqlite::memory:").await.unwrap();
        crate::store::Migrator::run(&pool, Dialect::Sqlite).await.unwrap();
        Arc::new(Store::from_pool_for_tests(pool, Dialect::Sqlite))
    }

    fn job(id: &str, status: JobStatus, created_at: String, expires_at: Option<String>) -> AsyncJob {
        AsyncJob {
            id: id.to_string(),
            status: status.as_str().to_string(),
            request_type: "chat_completion".to_string(),
            virtual_key_id: None,
            result_ttl_seconds: 60,
            status_code: None,
            response: None,
            error: None,
            created_at,
            completed_at: None,
            expires_at,
        }
    }

    #[tokio::test]
    async fn sweep_deletes_expired_and_stuck_jobs_but_not_healthy_ones() {
        let store = test_store().await;

        let expired_at = format_iso(Utc::now() - Duration::minutes(5));
        store.create_async_job(&job("expired", JobStatus::Completed, now_iso(), Some(expired_at))).await.unwrap();

        let stuck_created = format_iso(Utc::now() - Duration::hours(30));
        store.create_async_job(&job("stuck", JobStatus::Processing, stuck_created, None)).await.unwrap();

        store.create_async_job(&job("healthy", JobStatus::Pending, now_iso(), None)).await.unwrap();

        let cleaner = AsyncJobCleaner::new(Arc::clone(&store));
        cleaner.run_once().await.unwrap();

        assert!(store.find_async_job("expired").await.is_err());
        assert!(store.find_async_job("stuck").await.is_err());
        assert!(store.find_async_job("healthy").await.is_ok());
    }
}
