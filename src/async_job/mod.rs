//! Async Job Executor: submit returns immediately with a `pending` row and
//! spawns a background worker; the worker drives
//! `pending -> processing -> {completed, failed}` and writes a
//! TTL-bounded result.

mod governance;
mod worker;

pub use governance::{GovernanceLookup, VirtualKey};
pub use worker::Operation;

use std::sync::Arc;
use uuid::Uuid;

use crate::entity::{async_job::JobStatus, AsyncJob};
use crate::entity::log_entry::now_iso;
use crate::error::{StoreError, StoreResult};
use crate::store::Store;

const DEFAULT_RESULT_TTL_SECONDS: i64 = 3600;

pub struct AsyncJobExecutor {
    store: Arc<Store>,
    governance: Arc<dyn GovernanceLookup>,
}

impl AsyncJobExecutor {
    pub fn new(store: Arc<Store>, governance: Arc<dyn GovernanceLookup>) -> Self {
        Self { store, governance }
    }

    /// Validate the optional virtual key, create a `pending` row, and spawn
    /// the background worker that will run `operation` to completion.
    pub async fn submit_job(
        &self,
        virtual_key_value: Option<&str>,
        result_ttl_seconds: i64,
        operation: impl Operation + Send + 'static,
        request_type: &str,
    ) -> StoreResult<AsyncJob> {
        let virtual_key_id = match virtual_key_value {
            Some(value) => {
                let vk = self
                    .governance
                    .get_virtual_key(value)
                    .await
                    .ok_or_else(|| StoreError::AuthError("virtual key not found".to_string()))?;
                Some(vk.id)
            },
            None => None,
        };

        let ttl = if result_ttl_seconds <= 0 { DEFAULT_RESULT_TTL_SECONDS } else { result_ttl_seconds };

        let job = AsyncJob {
            id: Uuid::new_v4().to_string(),
            status: JobStatus::Pending.as_str().to_string(),
            request_type: request_type.to_string(),
            virtual_key_id,
            result_ttl_seconds: ttl,
            status_code: None,
            response: None,
            error: None,
            created_at: now_iso(),
            completed_at: None,
            expires_at: None,
        };

        self.store.create_async_job(&job).await?;

        let store = Arc::clone(&self.store);
        let job_id = job.id.clone();
        tokio::spawn(async move {
            worker::run(store, job_id, ttl, operation).await;
        });

        Ok(job)
    }

    /// Read a job row, enforcing virtual-key binding and request-type match.
    pub async fn retrieve_job(
        &self,
        job_id: &str,
        virtual_key_value: Option<&str>,
        request_type: &str,
    ) -> StoreResult<AsyncJob> {
        let job = self.store.find_async_job(job_id).await?;

        if job.request_type != request_type {
            return Err(StoreError::ValidationError(
                "request type does not match the submitted job".to_string(),
            ));
        }

        if let Some(bound_vk) = &job.virtual_key_id {
            let supplied = virtual_key_value.ok_or_else(|| {
                StoreError::ValidationError("virtual key value is required for this job".to_string())
            })?;
            let vk = self
                .governance
                .get_virtual_key(supplied)
                .await
                .ok_or_else(|| StoreError::AuthError("virtual key mismatch".to_string()))?;
            if &vk.id != bound_vk {
                return Err(StoreError::AuthError("virtual key mismatch".to_string()));
            }
        }

        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreKind;
    use crate::store::Dialect;
    use async_trait::async_trait;
    use sqlx::any::AnyPoolOptions;
    use std::sync::Mutex;

    struct NoGovernance;

    #[async_trait]
    impl GovernanceLookup for NoGovernance {
        async fn get_virtual_key(&self, _value: &str) -> Option<VirtualKey> {
            None
        }
    }

    struct StaticGovernance(VirtualKey);

    #[async_trait]
    impl GovernanceLookup for StaticGovernance {
        async fn get_virtual_key(&self, value: &str) -> Option<VirtualKey> {
            if value == self.0.value { Some(self.0.clone()) } else { None }
        }
    }

    struct EchoOperation(Arc<Mutex<bool>>);

    #[async_trait]
    impl Operation for EchoOperation {
        async fn execute(&self, ctx: &worker::ExecutionContext) -> Result<serde_json::Value, StoreError> {
            assert!(ctx.is_async);
            *self.0.lock().unwrap() = true;
            Ok(serde_json::json!({"ok": true}))
        }
    }

    async fn test_store() -> Arc<Store> {
        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new().max_connections(1).connect("sqlite::memory:").await.unwrap();
        crate::store::Migrator::run(&pool, Dialect::Sqlite).await.unwrap();
        Arc::new(Store::from_pool_for_tests(pool, Dialect::Sqlite))
    }

    #[tokio::test]
    async fn submit_without_virtual_key_creates_pending_row_immediately() {
        let store = test_store().await;
        let executor = AsyncJobExecutor::new(Arc::clone(&store), Arc::new(NoGovernance));
        let ran = Arc::new(Mutex::new(false));

        let job = executor
            .submit_job(None, 0, EchoOperation(Arc::clone(&ran)), "chat_completion")
            .await
            .unwrap();

        assert_eq!(job.status, "pending");
        assert_eq!(job.result_ttl_seconds, 3600);

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let completed = store.find_async_job(&job.id).await.unwrap();
        assert_eq!(completed.status, "completed");
        assert_eq!(completed.status_code, Some(200));
    }

    #[tokio::test]
    async fn retrieve_job_rejects_missing_virtual_key_when_bound() {
        let store = test_store().await;
        let vk = VirtualKey { id: "vk-1".to_string(), value: "secret".to_string() };
        let executor =
            AsyncJobExecutor::new(Arc::clone(&store), Arc::new(StaticGovernance(vk.clone())));

        let job = executor
            .submit_job(
                Some("secret"),
                60,
                EchoOperation(Arc::new(Mutex::new(false))),
                "chat_completion",
            )
            .await
            .unwrap();

        let err = executor.retrieve_job(&job.id, None, "chat_completion").await.unwrap_err();
        assert!(matches!(err, StoreError::ValidationError(_)));

        let err = executor.retrieve_job(&job.id, Some("wrong"), "chat_completion").await.unwrap_err();
        assert!(matches!(err, StoreError::AuthError(_)));

        let ok = executor.retrieve_job(&job.id, Some("secret"), "chat_completion").await;
        assert!(ok.is_ok());
    }
}
