//! Background worker protocol driving jobs from `pending` to a terminal state.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::sync::Arc;

use crate::entity::log_entry::{format_iso, now_iso};
use crate::error::StoreError;
use crate::store::Store;

/// Carries no deadline; marks the request as async so downstream code can
/// opt out of synchronous-only behaviours.
pub struct ExecutionContext {
    pub is_async: bool,
}

#[async_trait]
pub trait Operation {
    async fn execute(&self, ctx: &ExecutionContext) -> Result<serde_json::Value, StoreError>;
}

pub async fn run(store: Arc<Store>, job_id: String, result_ttl_seconds: i64, operation: impl Operation) {
    if let Err(e) = store.set_async_job_processing(&job_id).await {
        tracing::warn!(job_id, error = %e, "failed to transition job to processing, abandoning");
        return;
    }

    let ctx = ExecutionContext { is_async: true };
    let outcome = operation.execute(&ctx).await;

    let now = Utc::now();
    let completed_at = format_iso(now);
    let expires_at = format_iso(now + Duration::seconds(result_ttl_seconds));

    let (status, status_code, response, error) = match outcome {
        Ok(value) => match serde_json::to_string(&value) {
            Ok(response) => ("completed", 200, Some(response), None),
            Err(e) => {
                tracing::warn!(job_id, error = %e, "failed to marshal job response, leaving job in processing");
                return;
            },
        },
        Err(e) => {
            let status_code = e.status_code() as i64;
            match serde_json::to_string(&serde_json::json!({"message": e.to_string()})) {
                Ok(error) => ("failed", status_code, None, Some(error)),
                Err(marshal_err) => {
                    tracing::warn!(job_id, error = %marshal_err, "failed to marshal job error, leaving job in processing");
                    return;
                },
            }
        },
    };

    if let Err(e) = store
        .finalize_async_job(
            &job_id,
            status,
            status_code,
            response.as_deref(),
            error.as_deref(),
            &completed_at,
            &expires_at,
        )
        .await
    {
        tracing::warn!(job_id, error = %e, "failed to finalize job, stale sweep will reap it");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Dialect;
    use sqlx::any::AnyPoolOptions;

    struct FailingOperation;

    #[async_trait]
    impl Operation for FailingOperation {
        async fn execute(&self, _ctx: &ExecutionContext) -> Result<serde_json::Value, StoreError> {
            Err(StoreError::ValidationError("bad request".to_string()))
        }
    }

    #[tokio::test]
    async fn failed_operation_writes_derived_status_code() {
        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new().max_connections(1).connect("sqlite::memory:").await.unwrap();
        crate::store::Migrator::run(&pool, Dialect::Sqlite).await.unwrap();
        let store = Arc::new(Store::from_pool_for_tests(pool, Dialect::Sqlite));

        let job = crate::entity::AsyncJob {
            id: "job-1".to_string(),
            status: "pending".to_string(),
            request_type: "chat_completion".to_string(),
            virtual_key_id: None,
            result_ttl_seconds: 60,
            status_code: None,
            response: None,
            error: None,
            created_at: now_iso(),
            completed_at: None,
            expires_at: None,
        };
        store.create_async_job(&job).await.unwrap();

        run(Arc::clone(&store), job.id.clone(), 60, FailingOperation).await;

        let reloaded = store.find_async_job(&job.id).await.unwrap();
        assert_eq!(reloaded.status, "failed");
        assert_eq!(reloaded.status_code, Some(400));
        assert!(reloaded.error.is_some());
    }
}
