//! Retention cleaner: ages out `logs` rows past a retention
//! window, batching deletes so a single sweep never holds a long-running
//! transaction against the table ingest is writing to concurrently.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use crate::entity::log_entry::format_iso;
use crate::error::StoreError;
use crate::store::Store;

use super::Cleaner;

const DEFAULT_RETENTION_DAYS: i64 = 365;
const BATCH_SIZE: u32 = 100;

pub struct RetentionCleaner {
    store: Arc<Store>,
    retention_days: i64,
}

impl RetentionCleaner {
    pub fn new(store: Arc<Store>, retention_days: Option<i64>) -> Self {
        let retention_days = match retention_days {
            Some(days) if days >= 1 => days,
            _ => DEFAULT_RETENTION_DAYS,
        };
        Self { store, retention_days }
    }
}

#[async_trait]
impl Cleaner for RetentionCleaner {
    async fn run_once(&self) -> Result<(), StoreError> {
        let cutoff = format_iso(Utc::now() - Duration::days(self.retention_days));

        loop {
            let deleted = self.store.delete_logs_batch(&cutoff, BATCH_SIZE).await?;
            tracing::debug!(deleted, cutoff = %cutoff, "retention sweep deleted a batch");
            if deleted < BATCH_SIZE as u64 {
                break;
            }
        }

        Ok(())
    }

    fn interval(&self) -> StdDuration {
        StdDuration::from_secs(24 * 60 * 60)
    }

    /// Rerolled every iteration by the supervisor loop calling this method
    /// once per tick: a fresh random delay in [15min, 30min] each sweep.
    fn jitter(&self) -> StdDuration {
        let seconds = rand::thread_rng().gen_range(15 * 60..=30 * 60);
        StdDuration::from_secs(seconds)
    }

    fn timeout(&self) -> StdDuration {
        StdDuration::from_secs(30 * 60)
    }

    fn name(&self) -> &'static str {
        "retention-cleaner"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::log_entry::{now_iso, LogStatus, ObjectType};
    use crate::entity::LogEntry;
    use crate::store::Dialect;
    use sqlx::any::AnyPoolOptions;

    async fn test_store() -> Arc<Store> {
        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new().max_connections(1).connect("sqlite::memory:").await.unwrap();
        crate::store::Migrator::run(&pool, Dialect::Sqlite).await.unwrap();
        Arc::new(Store::from_pool_for_tests(pool, Dialect::Sqlite))
    }

    fn old_log(id: &str, created_at: String) -> LogEntry {
        LogEntry {
            id: id.to_string(),
            timestamp: created_at.clone(),
            created_at,
            object_type: ObjectType::ChatCompletion.as_str().to_string(),
            provider: "openai".to_string(),
            model: "gpt-4".to_string(),
            status: LogStatus::Success.as_str().to_string(),
            parent_request_id: None,
            selected_key_id: None,
            selected_key_name: None,
            virtual_key_id: None,
            virtual_key_name: None,
            fallback_index: None,
            number_of_retries: None,
            routing_rule_id: None,
            routing_rule_name: None,
            routing_engines_used: None,
            routing_engine_logs: None,
            input_history: None,
            responses_input_history: None,
            output_message: None,
            responses_output: None,
            embedding_output: None,
            list_models_output: None,
            image_generation_input: None,
            image_generation_output: None,
            speech_input: None,
            speech_output: None,
            transcription_input: None,
            transcription_output: None,
            tool_list: None,
            tool_call_list: None,
            model_parameters: None,
            token_usage: None,
            cache_debug: None,
            raw_request: None,
            raw_response: None,
            error_details: None,
            metadata: None,
            prompt_tokens: None,
            completion_tokens: None,
            total_tokens: None,
            latency: None,
            cost: None,
            content_summary: None,
            completed_at: None,
        }
    }

    #[tokio::test]
    async fn sweep_deletes_rows_older_than_retention_window_only() {
        let store = test_store().await;
        let old_created = format_iso(Utc::now() - Duration::days(400));
        let recent_created = now_iso();

        store.create(&old_log("old", old_created)).await.unwrap();
        store.create(&old_log("recent", recent_created)).await.unwrap();

        let cleaner = RetentionCleaner::new(Arc::clone(&store), None);
        cleaner.run_once().await.unwrap();

        assert!(store.find_by_id("old").await.is_err());
        assert!(store.find_by_id("recent").await.is_ok());
    }

    #[tokio::test]
    async fn unset_retention_days_defaults_to_365() {
        let store = test_store().await;
        let cleaner = RetentionCleaner::new(Arc::clone(&store), None);
        assert_eq!(cleaner.retention_days, 365);
        let cleaner = RetentionCleaner::new(store, Some(0));
        assert_eq!(cleaner.retention_days, 365);
    }
}
