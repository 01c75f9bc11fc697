//! Store Abstraction — one `Store` struct over
//! `sqlx::AnyPool`, uniform across the embedded (SQLite) and networked
//! (Postgres/MySQL) variants. Dialect-specific behaviour (bucket
//! expressions, advisory locks) is isolated behind [`Dialect`].

mod connection;
mod dialect;
mod filter_sql;
pub mod migrator;

pub use dialect::Dialect;
pub use migrator::Migrator;

use sqlx::AnyPool;
use sqlx::Row;

use crate::config::{BackendConfig, LogStoreDocument};
use crate::entity::{AsyncJob, LogEntry, MCPToolLog};
use crate::error::{StoreError, StoreResult};
use crate::filters::{
    CostHistogramBucket, LogStats, ModelBucketCounts, ModelHistogramBucket, PaginationOptions,
    RequestHistogramBucket, SearchFilters, SearchLogsResult, TokenHistogramBucket, gap_fill_buckets,
};

use std::collections::HashMap;

/// Apply an ordered slice of [`filter_sql::Bind`] values to a query builder.
/// Works for both `Query` and `QueryAs` since both expose the same
/// consuming `bind` method.
macro_rules! bind_all {
    ($query:expr, $binds:expr) => {{
        let mut q = $query;
        for b in $binds {
            q = match b {
                filter_sql::Bind::Text(s) => q.bind(s.clone()),
                filter_sql::Bind::Int(i) => q.bind(*i),
                filter_sql::Bind::Float(f) => q.bind(*f),
            };
        }
        q
    }};
}

pub struct Store {
    pool: AnyPool,
    dialect: Dialect,
}

impl Store {
    /// Build a store from the top-level log-store document. Returns
    /// `Ok(None)` when the document is disabled.
    pub async fn from_config(doc: &LogStoreDocument) -> StoreResult<Option<Store>> {
        if !doc.enabled {
            return Ok(None);
        }
        let kind = doc
            .kind
            .ok_or_else(|| StoreError::ConfigError("log_store.type is required when enabled".to_string()))?;
        let config = doc
            .config
            .as_ref()
            .ok_or_else(|| StoreError::ConfigError("log_store.config is required when enabled".to_string()))?
            .resolved()?;

        Store::connect(&config, kind).await.map(Some)
    }

    pub async fn connect(config: &BackendConfig, kind: crate::config::StoreKind) -> StoreResult<Store> {
        let dialect = Dialect::from(kind);
        let url = connection::connection_url(config, kind)?;
        let pool = connection::open_pool(&url, dialect).await?;
        Ok(Store { pool, dialect })
    }

    /// Build a store around an already-open pool, bypassing DSN/pragma
    /// setup. Used by other modules' tests that need a migrated in-memory
    /// store without going through `connect`.
    #[cfg(test)]
    pub fn from_pool_for_tests(pool: AnyPool, dialect: Dialect) -> Store {
        Store { pool, dialect }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub async fn migrate(&self) -> StoreResult<()> {
        Migrator::run(&self.pool, self.dialect).await
    }

    pub async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Release the connection pool. Takes `&self` since `AnyPool::close`
    /// only needs a shared reference; callers that hold the store behind
    /// an `Arc` (so cleaners and submissions can share it) are not forced
    /// to `Arc::try_unwrap` first — callers still stop cleaners and
    /// submissions before calling this so close is never observed
    /// in flight with other calls.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    // ---------------------------------------------------------------
    // Log CRUD
    // ---------------------------------------------------------------

    pub async fn create(&self, entry: &LogEntry) -> StoreResult<()> {
        self.insert_log(entry, false).await
    }

    pub async fn create_if_not_exists(&self, entry: &LogEntry) -> StoreResult<()> {
        match self.insert_log(entry, true).await {
            Err(StoreError::StorageError(e)) if is_unique_violation(&e) => Ok(()),
            other => other,
        }
    }

    async fn insert_log(&self, entry: &LogEntry, ignore_conflict: bool) -> StoreResult<()> {
        let conflict_clause = if ignore_conflict {
            match self.dialect {
                Dialect::Sqlite => " OR IGNORE",
                Dialect::Postgres | Dialect::Mysql => "",
            }
        } else {
            ""
        };

        let query = format!(
            "INSERT{conflict_clause} INTO logs (
                id, timestamp, created_at, object_type, provider, model, status,
                parent_request_id, selected_key_id, selected_key_name, virtual_key_id, virtual_key_name,
                fallback_index, number_of_retries, routing_rule_id, routing_rule_name,
                routing_engines_used, routing_engine_logs,
                input_history, responses_input_history, output_message, responses_output,
                embedding_output, list_models_output, image_generation_input, image_generation_output,
                speech_input, speech_output, transcription_input, transcription_output,
                tool_list, tool_call_list, model_parameters, token_usage, cache_debug,
                raw_request, raw_response, error_details, metadata,
                prompt_tokens, completion_tokens, total_tokens, latency, cost,
                content_summary, completed_at
            ) VALUES ({})",
            std::iter::repeat("?").take(46).collect::<Vec<_>>().join(", ")
        );

        let result = sqlx::query(&query)
            .bind(&entry.id)
            .bind(&entry.timestamp)
            .bind(&entry.created_at)
            .bind(&entry.object_type)
            .bind(&entry.provider)
            .bind(&entry.model)
            .bind(&entry.status)
            .bind(&entry.parent_request_id)
            .bind(&entry.selected_key_id)
            .bind(&entry.selected_key_name)
            .bind(&entry.virtual_key_id)
            .bind(&entry.virtual_key_name)
            .bind(entry.fallback_index)
            .bind(entry.number_of_retries)
            .bind(&entry.routing_rule_id)
            .bind(&entry.routing_rule_name)
            .bind(&entry.routing_engines_used)
            .bind(&entry.routing_engine_logs)
            .bind(&entry.input_history)
            .bind(&entry.responses_input_history)
            .bind(&entry.output_message)
            .bind(&entry.responses_output)
            .bind(&entry.embedding_output)
            .bind(&entry.list_models_output)
            .bind(&entry.image_generation_input)
            .bind(&entry.image_generation_output)
            .bind(&entry.speech_input)
            .bind(&entry.speech_output)
            .bind(&entry.transcription_input)
            .bind(&entry.transcription_output)
            .bind(&entry.tool_list)
            .bind(&entry.tool_call_list)
            .bind(&entry.model_parameters)
            .bind(&entry.token_usage)
            .bind(&entry.cache_debug)
            .bind(&entry.raw_request)
            .bind(&entry.raw_response)
            .bind(&entry.error_details)
            .bind(&entry.metadata)
            .bind(entry.prompt_tokens)
            .bind(entry.completion_tokens)
            .bind(entry.total_tokens)
            .bind(entry.latency)
            .bind(entry.cost)
            .bind(&entry.content_summary)
            .bind(&entry.completed_at)
            .execute(&self.pool)
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if ignore_conflict && is_unique_violation(&e) => Ok(()),
            Err(e) => Err(StoreError::StorageError(e)),
        }
    }

    /// Partial update: only the set fields of `patch` are written;
    /// `NotFound` if no row matched.
    pub async fn update(&self, id: &str, patch: &LogEntry) -> StoreResult<()> {
        let (columns, binds) = build_update_query(patch);
        if columns.is_empty() {
            return Ok(());
        }
        let sql = format!("UPDATE logs SET {} WHERE id = ?", columns.join(", "));
        let mut q = sqlx::query(&sql);
        for value in &binds {
            q = match value {
                BindValue::Text(s) => q.bind(s.clone()),
                BindValue::Int(i) => q.bind(*i),
                BindValue::Float(f) => q.bind(*f),
            };
        }
        q = q.bind(id);
        let result = q.execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Atomic bulk cost write; an empty map is a no-op success.
    pub async fn bulk_update_cost(&self, costs: &HashMap<String, f64>) -> StoreResult<()> {
        if costs.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for (id, cost) in costs {
            sqlx::query("UPDATE logs SET cost = ? WHERE id = ?")
                .bind(*cost)
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn find_by_id(&self, id: &str) -> StoreResult<LogEntry> {
        sqlx::query_as::<_, LogEntry>("SELECT * FROM logs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)
    }

    pub async fn has_logs(&self) -> StoreResult<bool> {
        let row = sqlx::query("SELECT 1 FROM logs LIMIT 1").fetch_optional(&self.pool).await?;
        Ok(row.is_some())
    }

    /// Predicate-driven single-row read. `predicate` reuses
    /// [`SearchFilters`] as the conjunctive predicate builder that every
    /// other read path shares; `NotFound` when no row matches.
    pub async fn find_first(&self, predicate: &SearchFilters) -> StoreResult<LogEntry> {
        let (where_clause, binds) = filter_sql::build_where(predicate);
        let sql = format!("SELECT * FROM logs{where_clause} ORDER BY timestamp DESC LIMIT 1");
        let query = bind_all!(sqlx::query_as::<_, LogEntry>(&sql), &binds);
        query.fetch_optional(&self.pool).await?.ok_or(StoreError::NotFound)
    }

    /// Predicate-driven multi-row read; an empty slice, not an error, when
    /// nothing matches.
    pub async fn find_all(&self, predicate: &SearchFilters) -> StoreResult<Vec<LogEntry>> {
        let (where_clause, binds) = filter_sql::build_where(predicate);
        let sql = format!("SELECT * FROM logs{where_clause} ORDER BY timestamp DESC");
        let query = bind_all!(sqlx::query_as::<_, LogEntry>(&sql), &binds);
        Ok(query.fetch_all(&self.pool).await?)
    }

    // ---------------------------------------------------------------
    // Search & aggregation
    // ---------------------------------------------------------------

    pub async fn search_logs(
        &self,
        filters: &SearchFilters,
        pagination: &PaginationOptions,
    ) -> StoreResult<SearchLogsResult> {
        let (where_clause, binds) = filter_sql::build_where(filters);

        let count_sql = format!("SELECT COUNT(*) AS count FROM logs{where_clause}");
        let count_query = bind_all!(sqlx::query(&count_sql), &binds);
        let total_requests: i64 = count_query.fetch_one(&self.pool).await?.try_get("count")?;

        let page_sql = format!(
            "SELECT * FROM logs{where_clause} ORDER BY {} {} LIMIT ? OFFSET ?",
            pagination.sort_by.column(),
            pagination.order.as_sql()
        );
        let page_query = bind_all!(sqlx::query_as::<_, LogEntry>(&page_sql), &binds);
        let page_query = page_query.bind(pagination.limit as i64).bind(pagination.offset as i64);
        let logs = page_query.fetch_all(&self.pool).await?;

        let has_logs = if logs.is_empty() { self.has_logs().await? } else { true };

        Ok(SearchLogsResult {
            logs,
            pagination: pagination.clone(),
            total_requests,
            has_logs,
        })
    }

    pub async fn get_stats(&self, filters: &SearchFilters) -> StoreResult<LogStats> {
        let (where_clause, binds) = filter_sql::build_where(filters);
        let sql = format!(
            "SELECT
                COUNT(*) AS total_requests,
                SUM(CASE WHEN status = 'success' THEN 1 ELSE 0 END) AS success_count,
                SUM(CASE WHEN status = 'error' THEN 1 ELSE 0 END) AS error_count,
                COALESCE(SUM(latency), 0) AS sum_latency,
                COALESCE(AVG(latency), 0) AS avg_latency,
                COALESCE(SUM(total_tokens), 0) AS sum_total_tokens,
                COALESCE(AVG(total_tokens), 0) AS avg_total_tokens,
                COALESCE(SUM(cost), 0) AS sum_cost,
                COALESCE(AVG(cost), 0) AS avg_cost
            FROM logs{where_clause}"
        );
        let query = bind_all!(sqlx::query(&sql), &binds);
        let row = query.fetch_one(&self.pool).await?;

        let total_requests: i64 = row.try_get("total_requests")?;
        if total_requests == 0 {
            return Ok(LogStats::default());
        }

        let success_count: i64 = row.try_get("success_count").unwrap_or(0);
        let error_count: i64 = row.try_get("error_count").unwrap_or(0);
        let completed = success_count + error_count;
        let success_rate =
            if completed == 0 { 0.0 } else { (success_count as f64 / completed as f64) * 100.0 };

        Ok(LogStats {
            total_requests,
            success_count,
            error_count,
            success_rate,
            avg_latency: row.try_get("avg_latency").unwrap_or(0.0),
            sum_latency: row.try_get("sum_latency").unwrap_or(0),
            avg_total_tokens: row.try_get("avg_total_tokens").unwrap_or(0.0),
            sum_total_tokens: row.try_get("sum_total_tokens").unwrap_or(0),
            avg_cost: row.try_get("avg_cost").unwrap_or(0.0),
            sum_cost: row.try_get("sum_cost").unwrap_or(0.0),
        })
    }

    pub async fn get_histogram(
        &self,
        filters: &SearchFilters,
        bucket_seconds: i64,
    ) -> StoreResult<Vec<RequestHistogramBucket>> {
        let bucket_seconds = normalise_bucket(bucket_seconds);
        let bucket_expr = self.dialect.bucket_expr(bucket_seconds);
        let (where_clause, binds) = filter_sql::build_histogram_where(filters);
        let sql = format!(
            "SELECT {bucket_expr} AS bucket_start,
                COUNT(*) AS total,
                SUM(CASE WHEN status = 'success' THEN 1 ELSE 0 END) AS success,
                SUM(CASE WHEN status = 'error' THEN 1 ELSE 0 END) AS error
            FROM logs{where_clause}
            GROUP BY bucket_start ORDER BY bucket_start ASC"
        );
        let query = bind_all!(sqlx::query(&sql), &binds);
        let rows = query.fetch_all(&self.pool).await?;

        let mut by_bucket: HashMap<i64, RequestHistogramBucket> = HashMap::new();
        for row in rows {
            let bucket_start: i64 = row.try_get("bucket_start")?;
            by_bucket.insert(
                bucket_start,
                RequestHistogramBucket {
                    bucket_start,
                    total: row.try_get("total").unwrap_or(0),
                    success: row.try_get("success").unwrap_or(0),
                    error: row.try_get("error").unwrap_or(0),
                },
            );
        }

        Ok(fill_gaps(by_bucket, filters, bucket_seconds, |bucket_start| RequestHistogramBucket {
            bucket_start,
            total: 0,
            success: 0,
            error: 0,
        }))
    }

    pub async fn get_token_histogram(
        &self,
        filters: &SearchFilters,
        bucket_seconds: i64,
    ) -> StoreResult<Vec<TokenHistogramBucket>> {
        let bucket_seconds = normalise_bucket(bucket_seconds);
        let bucket_expr = self.dialect.bucket_expr(bucket_seconds);
        let (where_clause, binds) = filter_sql::build_histogram_where(filters);
        let sql = format!(
            "SELECT {bucket_expr} AS bucket_start,
                COALESCE(SUM(prompt_tokens), 0) AS prompt_tokens,
                COALESCE(SUM(completion_tokens), 0) AS completion_tokens,
                COALESCE(SUM(total_tokens), 0) AS total_tokens
            FROM logs{where_clause}
            GROUP BY bucket_start ORDER BY bucket_start ASC"
        );
        let query = bind_all!(sqlx::query(&sql), &binds);
        let rows = query.fetch_all(&self.pool).await?;

        let mut by_bucket: HashMap<i64, TokenHistogramBucket> = HashMap::new();
        for row in rows {
            let bucket_start: i64 = row.try_get("bucket_start")?;
            by_bucket.insert(
                bucket_start,
                TokenHistogramBucket {
                    bucket_start,
                    prompt_tokens: row.try_get("prompt_tokens").unwrap_or(0),
                    completion_tokens: row.try_get("completion_tokens").unwrap_or(0),
                    total_tokens: row.try_get("total_tokens").unwrap_or(0),
                },
            );
        }

        Ok(fill_gaps(by_bucket, filters, bucket_seconds, |bucket_start| TokenHistogramBucket {
            bucket_start,
            prompt_tokens: 0,
            completion_tokens: 0,
            total_tokens: 0,
        }))
    }

    pub async fn get_cost_histogram(
        &self,
        filters: &SearchFilters,
        bucket_seconds: i64,
    ) -> StoreResult<Vec<CostHistogramBucket>> {
        let bucket_seconds = normalise_bucket(bucket_seconds);
        let bucket_expr = self.dialect.bucket_expr(bucket_seconds);
        let (mut where_clause, binds) = filter_sql::build_histogram_where(filters);
        filter_sql::append_clause(&mut where_clause, "cost IS NOT NULL AND cost > 0");
        let sql = format!(
            "SELECT {bucket_expr} AS bucket_start, model, COALESCE(SUM(cost), 0) AS total_cost
            FROM logs{where_clause}
            GROUP BY bucket_start, model ORDER BY bucket_start ASC"
        );
        let query = bind_all!(sqlx::query(&sql), &binds);
        let rows = query.fetch_all(&self.pool).await?;

        let mut by_bucket: HashMap<i64, CostHistogramBucket> = HashMap::new();
        for row in rows {
            let bucket_start: i64 = row.try_get("bucket_start")?;
            let model: String = row.try_get("model")?;
            let cost: f64 = row.try_get("total_cost").unwrap_or(0.0);
            let bucket = by_bucket.entry(bucket_start).or_insert_with(|| CostHistogramBucket {
                bucket_start,
                total_cost: 0.0,
                by_model: HashMap::new(),
            });
            bucket.total_cost += cost;
            *bucket.by_model.entry(model).or_insert(0.0) += cost;
        }

        Ok(fill_gaps(by_bucket, filters, bucket_seconds, |bucket_start| CostHistogramBucket {
            bucket_start,
            total_cost: 0.0,
            by_model: HashMap::new(),
        }))
    }

    pub async fn get_model_histogram(
        &self,
        filters: &SearchFilters,
        bucket_seconds: i64,
    ) -> StoreResult<Vec<ModelHistogramBucket>> {
        let bucket_seconds = normalise_bucket(bucket_seconds);
        let bucket_expr = self.dialect.bucket_expr(bucket_seconds);
        let (where_clause, binds) = filter_sql::build_histogram_where(filters);
        let sql = format!(
            "SELECT {bucket_expr} AS bucket_start, model,
                COUNT(*) AS total,
                SUM(CASE WHEN status = 'success' THEN 1 ELSE 0 END) AS success,
                SUM(CASE WHEN status = 'error' THEN 1 ELSE 0 END) AS error
            FROM logs{where_clause}
            GROUP BY bucket_start, model ORDER BY bucket_start ASC"
        );
        let query = bind_all!(sqlx::query(&sql), &binds);
        let rows = query.fetch_all(&self.pool).await?;

        let mut by_bucket: HashMap<i64, ModelHistogramBucket> = HashMap::new();
        for row in rows {
            let bucket_start: i64 = row.try_get("bucket_start")?;
            let model: String = row.try_get("model")?;
            let counts = ModelBucketCounts {
                total: row.try_get("total").unwrap_or(0),
                success: row.try_get("success").unwrap_or(0),
                error: row.try_get("error").unwrap_or(0),
            };
            by_bucket
                .entry(bucket_start)
                .or_insert_with(|| ModelHistogramBucket { bucket_start, by_model: HashMap::new() })
                .by_model
                .insert(model, counts);
        }

        Ok(fill_gaps(by_bucket, filters, bucket_seconds, |bucket_start| ModelHistogramBucket {
            bucket_start,
            by_model: HashMap::new(),
        }))
    }

    // ---------------------------------------------------------------
    // Deletion & cleanup
    // ---------------------------------------------------------------

    pub async fn flush(&self, since: &str) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM logs WHERE status = 'processing' AND created_at < ?")
            .bind(since)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn delete_log(&self, id: &str) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM logs WHERE id = ?").bind(id).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub async fn delete_logs(&self, ids: &[String]) -> StoreResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let placeholders = std::iter::repeat("?").take(ids.len()).collect::<Vec<_>>().join(", ");
        let sql = format!("DELETE FROM logs WHERE id IN ({placeholders})");
        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(id);
        }
        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    /// Select-then-delete by id so the batch limit is respected on every
    /// dialect.
    pub async fn delete_logs_batch(&self, cutoff: &str, batch_size: u32) -> StoreResult<u64> {
        let ids: Vec<String> =
            sqlx::query("SELECT id FROM logs WHERE created_at < ? LIMIT ?")
                .bind(cutoff)
                .bind(batch_size as i64)
                .fetch_all(&self.pool)
                .await?
                .into_iter()
                .map(|row| row.try_get::<String, _>("id"))
                .collect::<Result<_, _>>()?;

        self.delete_logs(&ids).await
    }

    // ---------------------------------------------------------------
    // MCP tool logs
    // ---------------------------------------------------------------

    pub async fn create_mcp_tool_log(&self, log: &MCPToolLog) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO mcp_tool_logs (
                id, llm_request_id, timestamp, created_at, tool_name, server_label, status,
                latency, cost, virtual_key_id, virtual_key_name, raw_request, metadata
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&log.id)
        .bind(&log.llm_request_id)
        .bind(&log.timestamp)
        .bind(&log.created_at)
        .bind(&log.tool_name)
        .bind(&log.server_label)
        .bind(&log.status)
        .bind(log.latency)
        .bind(log.cost)
        .bind(&log.virtual_key_id)
        .bind(&log.virtual_key_name)
        .bind(&log.raw_request)
        .bind(&log.metadata)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ---------------------------------------------------------------
    // Async jobs
    // ---------------------------------------------------------------

    pub async fn create_async_job(&self, job: &AsyncJob) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO async_jobs (
                id, status, request_type, virtual_key_id, result_ttl_seconds,
                status_code, response, error, created_at, completed_at, expires_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&job.id)
        .bind(&job.status)
        .bind(&job.request_type)
        .bind(&job.virtual_key_id)
        .bind(job.result_ttl_seconds)
        .bind(job.status_code)
        .bind(&job.response)
        .bind(&job.error)
        .bind(&job.created_at)
        .bind(&job.completed_at)
        .bind(&job.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn find_async_job(&self, id: &str) -> StoreResult<AsyncJob> {
        sqlx::query_as::<_, AsyncJob>("SELECT * FROM async_jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)
    }

    pub async fn set_async_job_processing(&self, id: &str) -> StoreResult<()> {
        let result = sqlx::query("UPDATE async_jobs SET status = 'processing' WHERE id = ? AND status = 'pending'")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub async fn finalize_async_job(
        &self,
        id: &str,
        status: &str,
        status_code: i64,
        response: Option<&str>,
        error: Option<&str>,
        completed_at: &str,
        expires_at: &str,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE async_jobs
                SET status = ?, status_code = ?, response = ?, error = ?, completed_at = ?, expires_at = ?
                WHERE id = ?",
        )
        .bind(status)
        .bind(status_code)
        .bind(response)
        .bind(error)
        .bind(completed_at)
        .bind(expires_at)
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub async fn delete_expired_jobs(&self, now: &str) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM async_jobs WHERE expires_at IS NOT NULL AND expires_at < ?")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn delete_stale_processing_jobs(&self, cutoff: &str) -> StoreResult<u64> {
        let result =
            sqlx::query("DELETE FROM async_jobs WHERE status = 'processing' AND created_at < ?")
                .bind(cutoff)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }
}

fn normalise_bucket(bucket_seconds: i64) -> i64 {
    if bucket_seconds > 0 { bucket_seconds } else { 3600 }
}

fn fill_gaps<T>(
    by_bucket: HashMap<i64, T>,
    filters: &SearchFilters,
    bucket_seconds: i64,
    zero: impl Fn(i64) -> T,
) -> Vec<T> {
    match (&filters.start_time, &filters.end_time) {
        (Some(start), Some(end)) => {
            let start_epoch = crate::entity::log_entry::parse_iso(start).map(|d| d.timestamp());
            let end_epoch = crate::entity::log_entry::parse_iso(end).map(|d| d.timestamp());
            match (start_epoch, end_epoch) {
                (Some(s), Some(e)) => {
                    let mut by_bucket = by_bucket;
                    gap_fill_buckets(s, e, bucket_seconds)
                        .into_iter()
                        .map(|bucket_start| by_bucket.remove(&bucket_start).unwrap_or_else(|| zero(bucket_start)))
                        .collect()
                },
                _ => sorted_values(by_bucket),
            }
        },
        _ => sorted_values(by_bucket),
    }
}

fn sorted_values<T>(by_bucket: HashMap<i64, T>) -> Vec<T> {
    let mut entries: Vec<(i64, T)> = by_bucket.into_iter().collect();
    entries.sort_by_key(|(bucket_start, _)| *bucket_start);
    entries.into_iter().map(|(_, v)| v).collect()
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error().map(|db| db.is_unique_violation()).unwrap_or(false)
}

/// Build the `SET col = ?, ...` clause and matching bind values for a
/// partial update. Any non-default field on `patch` is considered set;
/// callers build `patch` from a `LogEntry` where unset columns are left
/// `None`/default.
fn build_update_query(patch: &LogEntry) -> (Vec<String>, Vec<BindValue>) {
    let mut cols = Vec::new();
    let mut values = Vec::new();

    macro_rules! set_opt {
        ($col:literal, $field:expr, $variant:ident) => {
            if let Some(v) = $field {
                cols.push(format!("{} = ?", $col));
                values.push(BindValue::$variant(v.clone()));
            }
        };
    }

    if !patch.status.is_empty() {
        cols.push("status = ?".to_string());
        values.push(BindValue::Text(patch.status.clone()));
    }
    set_opt!("completed_at", &patch.completed_at, Text);
    set_opt!("latency", &patch.latency, Int);
    set_opt!("cost", &patch.cost, Float);
    set_opt!("prompt_tokens", &patch.prompt_tokens, Int);
    set_opt!("completion_tokens", &patch.completion_tokens, Int);
    set_opt!("total_tokens", &patch.total_tokens, Int);
    set_opt!("output_message", &patch.output_message, Text);
    set_opt!("responses_output", &patch.responses_output, Text);
    set_opt!("embedding_output", &patch.embedding_output, Text);
    set_opt!("list_models_output", &patch.list_models_output, Text);
    set_opt!("image_generation_output", &patch.image_generation_output, Text);
    set_opt!("speech_output", &patch.speech_output, Text);
    set_opt!("transcription_output", &patch.transcription_output, Text);
    set_opt!("raw_response", &patch.raw_response, Text);
    set_opt!("error_details", &patch.error_details, Text);
    set_opt!("token_usage", &patch.token_usage, Text);
    set_opt!("content_summary", &patch.content_summary, Text);

    (cols, values)
}

#[derive(Debug, Clone)]
enum BindValue {
    Text(String),
    Int(i64),
    Float(f64),
}
