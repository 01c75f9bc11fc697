//! Schema Migrator.
//!
//! A small state machine over an auxiliary `schema_migrations` table. Each
//! migration is `{id, forward, rollback}`; `migrate` walks the fixed ordered
//! list and skips any id already recorded, so re-running is a no-op.
//!
//! On the networked engine a single dedicated connection takes a well-known
//! advisory lock before the list runs and releases it on the *same*
//! connection afterwards, so that concurrent instances serialise schema
//! work across the fleet. The embedded engine needs no such lock — a single
//! process owns the file.

use sqlx::AnyPool;
use sqlx::any::Any;
use sqlx::pool::PoolConnection;

use crate::error::StoreResult;

use super::Dialect;

/// Shared across every process touching the same database so unrelated
/// migration engines serialise against each other too.
const ADVISORY_LOCK_KEY: i64 = 916_244_024;
const MYSQL_LOCK_NAME: &str = "gateway_logstore_migrations";

type SqlGen = fn(Dialect) -> Vec<String>;

pub struct Migration {
    pub id: &'static str,
    pub forward: SqlGen,
    pub rollback: SqlGen,
}

fn text_type(dialect: Dialect) -> &'static str {
    match dialect {
        Dialect::Mysql => "VARCHAR(255)",
        Dialect::Sqlite | Dialect::Postgres => "TEXT",
    }
}

fn no_rollback(_: Dialect) -> Vec<String> {
    Vec::new()
}

/// The fixed, ordered migration list.
pub fn migrations() -> Vec<Migration> {
    vec![
        Migration {
            id: "0001_create_logs_table",
            forward: |d| {
                let id_ty = text_type(d);
                vec![format!(
                    "CREATE TABLE IF NOT EXISTS logs (
                        id {id_ty} PRIMARY KEY,
                        timestamp TEXT NOT NULL,
                        created_at TEXT NOT NULL,
                        object_type TEXT NOT NULL,
                        provider TEXT NOT NULL,
                        model TEXT NOT NULL,
                        status TEXT NOT NULL,
                        latency BIGINT,
                        prompt_tokens BIGINT,
                        completion_tokens BIGINT,
                        total_tokens BIGINT,
                        content_summary TEXT,
                        completed_at TEXT,
                        routing_engines_used TEXT,
                        tool_list TEXT,
                        tool_call_list TEXT,
                        model_parameters TEXT,
                        token_usage TEXT,
                        speech_input TEXT,
                        speech_output TEXT,
                        transcription_input TEXT,
                        transcription_output TEXT,
                        error_details TEXT
                    )"
                )]
            },
            rollback: |_| vec!["DROP TABLE IF EXISTS logs".to_string()],
        },
        Migration {
            id: "0002_normalise_object_type_values",
            forward: |_| {
                vec![
                    "UPDATE logs SET object_type = REPLACE(object_type, '.', '_') WHERE object_type LIKE '%.%'"
                        .to_string(),
                ]
            },
            rollback: |_| {
                vec![
                    "UPDATE logs SET object_type = REPLACE(object_type, '_', '.') WHERE object_type LIKE '%\\_%'"
                        .to_string(),
                ]
            },
        },
        Migration {
            id: "0003_routing_and_payload_columns",
            forward: |d| {
                let id_ty = text_type(d);
                [
                    "parent_request_id TEXT",
                    "responses_output TEXT",
                    "input_history TEXT",
                    "output_message TEXT",
                    "embedding_output TEXT",
                    "raw_response TEXT",
                    "cost DOUBLE PRECISION",
                    "cache_debug TEXT",
                    "responses_input_history TEXT",
                    "number_of_retries BIGINT",
                    "fallback_index BIGINT",
                    &format!("selected_key_id {id_ty}"),
                    "selected_key_name TEXT",
                    &format!("virtual_key_id {id_ty}"),
                    "virtual_key_name TEXT",
                ]
                .iter()
                .map(|col| format!("ALTER TABLE logs ADD COLUMN {col}"))
                .collect()
            },
            rollback: no_rollback,
        },
        Migration {
            id: "0004_second_wave_indexes",
            forward: |_| {
                [
                    ("idx_logs_timestamp", "timestamp"),
                    ("idx_logs_status", "status"),
                    ("idx_logs_created_at", "created_at"),
                    ("idx_logs_provider", "provider"),
                    ("idx_logs_model", "model"),
                    ("idx_logs_object_type", "object_type"),
                    ("idx_logs_cost", "cost"),
                ]
                .iter()
                .map(|(name, col)| format!("CREATE INDEX IF NOT EXISTS {name} ON logs ({col})"))
                .chain([
                    "CREATE INDEX IF NOT EXISTS idx_logs_status_timestamp ON logs (status, timestamp)"
                        .to_string(),
                    "CREATE INDEX IF NOT EXISTS idx_logs_status_created_at ON logs (status, created_at)"
                        .to_string(),
                    "CREATE INDEX IF NOT EXISTS idx_logs_latency ON logs (latency)".to_string(),
                    "CREATE INDEX IF NOT EXISTS idx_logs_total_tokens ON logs (total_tokens)"
                        .to_string(),
                    "CREATE INDEX IF NOT EXISTS idx_logs_selected_key_id ON logs (selected_key_id)"
                        .to_string(),
                    "CREATE INDEX IF NOT EXISTS idx_logs_virtual_key_id ON logs (virtual_key_id)"
                        .to_string(),
                ])
                .collect()
            },
            rollback: no_rollback,
        },
        Migration {
            id: "0005_normalise_embedded_timestamps_to_utc",
            forward: |d| match d {
                Dialect::Sqlite => vec![
                    "UPDATE logs SET timestamp = strftime('%Y-%m-%dT%H:%M:%fZ', timestamp)
                        WHERE timestamp NOT LIKE '%Z'"
                        .to_string(),
                    "UPDATE logs SET created_at = strftime('%Y-%m-%dT%H:%M:%fZ', created_at)
                        WHERE created_at NOT LIKE '%Z'"
                        .to_string(),
                ],
                Dialect::Postgres | Dialect::Mysql => Vec::new(),
            },
            rollback: no_rollback,
        },
        Migration {
            id: "0006_raw_request_and_mcp_tool_logs",
            forward: |d| {
                let id_ty = text_type(d);
                let mut statements = vec![
                    "ALTER TABLE logs ADD COLUMN raw_request TEXT".to_string(),
                    "ALTER TABLE logs ADD COLUMN image_generation_input TEXT".to_string(),
                    "ALTER TABLE logs ADD COLUMN image_generation_output TEXT".to_string(),
                    "ALTER TABLE logs ADD COLUMN routing_rule_id TEXT".to_string(),
                    "ALTER TABLE logs ADD COLUMN routing_rule_name TEXT".to_string(),
                    format!(
                        "CREATE TABLE IF NOT EXISTS mcp_tool_logs (
                            id {id_ty} PRIMARY KEY,
                            llm_request_id {id_ty} NOT NULL,
                            timestamp TEXT NOT NULL,
                            created_at TEXT NOT NULL,
                            tool_name TEXT NOT NULL,
                            server_label TEXT NOT NULL,
                            status TEXT NOT NULL,
                            latency BIGINT,
                            raw_request TEXT
                        )"
                    ),
                ];
                statements.extend(
                    [
                        ("idx_mcp_tool_logs_llm_request_id", "llm_request_id"),
                        ("idx_mcp_tool_logs_tool_name", "tool_name"),
                        ("idx_mcp_tool_logs_server_label", "server_label"),
                        ("idx_mcp_tool_logs_latency", "latency"),
                        ("idx_mcp_tool_logs_status", "status"),
                    ]
                    .iter()
                    .map(|(name, col)| {
                        format!("CREATE INDEX IF NOT EXISTS {name} ON mcp_tool_logs ({col})")
                    }),
                );
                statements.push("ALTER TABLE mcp_tool_logs ADD COLUMN cost DOUBLE PRECISION".to_string());
                statements.push(
                    "CREATE INDEX IF NOT EXISTS idx_mcp_tool_logs_cost ON mcp_tool_logs (cost)"
                        .to_string(),
                );
                statements
            },
            rollback: no_rollback,
        },
        Migration {
            id: "0007_mcp_tool_logs_virtual_key",
            forward: |d| {
                let id_ty = text_type(d);
                vec![
                    format!("ALTER TABLE mcp_tool_logs ADD COLUMN virtual_key_id {id_ty}"),
                    "ALTER TABLE mcp_tool_logs ADD COLUMN virtual_key_name TEXT".to_string(),
                    "CREATE INDEX IF NOT EXISTS idx_mcp_tool_logs_virtual_key_id ON mcp_tool_logs (virtual_key_id)"
                        .to_string(),
                ]
            },
            rollback: no_rollback,
        },
        Migration {
            id: "0008_rename_routing_engine_used",
            // Three-case logic is handled at runtime in
            // `Migrator::run_rename_routing_engine_used`, not as static SQL,
            // because the right statement depends on which of the two
            // columns already exists.
            forward: |_| Vec::new(),
            rollback: no_rollback,
        },
        Migration {
            id: "0009_list_models_and_async_jobs",
            forward: |d| {
                let id_ty = text_type(d);
                vec![
                    "ALTER TABLE logs ADD COLUMN list_models_output TEXT".to_string(),
                    "ALTER TABLE logs ADD COLUMN routing_engine_logs TEXT".to_string(),
                    "ALTER TABLE logs ADD COLUMN metadata TEXT".to_string(),
                    "ALTER TABLE mcp_tool_logs ADD COLUMN metadata TEXT".to_string(),
                    format!(
                        "CREATE TABLE IF NOT EXISTS async_jobs (
                            id {id_ty} PRIMARY KEY,
                            status TEXT NOT NULL,
                            request_type TEXT NOT NULL,
                            virtual_key_id {id_ty},
                            result_ttl_seconds BIGINT NOT NULL,
                            status_code BIGINT,
                            response TEXT,
                            error TEXT,
                            created_at TEXT NOT NULL,
                            completed_at TEXT,
                            expires_at TEXT
                        )"
                    ),
                    "CREATE INDEX IF NOT EXISTS idx_async_jobs_status ON async_jobs (status)"
                        .to_string(),
                    "CREATE INDEX IF NOT EXISTS idx_async_jobs_virtual_key_id ON async_jobs (virtual_key_id)"
                        .to_string(),
                    "CREATE INDEX IF NOT EXISTS idx_async_jobs_expires_at ON async_jobs (expires_at)"
                        .to_string(),
                ]
            },
            rollback: no_rollback,
        },
    ]
}

/// Recognise `ALTER TABLE <table> ADD COLUMN <column> ...` so the runner can
/// guard it with [`Migrator::column_exists`] before executing — every
/// additive step in [`migrations`] is generated in exactly this shape.
fn parse_add_column(statement: &str) -> Option<(&str, &str)> {
    let mut words = statement.split_whitespace();
    if words.next()? != "ALTER" || words.next()? != "TABLE" {
        return None;
    }
    let table = words.next()?;
    if words.next()? != "ADD" || words.next()? != "COLUMN" {
        return None;
    }
    let column = words.next()?;
    Some((table, column))
}

pub struct Migrator;

impl Migrator {
    /// Run every un-applied migration, serialised cluster-wide on the
    /// networked engine.
    pub async fn run(pool: &AnyPool, dialect: Dialect) -> StoreResult<()> {
        if dialect.is_embedded() {
            Self::run_unlocked(pool, dialect).await
        } else {
            let mut conn = pool.acquire().await?;
            Self::acquire_advisory_lock(&mut conn, dialect).await?;
            let result = Self::run_unlocked(pool, dialect).await;
            if let Err(e) = Self::release_advisory_lock(&mut conn, dialect).await {
                tracing::warn!(error = %e, "failed to release migration advisory lock");
            }
            drop(conn);
            result
        }
    }

    async fn run_unlocked(pool: &AnyPool, dialect: Dialect) -> StoreResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_migrations (id TEXT PRIMARY KEY, applied_at TEXT NOT NULL)",
        )
        .execute(pool)
        .await?;

        for migration in migrations() {
            if Self::is_applied(pool, migration.id).await? {
                continue;
            }

            for statement in (migration.forward)(dialect) {
                if let Some((table, column)) = parse_add_column(&statement) {
                    if Self::column_exists(pool, dialect, table, column).await? {
                        continue;
                    }
                }
                sqlx::query(&statement).execute(pool).await?;
            }

            if migration.id == "0008_rename_routing_engine_used" {
                Self::run_rename_routing_engine_used(pool, dialect).await?;
            }

            sqlx::query("INSERT INTO schema_migrations (id, applied_at) VALUES (?, ?)")
                .bind(migration.id)
                .bind(crate::entity::log_entry::now_iso())
                .execute(pool)
                .await?;

            tracing::info!(migration = migration.id, "applied migration");
        }

        Ok(())
    }

    async fn is_applied(pool: &AnyPool, id: &str) -> StoreResult<bool> {
        let row = sqlx::query("SELECT id FROM schema_migrations WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(row.is_some())
    }

    /// Three-case rename: old column only → rename; both present → drop the
    /// old one; new column only → nothing to do.
    async fn run_rename_routing_engine_used(pool: &AnyPool, dialect: Dialect) -> StoreResult<()> {
        let has_old = Self::column_exists(pool, dialect, "logs", "routing_engine_used").await?;
        let has_new = Self::column_exists(pool, dialect, "logs", "routing_engines_used").await?;

        let statement = match (has_old, has_new) {
            (true, false) => Some(match dialect {
                Dialect::Postgres | Dialect::Mysql => {
                    "ALTER TABLE logs RENAME COLUMN routing_engine_used TO routing_engines_used"
                        .to_string()
                },
                Dialect::Sqlite => {
                    "ALTER TABLE logs RENAME COLUMN routing_engine_used TO routing_engines_used"
                        .to_string()
                },
            }),
            (true, true) => Some("ALTER TABLE logs DROP COLUMN routing_engine_used".to_string()),
            (false, _) => None,
        };

        if let Some(sql) = statement {
            sqlx::query(&sql).execute(pool).await?;
        }
        Ok(())
    }

    async fn column_exists(
        pool: &AnyPool,
        dialect: Dialect,
        table: &str,
        column: &str,
    ) -> StoreResult<bool> {
        let query = dialect.column_exists_query(table);
        let row = sqlx::query(query).bind(table).bind(column).fetch_optional(pool).await?;
        Ok(row.is_some())
    }

    async fn acquire_advisory_lock(
        conn: &mut PoolConnection<Any>,
        dialect: Dialect,
    ) -> StoreResult<()> {
        match dialect {
            Dialect::Postgres => {
                sqlx::query("SELECT pg_advisory_lock(?)")
                    .bind(ADVISORY_LOCK_KEY)
                    .execute(&mut **conn)
                    .await?;
            },
            Dialect::Mysql => {
                sqlx::query("SELECT GET_LOCK(?, -1)")
                    .bind(MYSQL_LOCK_NAME)
                    .fetch_one(&mut **conn)
                    .await?;
            },
            Dialect::Sqlite => {},
        }
        Ok(())
    }

    async fn release_advisory_lock(
        conn: &mut PoolConnection<Any>,
        dialect: Dialect,
    ) -> StoreResult<()> {
        match dialect {
            Dialect::Postgres => {
                sqlx::query("SELECT pg_advisory_unlock(?)")
                    .bind(ADVISORY_LOCK_KEY)
                    .execute(&mut **conn)
                    .await?;
            },
            Dialect::Mysql => {
                sqlx::query("SELECT RELEASE_LOCK(?)")
                    .bind(MYSQL_LOCK_NAME)
                    .fetch_one(&mut **conn)
                    .await?;
            },
            Dialect::Sqlite => {},
        }
        Ok(())
    }
}
