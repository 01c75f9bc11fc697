//! Dialect — the three SQL flavours the store speaks.
//!
//! Connection *variant* (embedded vs. networked) and SQL
//! *dialect* are orthogonal: the embedded variant is always SQLite, but the
//! networked variant may speak either Postgres or MySQL wire/SQL conventions.
//! `Dialect` carries the latter distinction through to bucket-expression and
//! advisory-lock code, while `Store` stays a single struct over one
//! `sqlx::AnyPool` regardless of which dialect it was opened with.

use crate::config::StoreKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    Postgres,
    Mysql,
}

impl From<StoreKind> for Dialect {
    fn from(kind: StoreKind) -> Self {
        match kind {
            StoreKind::Sqlite => Dialect::Sqlite,
            StoreKind::Postgres => Dialect::Postgres,
            StoreKind::Mysql => Dialect::Mysql,
        }
    }
}

impl Dialect {
    pub fn is_embedded(&self) -> bool {
        matches!(self, Dialect::Sqlite)
    }

    /// The dialect-specific bucket expression binning `timestamp` into
    /// `bucket_seconds`-wide windows.
    pub fn bucket_expr(&self, bucket_seconds: i64) -> String {
        match self {
            Dialect::Sqlite => format!(
                "(CAST(strftime('%s', timestamp) AS INTEGER) / {bucket_seconds}) * {bucket_seconds}"
            ),
            Dialect::Mysql => {
                format!("FLOOR(UNIX_TIMESTAMP(timestamp) / {bucket_seconds}) * {bucket_seconds}")
            },
            Dialect::Postgres => format!(
                "CAST(FLOOR(EXTRACT(EPOCH FROM timestamp) / {bucket_seconds}) * {bucket_seconds} AS BIGINT)"
            ),
        }
    }

    /// Column-existence probe used by additive migrations.
    pub fn column_exists_query(&self, table: &str) -> &'static str {
        match self {
            Dialect::Sqlite => "SELECT name FROM pragma_table_info(?) WHERE name = ?",
            Dialect::Mysql | Dialect::Postgres => {
                let _ = table;
                "SELECT column_name FROM information_schema.columns WHERE table_name = ? AND column_name = ?"
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_expr_embeds_the_bucket_size_for_each_dialect() {
        assert!(Dialect::Sqlite.bucket_expr(3600).contains("3600"));
        assert!(Dialect::Mysql.bucket_expr(900).contains("UNIX_TIMESTAMP"));
        assert!(Dialect::Postgres.bucket_expr(60).contains("EXTRACT(EPOCH"));
    }

    #[test]
    fn store_kind_maps_onto_matching_dialect() {
        assert_eq!(Dialect::from(StoreKind::Sqlite), Dialect::Sqlite);
        assert_eq!(Dialect::from(StoreKind::Postgres), Dialect::Postgres);
        assert_eq!(Dialect::from(StoreKind::Mysql), Dialect::Mysql);
    }
}
