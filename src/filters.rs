//! Search filters, pagination, and aggregate result shapes.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Optional predicates composed conjunctively by the store's `applyFilters`
/// step. Every field left at its default contributes no SQL clause.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchFilters {
    pub providers: Vec<String>,
    pub models: Vec<String>,
    pub status: Vec<String>,
    pub object_types: Vec<String>,
    pub selected_key_ids: Vec<String>,
    pub virtual_key_ids: Vec<String>,

    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub min_latency: Option<i64>,
    pub max_latency: Option<i64>,
    pub min_total_tokens: Option<i64>,
    pub max_total_tokens: Option<i64>,
    pub min_cost: Option<f64>,
    pub max_cost: Option<f64>,

    pub missing_cost_only: bool,
    pub content_search: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    Timestamp,
    Latency,
    Tokens,
    Cost,
}

impl Default for SortBy {
    fn default() -> Self {
        Self::Timestamp
    }
}

impl SortBy {
    pub fn column(&self) -> &'static str {
        match self {
            Self::Timestamp => "timestamp",
            Self::Latency => "latency",
            Self::Tokens => "total_tokens",
            Self::Cost => "cost",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl Default for SortOrder {
    fn default() -> Self {
        Self::Desc
    }
}

impl SortOrder {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationOptions {
    pub limit: u32,
    pub offset: u32,
    pub sort_by: SortBy,
    pub order: SortOrder,
}

impl Default for PaginationOptions {
    fn default() -> Self {
        Self { limit: 50, offset: 0, sort_by: SortBy::default(), order: SortOrder::default() }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchLogsResult {
    pub logs: Vec<crate::entity::LogEntry>,
    pub pagination: PaginationOptions,
    pub total_requests: i64,
    pub has_logs: bool,
}

/// `GetStats` result. Every numeric field stays at its zero
/// value when `total_requests == 0` — success rate is undefined (zero),
/// never a division by zero.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogStats {
    pub total_requests: i64,
    pub success_count: i64,
    pub error_count: i64,
    pub success_rate: f64,
    pub avg_latency: f64,
    pub sum_latency: i64,
    pub avg_total_tokens: f64,
    pub sum_total_tokens: i64,
    pub avg_cost: f64,
    pub sum_cost: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestHistogramBucket {
    pub bucket_start: i64,
    pub total: i64,
    pub success: i64,
    pub error: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenHistogramBucket {
    pub bucket_start: i64,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostHistogramBucket {
    pub bucket_start: i64,
    pub total_cost: f64,
    pub by_model: HashMap<String, f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelBucketCounts {
    pub total: i64,
    pub success: i64,
    pub error: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelHistogramBucket {
    pub bucket_start: i64,
    pub by_model: HashMap<String, ModelBucketCounts>,
}

/// Align `start` down to the nearest multiple of `bucket_seconds` and step
/// by `bucket_seconds` through `end` inclusive.
pub fn gap_fill_buckets(start: i64, end: i64, bucket_seconds: i64) -> Vec<i64> {
    if bucket_seconds <= 0 || start > end {
        return Vec::new();
    }
    let aligned_start = (start / bucket_seconds) * bucket_seconds;
    let mut buckets = Vec::new();
    let mut cursor = aligned_start;
    while cursor <= end {
        buckets.push(cursor);
        cursor += bucket_seconds;
    }
    buckets
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gap_fill_aligns_start_down_and_steps_by_bucket_size() {
        let buckets = gap_fill_buckets(1_000_003, 1_010_000, 3600);
        assert_eq!(buckets.first(), Some(&997_200));
        for window in buckets.windows(2) {
            assert_eq!(window[1] - window[0], 3600);
        }
        assert!(*buckets.last().unwrap() <= 1_010_000);
    }

    #[test]
    fn gap_fill_length_matches_closed_form() {
        let start = 0;
        let end = 10_000;
        let bucket = 3600;
        let buckets = gap_fill_buckets(start, end, bucket);
        let aligned_start = (start / bucket) * bucket;
        let expected_len = (end - aligned_start) / bucket + 1;
        assert_eq!(buckets.len() as i64, expected_len);
    }

    #[test]
    fn gap_fill_empty_when_bucket_non_positive() {
        assert!(gap_fill_buckets(0, 100, 0).is_empty());
    }

    #[test]
    fn sort_by_defaults_to_timestamp_descending() {
        let pagination = PaginationOptions::default();
        assert_eq!(pagination.sort_by, SortBy::Timestamp);
        assert_eq!(pagination.order, SortOrder::Desc);
    }
}
