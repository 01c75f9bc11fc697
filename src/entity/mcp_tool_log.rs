//! MCPToolLog — one MCP tool invocation attributable to a parent LLM
//! request. Shares LogEntry's UTC / JSON-column conventions
//! but needs none of its payload-codec machinery: metadata is the only
//! JSON column, so it is stored and loaded directly as `serde_json::Value`.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::log_entry::LogStatus;

pub use super::log_entry::LogStatus as ToolCallStatus;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct MCPToolLog {
    pub id: String,
    pub llm_request_id: String,
    pub timestamp: String,
    pub created_at: String,
    pub tool_name: String,
    pub server_label: String,
    pub status: String,
    pub latency: Option<i64>,
    pub cost: Option<f64>,
    pub virtual_key_id: Option<String>,
    pub virtual_key_name: Option<String>,
    pub raw_request: Option<String>,
    pub metadata: Option<String>,
}

impl MCPToolLog {
    pub fn metadata_value(&self) -> Option<serde_json::Value> {
        self.metadata.as_deref().filter(|s| !s.is_empty()).and_then(|raw| {
            serde_json::from_str(raw)
                .map_err(|e| tracing::warn!(error = %e, "corrupt mcp_tool_logs.metadata, dropping"))
                .ok()
        })
    }

    pub fn set_metadata(&mut self, value: &serde_json::Value) {
        self.metadata = serde_json::to_string(value).ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> MCPToolLog {
        MCPToolLog {
            id: "tool-1".to_string(),
            llm_request_id: "log-1".to_string(),
            timestamp: "2026-07-28T00:00:00.000Z".to_string(),
            created_at: "2026-07-28T00:00:00.000Z".to_string(),
            tool_name: "search".to_string(),
            server_label: "web".to_string(),
            status: LogStatus::Success.as_str().to_string(),
            latency: Some(120),
            cost: Some(0.002),
            virtual_key_id: None,
            virtual_key_name: None,
            raw_request: None,
            metadata: None,
        }
    }

    #[test]
    fn metadata_round_trips_through_json_column() {
        let mut log = base();
        log.set_metadata(&serde_json::json!({"query": "rust async"}));
        let value = log.metadata_value().unwrap();
        assert_eq!(value["query"], "rust async");
    }

    #[test]
    fn corrupt_metadata_column_degrades_to_none() {
        let mut log = base();
        log.metadata = Some("{not json".to_string());
        assert!(log.metadata_value().is_none());
    }
}
