//! AsyncJob — the row backing submit/retrieve semantics.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "pending" => Self::Pending,
            "processing" => Self::Processing,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => return None,
        })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AsyncJob {
    pub id: String,
    pub status: String,
    pub request_type: String,
    pub virtual_key_id: Option<String>,
    pub result_ttl_seconds: i64,
    pub status_code: Option<i64>,
    pub response: Option<String>,
    pub error: Option<String>,
    pub created_at: String,
    pub completed_at: Option<String>,
    pub expires_at: Option<String>,
}

impl AsyncJob {
    pub fn response_value(&self) -> Option<serde_json::Value> {
        self.response.as_deref().and_then(|raw| serde_json::from_str(raw).ok())
    }

    pub fn error_value(&self) -> Option<serde_json::Value> {
        self.error.as_deref().and_then(|raw| serde_json::from_str(raw).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_status_round_trips_through_as_str() {
        for status in
            [JobStatus::Pending, JobStatus::Processing, JobStatus::Completed, JobStatus::Failed]
        {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn only_completed_and_failed_are_terminal() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }
}
