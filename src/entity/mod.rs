//! Log-store entities: the wide-row log record, the MCP tool-call log, and
//! the async job record, plus the typed payload shadows they share.

pub mod async_job;
pub mod log_entry;
pub mod mcp_tool_log;
pub mod payload;

pub use async_job::{AsyncJob, JobStatus};
pub use log_entry::{LogEntry, LogEntryParsed, LogStatus, ObjectType};
pub use mcp_tool_log::{MCPToolLog, ToolCallStatus};
