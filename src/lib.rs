//! Gateway log-store core
//!
//! The observability and asynchronous-execution core of an LLM gateway: a
//! multi-backend append/enrich persistence layer (the [`store`] module), a
//! denormalised log/tool-call/async-job data model (the [`entity`] module),
//! a search/aggregation surface (the [`filters`] module), an async job
//! executor, and two periodic cleaners.

pub mod async_job;
pub mod cleaner;
pub mod config;
pub mod entity;
pub mod error;
pub mod filters;
pub mod pricing;
pub mod store;

pub use async_job::{AsyncJobExecutor, GovernanceLookup, Operation, VirtualKey};
pub use cleaner::{AsyncJobCleaner, Cleaner, CleanerSupervisor, RetentionCleaner};
pub use config::{AppConfig, BackendConfig, LogStoreDocument, StoreKind};
pub use entity::{AsyncJob, JobStatus, LogEntry, LogEntryParsed, LogStatus, MCPToolLog, ObjectType};
pub use error::{StoreError, StoreResult};
pub use filters::{PaginationOptions, SearchFilters, SearchLogsResult};
pub use pricing::{MCPCatalog, PricingEntry};
pub use store::{Dialect, Migrator, Store};
