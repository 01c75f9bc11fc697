use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gateway_logstore::cleaner::{AsyncJobCleaner, CleanerSupervisor, RetentionCleaner};
use gateway_logstore::config::AppConfig;
use gateway_logstore::store::Store;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load()?;
    init_tracing(&config);

    tracing::info!("gateway-logstore starting up");

    let Some(store) = Store::from_config(&config.log_store).await? else {
        tracing::warn!("log_store.enabled is false, nothing to run");
        return Ok(());
    };
    let store = Arc::new(store);

    store.migrate().await?;
    tracing::info!("schema migrated to latest version");
    store.ping().await?;

    let retention_cleaner =
        Arc::new(RetentionCleaner::new(Arc::clone(&store), config.log_store.retention_days));
    let retention_supervisor = Arc::new(CleanerSupervisor::new());
    retention_supervisor.start(retention_cleaner).await;
    tracing::info!("retention cleaner started");

    let async_job_cleaner = Arc::new(AsyncJobCleaner::new(Arc::clone(&store)));
    let async_job_supervisor = Arc::new(CleanerSupervisor::new());
    async_job_supervisor.start(async_job_cleaner).await;
    tracing::info!("async-job cleaner started");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");

    async_job_supervisor.stop().await;
    retention_supervisor.stop().await;
    store.close().await;

    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let log_filter = tracing_subscriber::EnvFilter::new(&config.logging.level);
    let registry = tracing_subscriber::registry().with(log_filter);

    if let Some(log_file) = &config.logging.file {
        let log_path = std::path::Path::new(log_file);
        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        let log_dir = log_path.parent().and_then(|p| p.to_str()).unwrap_or("logs");
        let file_name =
            log_path.file_name().and_then(|n| n.to_str()).unwrap_or("gateway-logstore.log");
        let file_prefix = file_name.strip_suffix(".log").unwrap_or(file_name);

        let file_appender = tracing_appender::rolling::daily(log_dir, file_prefix);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        // Leak the guard: the subscriber must outlive `main`, and this
        // binary never tears down tracing before process exit.
        Box::leak(Box::new(guard));
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(non_blocking))
            .with(tracing_subscriber::fmt::layer())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
