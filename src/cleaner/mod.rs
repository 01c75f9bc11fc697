//! Retention and stale-job cleaners.
//!
//! [`Cleaner`] describes one periodic unit of work; [`CleanerSupervisor`]
//! drives it with an immediate first run, per-iteration jitter, and a
//! mutex-guarded stop-channel so a second `start()` is a no-op and
//! `stop()` is safe to call twice.

mod async_job_cleaner;
mod retention;

pub use async_job_cleaner::AsyncJobCleaner;
pub use retention::RetentionCleaner;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, oneshot};

use crate::error::StoreError;

#[async_trait]
pub trait Cleaner: Send + Sync + 'static {
    /// Run one sweep.
    async fn run_once(&self) -> Result<(), StoreError>;

    /// Steady-state interval between sweeps.
    fn interval(&self) -> Duration;

    /// Extra random delay added on top of `interval()`, rerolled every
    /// iteration. Default: none.
    fn jitter(&self) -> Duration {
        Duration::ZERO
    }

    /// Bounded timeout for a single `run_once` call.
    fn timeout(&self) -> Duration;

    fn name(&self) -> &'static str;
}

/// Idempotent start/stop around a periodic [`Cleaner`], guarding its
/// optional stop-channel under a mutex.
pub struct CleanerSupervisor {
    stop_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl Default for CleanerSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl CleanerSupervisor {
    pub fn new() -> Self {
        Self { stop_tx: Mutex::new(None) }
    }

    /// Start the cleaner loop. A second call while already running returns
    /// immediately without spawning a duplicate worker.
    pub async fn start<C: Cleaner>(self: &Arc<Self>, cleaner: Arc<C>) {
        let mut guard = self.stop_tx.lock().await;
        if guard.is_some() {
            tracing::debug!(cleaner = cleaner.name(), "start() is a no-op, already running");
            return;
        }

        let (tx, rx) = oneshot::channel();
        *guard = Some(tx);
        drop(guard);

        tokio::spawn(run_loop(cleaner, rx));
    }

    /// Stop the cleaner loop. Safe to call when not running, or twice in a
    /// row: the channel is taken and closed exactly once.
    pub async fn stop(&self) {
        let mut guard = self.stop_tx.lock().await;
        if let Some(tx) = guard.take() {
            let _ = tx.send(());
        }
    }

    pub async fn is_running(&self) -> bool {
        self.stop_tx.lock().await.is_some()
    }
}

async fn run_loop<C: Cleaner>(cleaner: Arc<C>, mut stop_rx: oneshot::Receiver<()>) {
    tracing::info!(cleaner = cleaner.name(), "cleaner starting");

    loop {
        match tokio::time::timeout(cleaner.timeout(), cleaner.run_once()).await {
            Ok(Ok(())) => {},
            Ok(Err(e)) => tracing::warn!(cleaner = cleaner.name(), error = %e, "cleaner sweep failed"),
            Err(_) => tracing::warn!(cleaner = cleaner.name(), "cleaner sweep timed out"),
        }

        let sleep_for = cleaner.interval() + cleaner.jitter();
        tokio::select! {
            _ = &mut stop_rx => {
                tracing::info!(cleaner = cleaner.name(), "cleaner stopping");
                break;
            }
            _ = tokio::time::sleep(sleep_for) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingCleaner {
        runs: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Cleaner for CountingCleaner {
        async fn run_once(&self) -> Result<(), StoreError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn interval(&self) -> Duration {
            Duration::from_millis(20)
        }

        fn timeout(&self) -> Duration {
            Duration::from_millis(200)
        }

        fn name(&self) -> &'static str {
            "counting-cleaner"
        }
    }

    #[tokio::test]
    async fn starting_twice_spawns_one_worker() {
        let runs = Arc::new(AtomicU32::new(0));
        let cleaner = Arc::new(CountingCleaner { runs: Arc::clone(&runs) });
        let supervisor = Arc::new(CleanerSupervisor::new());

        supervisor.start(Arc::clone(&cleaner)).await;
        supervisor.start(Arc::clone(&cleaner)).await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        supervisor.stop().await;

        let count_at_stop = runs.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(runs.load(Ordering::SeqCst), count_at_stop, "no further runs after stop");
    }

    #[tokio::test]
    async fn stopping_twice_is_safe() {
        let runs = Arc::new(AtomicU32::new(0));
        let cleaner = Arc::new(CountingCleaner { runs });
        let supervisor = Arc::new(CleanerSupervisor::new());

        supervisor.start(cleaner).await;
        supervisor.stop().await;
        supervisor.stop().await;
        assert!(!supervisor.is_running().await);
    }

    #[tokio::test]
    async fn first_run_happens_immediately() {
        let runs = Arc::new(AtomicU32::new(0));
        let cleaner = Arc::new(CountingCleaner { runs: Arc::clone(&runs) });
        let supervisor = Arc::new(CleanerSupervisor::new());

        supervisor.start(cleaner).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(runs.load(Ordering::SeqCst) >= 1, "expected a run before the first interval elapsed");
        supervisor.stop().await;
    }
}
