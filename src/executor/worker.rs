use super::{AdvanceOutcome, MigrationExecutor};
use crate::core::{MigrationError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{Level, event};

const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// Background loop calling [`MigrationExecutor::advance`] on a timer.
///
/// The loop ends on its own when a migration halts.
pub struct MigrationWorker {
    stop_tx: Option<oneshot::Sender<()>>,
    join_handle: Option<JoinHandle<()>>,
    last_error: Arc<Mutex<Option<MigrationError>>>,
}

impl MigrationWorker {
    /// Signals the worker to stop and waits for it to finish.
    pub async fn stop(mut self) -> Result<()> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }

        if let Some(join_handle) = self.join_handle.take() {
            join_handle
                .await
                .map_err(|err| MigrationError::State(format!("migration worker join: {}", err)))?;
        }
        Ok(())
    }

    pub fn is_finished(&self) -> bool {
        self.join_handle
            .as_ref()
            .is_none_or(JoinHandle::is_finished)
    }

    /// Most recent error returned by `advance`, if any.
    pub async fn last_error(&self) -> Option<MigrationError> {
        self.last_error.lock().await.clone()
    }
}

impl Drop for MigrationWorker {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(join_handle) = self.join_handle.take() {
            join_handle.abort();
        }
    }
}

/// Spawns a worker that advances `executor` every `interval`.
pub fn spawn_migration_worker(executor: Arc<MigrationExecutor>, interval: Duration) -> MigrationWorker {
    let interval = interval.max(MIN_INTERVAL);
    let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
    let last_error = Arc::new(Mutex::new(None));
    let last_error_for_worker = last_error.clone();

    let join_handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = &mut stop_rx => {
                    break;
                }
                _ = sleep(interval) => {
                    match executor.advance().await {
                        Ok(AdvanceOutcome::Halted { version, reason }) => {
                            event!(Level::WARN, version = %version, reason = %reason, "migration worker stopped on halted migration");
                            break;
                        }
                        Ok(_) => {}
                        Err(err) if err.is_transient() => {
                            event!(Level::WARN, error = %err, "migration worker tick failed");
                            *last_error_for_worker.lock().await = Some(err);
                        }
                        Err(err) => {
                            event!(Level::ERROR, error_class = err.kind(), error = %err, "migration worker stopped");
                            *last_error_for_worker.lock().await = Some(err);
                            break;
                        }
                    }
                }
            }
        }
    });

    MigrationWorker {
        stop_tx: Some(stop_tx),
        join_handle: Some(join_handle),
        last_error,
    }
}
