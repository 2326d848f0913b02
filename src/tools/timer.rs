//! In-process countdown timer

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use super::ToolExecutor;
use crate::Result;
use crate::status::StatusSink;

/// Runs one countdown at a time on the tokio runtime and announces its
/// expiry on the status sink
pub struct LocalTimer {
    status: Arc<dyn StatusSink>,
    active: Mutex<Option<JoinHandle<()>>>,
}

impl LocalTimer {
    /// Create a timer that reports to `status`
    #[must_use]
    pub fn new(status: Arc<dyn StatusSink>) -> Self {
        Self {
            status,
            active: Mutex::new(None),
        }
    }

    fn take_running(&self) -> Option<JoinHandle<()>> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .filter(|handle| !handle.is_finished())
    }
}

#[async_trait]
impl ToolExecutor for LocalTimer {
    async fn set_timer(&self, duration: Duration) -> Result<()> {
        if let Some(previous) = self.take_running() {
            previous.abort();
            tracing::debug!("replaced running timer");
        }

        let status = Arc::clone(&self.status);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            tracing::info!(seconds = duration.as_secs(), "timer finished");
            status.update(&format!("Timer finished ({} seconds)", duration.as_secs()));
        });

        *self.active.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        tracing::info!(seconds = duration.as_secs(), "timer started");
        Ok(())
    }

    async fn cancel_timer(&self) -> Result<bool> {
        let Some(handle) = self.take_running() else {
            return Ok(false);
        };
        handle.abort();
        tracing::info!("timer cancelled");
        Ok(true)
    }
}

impl Drop for LocalTimer {
    fn drop(&mut self) {
        if let Some(handle) = self.take_running() {
            handle.abort();
        }
    }
}
