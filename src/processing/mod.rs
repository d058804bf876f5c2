//! Pipeline orchestration and stage execution

mod embedder;
mod orchestrator;

pub use embedder::EmbeddingBatchProcessor;
pub use orchestrator::Orchestrator;

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::timeout;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::storage::PipelineDb;
use crate::types::{PipelineTask, Stage, TaskErrorEntry};

/// Live handle to one running task
///
/// Mutations go through [`TaskHandle::update`], which writes both the in-memory
/// registry and the durable task row, so progress survives a restart. The
/// cancellation flag is observed cooperatively at unit boundaries.
#[derive(Clone)]
pub struct TaskHandle {
    id: Uuid,
    db: Arc<PipelineDb>,
    registry: Arc<DashMap<Uuid, PipelineTask>>,
    cancel: Arc<AtomicBool>,
}

impl TaskHandle {
    pub fn new(
        task: PipelineTask,
        db: Arc<PipelineDb>,
        registry: Arc<DashMap<Uuid, PipelineTask>>,
    ) -> Result<Self> {
        let id = task.id;
        db.upsert_task(&task)?;
        registry.insert(id, task);
        Ok(Self {
            id,
            db,
            registry,
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Request cooperative cancellation
    pub fn request_cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Bail out with [`Error::Cancelled`] if cancellation was requested
    ///
    /// Called at every unit boundary: per document for extraction and
    /// chunking, per batch for embedding and indexing.
    pub fn checkpoint(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Mutate the task and persist the new state
    pub fn update<F: FnOnce(&mut PipelineTask)>(&self, f: F) -> Result<()> {
        let snapshot = {
            let mut entry = self
                .registry
                .get_mut(&self.id)
                .ok_or_else(|| Error::TaskNotFound(self.id.to_string()))?;
            f(entry.value_mut());
            entry.value().clone()
        };
        self.db.upsert_task(&snapshot)
    }

    /// Record a per-item failure without aborting the run
    pub fn add_error(&self, item: impl Into<String>, stage: Stage, message: impl Into<String>) {
        let entry = TaskErrorEntry {
            item: item.into(),
            stage,
            message: message.into(),
        };
        tracing::warn!(item = %entry.item, stage = %stage, "item failed: {}", entry.message);
        if let Err(e) = self.update(|task| {
            task.progress.items_failed += 1;
            task.errors.push(entry);
        }) {
            tracing::error!("failed to persist task error: {}", e);
        }
    }

    /// Current task state
    pub fn snapshot(&self) -> Option<PipelineTask> {
        self.registry.get(&self.id).map(|t| t.value().clone())
    }
}

/// Run an external call with a timeout, retrying transient failures with
/// bounded exponential backoff
///
/// A timed-out call counts as a retryable external-service failure. Input and
/// state errors are returned immediately.
pub(crate) async fn retry_with_backoff<T, F, Fut>(
    service: &str,
    max_attempts: u32,
    call_timeout: Duration,
    mut call: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let result = match timeout(call_timeout, call()).await {
            Ok(result) => result,
            Err(_) => Err(Error::external(
                service,
                format!("call timed out after {}s", call_timeout.as_secs()),
            )),
        };

        match result {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let wait = Duration::from_secs(1u64 << attempt.min(6));
                tracing::warn!(
                    service,
                    attempt,
                    max_attempts,
                    "retrying in {}s: {}",
                    wait.as_secs(),
                    e
                );
                tokio::time::sleep(wait).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[tokio::test(start_paused = true)]
    async fn backoff_retries_transient_failures() {
        let attempts = AtomicU32::new(0);
        let result = retry_with_backoff("svc", 3, Duration::from_secs(5), || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(Error::external("svc", "flaky"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_gives_up_after_max_attempts() {
        let attempts = AtomicU32::new(0);
        let result: Result<()> = retry_with_backoff("svc", 3, Duration::from_secs(5), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::external("svc", "down")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn input_errors_are_not_retried() {
        let attempts = AtomicU32::new(0);
        let result: Result<()> = retry_with_backoff("svc", 3, Duration::from_secs(5), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::input("doc.pdf", "garbled")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_calls_time_out_and_retry() {
        let attempts = AtomicU32::new(0);
        let result = retry_with_backoff("svc", 2, Duration::from_secs(1), || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    // Hangs past the timeout
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                }
                Ok(n)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 1);
    }
}
