//! Retry loop and background worker for lifecycle reconciliation.

use std::sync::Arc;

use objreg_types::Object;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::backoff::Backoff;
use crate::config::ReconcileConfig;
use crate::error::{ServiceError, ServiceResult};
use crate::lifecycle::{ExecutorError, LifecycleAction, LifecycleExecutor};

/// One unit of work for the [`Reconciler`].
#[derive(Clone, Debug)]
pub struct ReconcileTask<T> {
    pub action: LifecycleAction,
    pub object: T,
}

impl<T> ReconcileTask<T> {
    pub fn new(action: LifecycleAction, object: T) -> Self {
        Self { action, object }
    }
}

/// Counters reported by a stopped [`Reconciler`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub succeeded: u64,
    pub failed: u64,
    /// Attempts beyond the first, summed over all tasks.
    pub retries: u64,
}

pub(crate) struct Outcome {
    pub(crate) result: Result<(), ExecutorError>,
    pub(crate) attempts: u32,
}

/// Apply `action` until it succeeds, fails permanently, or runs out of
/// attempts, sleeping `backoff` between tries.
pub(crate) async fn reconcile_with_retry<T: Object>(
    executor: &dyn LifecycleExecutor<T>,
    action: LifecycleAction,
    object: &T,
    backoff: &Backoff,
    max_attempts: u32,
) -> Outcome {
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match executor.apply(action, object).await {
            Ok(()) => {
                return Outcome {
                    result: Ok(()),
                    attempts: attempt,
                }
            }
            Err(err) if !err.retryable || attempt >= max_attempts => {
                return Outcome {
                    result: Err(err),
                    attempts: attempt,
                }
            }
            Err(err) => {
                let delay = backoff.delay(attempt);
                warn!(
                    identity = %object.identity(),
                    %action,
                    attempt,
                    ?delay,
                    error = %err,
                    "reconciliation failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Background worker that reconciles queued tasks one at a time.
///
/// Tasks are processed in submission order. The queue is bounded; a full
/// queue rejects new work rather than blocking the writer.
pub struct Reconciler<T: Object> {
    sender: mpsc::Sender<ReconcileTask<T>>,
    worker: JoinHandle<ReconcileStats>,
}

impl<T: Object> Reconciler<T> {
    /// Start the worker on the current Tokio runtime.
    pub fn spawn(
        executor: Arc<dyn LifecycleExecutor<T>>,
        config: &ReconcileConfig,
    ) -> ServiceResult<Self> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| {
            ServiceError::Invalid("background reconciliation requires a Tokio runtime".into())
        })?;
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let worker = handle.spawn(run_worker(
            executor,
            receiver,
            config.backoff(),
            config.max_attempts,
        ));
        Ok(Self { sender, worker })
    }

    /// Queue a task without waiting.
    pub fn submit(&self, task: ReconcileTask<T>) -> ServiceResult<()> {
        self.sender.try_send(task).map_err(|err| {
            let (task, reason) = match err {
                mpsc::error::TrySendError::Full(task) => (task, "reconcile queue is full"),
                mpsc::error::TrySendError::Closed(task) => (task, "reconciler has stopped"),
            };
            let meta = task.object.meta();
            warn!(identity = %task.object.identity(), action = %task.action, reason, "reconcile task rejected");
            ServiceError::Reconciliation {
                kind: task.object.kind().to_string(),
                name: meta.name.clone(),
                reason: reason.to_string(),
            }
        })
    }

    /// Tasks queued but not yet picked up by the worker.
    pub fn pending(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    /// Stop accepting work, drain the queue, and return the worker's counters.
    pub async fn shutdown(self) -> ReconcileStats {
        drop(self.sender);
        match self.worker.await {
            Ok(stats) => stats,
            Err(err) => {
                error!(error = %err, "reconciler worker aborted");
                ReconcileStats::default()
            }
        }
    }
}

async fn run_worker<T: Object>(
    executor: Arc<dyn LifecycleExecutor<T>>,
    mut receiver: mpsc::Receiver<ReconcileTask<T>>,
    backoff: Backoff,
    max_attempts: u32,
) -> ReconcileStats {
    let mut stats = ReconcileStats::default();
    while let Some(task) = receiver.recv().await {
        let outcome = reconcile_with_retry(
            executor.as_ref(),
            task.action,
            &task.object,
            &backoff,
            max_attempts,
        )
        .await;
        stats.retries += u64::from(outcome.attempts.saturating_sub(1));
        match outcome.result {
            Ok(()) => {
                stats.succeeded += 1;
                debug!(identity = %task.object.identity(), action = %task.action, "reconciled");
            }
            Err(err) => {
                stats.failed += 1;
                error!(
                    identity = %task.object.identity(),
                    action = %task.action,
                    attempts = outcome.attempts,
                    error = %err,
                    "reconciliation gave up"
                );
            }
        }
    }
    info!(
        succeeded = stats.succeeded,
        failed = stats.failed,
        "reconciler stopped"
    );
    stats
}
