use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::{ServiceError, ServiceResult};

/// Per-request cancellation and deadline.
///
/// Clones share the same cancellation signal; [`with_timeout`](Self::with_timeout)
/// derives a child that additionally carries a deadline.
#[derive(Clone, Debug)]
pub struct Context {
    deadline: Option<Instant>,
    cancel: Arc<watch::Sender<bool>>,
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            deadline: None,
            cancel: Arc::new(tx),
        }
    }

    /// A child context that expires `timeout` from now, or at the parent's
    /// deadline if that is sooner.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        Self {
            deadline: Some(self.deadline.map_or(deadline, |d| d.min(deadline))),
            cancel: Arc::clone(&self.cancel),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Cancel this context and every clone of it.
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Fail fast if the request is already cancelled or past its deadline.
    pub fn check(&self) -> ServiceResult<()> {
        if self.is_cancelled() {
            return Err(ServiceError::Cancelled);
        }
        if matches!(self.deadline, Some(d) if Instant::now() >= d) {
            return Err(ServiceError::DeadlineExceeded);
        }
        Ok(())
    }

    /// Resolves once the context is cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.cancel.subscribe();
        // The sender lives as long as `self`, so this only returns on cancel.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Run `fut` until it completes, the context is cancelled, or the
    /// deadline passes, whichever comes first.
    pub async fn run<F: Future>(&self, fut: F) -> ServiceResult<F::Output> {
        self.check()?;
        match self.deadline {
            Some(deadline) => tokio::select! {
                out = tokio::time::timeout_at(deadline, fut) => {
                    out.map_err(|_| ServiceError::DeadlineExceeded)
                }
                _ = self.cancelled() => Err(ServiceError::Cancelled),
            },
            None => tokio::select! {
                out = fut => Ok(out),
                _ = self.cancelled() => Err(ServiceError::Cancelled),
            },
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}
