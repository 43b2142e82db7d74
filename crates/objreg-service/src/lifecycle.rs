use std::fmt;

use async_trait::async_trait;
use objreg_types::Object;
use tracing::debug;

/// Which lifecycle hook a reconciliation targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LifecycleAction {
    Create,
    Update,
    Delete,
}

impl fmt::Display for LifecycleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// Failure reported by a lifecycle executor.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ExecutorError {
    pub message: String,
    /// `false` when retrying cannot help (e.g. the object is unrunnable).
    pub retryable: bool,
}

impl ExecutorError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

/// External runtime that is reconciled against stored objects.
///
/// Hooks are called after the object has been persisted. A single call is one
/// reconciliation attempt; retry and backoff are applied by the caller.
#[async_trait]
pub trait LifecycleExecutor<T: Object>: Send + Sync {
    /// A new object was created; bring up whatever it declares.
    async fn on_create(&self, object: &T) -> Result<(), ExecutorError>;

    /// An existing object changed; refresh the runtime to match.
    async fn on_update(&self, object: &T) -> Result<(), ExecutorError>;

    /// An object was removed; tear down what it declared.
    async fn on_delete(&self, object: &T) -> Result<(), ExecutorError>;

    /// Dispatch to the hook for `action`.
    async fn apply(&self, action: LifecycleAction, object: &T) -> Result<(), ExecutorError> {
        match action {
            LifecycleAction::Create => self.on_create(object).await,
            LifecycleAction::Update => self.on_update(object).await,
            LifecycleAction::Delete => self.on_delete(object).await,
        }
    }
}

/// Executor with no external runtime behind it.
pub struct NoOpExecutor;

#[async_trait]
impl<T: Object> LifecycleExecutor<T> for NoOpExecutor {
    async fn on_create(&self, object: &T) -> Result<(), ExecutorError> {
        debug!(identity = %object.identity(), "no-op create hook");
        Ok(())
    }

    async fn on_update(&self, object: &T) -> Result<(), ExecutorError> {
        debug!(identity = %object.identity(), "no-op update hook");
        Ok(())
    }

    async fn on_delete(&self, object: &T) -> Result<(), ExecutorError> {
        debug!(identity = %object.identity(), "no-op delete hook");
        Ok(())
    }
}
