//! Object store service for objreg.
//!
//! [`ObjectService`] is the CRUD-shaped façade an API layer calls. It maps
//! objects to storage keys and payloads, enforces existence semantics
//! (create must not exist, get must exist), stamps resource versions, and
//! hands persisted objects to a [`LifecycleExecutor`] so an external runtime
//! can be reconciled with them.
//!
//! Persisting and reconciling are separate steps. Depending on
//! [`ReconcileMode`], reconciliation runs inline after the write (with
//! retries) or is queued to a background [`Reconciler`].

pub mod backoff;
pub mod config;
pub mod context;
pub mod error;
pub mod lifecycle;
pub mod reconcile;
pub mod service;

#[cfg(test)]
mod testing;

pub use backoff::Backoff;
pub use config::{ConfigError, ReconcileConfig, ReconcileMode, RegistryConfig, ServiceConfig, StoreConfig};
pub use context::Context;
pub use error::{ErrorKind, ServiceError, ServiceResult};
pub use lifecycle::{ExecutorError, LifecycleAction, LifecycleExecutor, NoOpExecutor};
pub use reconcile::{ReconcileStats, ReconcileTask, Reconciler};
pub use service::{ObjectService, WatchEvent, WatchStream};
