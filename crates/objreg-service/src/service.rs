use std::fmt;
use std::sync::Arc;

use objreg_store::{ListOptions, Record, Repository};
use objreg_types::{codec, KeyPrefix, Object, ObjectList, StorageKey};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::backoff::Backoff;
use crate::config::{ReconcileMode, ServiceConfig};
use crate::context::Context;
use crate::error::{ServiceError, ServiceResult};
use crate::lifecycle::{LifecycleAction, LifecycleExecutor, NoOpExecutor};
use crate::reconcile::{self, ReconcileStats, ReconcileTask, Reconciler};

/// A change notification for a watched collection.
#[derive(Clone, Debug, PartialEq)]
pub enum WatchEvent<T> {
    Added(T),
    Modified(T),
    Deleted(T),
}

/// Receiving end of a watch.
pub type WatchStream<T> = mpsc::Receiver<WatchEvent<T>>;

enum Dispatch<T: Object> {
    Inline {
        executor: Arc<dyn LifecycleExecutor<T>>,
        backoff: Backoff,
        max_attempts: u32,
    },
    Background(Reconciler<T>),
}

/// CRUD service for one kind of object over a [`Repository`].
///
/// Every operation takes a [`Context`]; cancellation and deadlines are
/// checked before touching storage and bound the reconciliation step.
/// Writes are last-writer-wins: the resource version on an incoming object
/// is ignored and replaced with the sequence the store assigned.
pub struct ObjectService<T: Object, R: Repository> {
    kind: String,
    repo: Arc<R>,
    config: ServiceConfig,
    dispatch: Dispatch<T>,
}

impl<T: Object, R: Repository> ObjectService<T, R> {
    /// Build a service for `kind`.
    ///
    /// Background reconciliation spawns its worker immediately, so it must be
    /// called from within a Tokio runtime.
    pub fn new(
        kind: impl Into<String>,
        repo: Arc<R>,
        executor: Arc<dyn LifecycleExecutor<T>>,
        config: ServiceConfig,
    ) -> ServiceResult<Self> {
        let kind = kind.into();
        if kind.is_empty() {
            return Err(ServiceError::Invalid("kind must not be empty".into()));
        }
        let dispatch = match config.reconcile.mode {
            ReconcileMode::Inline => Dispatch::Inline {
                executor,
                backoff: config.reconcile.backoff(),
                max_attempts: config.reconcile.max_attempts,
            },
            ReconcileMode::Background => {
                Dispatch::Background(Reconciler::spawn(executor, &config.reconcile)?)
            }
        };
        info!(kind = %kind, mode = ?config.reconcile.mode, "object service ready");
        Ok(Self {
            kind,
            repo,
            config,
            dispatch,
        })
    }

    /// A service with no external runtime and default settings.
    pub fn with_defaults(kind: impl Into<String>, repo: Arc<R>) -> ServiceResult<Self> {
        Self::new(kind, repo, Arc::new(NoOpExecutor), ServiceConfig::default())
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn repository(&self) -> &Arc<R> {
        &self.repo
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Persist a new object. Fails with `AlreadyExists` if one with the same
    /// identity is already stored.
    pub async fn create(&self, ctx: &Context, mut object: T) -> ServiceResult<T> {
        let ctx = self.scoped(ctx);
        self.validate(&object)?;
        let name = object.meta().name.clone();
        let namespace = object.meta().namespace.clone();

        match self.get(&ctx, &namespace, &name).await {
            Ok(_) => return Err(ServiceError::already_exists(&self.kind, &name)),
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err),
        }

        // The check above is advisory; put_if_absent settles concurrent creates.
        ctx.check()?;
        let key = StorageKey::for_identity(&object.identity());
        let payload = self.encode(&mut object)?;
        let sequence = self
            .repo
            .put_if_absent(&key, &payload)?
            .ok_or_else(|| ServiceError::already_exists(&self.kind, &name))?;
        object.set_resource_version(Some(sequence.into()));
        debug!(key = %key, %sequence, "created");

        self.reconcile(&ctx, LifecycleAction::Create, &object).await?;
        Ok(object)
    }

    /// Persist a new version of an object, whether or not it already exists.
    pub async fn update(&self, ctx: &Context, object: T) -> ServiceResult<T> {
        self.write(ctx, object, LifecycleAction::Update).await
    }

    /// Persist a status change. Stored exactly like [`update`](Self::update).
    pub async fn update_status(&self, ctx: &Context, object: T) -> ServiceResult<T> {
        self.write(ctx, object, LifecycleAction::Update).await
    }

    /// Fetch the latest version of one object.
    pub async fn get(&self, ctx: &Context, namespace: &str, name: &str) -> ServiceResult<T> {
        self.scoped(ctx).check()?;
        let key = StorageKey::new(namespace, &self.kind, name);
        let record = self
            .repo
            .get(&key)?
            .ok_or_else(|| ServiceError::not_found(&self.kind, name))?;
        self.decode(&record)
    }

    /// Latest version of every object of this kind in `namespace`, in key
    /// order. An empty namespace lists the objects stored with an empty
    /// namespace, not all namespaces.
    pub async fn list(
        &self,
        ctx: &Context,
        namespace: &str,
        options: &ListOptions,
    ) -> ServiceResult<ObjectList<T>> {
        self.scoped(ctx).check()?;
        let prefix = KeyPrefix::collection(namespace, &self.kind);
        let records = self.repo.list(&prefix, options)?;
        let items = records
            .iter()
            .map(|record| self.decode(record))
            .collect::<ServiceResult<Vec<_>>>()?;
        // Read after listing so the list version covers every item.
        let version = self.repo.last_sequence().into();
        debug!(prefix = %prefix.as_str(), count = items.len(), "listed");
        Ok(ObjectList::new(items).with_resource_version(version))
    }

    /// [`get`](Self::get), wrapped in a single-item list.
    pub async fn get_to_list(
        &self,
        ctx: &Context,
        namespace: &str,
        name: &str,
    ) -> ServiceResult<ObjectList<T>> {
        let object = self.get(ctx, namespace, name).await?;
        let list = match object.resource_version() {
            Some(version) => ObjectList::new(vec![object]).with_resource_version(version),
            None => ObjectList::new(vec![object]),
        };
        Ok(list)
    }

    /// Remove an object and return its last stored version.
    ///
    /// The executor's delete hook runs only when `teardown_on_delete` is set.
    pub async fn delete(&self, ctx: &Context, object: &T) -> ServiceResult<T> {
        let ctx = self.scoped(ctx);
        self.validate(object)?;
        ctx.check()?;
        let key = StorageKey::for_identity(&object.identity());
        let removed = self
            .repo
            .delete(&key)?
            .ok_or_else(|| ServiceError::not_found(&self.kind, &object.meta().name))?;
        debug!(key = %key, sequence = %removed.sequence, "deleted");

        let deleted = match self.decode(&removed) {
            Ok(deleted) => deleted,
            Err(err) => {
                // The record is gone either way; report what the caller sent.
                warn!(key = %key, error = %err, "deleted record was unreadable");
                object.clone()
            }
        };

        if self.config.teardown_on_delete {
            self.reconcile(&ctx, LifecycleAction::Delete, &deleted).await?;
        }
        Ok(deleted)
    }

    /// Change notifications are not offered by this store.
    pub async fn watch(
        &self,
        _ctx: &Context,
        namespace: &str,
        _options: &ListOptions,
    ) -> ServiceResult<WatchStream<T>> {
        debug!(kind = %self.kind, namespace, "watch requested");
        Err(ServiceError::Unsupported("watch"))
    }

    /// Stop the background reconciler, if any, after it drains its queue.
    pub async fn shutdown(self) -> Option<ReconcileStats> {
        match self.dispatch {
            Dispatch::Inline { .. } => None,
            Dispatch::Background(reconciler) => Some(reconciler.shutdown().await),
        }
    }

    async fn write(&self, ctx: &Context, mut object: T, action: LifecycleAction) -> ServiceResult<T> {
        let ctx = self.scoped(ctx);
        self.validate(&object)?;
        ctx.check()?;
        let key = StorageKey::for_identity(&object.identity());
        let payload = self.encode(&mut object)?;
        let sequence = self.repo.put(&key, &payload)?;
        object.set_resource_version(Some(sequence.into()));
        debug!(key = %key, %sequence, "stored");

        self.reconcile(&ctx, action, &object).await?;
        Ok(object)
    }

    async fn reconcile(&self, ctx: &Context, action: LifecycleAction, object: &T) -> ServiceResult<()> {
        match &self.dispatch {
            Dispatch::Inline {
                executor,
                backoff,
                max_attempts,
            } => {
                let outcome = ctx
                    .run(reconcile::reconcile_with_retry(
                        executor.as_ref(),
                        action,
                        object,
                        backoff,
                        *max_attempts,
                    ))
                    .await?;
                outcome.result.map_err(|err| {
                    error!(
                        identity = %object.identity(),
                        %action,
                        attempts = outcome.attempts,
                        error = %err,
                        "reconciliation failed"
                    );
                    ServiceError::Reconciliation {
                        kind: self.kind.clone(),
                        name: object.meta().name.clone(),
                        reason: err.to_string(),
                    }
                })
            }
            Dispatch::Background(reconciler) => {
                reconciler.submit(ReconcileTask::new(action, object.clone()))
            }
        }
    }

    fn scoped(&self, ctx: &Context) -> Context {
        match self.config.request_timeout() {
            Some(timeout) => ctx.with_timeout(timeout),
            None => ctx.clone(),
        }
    }

    fn validate(&self, object: &T) -> ServiceResult<()> {
        if !object.kind().eq_ignore_ascii_case(&self.kind) {
            return Err(ServiceError::Invalid(format!(
                "object kind {:?} does not match service kind {:?}",
                object.kind(),
                self.kind
            )));
        }
        if object.meta().name.is_empty() {
            return Err(ServiceError::Invalid("name must not be empty".into()));
        }
        Ok(())
    }

    /// Serialize without a resource version; the stored record's sequence is
    /// the only source of truth for it.
    fn encode(&self, object: &mut T) -> ServiceResult<Vec<u8>> {
        object.set_resource_version(None);
        codec::encode(object).map_err(|err| ServiceError::Encode {
            kind: self.kind.clone(),
            name: object.meta().name.clone(),
            reason: err.to_string(),
        })
    }

    fn decode(&self, record: &Record) -> ServiceResult<T> {
        let mut object: T =
            codec::decode(&record.value).map_err(|err| ServiceError::decode(record.key.as_str(), err))?;
        object.set_resource_version(Some(record.resource_version()));
        Ok(object)
    }
}

impl<T: Object, R: Repository> fmt::Debug for ObjectService<T, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectService")
            .field("kind", &self.kind)
            .field("mode", &self.config.reconcile.mode)
            .field("last_sequence", &self.repo.last_sequence())
            .finish()
    }
}
