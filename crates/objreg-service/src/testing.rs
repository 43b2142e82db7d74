//! Executors and objects shared by this crate's tests.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use objreg_types::{Object, ObjectMeta};
use serde::{Deserialize, Serialize};

use crate::lifecycle::{ExecutorError, LifecycleAction, LifecycleExecutor};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub(crate) struct Pod {
    pub metadata: ObjectMeta,
    pub image: String,
    #[serde(default)]
    pub phase: Option<String>,
}

impl Pod {
    pub fn new(namespace: &str, name: &str, image: &str) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            image: image.to_string(),
            phase: None,
        }
    }
}

impl Object for Pod {
    fn kind(&self) -> &str {
        "Pod"
    }

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

/// Records every hook call as `(action, name)`.
#[derive(Default)]
pub(crate) struct RecordingExecutor {
    calls: Mutex<Vec<(LifecycleAction, String)>>,
}

impl RecordingExecutor {
    pub fn calls(&self) -> Vec<(LifecycleAction, String)> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, action: LifecycleAction, object: &Pod) {
        self.calls
            .lock()
            .unwrap()
            .push((action, object.metadata.name.clone()));
    }
}

#[async_trait]
impl LifecycleExecutor<Pod> for RecordingExecutor {
    async fn on_create(&self, object: &Pod) -> Result<(), ExecutorError> {
        self.record(LifecycleAction::Create, object);
        Ok(())
    }

    async fn on_update(&self, object: &Pod) -> Result<(), ExecutorError> {
        self.record(LifecycleAction::Update, object);
        Ok(())
    }

    async fn on_delete(&self, object: &Pod) -> Result<(), ExecutorError> {
        self.record(LifecycleAction::Delete, object);
        Ok(())
    }
}

/// Fails the first `failures` calls, then succeeds.
pub(crate) struct FlakyExecutor {
    failures: u32,
    retryable: bool,
    calls: AtomicU32,
}

impl FlakyExecutor {
    pub fn new(failures: u32) -> Self {
        Self {
            failures,
            retryable: true,
            calls: AtomicU32::new(0),
        }
    }

    pub fn permanent(failures: u32) -> Self {
        Self {
            retryable: false,
            ..Self::new(failures)
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn attempt(&self) -> Result<(), ExecutorError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n > self.failures {
            Ok(())
        } else if self.retryable {
            Err(ExecutorError::retryable(format!("attempt {n} failed")))
        } else {
            Err(ExecutorError::permanent(format!("attempt {n} failed")))
        }
    }
}

#[async_trait]
impl LifecycleExecutor<Pod> for FlakyExecutor {
    async fn on_create(&self, _object: &Pod) -> Result<(), ExecutorError> {
        self.attempt()
    }

    async fn on_update(&self, _object: &Pod) -> Result<(), ExecutorError> {
        self.attempt()
    }

    async fn on_delete(&self, _object: &Pod) -> Result<(), ExecutorError> {
        self.attempt()
    }
}
