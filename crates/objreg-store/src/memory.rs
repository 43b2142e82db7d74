use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use objreg_types::{KeyPrefix, Sequence, StorageKey};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::index::KeyIndex;
use crate::record::Record;
use crate::sequence::SequenceCounter;
use crate::traits::{ListOptions, Repository};

/// In-memory, `BTreeMap`-based repository.
///
/// Intended for tests and embedding. The index lives behind a `RwLock`;
/// writers hold the write lock across sequence allocation and index update.
pub struct InMemoryRepository {
    index: RwLock<KeyIndex>,
    counter: Arc<SequenceCounter>,
}

impl InMemoryRepository {
    /// Create an empty repository with its own counter.
    pub fn new() -> Self {
        Self::with_counter(Arc::new(SequenceCounter::new()))
    }

    /// Create an empty repository that allocates from `counter`.
    pub fn with_counter(counter: Arc<SequenceCounter>) -> Self {
        Self {
            index: RwLock::new(KeyIndex::new()),
            counter,
        }
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.read_index().map(|i| i.len()).unwrap_or(0)
    }

    /// Returns `true` if no key is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total payload bytes across live records.
    pub fn total_bytes(&self) -> u64 {
        self.read_index().map(|i| i.total_bytes()).unwrap_or(0)
    }

    /// Remove every key. The sequence counter is not reset.
    pub fn clear(&self) -> StoreResult<()> {
        self.write_index()?.clear();
        Ok(())
    }

    fn read_index(&self) -> StoreResult<RwLockReadGuard<'_, KeyIndex>> {
        self.index.read().map_err(|_| StoreError::LockPoisoned)
    }

    fn write_index(&self) -> StoreResult<RwLockWriteGuard<'_, KeyIndex>> {
        self.index.write().map_err(|_| StoreError::LockPoisoned)
    }
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl Repository for InMemoryRepository {
    fn put(&self, key: &StorageKey, value: &[u8]) -> StoreResult<Sequence> {
        let mut index = self.write_index()?;
        let sequence = self.counter.allocate()?;
        index.insert(Record::new(key.clone(), sequence, value.to_vec()));
        debug!(key = %key, %sequence, len = value.len(), "put");
        Ok(sequence)
    }

    fn put_if_absent(&self, key: &StorageKey, value: &[u8]) -> StoreResult<Option<Sequence>> {
        let mut index = self.write_index()?;
        if index.contains(key) {
            return Ok(None);
        }
        let sequence = self.counter.allocate()?;
        index.insert(Record::new(key.clone(), sequence, value.to_vec()));
        debug!(key = %key, %sequence, len = value.len(), "put if absent");
        Ok(Some(sequence))
    }

    fn get(&self, key: &StorageKey) -> StoreResult<Option<Record>> {
        Ok(self.read_index()?.get(key).cloned())
    }

    fn list(&self, prefix: &KeyPrefix, options: &ListOptions) -> StoreResult<Vec<Record>> {
        Ok(self.read_index()?.scan(prefix, options))
    }

    fn delete(&self, key: &StorageKey) -> StoreResult<Option<Record>> {
        let removed = self.write_index()?.remove(key);
        debug!(key = %key, existed = removed.is_some(), "delete");
        Ok(removed)
    }

    fn last_sequence(&self) -> Sequence {
        self.counter.last()
    }
}

impl std::fmt::Debug for InMemoryRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryRepository")
            .field("key_count", &self.len())
            .field("last_sequence", &self.counter.last())
            .finish()
    }
}
