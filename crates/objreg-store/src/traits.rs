use objreg_types::{KeyPrefix, Sequence, StorageKey};

use crate::error::StoreResult;
use crate::record::Record;

/// Paging controls for [`Repository::list`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListOptions {
    /// Maximum number of records to return.
    pub limit: Option<usize>,
    /// Resume after this logical key (exclusive), as returned by the last
    /// record of the previous page.
    pub continue_after: Option<StorageKey>,
}

impl ListOptions {
    pub fn limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            continue_after: None,
        }
    }

    pub fn after(mut self, key: StorageKey) -> Self {
        self.continue_after = Some(key);
        self
    }
}

/// Versioned key-value repository.
///
/// All implementations must satisfy these invariants:
/// - Every `put` is assigned the next value of one store-wide counter;
///   sequences are unique and strictly increasing in commit order.
/// - `get` returns the record with the highest sequence for exactly the
///   given logical key.
/// - `list` returns the latest record of every logical key under the prefix,
///   ordered by logical key.
/// - `delete` removes exactly the given logical key, never a prefix.
/// - Storage errors are propagated unchanged.
pub trait Repository: Send + Sync {
    /// Write a new record for `key` and return the sequence it was assigned.
    fn put(&self, key: &StorageKey, value: &[u8]) -> StoreResult<Sequence>;

    /// Write a new record only if `key` has no live record.
    ///
    /// Returns `Ok(None)` without allocating a sequence if the key exists.
    fn put_if_absent(&self, key: &StorageKey, value: &[u8]) -> StoreResult<Option<Sequence>>;

    /// Read the latest record for `key`.
    ///
    /// Returns `Ok(None)` if the key has no live record.
    fn get(&self, key: &StorageKey) -> StoreResult<Option<Record>>;

    /// Read the latest record of every key under `prefix`.
    fn list(&self, prefix: &KeyPrefix, options: &ListOptions) -> StoreResult<Vec<Record>>;

    /// Remove `key`, returning the record that was live, if any.
    fn delete(&self, key: &StorageKey) -> StoreResult<Option<Record>>;

    /// The most recently allocated sequence, or zero for an empty store.
    fn last_sequence(&self) -> Sequence;

    /// Check whether `key` has a live record.
    fn contains(&self, key: &StorageKey) -> StoreResult<bool> {
        Ok(self.get(key)?.is_some())
    }
}
