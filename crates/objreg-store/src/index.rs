use std::collections::BTreeMap;
use std::ops::Bound;

use objreg_types::{KeyPrefix, StorageKey};

use crate::record::Record;
use crate::traits::ListOptions;

/// Latest-version index: logical key -> newest record.
///
/// Shared by every backend so they agree on lookup and listing order.
#[derive(Debug, Default)]
pub(crate) struct KeyIndex {
    entries: BTreeMap<String, Record>,
}

impl KeyIndex {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Install `record` as the latest version of its key.
    pub(crate) fn insert(&mut self, record: Record) -> Option<Record> {
        self.entries.insert(record.key.as_str().to_string(), record)
    }

    pub(crate) fn get(&self, key: &StorageKey) -> Option<&Record> {
        self.entries.get(key.as_str())
    }

    pub(crate) fn contains(&self, key: &StorageKey) -> bool {
        self.entries.contains_key(key.as_str())
    }

    pub(crate) fn remove(&mut self, key: &StorageKey) -> Option<Record> {
        self.entries.remove(key.as_str())
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn records(&self) -> impl Iterator<Item = &Record> {
        self.entries.values()
    }

    pub(crate) fn total_bytes(&self) -> u64 {
        self.entries.values().map(|r| r.size() as u64).sum()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    /// Records under `prefix` in ascending key order, honoring paging.
    pub(crate) fn scan(&self, prefix: &KeyPrefix, options: &ListOptions) -> Vec<Record> {
        let lower = match &options.continue_after {
            Some(after) if after.as_str() >= prefix.as_str() => Bound::Excluded(after.as_str()),
            _ => Bound::Included(prefix.as_str()),
        };
        let limit = options.limit.unwrap_or(usize::MAX);
        self.entries
            .range::<str, _>((lower, Bound::Unbounded))
            .take_while(|(k, _)| prefix.matches(k))
            .take(limit)
            .map(|(_, record)| record.clone())
            .collect()
    }
}
