use std::sync::atomic::{AtomicU64, Ordering};

use objreg_types::Sequence;

use crate::error::{StoreError, StoreResult};

/// Store-wide monotonic write counter.
///
/// Repositories receive the counter at construction instead of reaching for
/// process-global state. Callers must allocate while holding the repository's
/// writer lock so that allocation order equals commit order.
#[derive(Debug, Default)]
pub struct SequenceCounter {
    last: AtomicU64,
}

impl SequenceCounter {
    /// A counter whose first allocation is 1.
    pub fn new() -> Self {
        Self::default()
    }

    /// A counter whose first allocation is `last + 1`.
    pub fn starting_after(last: Sequence) -> Self {
        Self {
            last: AtomicU64::new(last.get()),
        }
    }

    /// Allocate the next sequence.
    pub fn allocate(&self) -> StoreResult<Sequence> {
        let previous = self
            .last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
                Sequence::new(v).checked_next().map(Sequence::get)
            })
            .map_err(|_| StoreError::SequenceExhausted)?;
        Sequence::new(previous)
            .checked_next()
            .ok_or(StoreError::SequenceExhausted)
    }

    /// The most recently allocated sequence, or zero.
    pub fn last(&self) -> Sequence {
        Sequence::new(self.last.load(Ordering::SeqCst))
    }

    /// Move the counter forward so the next allocation is after `seen`.
    /// Never moves it backwards.
    pub fn observe(&self, seen: Sequence) {
        self.last.fetch_max(seen.get(), Ordering::SeqCst);
    }
}
