//! Versioned key-value repository for objreg.
//!
//! Every write is assigned the next value of a single, store-wide
//! [`Sequence`](objreg_types::Sequence). Writes never overwrite in place from
//! the caller's point of view: each one produces a new [`Record`] whose
//! physical key is `{logical key}+{sequence}`. The repository keeps an
//! explicit latest-version index per logical key, so reads always return the
//! newest record for exactly the key asked for.
//!
//! # Backends
//!
//! All backends implement the [`Repository`] trait:
//!
//! - [`InMemoryRepository`] -- `BTreeMap`-based store for tests and embedding
//! - [`LogRepository`] -- append-only, CRC-framed log file replayed on open
//!
//! # Design Rules
//!
//! 1. Sequence allocation happens inside the writer critical section; it is
//!    the single serialization point for all writes.
//! 2. Readers never wait longer than one writer critical section.
//! 3. The repository never interprets payloads.
//! 4. All I/O errors are propagated verbatim; there are no retries here.

pub mod error;
mod index;
pub mod log;
pub mod memory;
pub mod record;
pub mod sequence;
pub mod traits;
pub mod wal;

pub use error::{StoreError, StoreResult};
pub use log::{CompactionStats, LogConfig, LogRepository};
pub use memory::InMemoryRepository;
pub use record::Record;
pub use sequence::SequenceCounter;
pub use traits::{ListOptions, Repository};
pub use wal::SyncMode;
