use objreg_types::{ResourceVersion, Sequence, StorageKey};
use serde::{Deserialize, Serialize};

/// One physical write: a logical key, the sequence it was assigned, and the
/// opaque payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub key: StorageKey,
    pub sequence: Sequence,
    pub value: Vec<u8>,
}

impl Record {
    pub fn new(key: StorageKey, sequence: Sequence, value: Vec<u8>) -> Self {
        Self {
            key,
            sequence,
            value,
        }
    }

    /// Physical key `{logical}+{sequence}`.
    pub fn composite_key(&self) -> String {
        self.key.composite(self.sequence)
    }

    pub fn resource_version(&self) -> ResourceVersion {
        self.sequence.into()
    }

    /// Payload size in bytes.
    pub fn size(&self) -> usize {
        self.value.len()
    }
}
