use objreg_store::StoreError;
use objreg_types::{ResourceVersion, TypeError};
use thiserror::Error;

/// Stable, machine-checkable classification of a [`ServiceError`].
///
/// The API layer maps these to response codes; the error text is for humans.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    Conflict,
    Invalid,
    Storage,
    Encode,
    Decode,
    Reconciliation,
    Unsupported,
    Cancelled,
    DeadlineExceeded,
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{kind} \"{name}\" not found")]
    NotFound { kind: String, name: String },

    #[error("{kind} \"{name}\" already exists")]
    AlreadyExists { kind: String, name: String },

    /// Reserved for optimistic-concurrency enforcement; writes are currently
    /// last-writer-wins and never raise it.
    #[error("{kind} \"{name}\" was modified: expected resource version {expected}, found {actual}")]
    Conflict {
        kind: String,
        name: String,
        expected: ResourceVersion,
        actual: ResourceVersion,
    },

    #[error("invalid object: {0}")]
    Invalid(String),

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("failed to encode {kind} \"{name}\": {reason}")]
    Encode {
        kind: String,
        name: String,
        reason: String,
    },

    #[error("failed to decode record {key}: {reason}")]
    Decode { key: String, reason: String },

    /// The object was persisted but the external runtime could not be
    /// brought in line with it.
    #[error("{kind} \"{name}\" was stored but reconciliation failed: {reason}")]
    Reconciliation {
        kind: String,
        name: String,
        reason: String,
    },

    #[error("operation not supported: {0}")]
    Unsupported(&'static str),

    #[error("request cancelled")]
    Cancelled,

    #[error("request deadline exceeded")]
    DeadlineExceeded,
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::Invalid(_) => ErrorKind::Invalid,
            Self::Storage(_) => ErrorKind::Storage,
            Self::Encode { .. } => ErrorKind::Encode,
            Self::Decode { .. } => ErrorKind::Decode,
            Self::Reconciliation { .. } => ErrorKind::Reconciliation,
            Self::Unsupported(_) => ErrorKind::Unsupported,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::DeadlineExceeded => ErrorKind::DeadlineExceeded,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn is_already_exists(&self) -> bool {
        self.kind() == ErrorKind::AlreadyExists
    }

    pub(crate) fn not_found(kind: &str, name: &str) -> Self {
        Self::NotFound {
            kind: kind.to_string(),
            name: name.to_string(),
        }
    }

    pub(crate) fn already_exists(kind: &str, name: &str) -> Self {
        Self::AlreadyExists {
            kind: kind.to_string(),
            name: name.to_string(),
        }
    }

    pub(crate) fn decode(key: &str, err: TypeError) -> Self {
        Self::Decode {
            key: key.to_string(),
            reason: err.to_string(),
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        assert_eq!(ServiceError::not_found("Pod", "x").kind(), ErrorKind::NotFound);
        assert_eq!(ServiceError::already_exists("Pod", "x").kind(), ErrorKind::AlreadyExists);
        assert_eq!(ServiceError::Unsupported("watch").kind(), ErrorKind::Unsupported);
        assert_eq!(ServiceError::from(StoreError::LockPoisoned).kind(), ErrorKind::Storage);
    }

    #[test]
    fn predicates() {
        assert!(ServiceError::not_found("Pod", "x").is_not_found());
        assert!(!ServiceError::not_found("Pod", "x").is_already_exists());
        assert!(ServiceError::already_exists("Pod", "x").is_already_exists());
    }

    #[test]
    fn messages_carry_kind_and_name() {
        assert_eq!(ServiceError::not_found("Pod", "x").to_string(), "Pod \"x\" not found");
        assert_eq!(
            ServiceError::already_exists("Pod", "x").to_string(),
            "Pod \"x\" already exists"
        );
    }

    #[test]
    fn storage_errors_pass_through_verbatim() {
        let err = ServiceError::from(StoreError::SequenceExhausted);
        assert_eq!(err.to_string(), "storage error: sequence space exhausted");
    }
}
