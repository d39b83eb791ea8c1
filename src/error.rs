//! Error types for record construction and storage.
//!
//! Two families: [`ValidationError`] for bad client input (the caller can
//! fix it and retry) and [`BackendError`] for infrastructure failures in the
//! key-value backend. [`Error`] unifies them for callers that drive both
//! `build` and the store, and classifies each failure as client-side or
//! server-side.

use thiserror::Error;

/// Client-input errors raised while building a record.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The record type tag is not one of the four known variants.
    #[error("invalid record type: {0}")]
    UnknownVariant(String),

    /// A field required by the resolved variant was not supplied.
    #[error("missing required field: {0}")]
    MissingField(String),

    /// A numeric field could not be parsed as a decimal.
    #[error("invalid value for field '{field}': {value:?} is not a decimal")]
    InvalidValue { field: String, value: String },
}

/// Failure reported by the key-value backend.
///
/// Carries the backend operation and key that failed so the caller can tell
/// which step of a multi-key write did not complete.
#[derive(Error, Debug)]
#[error("backing store error during {op} on '{key}': {message}")]
pub struct BackendError {
    pub op: &'static str,
    pub key: String,
    pub message: String,
}

impl BackendError {
    pub fn new(op: &'static str, key: impl Into<String>, message: impl ToString) -> Self {
        Self {
            op,
            key: key.into(),
            message: message.to_string(),
        }
    }
}

/// Distinguishes the four failure kinds a caller can observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    UnknownVariant,
    MissingField,
    InvalidValue,
    BackingStore,
}

/// Any error produced by the record model or the store.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(ValidationError::UnknownVariant(_)) => ErrorKind::UnknownVariant,
            Error::Validation(ValidationError::MissingField(_)) => ErrorKind::MissingField,
            Error::Validation(ValidationError::InvalidValue { .. }) => ErrorKind::InvalidValue,
            Error::Backend(_) => ErrorKind::BackingStore,
        }
    }

    /// `true` for input errors (4xx-style), `false` for infrastructure
    /// failures (5xx-style).
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::Validation(_))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        let err: Error = ValidationError::UnknownVariant("x".into()).into();
        assert_eq!(err.kind(), ErrorKind::UnknownVariant);
        assert!(err.is_client_error());

        let err: Error = ValidationError::MissingField("dose".into()).into();
        assert_eq!(err.kind(), ErrorKind::MissingField);

        let err: Error = BackendError::new("set_add", "patient:1", "connection refused").into();
        assert_eq!(err.kind(), ErrorKind::BackingStore);
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_messages_name_the_field() {
        let err = ValidationError::MissingField("description".into());
        assert_eq!(err.to_string(), "missing required field: description");

        let err = BackendError::new("read_map", "health_record:abc", "timed out");
        assert!(err.to_string().contains("read_map"));
        assert!(err.to_string().contains("health_record:abc"));
    }
}
