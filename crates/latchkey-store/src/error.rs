//! Token store error types.
//!
//! Every backend failure is mapped onto one of these kinds before it reaches
//! the caller. Messages never contain token signatures.

use std::fmt;

use crate::kind::TokenKind;

/// Errors returned by token store operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// A live record already exists for the signature.
    #[error("Conflict: a live {kind} session already exists for this signature")]
    Conflict {
        /// Token kind of the conflicting record.
        kind: TokenKind,
    },

    /// No live record exists for the signature.
    #[error("Not found: no live {kind} session for this signature")]
    NotFound {
        /// Token kind that was looked up.
        kind: TokenKind,
    },

    /// The stored payload could not be encoded or decoded.
    #[error("Invalid session payload: {message}")]
    Invalid {
        /// Description of the encoding failure.
        message: String,
    },

    /// The caller supplied an unusable argument (e.g. an empty signature).
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Description of the invalid argument.
        message: String,
    },

    /// The backend could not be reached or failed to complete the operation.
    #[error("Backend unavailable: {message}")]
    Unavailable {
        /// Description of the infrastructure failure.
        message: String,
    },

    /// The caller's context was canceled before the operation completed.
    #[error("Operation canceled")]
    Canceled,

    /// The caller's deadline elapsed before the operation completed.
    #[error("Deadline exceeded")]
    DeadlineExceeded,
}

impl StoreError {
    /// Creates a new `Conflict` error.
    #[must_use]
    pub fn conflict(kind: TokenKind) -> Self {
        Self::Conflict { kind }
    }

    /// Creates a new `NotFound` error.
    #[must_use]
    pub fn not_found(kind: TokenKind) -> Self {
        Self::NotFound { kind }
    }

    /// Creates a new `Invalid` error.
    #[must_use]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidArgument` error.
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a new `Unavailable` error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Returns `true` if this is a `Conflict` error.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Returns `true` if this is a `NotFound` error.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` if this is an `Invalid` error.
    #[must_use]
    pub fn is_invalid(&self) -> bool {
        matches!(self, Self::Invalid { .. })
    }

    /// Returns `true` if this is an `InvalidArgument` error.
    #[must_use]
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument { .. })
    }

    /// Returns `true` if this is an `Unavailable` error.
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }

    /// Returns `true` if the caller's context ended the operation.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled | Self::DeadlineExceeded)
    }

    /// Returns `true` if a retry by the surrounding server could succeed.
    ///
    /// The store itself never retries.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }

    /// Returns the error kind, without payload.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Invalid { .. } => ErrorKind::Invalid,
            Self::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            Self::Unavailable { .. } => ErrorKind::Unavailable,
            Self::Canceled => ErrorKind::Canceled,
            Self::DeadlineExceeded => ErrorKind::DeadlineExceeded,
        }
    }
}

/// Payload-free error kinds, useful for logging and metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Conflict,
    NotFound,
    Invalid,
    InvalidArgument,
    Unavailable,
    Canceled,
    DeadlineExceeded,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Conflict => write!(f, "conflict"),
            Self::NotFound => write!(f, "not_found"),
            Self::Invalid => write!(f, "invalid"),
            Self::InvalidArgument => write!(f, "invalid_argument"),
            Self::Unavailable => write!(f, "unavailable"),
            Self::Canceled => write!(f, "canceled"),
            Self::DeadlineExceeded => write!(f, "deadline_exceeded"),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::invalid(err.to_string())
    }
}

/// Result type for token store operations.
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_omits_signature() {
        let err = StoreError::conflict(TokenKind::AccessToken);
        assert_eq!(
            err.to_string(),
            "Conflict: a live access_token session already exists for this signature"
        );

        let err = StoreError::not_found(TokenKind::AuthorizeCode);
        assert_eq!(
            err.to_string(),
            "Not found: no live authorize_code session for this signature"
        );

        assert_eq!(StoreError::Canceled.to_string(), "Operation canceled");
    }

    #[test]
    fn test_error_predicates() {
        let err = StoreError::unavailable("connection refused");
        assert!(err.is_unavailable());
        assert!(err.is_retryable());
        assert!(!err.is_not_found());

        let err = StoreError::not_found(TokenKind::RefreshToken);
        assert!(err.is_not_found());
        assert!(!err.is_retryable());

        assert!(StoreError::DeadlineExceeded.is_canceled());
        assert!(StoreError::Canceled.is_canceled());
        assert!(!StoreError::invalid("bad").is_canceled());
    }

    #[test]
    fn test_error_kind() {
        assert_eq!(
            StoreError::conflict(TokenKind::AccessToken).kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            StoreError::invalid_argument("empty").kind(),
            ErrorKind::InvalidArgument
        );
        assert_eq!(ErrorKind::DeadlineExceeded.to_string(), "deadline_exceeded");
    }

    #[test]
    fn test_from_serde_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = StoreError::from(json_err);
        assert!(err.is_invalid());
    }
}
