//! Error types for stordb.
//!
//! Every caller-facing operation returns a [`StorageError`] carrying one of
//! six stable kinds plus a human-readable message. The numeric kind is kept
//! for programmatic handling and wire protocols.

use std::fmt;
use std::io;

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Stable numeric error kinds.
///
/// These codes are part of the public contract and do not change across
/// versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorKind {
    /// Invalid caller input (empty buffer, zero size, oversized tuple).
    InvalidArgument = 1,
    /// A tuple ID names a non-existent or deleted slot.
    NotFound = 2,
    /// Data corruption detected (checksum mismatch, bad magic).
    Corruption = 3,
    /// A resource could not be allocated (page allocation failed, retries
    /// exhausted).
    Exhausted = 4,
    /// Concurrent-modification conflict. No producer in the current design;
    /// reserved for future transactional semantics.
    Conflict = 5,
    /// Unexpected internal error, typically wrapping an I/O failure.
    Internal = 6,
}

impl ErrorKind {
    /// Returns the numeric code.
    #[inline]
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// The error type surfaced by every storage operation.
///
/// # Example
///
/// ```rust
/// use stor_common::error::{ErrorKind, StorageError, StorageResult};
///
/// fn rejects_empty(data: &[u8]) -> StorageResult<()> {
///     if data.is_empty() {
///         return Err(StorageError::invalid_argument("tuple data is empty"));
///     }
///     Ok(())
/// }
///
/// let err = rejects_empty(&[]).unwrap_err();
/// assert_eq!(err.kind(), ErrorKind::InvalidArgument);
/// ```
#[derive(Debug, Error)]
pub enum StorageError {
    /// Invalid caller input.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Error message.
        message: String,
    },

    /// Tuple or slot not found.
    #[error("not found: {message}")]
    NotFound {
        /// Error message.
        message: String,
    },

    /// Data corruption detected.
    #[error("corruption detected: {message}")]
    Corruption {
        /// Description of the corruption.
        message: String,
    },

    /// Resource exhausted.
    #[error("resource exhausted: {message}")]
    Exhausted {
        /// Error message.
        message: String,
    },

    /// Conflicting concurrent modification (reserved).
    #[error("conflict: {message}")]
    Conflict {
        /// Error message.
        message: String,
    },

    /// Unexpected internal error.
    #[error("internal error: {message}")]
    Internal {
        /// Error message, including any underlying I/O detail.
        message: String,
    },
}

impl StorageError {
    /// Creates an `InvalidArgument` error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a `NotFound` error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Creates a `Corruption` error.
    pub fn corruption(message: impl Into<String>) -> Self {
        Self::Corruption {
            message: message.into(),
        }
    }

    /// Creates an `Exhausted` error.
    pub fn exhausted(message: impl Into<String>) -> Self {
        Self::Exhausted {
            message: message.into(),
        }
    }

    /// Creates an `Internal` error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns the stable numeric kind of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Corruption { .. } => ErrorKind::Corruption,
            Self::Exhausted { .. } => ErrorKind::Exhausted,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Returns true if this is a corruption error.
    #[inline]
    #[must_use]
    pub const fn is_corruption(&self) -> bool {
        matches!(self, Self::Corruption { .. })
    }

    /// Returns true if this is a not-found error.
    #[inline]
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        Self::Internal {
            message: format!("I/O error: {err}"),
        }
    }
}
