//! Error types for the block device.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use stor_common::error::StorageError;
use stor_common::types::PageId;

/// Result type for block-device operations.
pub type DeviceResult<T> = Result<T, DeviceError>;

/// Errors that can occur during block-device operations.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// Standard I/O error.
    #[error("I/O error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: io::Error,
    },

    /// The device was given an empty file name.
    #[error("invalid filename (empty path)")]
    InvalidFilename,

    /// The device is already open.
    #[error("device already open: {path}")]
    AlreadyOpen {
        /// Path of the open file.
        path: PathBuf,
    },

    /// The device is not open.
    #[error("device not open")]
    NotOpen,

    /// The file header does not carry the expected magic bytes.
    #[error("invalid magic in file header: {path}")]
    InvalidMagic {
        /// Path of the rejected file.
        path: PathBuf,
    },

    /// Fewer bytes were transferred than requested.
    #[error("short {operation}: expected {expected} bytes, got {actual}")]
    ShortIo {
        /// "read" or "write".
        operation: &'static str,
        /// Requested byte count.
        expected: usize,
        /// Transferred byte count.
        actual: usize,
    },

    /// A page failed checksum verification on read.
    #[error("checksum mismatch for page {page_id}: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        /// The corrupt page.
        page_id: PageId,
        /// Checksum stored in the page header.
        expected: u32,
        /// Checksum computed over the page contents.
        actual: u32,
    },
}

impl DeviceError {
    /// Creates a `ShortIo` error for reads.
    pub fn short_read(expected: usize, actual: usize) -> Self {
        Self::ShortIo {
            operation: "read",
            expected,
            actual,
        }
    }

    /// Creates a `ShortIo` error for writes.
    pub fn short_write(expected: usize, actual: usize) -> Self {
        Self::ShortIo {
            operation: "write",
            expected,
            actual,
        }
    }

    /// Returns true if this error indicates on-disk corruption.
    #[must_use]
    pub const fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::ChecksumMismatch { .. } | Self::InvalidMagic { .. }
        )
    }
}

impl From<DeviceError> for StorageError {
    fn from(err: DeviceError) -> Self {
        match &err {
            DeviceError::ChecksumMismatch { .. } | DeviceError::InvalidMagic { .. } => {
                StorageError::corruption(err.to_string())
            }
            DeviceError::InvalidFilename | DeviceError::AlreadyOpen { .. } => {
                StorageError::invalid_argument(err.to_string())
            }
            _ => StorageError::internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stor_common::error::ErrorKind;

    #[test]
    fn test_short_io_constructors() {
        let err = DeviceError::short_read(8192, 100);
        assert!(matches!(
            err,
            DeviceError::ShortIo {
                operation: "read",
                expected: 8192,
                actual: 100,
            }
        ));
        let err = DeviceError::short_write(8192, 0);
        assert!(matches!(err, DeviceError::ShortIo { operation: "write", .. }));
    }

    #[test]
    fn test_corruption_predicate() {
        let err = DeviceError::ChecksumMismatch {
            page_id: PageId::new(3),
            expected: 1,
            actual: 2,
        };
        assert!(err.is_corruption());
        assert!(!DeviceError::NotOpen.is_corruption());
    }

    #[test]
    fn test_kind_mapping() {
        let err: StorageError = DeviceError::ChecksumMismatch {
            page_id: PageId::new(3),
            expected: 1,
            actual: 2,
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::Corruption);

        let err: StorageError = DeviceError::InvalidFilename.into();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let err: StorageError = DeviceError::NotOpen.into();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }
}
