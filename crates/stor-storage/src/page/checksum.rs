//! Page checksum primitives.
//!
//! Checksums use CRC32 with the MSB-first polynomial 0x04C11DB7, an
//! all-ones initial value, and final inversion (the BZIP2 variant). The
//! 256-entry lookup table lives in a static [`Crc`] instance, so
//! initialisation is a one-time constant and safe under concurrent first
//! callers.

use crc::{Crc, Digest, CRC_32_BZIP2};

use stor_common::constants::{PAGE_CHECKSUM_OFFSET, PAGE_HEADER_SIZE};

static CRC32_ALGO: Crc<u32> = Crc::<u32>::new(&CRC_32_BZIP2);

/// Computes the CRC32 of a byte slice in one shot.
///
/// # Example
///
/// ```rust
/// use stor_storage::page::crc32;
///
/// assert_eq!(crc32(b""), 0x0000_0000);
/// assert_eq!(crc32(b"abc"), 0x648C_BB73);
/// ```
#[inline]
pub fn crc32(data: &[u8]) -> u32 {
    CRC32_ALGO.checksum(data)
}

/// Incremental CRC32 computation.
///
/// Feeding the same bytes through any sequence of [`update`](Self::update)
/// calls yields the same result as a single [`crc32`] over the
/// concatenation.
///
/// # Example
///
/// ```rust
/// use stor_storage::page::{crc32, Crc32};
///
/// let mut hasher = Crc32::new();
/// hasher.update(b"The quick brown fox ");
/// hasher.update(b"jumps over the lazy dog");
/// assert_eq!(hasher.finalize(), crc32(b"The quick brown fox jumps over the lazy dog"));
/// ```
pub struct Crc32 {
    digest: Digest<'static, u32>,
}

impl Crc32 {
    /// Starts a new incremental computation.
    #[must_use]
    pub fn new() -> Self {
        Self {
            digest: CRC32_ALGO.digest(),
        }
    }

    /// Feeds bytes into the computation.
    #[inline]
    pub fn update(&mut self, data: &[u8]) {
        self.digest.update(data);
    }

    /// Finishes the computation and returns the checksum.
    #[inline]
    #[must_use]
    pub fn finalize(self) -> u32 {
        self.digest.finalize()
    }
}

impl Default for Crc32 {
    fn default() -> Self {
        Self::new()
    }
}

/// Computes the checksum of a page buffer.
///
/// Coverage: bytes `0..12` (the persisted header fields before the checksum
/// slot), four zero bytes substituted for the checksum field itself, then
/// the data area from `PAGE_HEADER_SIZE` to the end. The reserved header
/// bytes `16..40` are excluded, so the in-memory runtime summary never
/// influences the stored checksum.
///
/// # Panics
///
/// Panics if the buffer is shorter than a page header.
pub fn page_checksum(page: &[u8]) -> u32 {
    debug_assert!(page.len() >= PAGE_HEADER_SIZE);

    let mut hasher = Crc32::new();
    hasher.update(&page[..PAGE_CHECKSUM_OFFSET]);
    hasher.update(&[0u8; 4]);
    hasher.update(&page[PAGE_HEADER_SIZE..]);
    hasher.finalize()
}
