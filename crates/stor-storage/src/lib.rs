//! # stor-storage
//!
//! The storage core of stordb: a tuple-addressable heap file built from
//! slotted 8 KiB pages.
//!
//! The crate is organised leaves-first:
//!
//! - [`page`] — the on-disk page format: checksums, the persisted header,
//!   the slot directory, and the owning [`page::HeapPage`] with insert,
//!   delete, update, forwarding, and compaction
//! - [`file`] — the block device: fixed-size page I/O over a single data
//!   file with a 512-byte header and monotonic page allocation
//! - [`fsm`] — the persistent free-space map with one-byte quantised
//!   categories per page
//! - [`cache`] — the page cache / coordinator brokering all tuple-level
//!   CRUD between callers, the free-space map, and the block device
//!
//! Records are stored as opaque byte blobs and addressed by a stable
//! [`stor_common::types::TupleId`]; fragmentation, page allocation, cache
//! residency, and checksum verification are handled transparently.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Page layout and disk format.
pub mod page;

/// Block device and data-file header.
pub mod file;

/// Free-space map.
pub mod fsm;

/// Page cache and tuple-level coordinator.
pub mod cache;
