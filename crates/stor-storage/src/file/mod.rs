//! Block device layer for stordb.
//!
//! A [`BlockDevice`] is a scoped acquisition of a single data file exposing
//! fixed-size page reads and writes at page-indexed offsets past a 512-byte
//! file header, plus monotonic page-id allocation.
//!
//! Reads and writes use positional I/O (`pread`/`pwrite` style), which
//! never mutates a shared file cursor, so page I/O needs no locking; only
//! open, close, and allocation take the metadata mutex.

mod device;
mod error;

pub use device::{BlockDevice, FileHeader};
pub use error::{DeviceError, DeviceResult};
