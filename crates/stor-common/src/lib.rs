//! # stor-common
//!
//! Common types, errors, and utilities for stordb.
//!
//! This crate provides the foundational types and abstractions used across
//! the storage engine:
//!
//! - **Types**: Core identifiers (`PageId`, `SlotId`, `TupleId`) and the
//!   page-type tag
//! - **Errors**: Unified error handling with `StorageError`
//! - **Constants**: On-disk format constants and system limits
//! - **Memory**: Page-aligned buffer allocation
//! - **Logging**: Process-wide tracing initialisation
//!
//! ## Example
//!
//! ```rust
//! use stor_common::types::{PageId, TupleId};
//! use stor_common::error::StorageResult;
//!
//! fn example() -> StorageResult<()> {
//!     let page_id = PageId::new(42);
//!     let tuple_id = TupleId::new(page_id, 0);
//!     assert!(tuple_id.is_valid());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod constants;
pub mod error;
pub mod logging;
pub mod memory;
pub mod types;

// Re-export commonly used items at the crate root
pub use constants::*;
pub use error::{ErrorKind, StorageError, StorageResult};
pub use types::{PageId, PageType, SlotId, TupleId};
