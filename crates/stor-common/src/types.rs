//! Core identifier types for stordb.
//!
//! These types provide type-safe wrappers around the numeric identifiers
//! used throughout the storage engine, preventing accidental misuse of
//! different ID types.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::INVALID_SLOT_ID;

/// Page identifier - uniquely identifies a page within a data file.
///
/// Page IDs are allocated monotonically by the block device starting at 1
/// and are never reused within a file's lifetime. The value 0 is reserved
/// to mean "no page".
///
/// # Example
///
/// ```rust
/// use stor_common::types::PageId;
///
/// let page = PageId::new(42);
/// assert_eq!(page.as_u32(), 42);
/// assert!(page.is_valid());
/// assert!(!PageId::INVALID.is_valid());
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct PageId(u32);

impl PageId {
    /// Invalid page ID constant, used as a sentinel value.
    pub const INVALID: Self = Self(0);

    /// First valid page ID (page 0 is reserved).
    pub const FIRST: Self = Self(1);

    /// Creates a new `PageId` from a raw u32 value.
    #[inline]
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw u32 value.
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Returns the next page ID.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Checks if this is a valid page ID.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0
    }
}

impl fmt::Debug for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "PageId(INVALID)")
        } else {
            write!(f, "PageId({})", self.0)
        }
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for PageId {
    #[inline]
    fn from(id: u32) -> Self {
        Self::new(id)
    }
}

impl From<PageId> for u32 {
    #[inline]
    fn from(id: PageId) -> Self {
        id.0
    }
}

/// A slot ID is an index into a page's slot directory.
///
/// Slot IDs are local to a page. The value 65535 ([`INVALID_SLOT_ID`])
/// is reserved to mean "no slot". Slot IDs are stable across compaction.
pub type SlotId = u16;

/// Tuple identifier - the stable external handle for a stored record.
///
/// A tuple ID is the pair (page, slot). It may resolve transitively via
/// forwarding pointers; callers always store the original tuple ID and the
/// engine follows the chain on every access.
///
/// # Example
///
/// ```rust
/// use stor_common::types::{PageId, TupleId};
///
/// let id = TupleId::new(PageId::new(3), 7);
/// assert!(id.is_valid());
/// assert!(!TupleId::INVALID.is_valid());
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TupleId {
    /// The page holding the tuple.
    pub page_id: PageId,
    /// The slot within the page.
    pub slot_id: SlotId,
}

impl TupleId {
    /// The reserved invalid tuple ID (0, 0), returned by chain walkers on
    /// cycles and unresolvable slots.
    pub const INVALID: Self = Self {
        page_id: PageId::INVALID,
        slot_id: 0,
    };

    /// Creates a new tuple ID.
    #[inline]
    #[must_use]
    pub const fn new(page_id: PageId, slot_id: SlotId) -> Self {
        Self { page_id, slot_id }
    }

    /// Checks if this tuple ID names a real (page, slot) pair.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.page_id.is_valid() && self.slot_id != INVALID_SLOT_ID
    }
}

impl fmt::Debug for TupleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TupleId({}, {})", self.page_id, self.slot_id)
    }
}

impl fmt::Display for TupleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.page_id, self.slot_id)
    }
}

/// Types of pages in a stordb data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PageType {
    /// Data page (stores tuples in slotted format).
    Data = 0,
    /// Index page (reserved for a future index layer).
    Index = 1,
    /// Free-space-map page.
    FreeSpace = 2,
}

impl PageType {
    /// Creates a `PageType` from a raw byte value.
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Data),
            1 => Some(Self::Index),
            2 => Some(Self::FreeSpace),
            _ => None,
        }
    }
}

impl Default for PageType {
    fn default() -> Self {
        Self::Data
    }
}

impl fmt::Display for PageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Data => write!(f, "Data"),
            Self::Index => write!(f, "Index"),
            Self::FreeSpace => write!(f, "FreeSpace"),
        }
    }
}
