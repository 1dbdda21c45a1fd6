//! Page layout and disk format for stordb.
//!
//! All data is organised into fixed-size 8 KiB pages with a slotted layout:
//!
//! ```text
//! +----------------------+ 0
//! |    Page Header       |  40 bytes (16 persisted + 24 reserved)
//! +----------------------+ 40
//! |    Tuple Data        |  grows upward from the header
//! |        ↓             |
//! +----------------------+ free_start
//! |    Free Space        |
//! +----------------------+ free_end
//! |        ↑             |
//! |    Slot Directory    |  8-byte entries, grows downward from page end
//! +----------------------+ 8192
//! ```
//!
//! Tuple data and the slot directory grow toward each other. Slot N lives
//! at offset `PAGE_SIZE - (N + 1) * SLOT_ENTRY_SIZE`; slot identifiers are
//! stable across compaction so external tuple ids stay valid.

mod checksum;
mod header;
mod heap;
mod slot;
mod view;

pub use checksum::{crc32, page_checksum, Crc32};
pub use header::{PageHeader, PageHeaderRef};
pub use heap::{DeleteError, HeapPage, RuntimeState, UpdateError};
pub use slot::{slot_offset, SlotEntry, SLOT_COMPRESSED, SLOT_FORWARDED, SLOT_VALID};
pub use view::PageView;

pub use stor_common::constants::{
    MAX_TUPLE_SIZE, PAGE_HEADER_SIZE, PAGE_SIZE, PERSISTED_HEADER_SIZE, SLOT_ENTRY_SIZE,
};
