//! The owning heap page.
//!
//! [`HeapPage`] owns one page-size-aligned buffer and implements the
//! slotted-page protocol: insert with deleted-slot reuse, delete,
//! update-in-place, forwarding for update spill, and slot-id-preserving
//! compaction.
//!
//! The derived per-page summary (deleted slot count, fragmented bytes,
//! dirty flag) lives in a sibling [`RuntimeState`] struct beside the
//! buffer. It is never serialised or checksummed; after a disk read it is
//! rebuilt with [`HeapPage::refresh_runtime_stats`].

use tracing::warn;

use stor_common::constants::{MAX_TUPLE_SIZE, PAGE_HEADER_SIZE, PAGE_SIZE, SLOT_ENTRY_SIZE};
use stor_common::memory::AlignedBuffer;
use stor_common::types::{PageId, SlotId, TupleId};

use super::checksum::page_checksum;
use super::header::{PageHeader, PageHeaderRef};
use super::slot::{slot_offset, SlotEntry, SLOT_VALID};

/// In-memory summary of a page, derived from the slot directory.
///
/// Not part of the on-disk format: zeroed bytes shadow it in the reserved
/// header region, and it is rebuilt by a directory scan on every load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeState {
    /// Number of slots below `slot_count` with the VALID bit clear.
    pub deleted_tuples: u16,
    /// Total length of dead tuple bytes (deleted and forwarded slots).
    pub fragmented_bytes: usize,
    /// Whether the page has been modified since it was last written.
    pub dirty: bool,
}

/// A slotted heap page owning its aligned 8 KiB buffer.
///
/// # Example
///
/// ```rust
/// use stor_storage::page::HeapPage;
///
/// let mut page = HeapPage::new();
/// let slot = page.insert_tuple(b"hello").unwrap();
/// assert_eq!(page.tuple(slot).unwrap(), b"hello");
/// assert!(page.verify_checksum());
/// ```
pub struct HeapPage {
    buf: AlignedBuffer,
    runtime: RuntimeState,
}

impl HeapPage {
    /// Creates a fresh, empty page.
    ///
    /// The header is initialised with page id 0 (unassigned), an empty data
    /// area and slot directory, and a valid checksum. New pages start
    /// dirty.
    #[must_use]
    pub fn new() -> Self {
        let mut buf = AlignedBuffer::for_page();
        {
            let mut header = PageHeader::new(&mut buf);
            header.initialize(0);
            header.update_checksum();
        }
        Self {
            buf,
            runtime: RuntimeState {
                deleted_tuples: 0,
                fragmented_bytes: 0,
                dirty: true,
            },
        }
    }

    // =========================================================================
    // Header accessors
    // =========================================================================

    /// Returns the page id echo stored in the header.
    #[inline]
    pub fn page_id(&self) -> u16 {
        self.header().page_id()
    }

    /// Stamps the page with its id (low 16 bits persisted as the echo).
    pub fn set_page_id(&mut self, page_id: PageId) {
        let echo = (page_id.as_u32() & 0xFFFF) as u16;
        let mut header = PageHeader::new(&mut self.buf);
        header.set_page_id(echo);
        header.update_checksum();
        self.runtime.dirty = true;
    }

    /// Returns the free-area start offset.
    #[inline]
    pub fn free_start(&self) -> u16 {
        self.header().free_start()
    }

    /// Returns the free-area end offset.
    #[inline]
    pub fn free_end(&self) -> u16 {
        self.header().free_end()
    }

    /// Returns the slot count (including deleted slots).
    #[inline]
    pub fn slot_count(&self) -> u16 {
        self.header().slot_count()
    }

    /// Returns the stored checksum.
    #[inline]
    pub fn checksum(&self) -> u32 {
        self.header().checksum()
    }

    /// Returns the contiguous free space between data area and directory.
    #[inline]
    pub fn free_space(&self) -> usize {
        self.header().free_space()
    }

    /// Returns the number of deleted slots.
    #[inline]
    pub fn deleted_tuple_count(&self) -> u16 {
        self.runtime.deleted_tuples
    }

    /// Returns the total dead bytes awaiting compaction.
    #[inline]
    pub fn fragmented_bytes(&self) -> usize {
        self.runtime.fragmented_bytes
    }

    /// Returns true if the page has unwritten modifications.
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.runtime.dirty
    }

    /// Sets or clears the dirty flag.
    #[inline]
    pub fn set_dirty(&mut self, dirty: bool) {
        self.runtime.dirty = dirty;
    }

    /// Returns the runtime summary.
    #[inline]
    pub fn runtime(&self) -> RuntimeState {
        self.runtime
    }

    /// Returns the raw page bytes.
    #[inline]
    pub fn buffer(&self) -> &[u8] {
        &self.buf
    }

    /// Returns the raw page bytes mutably (device I/O path).
    #[inline]
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    // =========================================================================
    // Slot directory
    // =========================================================================

    /// Reads a slot entry, including entries of deleted slots.
    pub fn slot_entry(&self, slot_id: SlotId) -> Option<SlotEntry> {
        if slot_id >= self.slot_count() {
            return None;
        }
        let offset = slot_offset(slot_id);
        Some(SlotEntry::from_bytes(&self.buf[offset..offset + 8]))
    }

    fn write_slot_entry(&mut self, slot_id: SlotId, entry: SlotEntry) {
        let offset = slot_offset(slot_id);
        self.buf[offset..offset + 8].copy_from_slice(&entry.to_bytes());
    }

    /// Returns true if the slot exists and its VALID bit is set.
    pub fn is_slot_valid(&self, slot_id: SlotId) -> bool {
        self.slot_entry(slot_id).is_some_and(|e| e.is_valid())
    }

    /// Returns true if the slot exists and its FORWARDED bit is set.
    pub fn is_slot_forwarded(&self, slot_id: SlotId) -> bool {
        self.slot_entry(slot_id).is_some_and(|e| e.is_forwarded())
    }

    /// Decodes the slot's forwarding pointer, or the invalid tuple id when
    /// the slot does not exist.
    pub fn forwarding_pointer(&self, slot_id: SlotId) -> TupleId {
        self.slot_entry(slot_id)
            .map_or(TupleId::INVALID, |e| e.forward_target())
    }

    /// Returns the lowest-numbered deleted slot, if any.
    fn find_deleted_slot(&self) -> Option<SlotId> {
        (0..self.slot_count()).find(|&id| !self.is_slot_valid(id))
    }

    // =========================================================================
    // Tuple operations
    // =========================================================================

    /// Returns the tuple bytes stored in a valid slot.
    pub fn tuple(&self, slot_id: SlotId) -> Option<&[u8]> {
        let entry = self.slot_entry(slot_id)?;
        if !entry.is_valid() {
            return None;
        }

        let start = entry.offset as usize;
        let end = start + entry.length as usize;
        if end > self.buf.len() {
            return None;
        }
        Some(&self.buf[start..end])
    }

    /// Inserts a tuple, returning its slot id.
    ///
    /// The lowest-numbered deleted slot is reused when one exists
    /// (required space = tuple length); otherwise a new directory entry is
    /// appended (required space = tuple length + entry size). Returns
    /// `None` for empty or oversized input or insufficient space; a failed
    /// insert leaves the page unchanged.
    pub fn insert_tuple(&mut self, data: &[u8]) -> Option<SlotId> {
        if data.is_empty() || data.len() > MAX_TUPLE_SIZE {
            return None;
        }

        let reused_slot = self.find_deleted_slot();
        let required = match reused_slot {
            Some(_) => data.len(),
            None => data.len() + SLOT_ENTRY_SIZE,
        };

        let available = self.free_space();
        if available < required {
            warn!(
                page_id = self.page_id(),
                required, available, "insufficient space on page"
            );
            return None;
        }

        let tuple_offset = self.free_start();

        let slot_id = match reused_slot {
            Some(slot_id) => {
                // Reclaim the deleted slot: its old length leaves the
                // fragmentation pool.
                let old = self.slot_entry(slot_id)?;
                self.write_slot_entry(
                    slot_id,
                    SlotEntry::valid(tuple_offset, data.len() as u16),
                );
                self.runtime.deleted_tuples -= 1;
                self.runtime.fragmented_bytes -= old.length as usize;
                slot_id
            }
            None => self.add_slot(tuple_offset, data.len() as u16)?,
        };

        let start = tuple_offset as usize;
        self.buf[start..start + data.len()].copy_from_slice(data);

        {
            let mut header = PageHeader::new(&mut self.buf);
            let new_free_start = tuple_offset + data.len() as u16;
            header.set_free_start(new_free_start);
            header.update_checksum();
        }
        self.runtime.dirty = true;

        Some(slot_id)
    }

    /// Appends a new slot entry at the tail of the directory.
    fn add_slot(&mut self, offset: u16, length: u16) -> Option<SlotId> {
        let new_slot_id = self.slot_count();
        let new_slot_offset = slot_offset(new_slot_id);

        if new_slot_offset <= self.free_start() as usize {
            return None;
        }

        self.write_slot_entry(new_slot_id, SlotEntry::valid(offset, length));

        let mut header = PageHeader::new(&mut self.buf);
        header.set_slot_count(new_slot_id + 1);
        header.set_free_end(new_slot_offset as u16);

        Some(new_slot_id)
    }

    /// Deletes the tuple in a slot.
    ///
    /// Double-deleting is an error distinct from success. The tuple bytes
    /// stay in place as dead space until compaction.
    pub fn delete_tuple(&mut self, slot_id: SlotId) -> Result<(), DeleteError> {
        let entry = self.slot_entry(slot_id).ok_or(DeleteError::OutOfRange)?;
        if !entry.is_valid() {
            return Err(DeleteError::AlreadyDeleted);
        }

        let mut cleared = entry;
        cleared.flags &= !SLOT_VALID;
        self.write_slot_entry(slot_id, cleared);

        self.runtime.deleted_tuples += 1;
        self.runtime.fragmented_bytes += entry.length as usize;
        self.runtime.dirty = true;
        self.update_checksum();

        Ok(())
    }

    /// Overwrites a tuple in place with data no longer than the current
    /// slot length.
    ///
    /// The bytes between the new and old length become unreachable; they
    /// are counted as fragmentation only once the slot is deleted or the
    /// page compacted.
    pub fn update_in_place(&mut self, slot_id: SlotId, data: &[u8]) -> Result<(), UpdateError> {
        if data.is_empty() {
            return Err(UpdateError::EmptyData);
        }

        let entry = self.slot_entry(slot_id).ok_or(UpdateError::InvalidSlot)?;
        if !entry.is_valid() {
            return Err(UpdateError::InvalidSlot);
        }
        if entry.is_forwarded() {
            return Err(UpdateError::Forwarded);
        }
        if data.len() > entry.length as usize {
            return Err(UpdateError::TooLarge {
                size: data.len(),
                capacity: entry.length as usize,
            });
        }

        let start = entry.offset as usize;
        self.buf[start..start + data.len()].copy_from_slice(data);

        let mut updated = entry;
        updated.length = data.len() as u16;
        self.write_slot_entry(slot_id, updated);

        self.runtime.dirty = true;
        self.update_checksum();

        Ok(())
    }

    /// Redirects a slot to a tuple on another page.
    ///
    /// The slot keeps its VALID bit, gains FORWARDED, and drops its length
    /// to zero; the old tuple bytes become dead space immediately.
    pub fn mark_forwarded(&mut self, slot_id: SlotId, target: TupleId) -> Result<(), UpdateError> {
        let entry = self.slot_entry(slot_id).ok_or(UpdateError::InvalidSlot)?;
        if !entry.is_valid() {
            return Err(UpdateError::InvalidSlot);
        }

        let old_length = entry.length;
        let mut forwarded = entry;
        forwarded.length = 0;
        forwarded.set_forward_target(target);
        self.write_slot_entry(slot_id, forwarded);

        self.runtime.fragmented_bytes += old_length as usize;
        self.runtime.dirty = true;
        self.update_checksum();

        Ok(())
    }

    /// Follows a forwarding chain starting at a slot on this page.
    ///
    /// Walks up to `max_hops` hops. A hop that leaves this page is returned
    /// unchanged for the coordinator to resolve. Cycles, invalid slots
    /// encountered mid-chain, and hop exhaustion all yield
    /// [`TupleId::INVALID`].
    pub fn follow_forwarding_chain(&self, slot_id: SlotId, max_hops: usize) -> TupleId {
        let slot_count = self.slot_count();
        if slot_count == 0 || slot_id >= slot_count {
            return TupleId::INVALID;
        }

        // Bounded by the hop limit, so a small vector suffices for cycle
        // detection.
        let mut visited: Vec<(u32, SlotId)> = Vec::with_capacity(max_hops + 1);

        let own_page = u32::from(self.page_id());
        let mut current_page = own_page;
        let mut current_slot = slot_id;

        for hop in 0..=max_hops {
            if visited.contains(&(current_page, current_slot)) {
                warn!(
                    page_id = current_page,
                    slot_id = current_slot,
                    "circular forwarding chain detected"
                );
                return TupleId::INVALID;
            }
            visited.push((current_page, current_slot));

            if current_page != own_page {
                // Crossed to another page; the coordinator continues there.
                return TupleId::new(PageId::new(current_page), current_slot);
            }

            let Some(entry) = self.slot_entry(current_slot) else {
                return TupleId::INVALID;
            };
            if !entry.is_valid() {
                return TupleId::INVALID;
            }
            if !entry.is_forwarded() {
                return TupleId::new(PageId::new(current_page), current_slot);
            }
            if hop >= max_hops {
                warn!(max_hops, "forwarding chain exceeded hop limit");
                return TupleId::INVALID;
            }

            let next = entry.forward_target();
            current_page = next.page_id.as_u32();
            current_slot = next.slot_id;
        }

        TupleId::INVALID
    }

    // =========================================================================
    // Compaction
    // =========================================================================

    /// Returns true if compaction would pay off.
    ///
    /// Requires at least one deletion, plus high fragmentation (≥ 50% of
    /// used space), many deleted slots (≥ 50% of the directory), or a
    /// nearly full page whose fragmentation would admit a small tuple.
    pub fn should_compact(&self) -> bool {
        if self.runtime.deleted_tuples == 0 {
            return false;
        }

        let used_space = self.free_start() as usize - PAGE_HEADER_SIZE;
        if used_space > 0 && self.runtime.fragmented_bytes * 100 / used_space >= 50 {
            return true;
        }

        if u32::from(self.runtime.deleted_tuples) * 2 >= u32::from(self.slot_count()) {
            return true;
        }

        let available = self.free_space();
        available < 100 && available + self.runtime.fragmented_bytes >= 100
    }

    /// Compacts the page, relocating valid tuple bytes to eliminate
    /// fragmentation.
    ///
    /// Slot identifiers are preserved: every valid slot keeps its id and
    /// points at its relocated bytes, deleted slots are zeroed in place,
    /// and the directory is not shrunk, so external tuple ids and
    /// forwarding pointers naming this page remain correct. Only a fully
    /// deleted page releases its directory.
    pub fn compact(&mut self) {
        if self.runtime.deleted_tuples == 0 {
            return;
        }

        if self.runtime.deleted_tuples == self.slot_count() {
            // Everything is dead: release the data area and the directory.
            for slot_id in 0..self.slot_count() {
                self.write_slot_entry(slot_id, SlotEntry::default());
            }
            let mut header = PageHeader::new(&mut self.buf);
            header.set_free_start(PAGE_HEADER_SIZE as u16);
            header.set_free_end(PAGE_SIZE as u16);
            header.set_slot_count(0);
            header.update_checksum();

            self.runtime.deleted_tuples = 0;
            self.runtime.fragmented_bytes = 0;
            self.runtime.dirty = true;
            return;
        }

        let slot_count = self.slot_count();
        let mut survivors: Vec<(SlotId, SlotEntry)> =
            Vec::with_capacity((slot_count - self.runtime.deleted_tuples) as usize);
        for slot_id in 0..slot_count {
            if let Some(entry) = self.slot_entry(slot_id) {
                if entry.is_valid() {
                    survivors.push((slot_id, entry));
                }
            }
        }

        // Copy survivors densely into a scratch buffer, then lay them back
        // down starting at the header boundary.
        let mut scratch = vec![0u8; self.free_start() as usize - PAGE_HEADER_SIZE];
        let mut new_offset = 0usize;
        for (_, entry) in survivors.iter_mut() {
            let start = entry.offset as usize;
            let len = entry.length as usize;
            scratch[new_offset..new_offset + len].copy_from_slice(&self.buf[start..start + len]);
            entry.offset = (PAGE_HEADER_SIZE + new_offset) as u16;
            new_offset += len;
        }
        self.buf[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + new_offset]
            .copy_from_slice(&scratch[..new_offset]);

        // Rewrite survivors at their original slot ids; zero the rest.
        for (slot_id, entry) in &survivors {
            self.write_slot_entry(*slot_id, *entry);
        }
        for slot_id in 0..slot_count {
            if let Some(entry) = self.slot_entry(slot_id) {
                if !entry.is_valid() {
                    self.write_slot_entry(slot_id, SlotEntry::default());
                }
            }
        }

        {
            let mut header = PageHeader::new(&mut self.buf);
            header.set_free_start((PAGE_HEADER_SIZE + new_offset) as u16);
            header.update_checksum();
        }

        self.runtime.deleted_tuples = 0;
        self.runtime.fragmented_bytes = 0;
        self.runtime.dirty = true;
    }

    // =========================================================================
    // Checksums and runtime summary
    // =========================================================================

    /// Recomputes and stores the page checksum.
    pub fn update_checksum(&mut self) {
        let checksum = page_checksum(&self.buf);
        PageHeader::new(&mut self.buf).set_checksum(checksum);
    }

    /// Verifies the stored checksum against the page contents.
    pub fn verify_checksum(&self) -> bool {
        self.header().verify_checksum()
    }

    /// Rebuilds the runtime summary by scanning the slot directory.
    ///
    /// Called after the page bytes are loaded from disk; the page starts
    /// clean.
    pub fn refresh_runtime_stats(&mut self) {
        let mut deleted = 0u16;
        let mut fragmented = 0usize;
        for slot_id in 0..self.slot_count() {
            if let Some(entry) = self.slot_entry(slot_id) {
                if !entry.is_valid() {
                    deleted += 1;
                    fragmented += entry.length as usize;
                }
            }
        }
        self.runtime = RuntimeState {
            deleted_tuples: deleted,
            fragmented_bytes: fragmented,
            dirty: false,
        };
    }

    fn header(&self) -> PageHeaderRef<'_> {
        PageHeaderRef::new(&self.buf)
    }
}

impl Default for HeapPage {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HeapPage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeapPage")
            .field("page_id", &self.page_id())
            .field("slot_count", &self.slot_count())
            .field("free_space", &self.free_space())
            .field("runtime", &self.runtime)
            .finish()
    }
}

/// Failure modes of [`HeapPage::delete_tuple`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteError {
    /// The slot id is at or beyond the slot count.
    OutOfRange,
    /// The slot exists but was already deleted.
    AlreadyDeleted,
}

/// Failure modes of [`HeapPage::update_in_place`] and
/// [`HeapPage::mark_forwarded`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateError {
    /// Replacement data is empty.
    EmptyData,
    /// The slot is out of range or deleted.
    InvalidSlot,
    /// The slot is already forwarded; in-place updates are not allowed.
    Forwarded,
    /// Replacement data exceeds the slot's current length.
    TooLarge {
        /// Requested size.
        size: usize,
        /// Current slot capacity.
        capacity: usize,
    },
}
