//! Non-owning page view.
//!
//! [`PageView`] is a read/write façade over an externally owned page
//! buffer. The block device uses it to verify and recompute checksums in
//! caller-provided buffers without taking ownership, and to zero the
//! reserved runtime region before a write.

use stor_common::constants::{PAGE_HEADER_SIZE, PAGE_SIZE, PERSISTED_HEADER_SIZE};
use stor_common::types::SlotId;

use super::header::{PageHeader, PageHeaderRef};
use super::slot::{slot_offset, SlotEntry};

/// A non-owning view over a full page buffer.
///
/// The caller must ensure the buffer outlives the view; the view never
/// frees or reallocates it.
///
/// # Example
///
/// ```rust
/// use stor_storage::page::{PageView, PAGE_SIZE};
///
/// let mut buffer = vec![0u8; PAGE_SIZE];
/// let mut view = PageView::new(&mut buffer);
/// view.update_checksum();
/// assert!(view.verify_checksum());
/// ```
pub struct PageView<'a> {
    data: &'a mut [u8],
}

impl<'a> PageView<'a> {
    /// Creates a view over a page buffer.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is not exactly one page.
    #[inline]
    pub fn new(data: &'a mut [u8]) -> Self {
        assert_eq!(data.len(), PAGE_SIZE, "buffer must be exactly one page");
        Self { data }
    }

    /// Returns a mutable header view.
    #[inline]
    pub fn header_mut(&mut self) -> PageHeader<'_> {
        PageHeader::new(self.data)
    }

    /// Returns a read-only header view.
    #[inline]
    pub fn header(&self) -> PageHeaderRef<'_> {
        PageHeaderRef::new(self.data)
    }

    /// Reads a slot directory entry without range checks beyond the
    /// directory bound.
    pub fn slot(&self, slot_id: SlotId) -> Option<SlotEntry> {
        if slot_id >= self.header().slot_count() {
            return None;
        }
        let offset = slot_offset(slot_id);
        Some(SlotEntry::from_bytes(&self.data[offset..offset + 8]))
    }

    /// Zeroes the reserved runtime region (bytes 16..40).
    ///
    /// On-disk pages always carry zeros here; the in-memory runtime summary
    /// lives beside the buffer, never in it.
    pub fn zero_runtime_region(&mut self) {
        self.data[PERSISTED_HEADER_SIZE..PAGE_HEADER_SIZE].fill(0);
    }

    /// Recomputes and stores the page checksum.
    pub fn update_checksum(&mut self) {
        self.header_mut().update_checksum();
    }

    /// Verifies the stored checksum.
    pub fn verify_checksum(&self) -> bool {
        self.header().verify_checksum()
    }

    /// Scans the slot directory and returns
    /// `(deleted_slot_count, fragmented_bytes)`.
    ///
    /// Used to rebuild the runtime summary after a page is loaded from
    /// disk.
    pub fn scan_directory(&self) -> (u16, usize) {
        let slot_count = self.header().slot_count();
        let mut deleted = 0u16;
        let mut fragmented = 0usize;

        for slot_id in 0..slot_count {
            let offset = slot_offset(slot_id);
            let entry = SlotEntry::from_bytes(&self.data[offset..offset + 8]);
            if !entry.is_valid() {
                deleted += 1;
                fragmented += entry.length as usize;
            }
        }

        (deleted, fragmented)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::slot::SLOT_VALID;

    fn create_test_page() -> Vec<u8> {
        vec![0u8; PAGE_SIZE]
    }

    fn write_slot(buffer: &mut [u8], slot_id: SlotId, entry: SlotEntry) {
        let offset = slot_offset(slot_id);
        buffer[offset..offset + 8].copy_from_slice(&entry.to_bytes());
    }

    #[test]
    fn test_checksum_roundtrip() {
        let mut buffer = create_test_page();
        buffer[200] = 0x55;

        let mut view = PageView::new(&mut buffer);
        view.update_checksum();
        assert!(view.verify_checksum());

        buffer[200] = 0x56;
        let mut view = PageView::new(&mut buffer);
        assert!(!view.verify_checksum());
        view.update_checksum();
        assert!(view.verify_checksum());
    }

    #[test]
    fn test_zero_runtime_region() {
        let mut buffer = create_test_page();
        for b in &mut buffer[PERSISTED_HEADER_SIZE..PAGE_HEADER_SIZE] {
            *b = 0xCC;
        }

        let mut view = PageView::new(&mut buffer);
        view.zero_runtime_region();
        assert!(buffer[PERSISTED_HEADER_SIZE..PAGE_HEADER_SIZE]
            .iter()
            .all(|&b| b == 0));
    }

    #[test]
    fn test_scan_directory() {
        let mut buffer = create_test_page();
        {
            let mut view = PageView::new(&mut buffer);
            view.header_mut().set_slot_count(3);
        }

        // Slot 0 valid, slot 1 deleted with 120 dead bytes, slot 2 deleted
        // with 30 dead bytes.
        write_slot(&mut buffer, 0, SlotEntry::valid(40, 100));
        write_slot(
            &mut buffer,
            1,
            SlotEntry {
                offset: 140,
                length: 120,
                flags: 0,
                forward: [0; 3],
            },
        );
        write_slot(
            &mut buffer,
            2,
            SlotEntry {
                offset: 260,
                length: 30,
                flags: 0,
                forward: [0; 3],
            },
        );

        let view = PageView::new(&mut buffer);
        let (deleted, fragmented) = view.scan_directory();
        assert_eq!(deleted, 2);
        assert_eq!(fragmented, 150);
    }

    #[test]
    fn test_slot_out_of_range() {
        let mut buffer = create_test_page();
        {
            let mut view = PageView::new(&mut buffer);
            view.header_mut().set_slot_count(1);
        }
        write_slot(
            &mut buffer,
            0,
            SlotEntry {
                offset: 40,
                length: 10,
                flags: SLOT_VALID,
                forward: [0; 3],
            },
        );

        let view = PageView::new(&mut buffer);
        assert!(view.slot(0).is_some());
        assert!(view.slot(1).is_none());
    }

    #[test]
    #[should_panic(expected = "exactly one page")]
    fn test_wrong_size_panics() {
        let mut buffer = vec![0u8; 100];
        let _ = PageView::new(&mut buffer);
    }
}
