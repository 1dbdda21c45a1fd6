//! Page header format.
//!
//! Every page starts with a 40-byte header region of which the first 16
//! bytes are persisted fields:
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -----
//!   0       2   page_id (low 16 bits of the owning page's id)
//!   2       2   slot_id (reserved echo, always 0)
//!   4       2   free_start (first free byte after tuple data)
//!   6       2   free_end (first byte of the slot directory)
//!   8       2   slot_count
//!  10       1   page_type
//!  11       1   flags
//!  12       4   checksum (CRC32, excludes this field and bytes 16..40)
//!  16      24   reserved (zero on disk; shadows the runtime summary)
//! ```
//!
//! All multi-byte fields are little-endian.

use stor_common::constants::{PAGE_HEADER_SIZE, PAGE_SIZE, PERSISTED_HEADER_SIZE};
use stor_common::types::PageType;

use super::checksum::page_checksum;

/// Mutable view over a page's header bytes.
///
/// # Example
///
/// ```rust
/// use stor_storage::page::{PageHeader, PAGE_SIZE, PAGE_HEADER_SIZE};
///
/// let mut buffer = vec![0u8; PAGE_SIZE];
/// let mut header = PageHeader::new(&mut buffer);
/// header.initialize(7);
/// assert_eq!(header.page_id(), 7);
/// assert_eq!(header.free_start() as usize, PAGE_HEADER_SIZE);
/// ```
#[derive(Debug)]
pub struct PageHeader<'a> {
    data: &'a mut [u8],
}

impl<'a> PageHeader<'a> {
    /// Creates a header view into the given buffer.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is smaller than the header region.
    #[inline]
    pub fn new(data: &'a mut [u8]) -> Self {
        assert!(
            data.len() >= PAGE_HEADER_SIZE,
            "buffer too small for page header"
        );
        Self { data }
    }

    /// Initialises a fresh page header.
    ///
    /// The data area is empty (free_start at the header boundary) and the
    /// slot directory is empty (free_end at the page end).
    pub fn initialize(&mut self, page_id: u16) {
        self.set_page_id(page_id);
        self.set_slot_id(0);
        self.set_free_start(PAGE_HEADER_SIZE as u16);
        self.set_free_end(self.data.len() as u16);
        self.set_slot_count(0);
        self.set_page_type(PageType::Data);
        self.set_flags(0);
        self.set_checksum(0);
    }

    /// Returns the page id echo.
    #[inline]
    pub fn page_id(&self) -> u16 {
        u16::from_le_bytes([self.data[0], self.data[1]])
    }

    /// Sets the page id echo.
    #[inline]
    pub fn set_page_id(&mut self, page_id: u16) {
        self.data[0..2].copy_from_slice(&page_id.to_le_bytes());
    }

    /// Returns the reserved slot id echo.
    #[inline]
    pub fn slot_id(&self) -> u16 {
        u16::from_le_bytes([self.data[2], self.data[3]])
    }

    /// Sets the reserved slot id echo.
    #[inline]
    pub fn set_slot_id(&mut self, slot_id: u16) {
        self.data[2..4].copy_from_slice(&slot_id.to_le_bytes());
    }

    /// Returns the free-area start offset (end of tuple data).
    #[inline]
    pub fn free_start(&self) -> u16 {
        u16::from_le_bytes([self.data[4], self.data[5]])
    }

    /// Sets the free-area start offset.
    #[inline]
    pub fn set_free_start(&mut self, offset: u16) {
        self.data[4..6].copy_from_slice(&offset.to_le_bytes());
    }

    /// Returns the free-area end offset (start of the slot directory).
    #[inline]
    pub fn free_end(&self) -> u16 {
        u16::from_le_bytes([self.data[6], self.data[7]])
    }

    /// Sets the free-area end offset.
    #[inline]
    pub fn set_free_end(&mut self, offset: u16) {
        self.data[6..8].copy_from_slice(&offset.to_le_bytes());
    }

    /// Returns the slot count.
    #[inline]
    pub fn slot_count(&self) -> u16 {
        u16::from_le_bytes([self.data[8], self.data[9]])
    }

    /// Sets the slot count.
    #[inline]
    pub fn set_slot_count(&mut self, count: u16) {
        self.data[8..10].copy_from_slice(&count.to_le_bytes());
    }

    /// Returns the page type tag.
    #[inline]
    pub fn page_type(&self) -> PageType {
        PageType::from_u8(self.data[10]).unwrap_or_default()
    }

    /// Sets the page type tag.
    #[inline]
    pub fn set_page_type(&mut self, page_type: PageType) {
        self.data[10] = page_type as u8;
    }

    /// Returns the header flags byte.
    #[inline]
    pub fn flags(&self) -> u8 {
        self.data[11]
    }

    /// Sets the header flags byte.
    #[inline]
    pub fn set_flags(&mut self, flags: u8) {
        self.data[11] = flags;
    }

    /// Returns the stored checksum.
    #[inline]
    pub fn checksum(&self) -> u32 {
        let bytes: [u8; 4] = self.data[12..16].try_into().unwrap();
        u32::from_le_bytes(bytes)
    }

    /// Sets the checksum field.
    #[inline]
    pub fn set_checksum(&mut self, checksum: u32) {
        self.data[12..16].copy_from_slice(&checksum.to_le_bytes());
    }

    /// Computes and stores the page checksum.
    ///
    /// Call after all other modifications to the page are complete.
    pub fn update_checksum(&mut self) {
        let checksum = page_checksum(self.data);
        self.set_checksum(checksum);
    }

    /// Verifies the stored checksum against the page contents.
    pub fn verify_checksum(&self) -> bool {
        self.checksum() == page_checksum(self.data)
    }

    /// Returns the contiguous free space between data area and directory.
    #[inline]
    pub fn free_space(&self) -> usize {
        let start = self.free_start() as usize;
        let end = self.free_end() as usize;
        end.saturating_sub(start)
    }
}

/// Read-only page header view.
#[derive(Debug)]
pub struct PageHeaderRef<'a> {
    data: &'a [u8],
}

impl<'a> PageHeaderRef<'a> {
    /// Creates a read-only header view.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is smaller than the header region.
    #[inline]
    pub fn new(data: &'a [u8]) -> Self {
        assert!(
            data.len() >= PAGE_HEADER_SIZE,
            "buffer too small for page header"
        );
        Self { data }
    }

    /// Returns the page id echo.
    #[inline]
    pub fn page_id(&self) -> u16 {
        u16::from_le_bytes([self.data[0], self.data[1]])
    }

    /// Returns the free-area start offset.
    #[inline]
    pub fn free_start(&self) -> u16 {
        u16::from_le_bytes([self.data[4], self.data[5]])
    }

    /// Returns the free-area end offset.
    #[inline]
    pub fn free_end(&self) -> u16 {
        u16::from_le_bytes([self.data[6], self.data[7]])
    }

    /// Returns the slot count.
    #[inline]
    pub fn slot_count(&self) -> u16 {
        u16::from_le_bytes([self.data[8], self.data[9]])
    }

    /// Returns the page type tag.
    #[inline]
    pub fn page_type(&self) -> PageType {
        PageType::from_u8(self.data[10]).unwrap_or_default()
    }

    /// Returns the header flags byte.
    #[inline]
    pub fn flags(&self) -> u8 {
        self.data[11]
    }

    /// Returns the stored checksum.
    #[inline]
    pub fn checksum(&self) -> u32 {
        let bytes: [u8; 4] = self.data[12..16].try_into().unwrap();
        u32::from_le_bytes(bytes)
    }

    /// Returns the contiguous free space between data area and directory.
    #[inline]
    pub fn free_space(&self) -> usize {
        let start = self.free_start() as usize;
        let end = self.free_end() as usize;
        end.saturating_sub(start)
    }

    /// Verifies the stored checksum against the page contents.
    pub fn verify_checksum(&self) -> bool {
        self.checksum() == page_checksum(self.data)
    }
}

/// Compile-time check that the persisted field layout fills exactly the
/// persisted header size.
const _: () = assert!(PERSISTED_HEADER_SIZE == 16);
const _: () = assert!(PAGE_HEADER_SIZE <= PAGE_SIZE);
