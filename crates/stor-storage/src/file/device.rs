//! The block device: page-granular I/O over a single data file.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info};

use stor_common::constants::{
    DATA_FILE_MAGIC, DATA_FILE_VERSION, FILE_HEADER_SIZE, PAGE_SIZE, TABLE_NAME_SIZE,
};
use stor_common::types::PageId;

use super::error::{DeviceError, DeviceResult};
use crate::page::{page_checksum, PageHeaderRef, PageView};

// Byte offsets within the 512-byte file header.
const OFF_MAGIC: usize = 0;
const OFF_VERSION: usize = 4;
const OFF_NEXT_PAGE_ID: usize = 8;
const OFF_TABLE_ID: usize = 428;
const OFF_PAGE_SIZE: usize = 432;
const OFF_PAGE_COUNT: usize = 436;
const OFF_TABLE_NAME: usize = 440;
const OFF_SCHEMA_LENGTH: usize = 504;
const OFF_SCHEMA_OFFSET: usize = 508;

/// The data-file header occupying the first 512 bytes of every file.
///
/// ```text
/// Offset  Size  Field
/// ------  ----  -----
///    0      4   magic "STOR"
///    4      4   format version
///    8      4   next page id
///   12    416   reserved
///  428      4   table id
///  432      4   page size (always 8192)
///  436      4   page count
///  440     64   table name, NUL-padded
///  504      4   schema length
///  508      4   schema offset
/// ```
///
/// Pages follow at byte 512, addressed as
/// `FILE_HEADER_SIZE + page_id * PAGE_SIZE`; page id 0 is reserved and
/// never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    /// Format version.
    pub version: u32,
    /// Next page id to hand out.
    pub next_page_id: u32,
    /// Owning table's identifier.
    pub table_id: u32,
    /// Page size recorded in the file.
    pub page_size: u32,
    /// Number of allocated pages.
    pub page_count: u32,
    /// Table name, NUL-padded to 64 bytes.
    pub table_name: [u8; TABLE_NAME_SIZE],
    /// Length of the serialized schema blob.
    pub schema_length: u32,
    /// Offset of the serialized schema blob.
    pub schema_offset: u32,
}

impl FileHeader {
    /// Creates the header for a freshly created file.
    ///
    /// Page id 0 is reserved, so allocation starts at 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            version: DATA_FILE_VERSION,
            next_page_id: 1,
            table_id: 0,
            page_size: PAGE_SIZE as u32,
            page_count: 0,
            table_name: [0; TABLE_NAME_SIZE],
            schema_length: 0,
            schema_offset: 0,
        }
    }

    /// Encodes the header into its on-disk bytes.
    #[must_use]
    pub fn encode(&self) -> [u8; FILE_HEADER_SIZE] {
        let mut bytes = [0u8; FILE_HEADER_SIZE];
        bytes[OFF_MAGIC..OFF_MAGIC + 4].copy_from_slice(&DATA_FILE_MAGIC);
        bytes[OFF_VERSION..OFF_VERSION + 4].copy_from_slice(&self.version.to_le_bytes());
        bytes[OFF_NEXT_PAGE_ID..OFF_NEXT_PAGE_ID + 4]
            .copy_from_slice(&self.next_page_id.to_le_bytes());
        bytes[OFF_TABLE_ID..OFF_TABLE_ID + 4].copy_from_slice(&self.table_id.to_le_bytes());
        bytes[OFF_PAGE_SIZE..OFF_PAGE_SIZE + 4].copy_from_slice(&self.page_size.to_le_bytes());
        bytes[OFF_PAGE_COUNT..OFF_PAGE_COUNT + 4].copy_from_slice(&self.page_count.to_le_bytes());
        bytes[OFF_TABLE_NAME..OFF_TABLE_NAME + TABLE_NAME_SIZE].copy_from_slice(&self.table_name);
        bytes[OFF_SCHEMA_LENGTH..OFF_SCHEMA_LENGTH + 4]
            .copy_from_slice(&self.schema_length.to_le_bytes());
        bytes[OFF_SCHEMA_OFFSET..OFF_SCHEMA_OFFSET + 4]
            .copy_from_slice(&self.schema_offset.to_le_bytes());
        bytes
    }

    /// Decodes a header, verifying the magic bytes.
    pub fn decode(bytes: &[u8; FILE_HEADER_SIZE], path: &Path) -> DeviceResult<Self> {
        if bytes[OFF_MAGIC..OFF_MAGIC + 4] != DATA_FILE_MAGIC {
            return Err(DeviceError::InvalidMagic {
                path: path.to_path_buf(),
            });
        }

        let read_u32 = |off: usize| {
            let b: [u8; 4] = bytes[off..off + 4].try_into().unwrap();
            u32::from_le_bytes(b)
        };

        let mut table_name = [0u8; TABLE_NAME_SIZE];
        table_name.copy_from_slice(&bytes[OFF_TABLE_NAME..OFF_TABLE_NAME + TABLE_NAME_SIZE]);

        Ok(Self {
            version: read_u32(OFF_VERSION),
            next_page_id: read_u32(OFF_NEXT_PAGE_ID),
            table_id: read_u32(OFF_TABLE_ID),
            page_size: read_u32(OFF_PAGE_SIZE),
            page_count: read_u32(OFF_PAGE_COUNT),
            table_name,
            schema_length: read_u32(OFF_SCHEMA_LENGTH),
            schema_offset: read_u32(OFF_SCHEMA_OFFSET),
        })
    }
}

impl Default for FileHeader {
    fn default() -> Self {
        Self::new()
    }
}

/// Thread-safe fixed-size-page I/O over a single data file.
///
/// # Example
///
/// ```rust,no_run
/// use stor_storage::file::BlockDevice;
/// use stor_storage::page::PAGE_SIZE;
///
/// let device = BlockDevice::new("table.db");
/// device.open()?;
///
/// let page_id = device.allocate_page()?;
/// let mut buf = vec![0u8; PAGE_SIZE];
/// device.write_page(page_id, &mut buf)?;
/// device.read_page(page_id, &mut buf)?;
/// device.close()?;
/// # Ok::<(), stor_storage::file::DeviceError>(())
/// ```
pub struct BlockDevice {
    path: PathBuf,
    /// Shared handle; reads and writes clone the Arc and use positional
    /// I/O without holding the lock.
    file: RwLock<Option<Arc<File>>>,
    /// Guards the file header and page-id allocation.
    meta: Mutex<FileHeader>,
    open: AtomicBool,
}

impl BlockDevice {
    /// Creates a device for the given path without opening it.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: RwLock::new(None),
            meta: Mutex::new(FileHeader::new()),
            open: AtomicBool::new(false),
        }
    }

    /// Returns the data file path.
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true if the device is open.
    #[inline]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Opens or creates the data file.
    ///
    /// A new file gets a fresh header (next page id 1); an existing file
    /// has its header loaded and magic-checked.
    pub fn open(&self) -> DeviceResult<()> {
        let mut meta = self.meta.lock();

        if self.is_open() {
            return Err(DeviceError::AlreadyOpen {
                path: self.path.clone(),
            });
        }
        if self.path.as_os_str().is_empty() {
            return Err(DeviceError::InvalidFilename);
        }

        let existed = self.path.exists();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&self.path)?;

        if existed {
            let mut bytes = [0u8; FILE_HEADER_SIZE];
            read_exact_at(&file, &mut bytes, 0)?;
            *meta = FileHeader::decode(&bytes, &self.path)?;
            info!(
                path = %self.path.display(),
                next_page_id = meta.next_page_id,
                "opened existing data file"
            );
        } else {
            *meta = FileHeader::new();
            write_all_at(&file, &meta.encode(), 0)?;
            file.sync_all()?;
            info!(path = %self.path.display(), "created data file");
        }

        *self.file.write() = Some(Arc::new(file));
        self.open.store(true, Ordering::Release);
        Ok(())
    }

    /// Reads one page into the caller's buffer and verifies its checksum.
    ///
    /// The buffer must be exactly one page. Fails with `ShortIo` when the
    /// file ends before a full page and `ChecksumMismatch` when the stored
    /// checksum does not re-verify; the caller's runtime summary must be
    /// rebuilt by a directory scan afterwards.
    pub fn read_page(&self, page_id: PageId, buf: &mut [u8]) -> DeviceResult<()> {
        assert_eq!(buf.len(), PAGE_SIZE, "buffer must be exactly one page");
        let file = self.handle()?;

        read_exact_at(&file, buf, page_offset(page_id))?;

        let expected = PageHeaderRef::new(buf).checksum();
        let actual = page_checksum(buf);
        if expected != actual {
            error!(%page_id, expected, actual, "checksum verification failed");
            return Err(DeviceError::ChecksumMismatch {
                page_id,
                expected,
                actual,
            });
        }

        debug!(%page_id, "read page");
        Ok(())
    }

    /// Writes one page from the caller's buffer and syncs.
    ///
    /// The reserved runtime region is zeroed and the checksum recomputed
    /// over the post-zeroed buffer before the write, so on-disk pages never
    /// carry in-memory state.
    pub fn write_page(&self, page_id: PageId, buf: &mut [u8]) -> DeviceResult<()> {
        assert_eq!(buf.len(), PAGE_SIZE, "buffer must be exactly one page");
        let file = self.handle()?;

        {
            let mut view = PageView::new(buf);
            view.zero_runtime_region();
            view.update_checksum();
        }

        write_all_at(&file, buf, page_offset(page_id))?;
        file.sync_all()?;

        debug!(%page_id, "wrote page");
        Ok(())
    }

    /// Allocates a new page id.
    ///
    /// Ids are handed out monotonically starting at 1 and never reused
    /// within a file's lifetime.
    pub fn allocate_page(&self) -> DeviceResult<PageId> {
        if !self.is_open() {
            return Err(DeviceError::NotOpen);
        }

        let mut meta = self.meta.lock();
        let page_id = PageId::new(meta.next_page_id);
        meta.next_page_id += 1;
        meta.page_count += 1;

        debug!(%page_id, "allocated page");
        Ok(page_id)
    }

    /// Deallocates a page id.
    ///
    /// A no-op: space is reclaimed by compaction within pages, not across
    /// them. Exists so callers need no special-casing.
    pub fn deallocate_page(&self, page_id: PageId) -> DeviceResult<()> {
        if !self.is_open() {
            return Err(DeviceError::NotOpen);
        }
        debug!(%page_id, "deallocate requested (no-op)");
        Ok(())
    }

    /// Flushes the file header and releases the file handle.
    pub fn close(&self) -> DeviceResult<()> {
        let meta = self.meta.lock();
        let mut slot = self.file.write();

        let Some(file) = slot.take() else {
            return Ok(());
        };

        write_all_at(&file, &meta.encode(), 0)?;
        file.sync_all()?;
        drop(file);

        self.open.store(false, Ordering::Release);
        info!(path = %self.path.display(), "closed data file");
        Ok(())
    }

    fn handle(&self) -> DeviceResult<Arc<File>> {
        self.file.read().as_ref().cloned().ok_or(DeviceError::NotOpen)
    }
}

impl Drop for BlockDevice {
    fn drop(&mut self) {
        if self.is_open() {
            if let Err(err) = self.close() {
                error!(path = %self.path.display(), %err, "failed to close data file");
            }
        }
    }
}

impl std::fmt::Debug for BlockDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockDevice")
            .field("path", &self.path)
            .field("open", &self.is_open())
            .finish()
    }
}

/// Returns the byte offset of a page within the file.
#[inline]
fn page_offset(page_id: PageId) -> u64 {
    FILE_HEADER_SIZE as u64 + u64::from(page_id.as_u32()) * PAGE_SIZE as u64
}

/// Reads exactly `buf.len()` bytes at the given offset.
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> DeviceResult<()> {
    let mut total = 0;
    while total < buf.len() {
        let n = file.read_at(&mut buf[total..], offset + total as u64)?;
        if n == 0 {
            return Err(DeviceError::short_read(buf.len(), total));
        }
        total += n;
    }
    Ok(())
}

/// Writes all of `buf` at the given offset.
fn write_all_at(file: &File, buf: &[u8], offset: u64) -> DeviceResult<()> {
    let mut total = 0;
    while total < buf.len() {
        let n = file.write_at(&buf[total..], offset + total as u64)?;
        if n == 0 {
            return Err(DeviceError::short_write(buf.len(), total));
        }
        total += n;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::HeapPage;
    use tempfile::tempdir;

    fn page_bytes(fill: u8) -> Vec<u8> {
        let mut page = HeapPage::new();
        page.insert_tuple(&[fill; 32]).unwrap();
        page.buffer().to_vec()
    }

    #[test]
    fn test_header_roundtrip() {
        let mut header = FileHeader::new();
        header.next_page_id = 17;
        header.page_count = 16;
        header.table_id = 3;
        header.table_name[..5].copy_from_slice(b"users");

        let bytes = header.encode();
        let decoded = FileHeader::decode(&bytes, Path::new("x.db")).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_header_rejects_bad_magic() {
        let mut bytes = FileHeader::new().encode();
        bytes[0] = b'X';
        let err = FileHeader::decode(&bytes, Path::new("x.db")).unwrap_err();
        assert!(matches!(err, DeviceError::InvalidMagic { .. }));
    }

    #[test]
    fn test_open_creates_file_with_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("table.db");

        let device = BlockDevice::new(&path);
        device.open().unwrap();
        assert!(device.is_open());
        device.close().unwrap();

        let data = std::fs::read(&path).unwrap();
        assert_eq!(data.len(), FILE_HEADER_SIZE);
        assert_eq!(&data[0..4], b"STOR");
    }

    #[test]
    fn test_empty_path_rejected() {
        let device = BlockDevice::new("");
        let err = device.open().unwrap_err();
        assert!(matches!(err, DeviceError::InvalidFilename));
        assert!(!device.is_open());
    }

    #[test]
    fn test_double_open_rejected() {
        let dir = tempdir().unwrap();
        let device = BlockDevice::new(dir.path().join("t.db"));
        device.open().unwrap();

        let err = device.open().unwrap_err();
        assert!(matches!(err, DeviceError::AlreadyOpen { .. }));
        assert!(device.is_open());
    }

    #[test]
    fn test_operations_require_open() {
        let dir = tempdir().unwrap();
        let device = BlockDevice::new(dir.path().join("t.db"));

        let mut buf = vec![0u8; PAGE_SIZE];
        assert!(matches!(
            device.read_page(PageId::new(1), &mut buf),
            Err(DeviceError::NotOpen)
        ));
        assert!(matches!(
            device.write_page(PageId::new(1), &mut buf),
            Err(DeviceError::NotOpen)
        ));
        assert!(matches!(device.allocate_page(), Err(DeviceError::NotOpen)));
    }

    #[test]
    fn test_allocation_is_monotonic_from_one() {
        let dir = tempdir().unwrap();
        let device = BlockDevice::new(dir.path().join("t.db"));
        device.open().unwrap();

        assert_eq!(device.allocate_page().unwrap(), PageId::new(1));
        assert_eq!(device.allocate_page().unwrap(), PageId::new(2));
        assert_eq!(device.allocate_page().unwrap(), PageId::new(3));
    }

    #[test]
    fn test_next_page_id_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.db");

        {
            let device = BlockDevice::new(&path);
            device.open().unwrap();
            device.allocate_page().unwrap();
            device.allocate_page().unwrap();
            device.close().unwrap();
        }

        let device = BlockDevice::new(&path);
        device.open().unwrap();
        assert_eq!(device.allocate_page().unwrap(), PageId::new(3));
    }

    #[test]
    fn test_write_read_roundtrip() {
        let dir = tempdir().unwrap();
        let device = BlockDevice::new(dir.path().join("t.db"));
        device.open().unwrap();

        let page_id = device.allocate_page().unwrap();
        let mut written = page_bytes(0x42);
        device.write_page(page_id, &mut written).unwrap();

        let mut read = vec![0u8; PAGE_SIZE];
        device.read_page(page_id, &mut read).unwrap();
        assert_eq!(read, written);
    }

    #[test]
    fn test_write_zeroes_runtime_region() {
        let dir = tempdir().unwrap();
        let device = BlockDevice::new(dir.path().join("t.db"));
        device.open().unwrap();

        let page_id = device.allocate_page().unwrap();
        let mut buf = page_bytes(1);
        // Garbage in the reserved region must never reach disk unchecked.
        for b in &mut buf[16..40] {
            *b = 0xEE;
        }
        device.write_page(page_id, &mut buf).unwrap();

        let mut read = vec![0u8; PAGE_SIZE];
        device.read_page(page_id, &mut read).unwrap();
        assert!(read[16..40].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_checksum_detects_bit_flip() {
        // Boundary scenario: flip one byte of the data area on disk and the
        // next read fails with a checksum mismatch.
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.db");
        let device = BlockDevice::new(&path);
        device.open().unwrap();

        let page_id = device.allocate_page().unwrap();
        let mut buf = page_bytes(7);
        device.write_page(page_id, &mut buf).unwrap();

        // Corrupt a data byte well past the header.
        let offset = FILE_HEADER_SIZE as u64 + u64::from(page_id.as_u32()) * PAGE_SIZE as u64 + 100;
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.write_at(&[0xFF], offset).unwrap();
        file.sync_all().unwrap();

        let mut read = vec![0u8; PAGE_SIZE];
        let err = device.read_page(page_id, &mut read).unwrap_err();
        assert!(matches!(err, DeviceError::ChecksumMismatch { .. }));
    }

    #[test]
    fn test_read_past_eof_is_short() {
        let dir = tempdir().unwrap();
        let device = BlockDevice::new(dir.path().join("t.db"));
        device.open().unwrap();

        let page_id = device.allocate_page().unwrap();
        let mut buf = vec![0u8; PAGE_SIZE];
        let err = device.read_page(page_id, &mut buf).unwrap_err();
        assert!(matches!(err, DeviceError::ShortIo { operation: "read", .. }));
    }

    #[test]
    fn test_deallocate_is_noop() {
        let dir = tempdir().unwrap();
        let device = BlockDevice::new(dir.path().join("t.db"));
        device.open().unwrap();

        let page_id = device.allocate_page().unwrap();
        device.deallocate_page(page_id).unwrap();
        // Allocation continues monotonically; nothing is reused.
        assert_eq!(device.allocate_page().unwrap(), PageId::new(2));
    }

    #[test]
    fn test_close_then_reopen() {
        let dir = tempdir().unwrap();
        let device = BlockDevice::new(dir.path().join("t.db"));
        device.open().unwrap();
        device.close().unwrap();
        assert!(!device.is_open());

        device.open().unwrap();
        assert!(device.is_open());
    }

    #[test]
    fn test_concurrent_reads() {
        let dir = tempdir().unwrap();
        let device = Arc::new(BlockDevice::new(dir.path().join("t.db")));
        device.open().unwrap();

        let mut pages = Vec::new();
        for fill in 0..8u8 {
            let page_id = device.allocate_page().unwrap();
            let mut buf = page_bytes(fill);
            device.write_page(page_id, &mut buf).unwrap();
            pages.push((page_id, buf));
        }

        let handles: Vec<_> = pages
            .into_iter()
            .map(|(page_id, expected)| {
                let device = Arc::clone(&device);
                std::thread::spawn(move || {
                    let mut buf = vec![0u8; PAGE_SIZE];
                    device.read_page(page_id, &mut buf).unwrap();
                    assert_eq!(buf, expected);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
