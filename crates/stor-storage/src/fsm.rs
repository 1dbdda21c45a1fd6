//! Free-space map.
//!
//! The free-space map (FSM) tracks, per allocated page, a one-byte
//! quantised category of its free space so tuple insertion can find a
//! candidate page without touching page data. Categories encode
//! `⌊available · 255 / 8192⌋`; because this is a quantisation, a page
//! suggested by [`FreeSpaceMap::find_page_with_space`] may turn out on
//! inspection to lack enough room — the coordinator compensates by
//! retrying and by forcing a failed page's category to zero.
//!
//! On-disk format (single file, little-endian):
//!
//! ```text
//! magic            u32   0x46534D00
//! page_count       u32   size of the dense category array
//! allocated_count  u32
//! allocated ids    u32 × allocated_count
//! categories       u8  × page_count
//! ```
//!
//! The file is truncated to exact size on every write.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use stor_common::constants::{FSM_MAGIC, MAX_FSM_CATEGORY, PAGE_SIZE};
use stor_common::error::{StorageError, StorageResult};
use stor_common::types::PageId;

/// Converts a free-byte count into its category.
///
/// Counts above the page size clamp to the maximum category.
#[inline]
#[must_use]
pub fn bytes_to_category(available_bytes: u16) -> u8 {
    let available = (available_bytes as usize).min(PAGE_SIZE);
    (available * MAX_FSM_CATEGORY as usize / PAGE_SIZE) as u8
}

/// Converts a category back into an approximate free-byte count.
#[inline]
#[must_use]
pub fn category_to_bytes(category: u8) -> u16 {
    (category as usize * PAGE_SIZE / MAX_FSM_CATEGORY as usize) as u16
}

#[derive(Debug, Default)]
struct FsmInner {
    file: Option<File>,
    /// Dense category array indexed by page id; grown lazily with
    /// headroom. Only ids in `allocated` are meaningful.
    categories: Vec<u8>,
    /// Sparse set of page ids ever touched. Queries scan only this set, so
    /// non-sequential allocation (0, 5, 17, 100) stays cheap.
    allocated: HashSet<u32>,
    /// Highest page id + 1 seen so far; the persisted array length.
    page_count: u32,
    dirty: bool,
    initialized: bool,
}

impl FsmInner {
    fn ensure_capacity(&mut self, page_id: u32) {
        let needed = page_id as usize + 1;
        if needed > self.categories.len() {
            // Grow with headroom to limit reallocation churn.
            let new_len = needed.max(self.categories.len() * 2);
            self.categories.resize(new_len, 0);
        }
    }

    fn record(&mut self, page_id: u32, category: u8) {
        self.ensure_capacity(page_id);
        self.categories[page_id as usize] = category;
        self.allocated.insert(page_id);
        self.dirty = true;
        if page_id >= self.page_count {
            self.page_count = page_id + 1;
        }
    }

    fn load(&mut self) -> StorageResult<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| StorageError::internal("free-space map file not open"))?;

        let len = file.seek(SeekFrom::End(0))?;
        if len < 12 {
            return Err(StorageError::corruption("free-space map file too small"));
        }
        file.seek(SeekFrom::Start(0))?;

        let mut header = [0u8; 12];
        file.read_exact(&mut header)?;

        let magic = u32::from_le_bytes(header[0..4].try_into().unwrap());
        if magic != FSM_MAGIC {
            return Err(StorageError::corruption(format!(
                "invalid free-space map magic: {magic:#010x}"
            )));
        }
        let page_count = u32::from_le_bytes(header[4..8].try_into().unwrap());
        let allocated_count = u32::from_le_bytes(header[8..12].try_into().unwrap());

        let mut ids = vec![0u8; allocated_count as usize * 4];
        file.read_exact(&mut ids)?;
        self.allocated = ids
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
            .collect();

        self.categories = vec![0u8; page_count as usize];
        file.read_exact(&mut self.categories)?;

        self.page_count = page_count;
        self.dirty = false;
        Ok(())
    }

    fn store(&mut self) -> StorageResult<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| StorageError::internal("free-space map file not open"))?;

        let mut bytes = Vec::with_capacity(12 + self.allocated.len() * 4 + self.page_count as usize);
        bytes.extend_from_slice(&FSM_MAGIC.to_le_bytes());
        bytes.extend_from_slice(&self.page_count.to_le_bytes());
        bytes.extend_from_slice(&(self.allocated.len() as u32).to_le_bytes());
        for page_id in &self.allocated {
            bytes.extend_from_slice(&page_id.to_le_bytes());
        }
        bytes.extend_from_slice(&self.categories[..self.page_count as usize]);

        file.seek(SeekFrom::Start(0))?;
        file.write_all(&bytes)?;
        // Drop any stale tail from a previous, larger snapshot.
        file.set_len(bytes.len() as u64)?;
        file.sync_all()?;
        Ok(())
    }
}

/// Persistent, in-memory-cached map from page id to free-space category.
///
/// All public operations acquire a single mutex. The map coordinates with
/// the page cache only through the coordinator.
///
/// # Example
///
/// ```rust,no_run
/// use stor_storage::fsm::FreeSpaceMap;
/// use stor_common::types::PageId;
///
/// let fsm = FreeSpaceMap::new("table.fsm");
/// fsm.initialize()?;
/// fsm.update_page_free_space(PageId::new(1), 4000);
/// let candidate = fsm.find_page_with_space(1000);
/// assert_eq!(candidate, PageId::new(1));
/// # Ok::<(), stor_common::error::StorageError>(())
/// ```
pub struct FreeSpaceMap {
    path: PathBuf,
    inner: Mutex<FsmInner>,
}

impl FreeSpaceMap {
    /// Creates a map for the given file path without opening it.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            inner: Mutex::new(FsmInner::default()),
        }
    }

    /// Returns the map file path.
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Opens or creates the map file and loads any persisted state.
    ///
    /// A new, short, or corrupt file yields an empty map marked dirty so
    /// the next flush writes a clean snapshot. Idempotent.
    pub fn initialize(&self) -> StorageResult<()> {
        let mut inner = self.inner.lock();
        if inner.initialized {
            return Ok(());
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&self.path)
            .map_err(|e| {
                StorageError::internal(format!(
                    "failed to open free-space map {}: {e}",
                    self.path.display()
                ))
            })?;
        inner.file = Some(file);

        if let Err(err) = inner.load() {
            warn!(
                path = %self.path.display(),
                %err,
                "starting with empty free-space map"
            );
            inner.categories.clear();
            inner.allocated.clear();
            inner.page_count = 0;
            inner.dirty = true;
        } else {
            info!(
                path = %self.path.display(),
                page_count = inner.page_count,
                "loaded free-space map"
            );
        }

        inner.initialized = true;
        Ok(())
    }

    /// Records the free space of a page.
    pub fn update_page_free_space(&self, page_id: PageId, available_bytes: u16) {
        let category = bytes_to_category(available_bytes);
        let mut inner = self.inner.lock();
        inner.record(page_id.as_u32(), category);
        debug!(%page_id, available_bytes, category, "updated free space");
    }

    /// Finds a page with at least `required_bytes` of free space.
    ///
    /// Scans only the allocated set in unspecified order and returns the
    /// first page whose category exceeds the required category, or equals
    /// it when non-zero. Returns [`PageId::INVALID`] when nothing
    /// qualifies. Quantisation makes this a hint: the caller must verify
    /// the actual free space.
    pub fn find_page_with_space(&self, required_bytes: u16) -> PageId {
        let min_category = bytes_to_category(required_bytes);
        let inner = self.inner.lock();

        for &page_id in &inner.allocated {
            let Some(&category) = inner.categories.get(page_id as usize) else {
                continue;
            };
            if category > min_category || (category == min_category && category > 0) {
                return PageId::new(page_id);
            }
        }
        PageId::INVALID
    }

    /// Returns the category of a page (0 for never-touched pages).
    pub fn category(&self, page_id: PageId) -> u8 {
        let inner = self.inner.lock();
        let id = page_id.as_u32();
        if !inner.allocated.contains(&id) {
            return 0;
        }
        inner.categories.get(id as usize).copied().unwrap_or(0)
    }

    /// Sets the category of a page directly.
    pub fn set_category(&self, page_id: PageId, category: u8) {
        let mut inner = self.inner.lock();
        inner.record(page_id.as_u32(), category);
    }

    /// Returns the page-count watermark (highest tracked id + 1).
    pub fn page_count(&self) -> u32 {
        self.inner.lock().page_count
    }

    /// Persists the map when dirty.
    pub fn flush(&self) -> StorageResult<()> {
        let mut inner = self.inner.lock();
        if !inner.dirty {
            return Ok(());
        }
        inner.store()?;
        inner.dirty = false;
        debug!(path = %self.path.display(), "flushed free-space map");
        Ok(())
    }

    /// Flushes and releases the file handle.
    pub fn close(&self) -> StorageResult<()> {
        {
            let inner = self.inner.lock();
            if !inner.initialized {
                return Ok(());
            }
        }
        self.flush()?;
        let mut inner = self.inner.lock();
        inner.file = None;
        inner.initialized = false;
        Ok(())
    }
}

impl Drop for FreeSpaceMap {
    fn drop(&mut self) {
        let needs_flush = {
            let inner = self.inner.lock();
            inner.initialized && inner.dirty
        };
        if needs_flush {
            if let Err(err) = self.flush() {
                warn!(path = %self.path.display(), %err, "failed to flush free-space map");
            }
        }
    }
}

impl std::fmt::Debug for FreeSpaceMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("FreeSpaceMap")
            .field("path", &self.path)
            .field("page_count", &inner.page_count)
            .field("allocated", &inner.allocated.len())
            .field("dirty", &inner.dirty)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_category_encoding_bounds() {
        assert_eq!(bytes_to_category(0), 0);
        assert_eq!(bytes_to_category(PAGE_SIZE as u16), 255);
        assert_eq!(bytes_to_category(u16::MAX), 255);
        assert_eq!(category_to_bytes(0), 0);
        assert_eq!(category_to_bytes(255), PAGE_SIZE as u16);
    }

    #[test]
    fn test_category_roundtrip_error_is_bounded() {
        // One category step is ceil(8192 / 255) = 33 bytes.
        for bytes in (0..=PAGE_SIZE as u16).step_by(7) {
            let approx = category_to_bytes(bytes_to_category(bytes));
            assert!(
                (bytes as i32 - approx as i32).abs() <= 33,
                "round-trip of {bytes} drifted to {approx}"
            );
        }
    }

    #[test]
    fn test_update_and_get() {
        let dir = tempdir().unwrap();
        let fsm = FreeSpaceMap::new(dir.path().join("t.fsm"));
        fsm.initialize().unwrap();

        fsm.update_page_free_space(PageId::new(3), 4096);
        assert_eq!(fsm.category(PageId::new(3)), bytes_to_category(4096));
        // Never-touched pages report zero.
        assert_eq!(fsm.category(PageId::new(4)), 0);
        assert_eq!(fsm.page_count(), 4);
    }

    #[test]
    fn test_find_page_with_space() {
        let dir = tempdir().unwrap();
        let fsm = FreeSpaceMap::new(dir.path().join("t.fsm"));
        fsm.initialize().unwrap();

        assert_eq!(fsm.find_page_with_space(100), PageId::INVALID);

        fsm.update_page_free_space(PageId::new(1), 50);
        fsm.update_page_free_space(PageId::new(2), 5000);

        let found = fsm.find_page_with_space(1000);
        assert_eq!(found, PageId::new(2));

        // Nothing can satisfy a full-page request after use.
        fsm.update_page_free_space(PageId::new(2), 0);
        assert_eq!(fsm.find_page_with_space(1000), PageId::INVALID);
    }

    #[test]
    fn test_find_ignores_zero_category_even_for_zero_request() {
        let dir = tempdir().unwrap();
        let fsm = FreeSpaceMap::new(dir.path().join("t.fsm"));
        fsm.initialize().unwrap();

        fsm.update_page_free_space(PageId::new(1), 0);
        // required 0 → min category 0; equal-but-zero does not qualify.
        assert_eq!(fsm.find_page_with_space(0), PageId::INVALID);
    }

    #[test]
    fn test_sparse_allocation() {
        let dir = tempdir().unwrap();
        let fsm = FreeSpaceMap::new(dir.path().join("t.fsm"));
        fsm.initialize().unwrap();

        for id in [0u32, 5, 17, 100] {
            fsm.update_page_free_space(PageId::new(id), 2000);
        }
        assert_eq!(fsm.page_count(), 101);

        let found = fsm.find_page_with_space(1000);
        assert!([0u32, 5, 17, 100].contains(&found.as_u32()));
    }

    #[test]
    fn test_survives_restart() {
        // Boundary scenario: three updates, flush, reopen, categories match
        // and untouched pages stay at zero.
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.fsm");

        {
            let fsm = FreeSpaceMap::new(&path);
            fsm.initialize().unwrap();
            fsm.update_page_free_space(PageId::new(0), 1000);
            fsm.update_page_free_space(PageId::new(5), 2000);
            fsm.update_page_free_space(PageId::new(17), 3000);
            fsm.flush().unwrap();
        }

        let fsm = FreeSpaceMap::new(&path);
        fsm.initialize().unwrap();
        assert_eq!(fsm.category(PageId::new(0)), bytes_to_category(1000));
        assert_eq!(fsm.category(PageId::new(5)), bytes_to_category(2000));
        assert_eq!(fsm.category(PageId::new(17)), bytes_to_category(3000));
        assert_eq!(fsm.category(PageId::new(1)), 0);
        assert_eq!(fsm.page_count(), 18);
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.fsm");
        std::fs::write(&path, b"definitely not an fsm file").unwrap();

        let fsm = FreeSpaceMap::new(&path);
        fsm.initialize().unwrap();
        assert_eq!(fsm.page_count(), 0);
        assert_eq!(fsm.find_page_with_space(1), PageId::INVALID);

        // A flush then rewrites a clean snapshot.
        fsm.update_page_free_space(PageId::new(1), 128);
        fsm.flush().unwrap();

        let reopened = FreeSpaceMap::new(&path);
        reopened.initialize().unwrap();
        assert_eq!(reopened.category(PageId::new(1)), bytes_to_category(128));
    }

    #[test]
    fn test_flush_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.fsm");
        let fsm = FreeSpaceMap::new(&path);
        fsm.initialize().unwrap();
        fsm.update_page_free_space(PageId::new(2), 100);

        fsm.flush().unwrap();
        let len_after_first = std::fs::metadata(&path).unwrap().len();
        fsm.flush().unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), len_after_first);
    }

    #[test]
    fn test_file_shrinks_on_rewrite() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.fsm");
        // Seed the path with a larger bogus file; the snapshot truncates it.
        std::fs::write(&path, vec![0u8; 4096]).unwrap();

        let fsm = FreeSpaceMap::new(&path);
        fsm.initialize().unwrap();
        fsm.update_page_free_space(PageId::new(0), 100);
        fsm.flush().unwrap();

        // magic + page_count + allocated_count + 1 id + 1 category byte
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 12 + 4 + 1);
    }

    #[test]
    fn test_close_then_initialize_again() {
        let dir = tempdir().unwrap();
        let fsm = FreeSpaceMap::new(dir.path().join("t.fsm"));
        fsm.initialize().unwrap();
        fsm.update_page_free_space(PageId::new(1), 512);
        fsm.close().unwrap();

        fsm.initialize().unwrap();
        assert_eq!(fsm.category(PageId::new(1)), bytes_to_category(512));
    }
}
