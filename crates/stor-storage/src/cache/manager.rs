//! The page manager: tuple-level CRUD over cached pages.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use stor_common::constants::{INVALID_SLOT_ID, MAX_FORWARD_HOPS, MAX_TUPLE_SIZE, SLOT_ENTRY_SIZE};
use stor_common::error::{StorageError, StorageResult};
use stor_common::types::{PageId, TupleId};

use super::config::CacheConfig;
use super::CacheStats;
use crate::file::BlockDevice;
use crate::fsm::FreeSpaceMap;
use crate::page::{DeleteError, HeapPage, UpdateError};

/// Insert attempts before giving up.
///
/// The free-space map is quantised and may suggest a page that turns out
/// to lack room; the retry with a forced-zero fallback keeps insertion
/// live. Load-bearing; do not reduce.
const MAX_INSERT_ATTEMPTS: usize = 3;

type PageCache = HashMap<PageId, HeapPage>;

/// Coordinates tuple operations across the page cache, the block device,
/// and the free-space map.
///
/// # Example
///
/// ```rust,no_run
/// use stor_storage::cache::PageManager;
/// use stor_storage::file::BlockDevice;
/// use stor_storage::fsm::FreeSpaceMap;
///
/// let manager = PageManager::new(
///     BlockDevice::new("table.db"),
///     FreeSpaceMap::new("table.fsm"),
/// )?;
///
/// let id = manager.insert_tuple(b"Hello Alice")?;
/// let mut buf = [0u8; 64];
/// let len = manager.get_tuple(id, &mut buf)?;
/// assert_eq!(&buf[..len], b"Hello Alice");
/// # Ok::<(), stor_common::error::StorageError>(())
/// ```
pub struct PageManager {
    device: BlockDevice,
    fsm: FreeSpaceMap,
    cache: Mutex<PageCache>,
    config: CacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    flushes: AtomicU64,
}

impl PageManager {
    /// Creates a manager with the default configuration.
    ///
    /// Opens the device if necessary and initialises the free-space map.
    pub fn new(device: BlockDevice, fsm: FreeSpaceMap) -> StorageResult<Self> {
        Self::with_config(device, fsm, CacheConfig::default())
    }

    /// Creates a manager with an explicit configuration.
    pub fn with_config(
        device: BlockDevice,
        fsm: FreeSpaceMap,
        config: CacheConfig,
    ) -> StorageResult<Self> {
        stor_common::logging::init();
        config.validate()?;
        if !device.is_open() {
            device.open()?;
        }
        fsm.initialize()?;

        info!(
            data_file = %device.path().display(),
            capacity = config.capacity,
            "page manager ready"
        );

        Ok(Self {
            device,
            fsm,
            cache: Mutex::new(HashMap::new()),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            flushes: AtomicU64::new(0),
        })
    }

    /// Returns the underlying block device.
    #[inline]
    pub fn device(&self) -> &BlockDevice {
        &self.device
    }

    /// Returns the free-space map.
    #[inline]
    pub fn fsm(&self) -> &FreeSpaceMap {
        &self.fsm
    }

    /// Returns the number of resident pages.
    pub fn cache_size(&self) -> usize {
        self.cache.lock().len()
    }

    /// Returns a snapshot of the cache counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
        }
    }

    // =========================================================================
    // Tuple CRUD
    // =========================================================================

    /// Inserts a tuple and returns its stable tuple id.
    ///
    /// Tries up to three candidate pages: the free-space map suggests one
    /// (or a fresh page is allocated), the insert is attempted, and on
    /// failure the page is compacted if worthwhile or its category forced
    /// to zero so it stops being suggested.
    pub fn insert_tuple(&self, data: &[u8]) -> StorageResult<TupleId> {
        if data.is_empty() {
            return Err(StorageError::invalid_argument("tuple data is empty"));
        }
        if data.len() > MAX_TUPLE_SIZE {
            return Err(StorageError::invalid_argument(format!(
                "tuple size {} exceeds maximum {}",
                data.len(),
                MAX_TUPLE_SIZE
            )));
        }

        let required = (data.len() + SLOT_ENTRY_SIZE) as u16;
        let mut cache = self.cache.lock();

        for attempt in 0..MAX_INSERT_ATTEMPTS {
            let mut page_id = self.fsm.find_page_with_space(required);
            if !page_id.is_valid() {
                page_id = self.allocate_new_page(&mut cache)?;
            }

            let page = self.get_page(&mut cache, page_id)?;
            if let Some(slot_id) = page.insert_tuple(data) {
                let free = page.free_space() as u16;
                self.fsm.update_page_free_space(page_id, free);
                debug!(%page_id, slot_id, size = data.len(), "inserted tuple");
                return Ok(TupleId::new(page_id, slot_id));
            }

            // The hint was stale. Compaction may open up enough room on
            // this very page; otherwise stop the map from re-suggesting it.
            if page.should_compact() {
                info!(%page_id, "compacting page to reclaim fragmented space");
                page.compact();
                if let Some(slot_id) = page.insert_tuple(data) {
                    let free = page.free_space() as u16;
                    self.fsm.update_page_free_space(page_id, free);
                    debug!(%page_id, slot_id, "insert succeeded after compaction");
                    return Ok(TupleId::new(page_id, slot_id));
                }
            }

            self.fsm.update_page_free_space(page_id, 0);
            warn!(%page_id, attempt, "page rejected insert, marked full");
        }

        Err(StorageError::exhausted(format!(
            "failed to insert tuple after {MAX_INSERT_ATTEMPTS} attempts"
        )))
    }

    /// Copies a tuple's bytes into the caller's buffer, returning the
    /// tuple length.
    ///
    /// The tuple id is resolved through its full forwarding chain first.
    pub fn get_tuple(&self, tuple_id: TupleId, buf: &mut [u8]) -> StorageResult<usize> {
        if buf.is_empty() {
            return Err(StorageError::invalid_argument("output buffer is empty"));
        }

        let mut cache = self.cache.lock();
        let resolved = self.resolve_chain(&mut cache, tuple_id)?;
        if !resolved.is_valid() {
            return Err(StorageError::not_found(format!(
                "invalid tuple or circular forwarding chain at {tuple_id}"
            )));
        }

        let page = self.get_page(&mut cache, resolved.page_id)?;
        let entry = page
            .slot_entry(resolved.slot_id)
            .filter(|e| e.is_valid())
            .ok_or_else(|| StorageError::not_found(format!("slot {resolved} is not valid")))?;

        let length = entry.length as usize;
        if buf.len() < length {
            return Err(StorageError::invalid_argument(format!(
                "buffer too small: need {length} bytes, have {}",
                buf.len()
            )));
        }

        let bytes = page.tuple(resolved.slot_id).ok_or_else(|| {
            StorageError::not_found(format!("slot {resolved} has no readable bytes"))
        })?;
        buf[..length].copy_from_slice(bytes);

        Ok(length)
    }

    /// Updates a tuple, in place when the new bytes fit, otherwise by
    /// spilling the new version to another page behind a forwarding
    /// pointer on the original slot.
    pub fn update_tuple(&self, tuple_id: TupleId, data: &[u8]) -> StorageResult<()> {
        if data.is_empty() {
            return Err(StorageError::invalid_argument("tuple data is empty"));
        }
        if data.len() > MAX_TUPLE_SIZE {
            return Err(StorageError::invalid_argument(format!(
                "tuple size {} exceeds maximum {}",
                data.len(),
                MAX_TUPLE_SIZE
            )));
        }

        let mut cache = self.cache.lock();
        let resolved = self.resolve_chain(&mut cache, tuple_id)?;
        if !resolved.is_valid() {
            return Err(StorageError::not_found(format!(
                "invalid tuple or circular forwarding chain at {tuple_id}"
            )));
        }

        let in_place = {
            let page = self.get_page(&mut cache, resolved.page_id)?;
            match page.update_in_place(resolved.slot_id, data) {
                Ok(()) => {
                    let free = page.free_space() as u16;
                    Some(free)
                }
                Err(err) => {
                    debug!(%resolved, ?err, "in-place update failed, spilling");
                    None
                }
            }
        };
        if let Some(free) = in_place {
            self.fsm.update_page_free_space(resolved.page_id, free);
            return Ok(());
        }

        // Spill: place the new version elsewhere, then redirect the
        // original slot so the caller's tuple id keeps working.
        let required = (data.len() + SLOT_ENTRY_SIZE) as u16;
        let mut new_page_id = self.fsm.find_page_with_space(required);
        if !new_page_id.is_valid() {
            new_page_id = self.allocate_new_page(&mut cache)?;
        }

        let (new_slot_id, new_free) = {
            let new_page = self.get_page(&mut cache, new_page_id)?;
            let slot_id = new_page.insert_tuple(data).ok_or_else(|| {
                StorageError::exhausted(format!(
                    "failed to insert new tuple version on page {new_page_id}"
                ))
            })?;
            (slot_id, new_page.free_space() as u16)
        };

        let original_free = {
            let original = self.get_page(&mut cache, tuple_id.page_id)?;
            original
                .mark_forwarded(tuple_id.slot_id, TupleId::new(new_page_id, new_slot_id))
                .map_err(|err| map_update_error(err, tuple_id))?;
            original.free_space() as u16
        };

        self.fsm.update_page_free_space(tuple_id.page_id, original_free);
        self.fsm.update_page_free_space(new_page_id, new_free);

        info!(
            from = %tuple_id,
            to = %TupleId::new(new_page_id, new_slot_id),
            "created forwarding chain for update"
        );
        Ok(())
    }

    /// Deletes the tuple a tuple id resolves to.
    ///
    /// Intermediate forwarding stubs on other pages are left in place;
    /// they subsequently resolve to the deleted slot and fail as not
    /// found.
    pub fn delete_tuple(&self, tuple_id: TupleId) -> StorageResult<()> {
        let mut cache = self.cache.lock();
        let resolved = self.resolve_chain(&mut cache, tuple_id)?;
        if !resolved.is_valid() {
            return Err(StorageError::not_found(format!(
                "invalid tuple or circular forwarding chain at {tuple_id}"
            )));
        }

        let free = {
            let page = self.get_page(&mut cache, resolved.page_id)?;
            page.delete_tuple(resolved.slot_id)
                .map_err(|err| map_delete_error(err, resolved))?;
            page.free_space() as u16
        };
        self.fsm.update_page_free_space(resolved.page_id, free);

        debug!(%resolved, "deleted tuple");
        Ok(())
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Writes every dirty page through the block device, then flushes the
    /// free-space map.
    pub fn flush_all_pages(&self) -> StorageResult<()> {
        let mut cache = self.cache.lock();
        self.flush_all_locked(&mut cache)
    }

    /// Compacts a page when it recommends compaction.
    pub fn compact_page(&self, page_id: PageId) -> StorageResult<()> {
        let mut cache = self.cache.lock();

        let free = {
            let page = self.get_page(&mut cache, page_id)?;
            if !page.should_compact() {
                debug!(%page_id, "page does not need compaction");
                return Ok(());
            }
            page.compact();
            page.free_space() as u16
        };
        self.fsm.update_page_free_space(page_id, free);

        info!(%page_id, "compacted page");
        Ok(())
    }

    /// Flushes everything and drops all resident pages.
    pub fn clear_cache(&self) -> StorageResult<()> {
        let mut cache = self.cache.lock();
        self.flush_all_locked(&mut cache)?;
        cache.clear();
        debug!("cache cleared");
        Ok(())
    }

    // =========================================================================
    // Internals (cache lock held)
    // =========================================================================

    fn flush_all_locked(&self, cache: &mut PageCache) -> StorageResult<()> {
        for (&page_id, page) in cache.iter_mut() {
            if page.is_dirty() {
                page.update_checksum();
                self.device.write_page(page_id, page.buffer_mut())?;
                page.set_dirty(false);
                self.flushes.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.fsm.flush()
    }

    /// Returns the cached page, reading and verifying it on a miss.
    ///
    /// A failed read never populates the cache.
    fn get_page<'a>(
        &self,
        cache: &'a mut PageCache,
        page_id: PageId,
    ) -> StorageResult<&'a mut HeapPage> {
        if !cache.contains_key(&page_id) {
            self.misses.fetch_add(1, Ordering::Relaxed);

            let mut page = HeapPage::new();
            self.device.read_page(page_id, page.buffer_mut())?;
            page.refresh_runtime_stats();

            self.evict_if_needed(cache)?;
            cache.insert(page_id, page);
            debug!(%page_id, "loaded page from disk");
        } else {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }

        cache
            .get_mut(&page_id)
            .ok_or_else(|| StorageError::internal("page vanished from cache"))
    }

    /// Allocates a fresh page on the device and makes it resident.
    fn allocate_new_page(&self, cache: &mut PageCache) -> StorageResult<PageId> {
        let page_id = self.device.allocate_page()?;

        let mut page = HeapPage::new();
        page.set_page_id(page_id);
        let free = page.free_space() as u16;

        self.evict_if_needed(cache)?;
        cache.insert(page_id, page);
        self.fsm.update_page_free_space(page_id, free);

        debug!(%page_id, "allocated new page");
        Ok(page_id)
    }

    /// Makes room before a cache insert.
    ///
    /// Prefers evicting any clean page; failing that, flushes the first
    /// page in iteration order and evicts it. A dirty page is never
    /// discarded unflushed, and a failed flush aborts the eviction.
    fn evict_if_needed(&self, cache: &mut PageCache) -> StorageResult<()> {
        if cache.len() < self.config.capacity {
            return Ok(());
        }

        let clean_victim = cache
            .iter()
            .find(|(_, page)| !page.is_dirty())
            .map(|(&id, _)| id);
        if let Some(victim) = clean_victim {
            cache.remove(&victim);
            self.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(page_id = %victim, "evicted clean page");
            return Ok(());
        }

        let dirty_victim = cache.keys().next().copied();
        let Some(victim) = dirty_victim else {
            return Ok(());
        };
        {
            let page = cache
                .get_mut(&victim)
                .ok_or_else(|| StorageError::internal("eviction victim vanished"))?;
            page.update_checksum();
            self.device.write_page(victim, page.buffer_mut())?;
            self.flushes.fetch_add(1, Ordering::Relaxed);
        }
        cache.remove(&victim);
        self.evictions.fetch_add(1, Ordering::Relaxed);
        debug!(page_id = %victim, "flushed and evicted dirty page");
        Ok(())
    }

    /// Resolves a tuple id through its full forwarding chain, fetching
    /// pages as the chain crosses them.
    ///
    /// Returns [`TupleId::INVALID`] for unresolvable slots, cycles, and
    /// hop exhaustion; I/O and corruption failures surface as errors.
    fn resolve_chain(&self, cache: &mut PageCache, tuple_id: TupleId) -> StorageResult<TupleId> {
        if !tuple_id.page_id.is_valid() || tuple_id.slot_id == INVALID_SLOT_ID {
            return Ok(TupleId::INVALID);
        }

        let mut current = tuple_id;
        for _ in 0..=MAX_FORWARD_HOPS {
            let page = self.get_page(cache, current.page_id)?;
            if current.slot_id >= page.slot_count() {
                return Ok(TupleId::INVALID);
            }

            let resolved = page.follow_forwarding_chain(current.slot_id, MAX_FORWARD_HOPS);
            if !resolved.is_valid() {
                return Ok(TupleId::INVALID);
            }

            // The per-page walker reports page ids through the 16-bit
            // header echo; a result on the current page is terminal.
            if resolved.page_id.as_u32() == current.page_id.as_u32() & 0xFFFF {
                return Ok(TupleId::new(current.page_id, resolved.slot_id));
            }
            current = resolved;
        }

        warn!(%tuple_id, "forwarding chain crossed too many pages");
        Ok(TupleId::INVALID)
    }
}

impl Drop for PageManager {
    fn drop(&mut self) {
        if let Err(err) = self.flush_all_pages() {
            warn!(%err, "failed to flush pages during shutdown");
        }
    }
}

impl std::fmt::Debug for PageManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageManager")
            .field("capacity", &self.config.capacity)
            .field("resident", &self.cache.lock().len())
            .field("stats", &self.stats())
            .finish()
    }
}

fn map_delete_error(err: DeleteError, tuple_id: TupleId) -> StorageError {
    match err {
        DeleteError::OutOfRange => {
            StorageError::not_found(format!("slot {tuple_id} is out of range"))
        }
        DeleteError::AlreadyDeleted => {
            StorageError::not_found(format!("tuple {tuple_id} already deleted"))
        }
    }
}

fn map_update_error(err: UpdateError, tuple_id: TupleId) -> StorageError {
    match err {
        UpdateError::EmptyData => StorageError::invalid_argument("tuple data is empty"),
        UpdateError::InvalidSlot => {
            StorageError::not_found(format!("slot {tuple_id} is not valid"))
        }
        UpdateError::Forwarded => {
            StorageError::invalid_argument(format!("slot {tuple_id} is forwarded"))
        }
        UpdateError::TooLarge { size, capacity } => StorageError::invalid_argument(format!(
            "new size {size} exceeds current size {capacity}"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stor_common::error::ErrorKind;
    use tempfile::{tempdir, TempDir};

    fn create_manager(dir: &TempDir) -> PageManager {
        PageManager::new(
            BlockDevice::new(dir.path().join("table.db")),
            FreeSpaceMap::new(dir.path().join("table.fsm")),
        )
        .unwrap()
    }

    fn create_small_manager(dir: &TempDir, capacity: usize) -> PageManager {
        PageManager::with_config(
            BlockDevice::new(dir.path().join("table.db")),
            FreeSpaceMap::new(dir.path().join("table.fsm")),
            CacheConfig::new(capacity),
        )
        .unwrap()
    }

    #[test]
    fn test_insert_and_get() {
        let dir = tempdir().unwrap();
        let manager = create_manager(&dir);

        let id = manager.insert_tuple(b"Hello, World!").unwrap();
        assert_eq!(id.page_id, PageId::new(1));
        assert_eq!(id.slot_id, 0);

        let mut buf = [0u8; 64];
        let len = manager.get_tuple(id, &mut buf).unwrap();
        assert_eq!(&buf[..len], b"Hello, World!");
    }

    #[test]
    fn test_insert_validates_input() {
        let dir = tempdir().unwrap();
        let manager = create_manager(&dir);

        let err = manager.insert_tuple(b"").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let err = manager.insert_tuple(&vec![0u8; MAX_TUPLE_SIZE + 1]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_get_validates_buffer() {
        let dir = tempdir().unwrap();
        let manager = create_manager(&dir);

        let id = manager.insert_tuple(&[1u8; 100]).unwrap();

        let mut empty: [u8; 0] = [];
        let err = manager.get_tuple(id, &mut empty).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let mut small = [0u8; 10];
        let err = manager.get_tuple(id, &mut small).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_get_invalid_tuple_ids() {
        let dir = tempdir().unwrap();
        let manager = create_manager(&dir);
        manager.insert_tuple(b"x").unwrap();

        let mut buf = [0u8; 16];
        // Page 0 is reserved and resolves to the invalid tuple.
        let err = manager
            .get_tuple(TupleId::new(PageId::INVALID, 0), &mut buf)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        // A slot past the directory is unresolvable.
        let err = manager
            .get_tuple(TupleId::new(PageId::new(1), 99), &mut buf)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_update_in_place() {
        let dir = tempdir().unwrap();
        let manager = create_manager(&dir);

        let id = manager.insert_tuple(b"Hello Alice").unwrap();
        manager.update_tuple(id, b"Hi A").unwrap();

        let mut buf = [0u8; 64];
        let len = manager.get_tuple(id, &mut buf).unwrap();
        assert_eq!(&buf[..len], b"Hi A");
        // No spill happened; the tuple is still where it was.
        let cache = manager.cache.lock();
        assert!(!cache[&id.page_id].is_slot_forwarded(id.slot_id));
    }

    #[test]
    fn test_update_spill_creates_forwarding() {
        // Boundary scenario: a 5-byte tuple updated to 60 bytes cannot
        // grow in place, so the new version spills and the original slot
        // becomes a zero-length forwarding stub.
        let dir = tempdir().unwrap();
        let manager = create_manager(&dir);

        let id = manager.insert_tuple(b"tiny!").unwrap();
        let big = [0xB5u8; 60];
        manager.update_tuple(id, &big).unwrap();

        let mut buf = [0u8; 64];
        let len = manager.get_tuple(id, &mut buf).unwrap();
        assert_eq!(&buf[..len], &big[..]);

        let cache = manager.cache.lock();
        let original = &cache[&id.page_id];
        assert!(original.is_slot_forwarded(id.slot_id));
        assert_eq!(original.slot_entry(id.slot_id).unwrap().length, 0);
        let target = original.forwarding_pointer(id.slot_id);
        assert!(target.is_valid());
    }

    #[test]
    fn test_repeated_spill_updates_keep_original_id_working() {
        let dir = tempdir().unwrap();
        let manager = create_manager(&dir);

        let id = manager.insert_tuple(b"v1").unwrap();
        manager.update_tuple(id, &[1u8; 50]).unwrap();
        manager.update_tuple(id, &[2u8; 90]).unwrap();
        manager.update_tuple(id, &[3u8; 120]).unwrap();

        let mut buf = [0u8; 256];
        let len = manager.get_tuple(id, &mut buf).unwrap();
        assert_eq!(&buf[..len], &[3u8; 120][..]);
    }

    #[test]
    fn test_delete_then_get_fails() {
        let dir = tempdir().unwrap();
        let manager = create_manager(&dir);

        let id = manager.insert_tuple(b"doomed").unwrap();
        manager.delete_tuple(id).unwrap();

        let mut buf = [0u8; 16];
        let err = manager.get_tuple(id, &mut buf).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        // Deleting again is a distinct, visible failure.
        let err = manager.delete_tuple(id).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_deleted_slot_is_reused() {
        let dir = tempdir().unwrap();
        let manager = create_manager(&dir);

        let a = manager.insert_tuple(&[1u8; 50]).unwrap();
        let _b = manager.insert_tuple(&[2u8; 50]).unwrap();
        manager.delete_tuple(a).unwrap();

        let c = manager.insert_tuple(&[3u8; 50]).unwrap();
        assert_eq!(c, a);
    }

    #[test]
    fn test_inserts_spill_to_new_pages() {
        let dir = tempdir().unwrap();
        let manager = create_manager(&dir);

        // ~2 KiB tuples: four per page, so 9 inserts need a third page.
        let mut ids = Vec::new();
        for i in 0..9u8 {
            ids.push(manager.insert_tuple(&[i; 2000]).unwrap());
        }

        let pages: std::collections::HashSet<_> = ids.iter().map(|id| id.page_id).collect();
        assert!(pages.len() >= 3);

        let mut buf = [0u8; 2048];
        for (i, id) in ids.iter().enumerate() {
            let len = manager.get_tuple(*id, &mut buf).unwrap();
            assert_eq!(&buf[..len], &[i as u8; 2000][..]);
        }
    }

    #[test]
    fn test_eviction_respects_capacity() {
        let dir = tempdir().unwrap();
        let manager = create_small_manager(&dir, 3);

        let mut ids = Vec::new();
        for i in 0..24u8 {
            ids.push(manager.insert_tuple(&[i; 2000]).unwrap());
        }
        assert!(manager.cache_size() <= 3);
        assert!(manager.stats().evictions > 0);

        // Evicted pages read back intact through the device.
        let mut buf = [0u8; 2048];
        for (i, id) in ids.iter().enumerate() {
            let len = manager.get_tuple(*id, &mut buf).unwrap();
            assert_eq!(&buf[..len], &[i as u8; 2000][..]);
        }
    }

    #[test]
    fn test_flush_persists_across_restart() {
        let dir = tempdir().unwrap();
        let id = {
            let manager = create_manager(&dir);
            let id = manager.insert_tuple(b"durable bytes").unwrap();
            manager.flush_all_pages().unwrap();
            id
        };

        let manager = create_manager(&dir);
        let mut buf = [0u8; 64];
        let len = manager.get_tuple(id, &mut buf).unwrap();
        assert_eq!(&buf[..len], b"durable bytes");
    }

    #[test]
    fn test_flush_is_idempotent_on_clean_pages() {
        let dir = tempdir().unwrap();
        let manager = create_manager(&dir);
        manager.insert_tuple(b"x").unwrap();

        manager.flush_all_pages().unwrap();
        let flushes_after_first = manager.stats().flushes;
        manager.flush_all_pages().unwrap();
        assert_eq!(manager.stats().flushes, flushes_after_first);
    }

    #[test]
    fn test_compact_page_through_manager() {
        let dir = tempdir().unwrap();
        let manager = create_manager(&dir);

        let mut ids = Vec::new();
        for i in 0..8u8 {
            ids.push(manager.insert_tuple(&[i; 500]).unwrap());
        }
        for id in &ids[..4] {
            manager.delete_tuple(*id).unwrap();
        }

        manager.compact_page(PageId::new(1)).unwrap();

        // Survivors keep their slot ids and bytes.
        let mut buf = [0u8; 512];
        for (i, id) in ids.iter().enumerate().skip(4) {
            let len = manager.get_tuple(*id, &mut buf).unwrap();
            assert_eq!(&buf[..len], &[i as u8; 500][..]);
        }

        let cache = manager.cache.lock();
        assert_eq!(cache[&PageId::new(1)].fragmented_bytes(), 0);
    }

    #[test]
    fn test_compact_page_noop_when_not_recommended() {
        let dir = tempdir().unwrap();
        let manager = create_manager(&dir);
        let id = manager.insert_tuple(b"keep me").unwrap();

        manager.compact_page(id.page_id).unwrap();

        let mut buf = [0u8; 16];
        assert!(manager.get_tuple(id, &mut buf).is_ok());
    }

    #[test]
    fn test_clear_cache_flushes_first() {
        let dir = tempdir().unwrap();
        let manager = create_manager(&dir);

        let id = manager.insert_tuple(b"still here").unwrap();
        manager.clear_cache().unwrap();
        assert_eq!(manager.cache_size(), 0);

        let mut buf = [0u8; 32];
        let len = manager.get_tuple(id, &mut buf).unwrap();
        assert_eq!(&buf[..len], b"still here");
    }

    #[test]
    fn test_stats_track_hits_and_misses() {
        let dir = tempdir().unwrap();
        let manager = create_manager(&dir);

        let id = manager.insert_tuple(b"x").unwrap();
        let mut buf = [0u8; 8];
        manager.get_tuple(id, &mut buf).unwrap();
        manager.get_tuple(id, &mut buf).unwrap();

        let stats = manager.stats();
        assert!(stats.hits >= 2);
        assert!(stats.hit_ratio() > 0.0);
    }

    #[test]
    fn test_dangling_stub_after_tail_delete() {
        // Deleting the tail of a chain leaves the stub in place; the
        // original id then resolves to a deleted slot and fails NotFound.
        let dir = tempdir().unwrap();
        let manager = create_manager(&dir);

        let id = manager.insert_tuple(b"small").unwrap();
        manager.update_tuple(id, &[7u8; 80]).unwrap();
        manager.delete_tuple(id).unwrap();

        let mut buf = [0u8; 128];
        let err = manager.get_tuple(id, &mut buf).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_concurrent_inserts_and_reads() {
        use std::sync::Arc;

        let dir = tempdir().unwrap();
        let manager = Arc::new(create_manager(&dir));

        let handles: Vec<_> = (0..4u8)
            .map(|t| {
                let manager = Arc::clone(&manager);
                std::thread::spawn(move || {
                    for i in 0..25u8 {
                        let payload = [t * 25 + i; 64];
                        let id = manager.insert_tuple(&payload).unwrap();
                        let mut buf = [0u8; 64];
                        let len = manager.get_tuple(id, &mut buf).unwrap();
                        assert_eq!(&buf[..len], &payload[..]);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
