use crate::common::error::{Error, InvalidConfigSnafu, Result};
use crate::dc::{
    buf::{Buffer, PinGuard},
    page::{
        page_id, page_index, AllocSpace, CacheId, FullPageId, Page, PageId, PartitionId,
        MAX_PAGE_SIZE, META_PAGE_INDEX, MIN_PAGE_SIZE, PAGE_SIZE,
    },
};
use crate::env::{Env, PositionalReader, PositionalWriter};
use dashmap::DashMap;
use parking_lot::Mutex;
use snafu::ensure;
use std::{
    collections::HashSet,
    io,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
};
use tracing::{debug, info};

/// Page memory manager consumed by the trees.
///
/// Pages are grouped by cache. Each cache owns one meta page, reachable
/// through [`PageMemory::meta_page`], whose content is all zeros until
/// somebody writes to it.
pub trait PageMemory: Send + Sync {
    /// Allocate a new zero filled page in the given space.
    fn allocate_page(
        &self,
        cache_id: CacheId,
        partition: PartitionId,
        space: AllocSpace,
    ) -> Result<PageId>;

    /// Mark a page as free. Freed pages are not handed out again.
    fn free_page(&self, cache_id: CacheId, page_id: PageId) -> Result<()>;

    /// Pin the meta page of a cache.
    fn meta_page(&self, cache_id: CacheId) -> Result<PinGuard>;

    /// Pin a page.
    fn page(&self, full_id: FullPageId) -> Result<PinGuard>;
}

impl<T: PageMemory + ?Sized> PageMemory for Arc<T> {
    fn allocate_page(
        &self,
        cache_id: CacheId,
        partition: PartitionId,
        space: AllocSpace,
    ) -> Result<PageId> {
        (**self).allocate_page(cache_id, partition, space)
    }

    fn free_page(&self, cache_id: CacheId, page_id: PageId) -> Result<()> {
        (**self).free_page(cache_id, page_id)
    }

    fn meta_page(&self, cache_id: CacheId) -> Result<PinGuard> {
        (**self).meta_page(cache_id)
    }

    fn page(&self, full_id: FullPageId) -> Result<PinGuard> {
        (**self).page(full_id)
    }
}

impl<T: PageMemory + ?Sized> PageMemory for &T {
    fn allocate_page(
        &self,
        cache_id: CacheId,
        partition: PartitionId,
        space: AllocSpace,
    ) -> Result<PageId> {
        (**self).allocate_page(cache_id, partition, space)
    }

    fn free_page(&self, cache_id: CacheId, page_id: PageId) -> Result<()> {
        (**self).free_page(cache_id, page_id)
    }

    fn meta_page(&self, cache_id: CacheId) -> Result<PinGuard> {
        (**self).meta_page(cache_id)
    }

    fn page(&self, full_id: FullPageId) -> Result<PinGuard> {
        (**self).page(full_id)
    }
}

/// Options for opening a [`BufMgr`].
#[derive(Debug, Clone)]
pub struct Options {
    /// Page size in bytes, a power of two in `512..=65536`.
    pub page_size: usize,
    /// Create cache files that do not exist yet.
    pub create_if_missing: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            page_size: PAGE_SIZE,
            create_if_missing: true,
        }
    }
}

impl Options {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.page_size.is_power_of_two()
                && (MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&self.page_size),
            InvalidConfigSnafu {
                reason: format!(
                    "page size {} must be a power of two in [{MIN_PAGE_SIZE}, {MAX_PAGE_SIZE}]",
                    self.page_size
                ),
            }
        );
        Ok(())
    }
}

/// BufMgr manages the in memory cache AND file usage of pages.
///
/// Every cache is backed by its own file `cache-<id>.pages` inside the
/// store directory. Page `i` of a cache lives at byte offset
/// `i * page_size`. Every on disk page belongs to one of the following
/// categories:
/// 1. Page0: The meta page of the cache.
/// 2. Active pages: Pages handed out by [`PageMemory::allocate_page`].
/// 3. Freed pages: Zeroed and never allocated again. There is no free
///    list yet, so they stay unused until the file is rebuilt.
/// 4. Unallocated pages: Beyond the end of the file.
///
/// Loaded pages are kept in a hash table keyed by cache and page index
/// until the manager is dropped. Dirty pages reach the file on
/// [`BufMgr::flush`].
pub struct BufMgr<E: Env> {
    env: E,
    dir: PathBuf,
    options: Options,
    active_pages: DashMap<(CacheId, u32), Buffer>,
    caches: DashMap<CacheId, Arc<CacheFile<E::PositionalReaderWriter>>>,
}

struct CacheFile<F> {
    file: F,
    next_page_idx: AtomicU32,
    freed: Mutex<HashSet<u32>>,
}

impl<E> BufMgr<E>
where
    E: Env,
{
    /// Open the page store in the given directory. Cache files are opened
    /// lazily on first access.
    pub fn open<P: AsRef<Path>>(env: E, dir: P, options: Options) -> Result<Self> {
        options.validate()?;
        if options.create_if_missing {
            env.create_dir_all(dir.as_ref())?;
        }
        info!(dir = %dir.as_ref().display(), page_size = options.page_size, "open page store");
        Ok(Self {
            env,
            dir: dir.as_ref().to_path_buf(),
            options,
            active_pages: DashMap::new(),
            caches: DashMap::new(),
        })
    }

    /// Number of pages of a cache, the meta page included.
    pub fn page_count(&self, cache_id: CacheId) -> Result<u32> {
        Ok(self.cache(cache_id)?.next_page_idx.load(Ordering::Acquire))
    }

    /// Number of pages freed during this session.
    pub fn freed_pages(&self, cache_id: CacheId) -> Result<usize> {
        Ok(self.cache(cache_id)?.freed.lock().len())
    }

    /// Write every dirty page to its cache file and sync the files.
    pub fn flush(&self) -> Result<()> {
        let page_size = self.options.page_size as u64;
        let mut written = 0usize;
        // Page locks are never taken while holding a shard of the page table.
        let pages = self
            .active_pages
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect::<Vec<_>>();
        for ((cache_id, idx), buf) in pages {
            let cache = self.cache(cache_id)?;
            let mut state = buf.lock_state();
            if state.is_dirty {
                cache
                    .file
                    .write_exact_at(state.page.data(), idx as u64 * page_size)?;
                state.is_dirty = false;
                written += 1;
            }
        }
        let caches = self
            .caches
            .iter()
            .map(|entry| entry.value().clone())
            .collect::<Vec<_>>();
        for cache in caches {
            cache.file.sync_all()?;
        }
        debug!(pages = written, "flushed dirty pages");
        Ok(())
    }

    fn cache_path(&self, cache_id: CacheId) -> PathBuf {
        self.dir.join(format!("cache-{cache_id}.pages"))
    }

    fn cache(&self, cache_id: CacheId) -> Result<Arc<CacheFile<E::PositionalReaderWriter>>> {
        if let Some(cache) = self.caches.get(&cache_id) {
            return Ok(cache.clone());
        }

        let path = self.cache_path(cache_id);
        if !self.options.create_if_missing && self.env.metadata(&path).is_err() {
            return Err(Error::Io {
                source: io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("cache file {} does not exist", path.display()),
                ),
            });
        }
        let file = self.env.open_file(&path)?;
        let size = file.file_size()?;
        let page_size = self.options.page_size as u64;
        if size % page_size != 0 {
            return Err(Error::Corrupted {
                reason: format!(
                    "cache file {} has size {size} which is not a multiple of page size {page_size}",
                    path.display()
                ),
            });
        }
        // The meta page always exists, even before it is first written.
        let next_page_idx = std::cmp::max(size / page_size, 1) as u32;
        debug!(cache_id, pages = next_page_idx, "open cache file");

        let cache = Arc::new(CacheFile {
            file,
            next_page_idx: AtomicU32::new(next_page_idx),
            freed: Mutex::new(HashSet::new()),
        });
        Ok(self.caches.entry(cache_id).or_insert(cache).clone())
    }

    fn fix_page(&self, cache_id: CacheId, page_id: PageId) -> Result<Buffer> {
        let idx = page_index(page_id);
        let cache = self.cache(cache_id)?;
        if idx >= cache.next_page_idx.load(Ordering::Acquire) || cache.freed.lock().contains(&idx)
        {
            return Err(Error::PageNotFound { page_id, cache_id });
        }

        if let Some(buf) = self.active_pages.get(&(cache_id, idx)) {
            return Ok(buf.clone());
        }

        let page = self.read_page(&cache, idx)?;
        let buf = Buffer::new(FullPageId::new(page_id, cache_id), page, false);
        Ok(self
            .active_pages
            .entry((cache_id, idx))
            .or_insert(buf)
            .clone())
    }

    fn read_page(&self, cache: &CacheFile<E::PositionalReaderWriter>, idx: u32) -> Result<Page> {
        let page_size = self.options.page_size as u64;
        let mut page = Page::alloc(self.options.page_size);
        let pos = idx as u64 * page_size;
        // Pages past the end of the file were never flushed and read as zeros.
        if pos + page_size <= cache.file.file_size()? {
            cache.file.read_exact_at(page.data_mut(), pos)?;
        }
        Ok(page)
    }
}

impl<E> PageMemory for BufMgr<E>
where
    E: Env,
{
    fn allocate_page(
        &self,
        cache_id: CacheId,
        partition: PartitionId,
        space: AllocSpace,
    ) -> Result<PageId> {
        let cache = self.cache(cache_id)?;
        let idx = cache
            .next_page_idx
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |idx| idx.checked_add(1))
            .map_err(|_| Error::OutOfSpace { cache_id })?;

        let page_id = page_id(partition, space, idx);
        let page = Page::alloc(self.options.page_size);
        self.active_pages.insert(
            (cache_id, idx),
            Buffer::new(FullPageId::new(page_id, cache_id), page, true),
        );
        debug!(cache_id, page_id, ?space, "allocate page");
        Ok(page_id)
    }

    fn free_page(&self, cache_id: CacheId, page_id: PageId) -> Result<()> {
        let idx = page_index(page_id);
        if idx == META_PAGE_INDEX {
            return Err(Error::Corrupted {
                reason: format!("attempt to free the meta page of cache {cache_id}"),
            });
        }
        let buf = self.fix_page(cache_id, page_id)?;
        {
            let mut state = buf.lock_state();
            state.page.zero();
            state.is_dirty = true;
        }
        self.cache(cache_id)?.freed.lock().insert(idx);
        debug!(cache_id, page_id, "free page");
        Ok(())
    }

    fn meta_page(&self, cache_id: CacheId) -> Result<PinGuard> {
        let page_id = page_id(0, AllocSpace::Meta, META_PAGE_INDEX);
        Ok(self.fix_page(cache_id, page_id)?.pin())
    }

    fn page(&self, full_id: FullPageId) -> Result<PinGuard> {
        Ok(self.fix_page(full_id.cache_id, full_id.page_id)?.pin())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dc::page::page_space;
    use crate::env::SimEnv;

    fn open(env: SimEnv) -> BufMgr<SimEnv> {
        BufMgr::open(env, "store", Options::default()).unwrap()
    }

    #[test]
    fn test_invalid_page_size() {
        let options = Options {
            page_size: 1000,
            ..Options::default()
        };
        let err = BufMgr::open(SimEnv::new(), "store", options).err().unwrap();
        assert!(matches!(err, Error::InvalidConfig { .. }));
    }

    #[test]
    fn test_fresh_meta_page_is_zero() -> Result<()> {
        let mgr = open(SimEnv::new());
        let meta = mgr.meta_page(1)?;
        assert!(meta.read().iter().all(|b| *b == 0));
        assert_eq!(mgr.page_count(1)?, 1);
        Ok(())
    }

    #[test]
    fn test_allocate_in_space() -> Result<()> {
        let mgr = open(SimEnv::new());
        let p1 = mgr.allocate_page(1, 0, AllocSpace::Index)?;
        let p2 = mgr.allocate_page(1, 0, AllocSpace::Data)?;
        assert_eq!(page_index(p1), 1);
        assert_eq!(page_index(p2), 2);
        assert_eq!(page_space(p1)?, AllocSpace::Index);
        assert_eq!(page_space(p2)?, AllocSpace::Data);
        // caches have independent page index spaces
        let other = mgr.allocate_page(2, 0, AllocSpace::Index)?;
        assert_eq!(page_index(other), 1);
        Ok(())
    }

    #[test]
    fn test_freed_page_not_reused() -> Result<()> {
        let mgr = open(SimEnv::new());
        let p1 = mgr.allocate_page(1, 0, AllocSpace::Index)?;
        mgr.free_page(1, p1)?;
        assert_eq!(mgr.freed_pages(1)?, 1);
        assert!(matches!(
            mgr.page(FullPageId::new(p1, 1)),
            Err(Error::PageNotFound { .. })
        ));
        let p2 = mgr.allocate_page(1, 0, AllocSpace::Index)?;
        assert_ne!(page_index(p1), page_index(p2));
        Ok(())
    }

    #[test]
    fn test_cannot_free_meta_page() {
        let mgr = open(SimEnv::new());
        let meta_id = mgr.meta_page(1).unwrap().full_id().page_id;
        assert!(mgr.free_page(1, meta_id).is_err());
    }

    #[test]
    fn test_flush_and_reopen() -> Result<()> {
        let env = SimEnv::new();
        let page_id = {
            let mgr = open(env.clone());
            let page_id = mgr.allocate_page(3, 0, AllocSpace::Index)?;
            mgr.page(FullPageId::new(page_id, 3))?.write()[17] = 0xAB;
            mgr.meta_page(3)?.write()[0] = 1;
            mgr.flush()?;
            page_id
        };

        let mgr = open(env);
        assert_eq!(mgr.page_count(3)?, 2);
        assert_eq!(mgr.page(FullPageId::new(page_id, 3))?.read()[17], 0xAB);
        assert_eq!(mgr.meta_page(3)?.read()[0], 1);
        Ok(())
    }

    #[test]
    fn test_unknown_page() {
        let mgr = open(SimEnv::new());
        let missing = page_id(0, AllocSpace::Index, 99);
        assert!(matches!(
            mgr.page(FullPageId::new(missing, 1)),
            Err(Error::PageNotFound { .. })
        ));
    }

    #[test]
    fn test_missing_cache_file_without_create() {
        let options = Options {
            create_if_missing: false,
            ..Options::default()
        };
        let mgr = BufMgr::open(SimEnv::new(), "store", options).unwrap();
        assert!(matches!(mgr.meta_page(1), Err(Error::Io { .. })));
    }
}
