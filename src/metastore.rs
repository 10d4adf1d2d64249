//! Metadata storage: a persistent directory from index names to the root
//! page of each index, kept as a B+Tree in the pages of a cache.
//!
//! The tree is bootstrapped from the meta page of the cache. A zero meta
//! page means the cache never had a directory and a fresh tree is created,
//! otherwise the tree recorded there is reopened.
pub mod codec;
pub mod io;
pub mod tree;

use crate::common::error::{NameTooLongSnafu, Result};
use crate::dc::{
    bufmgr::PageMemory,
    meta,
    page::{AllocSpace, CacheId, FullPageId, PageId},
};
use parking_lot::Mutex;
use snafu::ensure;
use tracing::{debug, info};

pub use codec::{IndexItem, ITEM_SIZE, MAX_IDX_NAME_LEN};
pub use tree::{tree_name, MetaRows, MetaTree};

/// Root page of an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RootPage {
    pub page_id: FullPageId,
    /// The page was allocated by the call that returned it.
    pub allocated: bool,
}

impl RootPage {
    pub fn new(page_id: FullPageId, allocated: bool) -> Self {
        Self { page_id, allocated }
    }
}

/// Directory of index root pages.
pub trait MetaStore {
    /// Root page of index `name`, allocated and registered on first use.
    fn get_or_allocate_for_tree(&self, name: &str) -> Result<RootPage>;

    /// Unregister index `name` and release its root page. Returns the
    /// released page, or `None` if no such index exists.
    fn drop_root_page(&self, name: &str) -> Result<Option<RootPage>>;
}

pub struct MetadataStorage<M: PageMemory> {
    cache_id: CacheId,
    tree: MetaTree<M>,
    /// Serializes lookup and insertion of one name against another.
    lock: Mutex<()>,
}

impl<M> MetadataStorage<M>
where
    M: PageMemory,
{
    /// Open the metadata directory of `cache_id`, creating it if the meta
    /// page of the cache is still blank.
    pub fn new(page_mem: M, cache_id: CacheId) -> Result<Self> {
        let meta_page = page_mem.meta_page(cache_id)?;
        let init_new = {
            let page = meta_page.read();
            !meta::is_initialized(&page)
        };
        let tree = MetaTree::new(
            tree_name(cache_id),
            cache_id,
            page_mem,
            meta_page,
            MetaRows,
            init_new,
        )?;
        info!(cache_id, init_new, "metadata storage ready");
        Ok(Self {
            cache_id,
            tree,
            lock: Mutex::new(()),
        })
    }

    /// Registered entries in name order.
    pub fn entries(&self) -> Result<Vec<IndexItem>> {
        let mut entries = vec![];
        self.tree.for_each(|row| {
            entries.push(row.clone());
            Ok(())
        })?;
        Ok(entries)
    }

    /// Registered index names in order. Names that are not valid UTF-8 are
    /// converted lossily.
    pub fn index_names(&self) -> Result<Vec<String>> {
        Ok(self
            .entries()?
            .into_iter()
            .map(|item| String::from_utf8_lossy(&item.name).into_owned())
            .collect())
    }

    /// Number of registered indexes.
    pub fn len(&self) -> Result<usize> {
        self.tree.size()
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Height of the directory tree, zero while the root is a leaf.
    pub fn root_level(&self) -> u32 {
        self.tree.root_level()
    }

    pub(crate) fn tree(&self) -> &MetaTree<M> {
        &self.tree
    }

    fn full_id(&self, page_id: PageId) -> FullPageId {
        FullPageId::new(page_id, self.cache_id)
    }
}

impl<M> MetaStore for MetadataStorage<M>
where
    M: PageMemory,
{
    fn get_or_allocate_for_tree(&self, name: &str) -> Result<RootPage> {
        let encoded = name.as_bytes();
        ensure!(
            encoded.len() <= MAX_IDX_NAME_LEN,
            NameTooLongSnafu {
                max: MAX_IDX_NAME_LEN,
                actual: encoded.len(),
                name,
            }
        );

        let _guard = self.lock.lock();
        let key = IndexItem::key(encoded.to_vec());
        if let Some(item) = self.tree.find_one(&key)? {
            return Ok(RootPage::new(self.full_id(item.page_id), false));
        }

        let page_id = self
            .tree
            .page_mem()
            .allocate_page(self.cache_id, 0, AllocSpace::Index)?;
        self.tree.put(&IndexItem::new(key.name, page_id))?;
        debug!(
            cache_id = self.cache_id,
            name,
            page_id = %format!("{page_id:#018x}"),
            "allocate index root"
        );
        Ok(RootPage::new(self.full_id(page_id), true))
    }

    fn drop_root_page(&self, name: &str) -> Result<Option<RootPage>> {
        let encoded = name.as_bytes();
        // Such a name could never have been registered.
        if encoded.len() > MAX_IDX_NAME_LEN {
            return Ok(None);
        }

        let _guard = self.lock.lock();
        let key = IndexItem::key(encoded.to_vec());
        let Some(item) = self.tree.find_one(&key)? else {
            return Ok(None);
        };
        // The entry stays registered unless its root page can be released.
        self.tree.page_mem().page(self.full_id(item.page_id))?;
        self.tree.remove(&key)?;
        // TODO: hand the page to a reuse list once page memory keeps one.
        self.tree.page_mem().free_page(self.cache_id, item.page_id)?;
        debug!(
            cache_id = self.cache_id,
            name,
            page_id = %format!("{:#018x}", item.page_id),
            "drop index root"
        );
        Ok(Some(RootPage::new(self.full_id(item.page_id), false)))
    }
}
