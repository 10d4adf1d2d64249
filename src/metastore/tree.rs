use crate::common::error::Result;
use crate::dc::{
    bufmgr::PageMemory,
    node::NodeIo,
    page::{AllocSpace, CacheId, PageId},
    tree::{BPlusTree, TreeRow},
};
use crate::metastore::{
    codec::{self, IndexItem},
    io::{IndexInnerIo, IndexLeafIo},
};
use std::cmp::Ordering;

/// Tree of [`IndexItem`]s, one per cache.
pub type MetaTree<M> = BPlusTree<MetaRows, M>;

/// Name of the metadata tree of a cache.
pub fn tree_name(cache_id: CacheId) -> String {
    format!("{cache_id}##Meta")
}

/// Row policy of the metadata tree. Node pages are taken from partition 0
/// of the index space.
#[derive(Debug, Default)]
pub struct MetaRows;

impl TreeRow for MetaRows {
    type Row = IndexItem;
    type InnerIo = IndexInnerIo;
    type LeafIo = IndexLeafIo;

    /// Byte-wise unsigned comparison of names, a proper prefix sorts first.
    /// Only the name bytes of the slot are read.
    fn compare<Io: NodeIo<IndexItem>>(&self, page: &[u8], idx: usize, row: &IndexItem) -> Ordering {
        codec::name_at(page, Io::offset(idx)).cmp(row.name.as_ref())
    }

    fn check_row(&self, row: &IndexItem) -> Result<()> {
        codec::check_name(&row.name)
    }

    fn get_row<Io: NodeIo<IndexItem>>(&self, page: &[u8], idx: usize) -> Result<IndexItem> {
        Io::lookup_row(page, idx)
    }

    fn allocate_page<M: PageMemory>(&self, page_mem: &M, cache_id: CacheId) -> Result<PageId> {
        page_mem.allocate_page(cache_id, 0, AllocSpace::Index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dc::{
        bufmgr::{BufMgr, Options},
        node::init_node,
        page::PAGE_SIZE,
    };
    use crate::env::SimEnv;
    use proptest::prelude::*;

    #[test]
    fn test_tree_name() {
        assert_eq!(tree_name(42), "42##Meta");
    }

    #[test]
    fn test_compare_prefix_and_bytes() {
        let mut page = vec![0u8; PAGE_SIZE];
        init_node::<IndexItem, IndexLeafIo>(&mut page, 1);
        IndexLeafIo::store(&mut page, 0, &IndexItem::new("ab", 7)).unwrap();

        let cmp = |name: &'static [u8]| MetaRows.compare::<IndexLeafIo>(&page, 0, &IndexItem::key(name));
        assert_eq!(cmp(b"ab"), Ordering::Equal);
        assert_eq!(cmp(b"abc"), Ordering::Less);
        assert_eq!(cmp(b"a"), Ordering::Greater);
        assert_eq!(cmp(b""), Ordering::Greater);
        // unsigned bytes: 0xFF sorts after ASCII
        assert_eq!(cmp(b"\xFF"), Ordering::Less);
    }

    #[test]
    fn test_allocates_index_pages() -> Result<()> {
        let mgr = BufMgr::open(SimEnv::new(), "m", Options::default())?;
        let page_id = MetaRows.allocate_page(&mgr, 3)?;
        assert_eq!(crate::dc::page::page_space(page_id)?, AllocSpace::Index);
        assert_eq!(crate::dc::page::page_partition(page_id), 0);
        Ok(())
    }

    #[test]
    fn test_tree_scan_order() -> Result<()> {
        let mgr = BufMgr::open(SimEnv::new(), "m", Options::default())?;
        let meta = mgr.meta_page(1)?;
        let tree = MetaTree::new(tree_name(1), 1, &mgr, meta, MetaRows, true)?;
        for (i, name) in ["users_idx", "a", "orders_idx"].iter().enumerate() {
            tree.put(&IndexItem::new(*name, i as u64 + 1))?;
        }
        let mut names = vec![];
        tree.for_each(|row| {
            names.push(String::from_utf8_lossy(&row.name).into_owned());
            Ok(())
        })?;
        assert_eq!(names, vec!["a", "orders_idx", "users_idx"]);
        assert_eq!(tree.find_one(&IndexItem::key("a"))?.map(|r| r.page_id), Some(2));
        Ok(())
    }

    proptest! {
        #[test]
        fn proptest_compare_agrees_with_ord(
            stored in proptest::collection::vec(any::<u8>(), 0..=64),
            key in proptest::collection::vec(any::<u8>(), 0..=64),
        ) {
            let mut page = vec![0u8; PAGE_SIZE];
            let stored = IndexItem::new(stored, 1);
            let key = IndexItem::key(key);
            IndexLeafIo::store(&mut page, 2, &stored).unwrap();
            prop_assert_eq!(
                MetaRows.compare::<IndexLeafIo>(&page, 2, &key),
                stored.cmp(&key)
            );
        }
    }
}
