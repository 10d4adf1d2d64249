//! A B+Tree stored in fixed-size pages.
//!
//! The tree is generic over its rows through [`TreeRow`], which supplies
//! the page layouts of inner and leaf nodes, the ordering of a row against
//! a slot and the page allocation policy. The root page id and the tree
//! level live in the meta page of the cache.
//!
//! Inner node `n` with keys `k0..k(n-1)` has links `c0..cn`. Child `ci`
//! holds rows `r` with `k(i-1) <= r < k(i)`.
use crate::common::error::{corrupted, Result};
use crate::dc::{
    buf::PinGuard,
    bufmgr::PageMemory,
    meta,
    node::{self, NodeHeader, NodeIo},
    page::{CacheId, FullPageId, PageId},
};
use parking_lot::RwLock;
use std::{cmp::Ordering, fmt};
use tracing::{debug, info};

/// Row type of a tree together with everything the engine needs to know
/// about it.
pub trait TreeRow: Send + Sync + 'static {
    type Row: Clone + fmt::Debug + Send + Sync;
    type InnerIo: NodeIo<Self::Row>;
    type LeafIo: NodeIo<Self::Row>;

    /// Compare the row stored in slot `idx` of `page` with `row`.
    fn compare<Io: NodeIo<Self::Row>>(&self, page: &[u8], idx: usize, row: &Self::Row)
        -> Ordering;

    /// Reject a row the node layouts cannot hold. Called before any page
    /// is modified.
    fn check_row(&self, _row: &Self::Row) -> Result<()> {
        Ok(())
    }

    /// Materialize the row stored in slot `idx` of `page`.
    fn get_row<Io: NodeIo<Self::Row>>(&self, page: &[u8], idx: usize) -> Result<Self::Row>;

    /// Allocate a page for a new tree node.
    fn allocate_page<M: PageMemory>(&self, page_mem: &M, cache_id: CacheId) -> Result<PageId>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeKind {
    Inner,
    Leaf,
}

/// Result of inserting into a subtree.
struct PutResult<Row> {
    old: Option<Row>,
    /// Separator and right sibling produced by a split.
    split: Option<(Row, PageId)>,
}

/// Result of removing from a subtree.
struct RemoveResult<Row> {
    old: Option<Row>,
    /// The node holds nothing anymore.
    empty: bool,
}

pub struct BPlusTree<R: TreeRow, M: PageMemory> {
    name: String,
    cache_id: CacheId,
    page_mem: M,
    meta_page: PinGuard,
    rows: R,
    /// Readers share the tree, `put` and `remove` have it exclusively.
    lock: RwLock<()>,
}

impl<R, M> BPlusTree<R, M>
where
    R: TreeRow,
    M: PageMemory,
{
    /// Create a tree handle. With `init_new` an empty leaf root is allocated
    /// and registered in the meta page, otherwise the existing root is
    /// validated.
    pub fn new(
        name: impl Into<String>,
        cache_id: CacheId,
        page_mem: M,
        meta_page: PinGuard,
        rows: R,
        init_new: bool,
    ) -> Result<Self> {
        let tree = Self {
            name: name.into(),
            cache_id,
            page_mem,
            meta_page,
            rows,
            lock: RwLock::new(()),
        };

        if init_new {
            let root = tree.rows.allocate_page(&tree.page_mem, cache_id)?;
            tree.init_leaf(root)?;
            let mut meta = tree.meta_page.write();
            meta::set_root(&mut meta, root);
            meta::set_level(&mut meta, 0);
            info!(tree = %tree.name, root = %format!("{root:#018x}"), "create tree");
        } else {
            let root = tree.root();
            if root == 0 {
                return Err(corrupted(format!("tree {} has no root page", tree.name)));
            }
            let page = tree.page(root)?;
            let kind = tree.node_kind(&page.read(), root)?;
            info!(
                tree = %tree.name,
                root = %format!("{root:#018x}"),
                level = tree.root_level(),
                ?kind,
                "open tree"
            );
        }
        Ok(tree)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn page_mem(&self) -> &M {
        &self.page_mem
    }

    /// Level of the root, zero when the root is a leaf.
    pub fn root_level(&self) -> u32 {
        meta::get_level(&self.meta_page.read())
    }

    /// Look up the row equal to `row`.
    pub fn find_one(&self, row: &R::Row) -> Result<Option<R::Row>> {
        let _guard = self.lock.read();
        let mut page_id = self.root();
        loop {
            let pin = self.page(page_id)?;
            let page = pin.read();
            match self.node_kind(&page, page_id)? {
                NodeKind::Leaf => {
                    return match self.search::<R::LeafIo>(&page, row) {
                        Ok(idx) => Ok(Some(self.rows.get_row::<R::LeafIo>(&page, idx)?)),
                        Err(_) => Ok(None),
                    };
                }
                NodeKind::Inner => {
                    let ci = self.child_index(&page, row);
                    page_id = node::get_link::<R::Row, R::InnerIo>(&page, ci);
                }
            }
        }
    }

    /// Insert `row`, replacing an equal row. Returns the replaced row.
    pub fn put(&self, row: &R::Row) -> Result<Option<R::Row>> {
        self.rows.check_row(row)?;
        let _guard = self.lock.write();
        let root = self.root();
        let PutResult { old, split } = self.put_rec(root, row)?;
        if let Some((sep, right)) = split {
            let new_root = self.rows.allocate_page(&self.page_mem, self.cache_id)?;
            let pin = self.page(new_root)?;
            let mut page = pin.write();
            node::init_node::<R::Row, R::InnerIo>(&mut page, new_root);
            R::InnerIo::store(&mut page, 0, &sep)?;
            node::set_link::<R::Row, R::InnerIo>(&mut page, 0, root);
            node::set_link::<R::Row, R::InnerIo>(&mut page, 1, right);
            node::set_key_count(&mut page, 1);

            let mut meta = self.meta_page.write();
            let level = meta::get_level(&meta) + 1;
            meta::set_root(&mut meta, new_root);
            meta::set_level(&mut meta, level);
            info!(
                tree = %self.name,
                root = %format!("{new_root:#018x}"),
                level,
                "split root"
            );
        }
        Ok(old)
    }

    /// Remove the row equal to `row`. Returns the removed row.
    pub fn remove(&self, row: &R::Row) -> Result<Option<R::Row>> {
        let _guard = self.lock.write();
        let root = self.root();
        let RemoveResult { old, empty } = self.remove_rec(root, row)?;

        if empty {
            // Every child of an inner root is gone, the root turns into an
            // empty leaf again.
            let pin = self.page(root)?;
            let mut page = pin.write();
            if self.node_kind(&page, root)? == NodeKind::Inner {
                node::init_node::<R::Row, R::LeafIo>(&mut page, root);
                meta::set_level(&mut self.meta_page.write(), 0);
                debug!(tree = %self.name, "reset root to leaf");
            }
        }

        self.collapse_root()?;
        Ok(old)
    }

    /// Visit every row in order.
    pub fn for_each<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(&R::Row) -> Result<()>,
    {
        let _guard = self.lock.read();
        self.for_each_rec(self.root(), &mut f)
    }

    /// Number of rows in the tree.
    pub fn size(&self) -> Result<usize> {
        let mut size = 0;
        self.for_each(|_| {
            size += 1;
            Ok(())
        })?;
        Ok(size)
    }

    fn root(&self) -> PageId {
        meta::get_root(&self.meta_page.read())
    }

    fn page(&self, page_id: PageId) -> Result<PinGuard> {
        self.page_mem.page(FullPageId::new(page_id, self.cache_id))
    }

    fn init_leaf(&self, page_id: PageId) -> Result<()> {
        let pin = self.page(page_id)?;
        node::init_node::<R::Row, R::LeafIo>(&mut pin.write(), page_id);
        Ok(())
    }

    fn node_kind(&self, page: &[u8], page_id: PageId) -> Result<NodeKind> {
        let io_type = node::node_type(page);
        let (kind, max_count) = if io_type == R::LeafIo::VERSIONS.io_type() {
            R::LeafIo::VERSIONS.check(page)?;
            (NodeKind::Leaf, R::LeafIo::max_count(page.len()))
        } else if io_type == R::InnerIo::VERSIONS.io_type() {
            R::InnerIo::VERSIONS.check(page)?;
            (NodeKind::Inner, R::InnerIo::max_count(page.len()))
        } else {
            return Err(corrupted(format!(
                "page {page_id:#018x} of tree {} is not a tree node: {:?}",
                self.name,
                NodeHeader(page)
            )));
        };
        node::check_self_id(page, page_id)?;
        let cnt = node::key_count(page);
        if cnt > max_count {
            return Err(corrupted(format!(
                "page {page_id:#018x} of tree {} holds {cnt} keys, at most {max_count} fit",
                self.name
            )));
        }
        Ok(kind)
    }

    /// Binary search for `row`. `Ok` holds the slot of an equal row, `Err`
    /// the slot where `row` would be inserted.
    fn search<Io: NodeIo<R::Row>>(
        &self,
        page: &[u8],
        row: &R::Row,
    ) -> std::result::Result<usize, usize> {
        let (mut lo, mut hi) = (0, node::key_count(page));
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match self.rows.compare::<Io>(page, mid, row) {
                Ordering::Less => lo = mid + 1,
                Ordering::Greater => hi = mid,
                Ordering::Equal => return Ok(mid),
            }
        }
        Err(lo)
    }

    /// Index of the child link to follow for `row`: the number of keys
    /// less than or equal to `row`.
    fn child_index(&self, page: &[u8], row: &R::Row) -> usize {
        match self.search::<R::InnerIo>(page, row) {
            Ok(idx) => idx + 1,
            Err(idx) => idx,
        }
    }

    fn put_rec(&self, page_id: PageId, row: &R::Row) -> Result<PutResult<R::Row>> {
        let pin = self.page(page_id)?;
        let (ci, child) = {
            let mut page = pin.write();
            match self.node_kind(&page, page_id)? {
                NodeKind::Leaf => return self.put_leaf(&mut page, page_id, row),
                NodeKind::Inner => {
                    let ci = self.child_index(&page, row);
                    (ci, node::get_link::<R::Row, R::InnerIo>(&page, ci))
                }
            }
        };

        let res = self.put_rec(child, row)?;
        let split = match res.split {
            Some((sep, right)) => {
                let mut page = pin.write();
                self.insert_separator(&mut page, page_id, ci, &sep, right)?
            }
            None => None,
        };
        Ok(PutResult {
            old: res.old,
            split,
        })
    }

    fn put_leaf(
        &self,
        page: &mut [u8],
        page_id: PageId,
        row: &R::Row,
    ) -> Result<PutResult<R::Row>> {
        let pos = match self.search::<R::LeafIo>(page, row) {
            Ok(idx) => {
                let old = self.rows.get_row::<R::LeafIo>(page, idx)?;
                R::LeafIo::store(page, idx, row)?;
                return Ok(PutResult {
                    old: Some(old),
                    split: None,
                });
            }
            Err(pos) => pos,
        };

        let cnt = node::key_count(page);
        if cnt < R::LeafIo::max_count(page.len()) {
            node::shift_keys_right::<R::Row, R::LeafIo>(page, pos, cnt);
            R::LeafIo::store(page, pos, row)?;
            node::set_key_count(page, cnt + 1);
            return Ok(PutResult {
                old: None,
                split: None,
            });
        }

        let mid = cnt / 2;
        let right_id = self.rows.allocate_page(&self.page_mem, self.cache_id)?;
        let right_pin = self.page(right_id)?;
        let mut right = right_pin.write();
        node::init_node::<R::Row, R::LeafIo>(&mut right, right_id);
        for (dst, src) in (mid..cnt).enumerate() {
            R::LeafIo::store_from::<R::LeafIo>(&mut right, dst, page, src)?;
        }
        node::set_key_count(&mut right, cnt - mid);
        node::set_key_count(page, mid);

        let (target, at) = if pos <= mid {
            (page, pos)
        } else {
            (&mut right[..], pos - mid)
        };
        let target_cnt = node::key_count(target);
        node::shift_keys_right::<R::Row, R::LeafIo>(target, at, target_cnt);
        R::LeafIo::store(target, at, row)?;
        node::set_key_count(target, target_cnt + 1);

        let sep = self.rows.get_row::<R::LeafIo>(&right, 0)?;
        debug!(
            tree = %self.name,
            left = %format!("{page_id:#018x}"),
            right = %format!("{right_id:#018x}"),
            "split leaf"
        );
        Ok(PutResult {
            old: None,
            split: Some((sep, right_id)),
        })
    }

    /// Insert separator `sep` with right link `right` after child `ci`,
    /// splitting the inner node if it is full.
    fn insert_separator(
        &self,
        page: &mut [u8],
        page_id: PageId,
        ci: usize,
        sep: &R::Row,
        right: PageId,
    ) -> Result<Option<(R::Row, PageId)>> {
        let cnt = node::key_count(page);
        if cnt < R::InnerIo::max_count(page.len()) {
            Self::insert_into_inner(page, ci, sep, right)?;
            return Ok(None);
        }

        // Keys mid+1.. and links mid+1.. move right, key mid moves up.
        let mid = cnt / 2;
        let promoted = self.rows.get_row::<R::InnerIo>(page, mid)?;
        let new_id = self.rows.allocate_page(&self.page_mem, self.cache_id)?;
        let new_pin = self.page(new_id)?;
        let mut new_page = new_pin.write();
        node::init_node::<R::Row, R::InnerIo>(&mut new_page, new_id);
        for (dst, src) in (mid + 1..cnt).enumerate() {
            R::InnerIo::store_from::<R::InnerIo>(&mut new_page, dst, page, src)?;
        }
        for (dst, src) in (mid + 1..=cnt).enumerate() {
            let link = node::get_link::<R::Row, R::InnerIo>(page, src);
            node::set_link::<R::Row, R::InnerIo>(&mut new_page, dst, link);
        }
        node::set_key_count(&mut new_page, cnt - mid - 1);
        node::set_key_count(page, mid);

        if ci <= mid {
            Self::insert_into_inner(page, ci, sep, right)?;
        } else {
            Self::insert_into_inner(&mut new_page, ci - mid - 1, sep, right)?;
        }

        debug!(
            tree = %self.name,
            left = %format!("{page_id:#018x}"),
            right = %format!("{new_id:#018x}"),
            "split inner"
        );
        Ok(Some((promoted, new_id)))
    }

    fn insert_into_inner(page: &mut [u8], ci: usize, sep: &R::Row, right: PageId) -> Result<()> {
        let cnt = node::key_count(page);
        node::shift_keys_right::<R::Row, R::InnerIo>(page, ci, cnt);
        R::InnerIo::store(page, ci, sep)?;
        node::insert_link::<R::Row, R::InnerIo>(page, ci + 1, cnt + 1, right);
        node::set_key_count(page, cnt + 1);
        Ok(())
    }

    fn remove_rec(&self, page_id: PageId, row: &R::Row) -> Result<RemoveResult<R::Row>> {
        let pin = self.page(page_id)?;
        let (ci, child) = {
            let mut page = pin.write();
            match self.node_kind(&page, page_id)? {
                NodeKind::Leaf => {
                    let idx = match self.search::<R::LeafIo>(&page, row) {
                        Ok(idx) => idx,
                        Err(_) => {
                            return Ok(RemoveResult {
                                old: None,
                                empty: false,
                            })
                        }
                    };
                    let old = self.rows.get_row::<R::LeafIo>(&page, idx)?;
                    let cnt = node::key_count(&page);
                    node::shift_keys_left::<R::Row, R::LeafIo>(&mut page, idx, cnt);
                    node::set_key_count(&mut page, cnt - 1);
                    return Ok(RemoveResult {
                        old: Some(old),
                        empty: cnt == 1,
                    });
                }
                NodeKind::Inner => {
                    let ci = self.child_index(&page, row);
                    (ci, node::get_link::<R::Row, R::InnerIo>(&page, ci))
                }
            }
        };

        let res = self.remove_rec(child, row)?;
        if !res.empty {
            return Ok(RemoveResult {
                old: res.old,
                empty: false,
            });
        }

        // Unlink the emptied child together with one adjacent separator.
        let empty = {
            let mut page = pin.write();
            let cnt = node::key_count(&page);
            if cnt == 0 {
                true
            } else {
                let key = ci.saturating_sub(1);
                node::shift_keys_left::<R::Row, R::InnerIo>(&mut page, key, cnt);
                node::remove_link::<R::Row, R::InnerIo>(&mut page, ci, cnt + 1);
                node::set_key_count(&mut page, cnt - 1);
                false
            }
        };
        self.page_mem.free_page(self.cache_id, child)?;
        debug!(
            tree = %self.name,
            parent = %format!("{page_id:#018x}"),
            child = %format!("{child:#018x}"),
            "free empty node"
        );
        Ok(RemoveResult {
            old: res.old,
            empty,
        })
    }

    /// Replace an inner root having a single child by that child.
    fn collapse_root(&self) -> Result<()> {
        loop {
            let root = self.root();
            let child = {
                let pin = self.page(root)?;
                let page = pin.read();
                if self.node_kind(&page, root)? == NodeKind::Leaf || node::key_count(&page) > 0 {
                    return Ok(());
                }
                node::get_link::<R::Row, R::InnerIo>(&page, 0)
            };

            let level = {
                let mut meta = self.meta_page.write();
                let level = meta::get_level(&meta).saturating_sub(1);
                meta::set_root(&mut meta, child);
                meta::set_level(&mut meta, level);
                level
            };
            self.page_mem.free_page(self.cache_id, root)?;
            info!(
                tree = %self.name,
                root = %format!("{child:#018x}"),
                level,
                "collapse root"
            );
        }
    }

    fn for_each_rec<F>(&self, page_id: PageId, f: &mut F) -> Result<()>
    where
        F: FnMut(&R::Row) -> Result<()>,
    {
        let pin = self.page(page_id)?;
        let children = {
            let page = pin.read();
            let cnt = node::key_count(&page);
            let kind = self.node_kind(&page, page_id)?;
            match kind {
                NodeKind::Leaf => {
                    let rows = (0..cnt)
                        .map(|idx| self.rows.get_row::<R::LeafIo>(&page, idx))
                        .collect::<Result<Vec<_>>>()?;
                    drop(page);
                    return rows.iter().try_for_each(f);
                }
                NodeKind::Inner => (0..=cnt)
                    .map(|idx| node::get_link::<R::Row, R::InnerIo>(&page, idx))
                    .collect::<Vec<_>>(),
            }
        };
        children
            .into_iter()
            .try_for_each(|child| self.for_each_rec(child, f))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::error::Error;
    use crate::dc::{
        bufmgr::{BufMgr, Options},
        node::IoVersions,
        page::{page_id, AllocSpace},
    };
    use crate::env::SimEnv;

    /// Rows are plain `u64` keys. Slots are 8 bytes wide plus padding so
    /// that small pages split after a handful of rows.
    struct U64Rows;
    struct U64Leaf;
    struct U64Inner;

    const SLOT: usize = 60;

    fn store_u64(page: &mut [u8], off: usize, v: u64) {
        page[off..off + 8].copy_from_slice(&v.to_be_bytes());
    }

    fn load_u64(page: &[u8], off: usize) -> u64 {
        u64::from_be_bytes(page[off..off + 8].try_into().unwrap())
    }

    macro_rules! u64_io {
        ($io:ident, $type:expr, $leaf:expr) => {
            impl NodeIo<u64> for $io {
                const VERSIONS: IoVersions = IoVersions::new($type, 1);
                const IS_LEAF: bool = $leaf;

                fn item_size() -> usize {
                    SLOT
                }

                fn store(page: &mut [u8], idx: usize, row: &u64) -> Result<()> {
                    store_u64(page, Self::offset(idx), *row);
                    Ok(())
                }

                fn store_from<S: NodeIo<u64>>(
                    dst: &mut [u8],
                    dst_idx: usize,
                    src: &[u8],
                    src_idx: usize,
                ) -> Result<()> {
                    store_u64(dst, Self::offset(dst_idx), load_u64(src, S::offset(src_idx)));
                    Ok(())
                }

                fn lookup_row(page: &[u8], idx: usize) -> Result<u64> {
                    Ok(load_u64(page, Self::offset(idx)))
                }
            }
        };
    }

    u64_io!(U64Leaf, 200, true);
    u64_io!(U64Inner, 201, false);

    impl TreeRow for U64Rows {
        type Row = u64;
        type InnerIo = U64Inner;
        type LeafIo = U64Leaf;

        fn compare<Io: NodeIo<u64>>(&self, page: &[u8], idx: usize, row: &u64) -> Ordering {
            load_u64(page, Io::offset(idx)).cmp(row)
        }

        fn get_row<Io: NodeIo<u64>>(&self, page: &[u8], idx: usize) -> Result<u64> {
            Io::lookup_row(page, idx)
        }

        fn allocate_page<M: PageMemory>(&self, page_mem: &M, cache_id: CacheId) -> Result<PageId> {
            page_mem.allocate_page(cache_id, 0, AllocSpace::Index)
        }
    }

    fn small_pages() -> Options {
        Options {
            page_size: 512,
            ..Options::default()
        }
    }

    fn new_tree(mgr: &BufMgr<SimEnv>) -> BPlusTree<U64Rows, &BufMgr<SimEnv>> {
        let meta = mgr.meta_page(1).unwrap();
        BPlusTree::new("test", 1, mgr, meta, U64Rows, true).unwrap()
    }

    fn collect(tree: &BPlusTree<U64Rows, &BufMgr<SimEnv>>) -> Vec<u64> {
        let mut rows = vec![];
        tree.for_each(|r| {
            rows.push(*r);
            Ok(())
        })
        .unwrap();
        rows
    }

    /// Deterministic permutation of `0..n`.
    fn shuffled(n: u64) -> Vec<u64> {
        (0..n).map(|i| (i * 7919) % n).collect()
    }

    #[test]
    fn test_empty_tree() -> Result<()> {
        let mgr = BufMgr::open(SimEnv::new(), "t", small_pages())?;
        let tree = new_tree(&mgr);
        assert_eq!(tree.find_one(&1)?, None);
        assert_eq!(tree.remove(&1)?, None);
        assert_eq!(tree.size()?, 0);
        assert_eq!(tree.root_level(), 0);
        Ok(())
    }

    #[test]
    fn test_put_replace() -> Result<()> {
        let mgr = BufMgr::open(SimEnv::new(), "t", small_pages())?;
        let tree = new_tree(&mgr);
        assert_eq!(tree.put(&5)?, None);
        assert_eq!(tree.put(&5)?, Some(5));
        assert_eq!(tree.size()?, 1);
        Ok(())
    }

    #[test]
    fn test_split_keeps_order() -> Result<()> {
        let mgr = BufMgr::open(SimEnv::new(), "t", small_pages())?;
        let tree = new_tree(&mgr);
        let n = 1009;
        for k in shuffled(n) {
            assert_eq!(tree.put(&k)?, None);
        }
        // 512 byte pages hold 8 leaf rows, so the tree has grown a few levels
        assert!(tree.root_level() >= 3, "level {}", tree.root_level());
        assert_eq!(collect(&tree), (0..n).collect::<Vec<_>>());
        for k in 0..n {
            assert_eq!(tree.find_one(&k)?, Some(k));
        }
        assert_eq!(tree.find_one(&n)?, None);
        Ok(())
    }

    #[test]
    fn test_remove_frees_nodes_and_collapses_root() -> Result<()> {
        let mgr = BufMgr::open(SimEnv::new(), "t", small_pages())?;
        let tree = new_tree(&mgr);
        let n = 500;
        for k in shuffled(n) {
            tree.put(&k)?;
        }
        for k in (0..n).filter(|k| k % 2 == 0) {
            assert_eq!(tree.remove(&k)?, Some(k));
            assert_eq!(tree.remove(&k)?, None);
        }
        assert_eq!(
            collect(&tree),
            (0..n).filter(|k| k % 2 == 1).collect::<Vec<_>>()
        );

        for k in shuffled(n) {
            tree.remove(&k)?;
        }
        assert_eq!(tree.size()?, 0);
        assert_eq!(tree.root_level(), 0);
        assert!(mgr.freed_pages(1)? > 0);

        // the tree stays usable after shrinking to an empty leaf
        tree.put(&42)?;
        assert_eq!(tree.find_one(&42)?, Some(42));
        Ok(())
    }

    #[test]
    fn test_reopen_tree() -> Result<()> {
        let env = SimEnv::new();
        {
            let mgr = BufMgr::open(env.clone(), "t", small_pages())?;
            let tree = new_tree(&mgr);
            for k in 0..100 {
                tree.put(&k)?;
            }
            mgr.flush()?;
        }

        let mgr = BufMgr::open(env, "t", small_pages())?;
        let meta = mgr.meta_page(1)?;
        assert!(meta::is_initialized(&meta.read()));
        let tree = BPlusTree::new("test", 1, &mgr, meta, U64Rows, false)?;
        assert_eq!(collect(&tree), (0..100).collect::<Vec<_>>());
        Ok(())
    }

    #[test]
    fn test_key_count_beyond_capacity() -> Result<()> {
        let env = SimEnv::new();
        {
            let mgr = BufMgr::open(env.clone(), "t", small_pages())?;
            let tree = new_tree(&mgr);
            for k in 0..3 {
                tree.put(&k)?;
            }
            let root = meta::get_root(&mgr.meta_page(1)?.read());
            let page = mgr.page(FullPageId::new(root, 1))?;
            node::set_key_count(&mut page.write(), 0xFFFF);
            drop(page);

            let err = tree.find_one(&1).unwrap_err();
            assert!(matches!(err, Error::Corrupted { .. }));
            assert!(matches!(tree.put(&7), Err(Error::Corrupted { .. })));
            mgr.flush()?;
        }

        let mgr = BufMgr::open(env, "t", small_pages())?;
        let meta = mgr.meta_page(1)?;
        let res = BPlusTree::new("test", 1, &mgr, meta, U64Rows, false);
        assert!(matches!(res, Err(Error::Corrupted { .. })));
        Ok(())
    }

    #[test]
    fn test_open_without_root() {
        let mgr = BufMgr::open(SimEnv::new(), "t", small_pages()).unwrap();
        let meta = mgr.meta_page(1).unwrap();
        let res = BPlusTree::new("test", 1, &mgr, meta, U64Rows, false);
        assert!(matches!(res, Err(Error::Corrupted { .. })));
    }

    #[test]
    fn test_root_is_not_a_node() {
        let mgr = BufMgr::open(SimEnv::new(), "t", small_pages()).unwrap();
        let garbage = mgr.allocate_page(1, 0, AllocSpace::Data).unwrap();
        let meta = mgr.meta_page(1).unwrap();
        meta::set_root(&mut meta.write(), garbage);
        let res = BPlusTree::new("test", 1, &mgr, meta, U64Rows, false);
        assert!(matches!(res, Err(Error::Corrupted { .. })));
    }

    #[test]
    fn test_missing_root_page() {
        let mgr = BufMgr::open(SimEnv::new(), "t", small_pages()).unwrap();
        let meta = mgr.meta_page(1).unwrap();
        meta::set_root(&mut meta.write(), page_id(0, AllocSpace::Index, 40));
        let res = BPlusTree::new("test", 1, &mgr, meta, U64Rows, false);
        assert!(matches!(res, Err(Error::PageNotFound { .. })));
    }
}
