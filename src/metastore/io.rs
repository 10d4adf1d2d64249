//! Page layouts of the metadata tree.
use crate::common::error::Result;
use crate::dc::node::{IoType, IoVersions, NodeIo};
use crate::metastore::codec::{self, IndexItem, ITEM_SIZE};

pub const T_INDEX_INNER: IoType = 23;
pub const T_INDEX_LEAF: IoType = 24;

/// Inner page of the metadata tree: separators plus child links.
pub struct IndexInnerIo;

/// Leaf page of the metadata tree.
pub struct IndexLeafIo;

macro_rules! index_io {
    ($io:ident, $type:expr, $leaf:expr) => {
        impl NodeIo<IndexItem> for $io {
            const VERSIONS: IoVersions = IoVersions::new($type, 1);
            const IS_LEAF: bool = $leaf;

            fn item_size() -> usize {
                ITEM_SIZE
            }

            fn store(page: &mut [u8], idx: usize, row: &IndexItem) -> Result<()> {
                codec::store_row(page, Self::offset(idx), row)
            }

            fn store_from<S: NodeIo<IndexItem>>(
                dst: &mut [u8],
                dst_idx: usize,
                src: &[u8],
                src_idx: usize,
            ) -> Result<()> {
                codec::copy_row(dst, Self::offset(dst_idx), src, S::offset(src_idx))
            }

            fn lookup_row(page: &[u8], idx: usize) -> Result<IndexItem> {
                codec::read_row(page, Self::offset(idx))
            }
        }
    };
}

index_io!(IndexInnerIo, T_INDEX_INNER, false);
index_io!(IndexLeafIo, T_INDEX_LEAF, true);
