use crate::dc::{accessor::field_accessor, page::PageId};
use paste::paste;
use std::mem;

/// The meta page is page index zero of every cache. It is all zeros until
/// a tree is created in the cache, after which it holds:
///
/// root  - 8 bytes [`PageId`] of the tree root, never zero once set.
/// level - 4 bytes, zero while the root is a leaf.
const ROOT_OFFSET: usize = 0;
const LEVEL_OFFSET: usize = ROOT_OFFSET + mem::size_of::<PageId>();

field_accessor!(root, PageId, ROOT_OFFSET);
field_accessor!(level, u32, LEVEL_OFFSET);

/// Whether a tree was ever created in the cache owning this meta page.
pub(crate) fn is_initialized(buf: &[u8]) -> bool {
    get_root(buf) != 0
}
