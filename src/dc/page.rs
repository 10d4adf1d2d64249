//! Pages are fixed-size blocks addressed by a [`FullPageId`].
//!
//! A [`PageId`] is 64 bits and carries its own allocation space and
//! partition, so a page id alone tells what kind of page it is:
//!
//!  * +--------+--------+-----------------+-----------------------------------+
//!  * | flag 8 | zero 8 | partition 16    | page index 32                     |
//!  * +--------+--------+-----------------+-----------------------------------+
//!
//! Page index 0 of every cache is its meta (bootstrap) page.
use crate::common::error::{Error, Result};
use std::fmt;

/// Default page size: 4KB.
pub const PAGE_SIZE: usize = 4096;
pub const MIN_PAGE_SIZE: usize = 512;
pub const MAX_PAGE_SIZE: usize = 64 * 1024;

pub type PageId = u64;

pub type CacheId = u32;

pub type PartitionId = u16;

/// Page index of the meta page inside every cache.
pub(crate) const META_PAGE_INDEX: u32 = 0;

const FLAG_SHIFT: u32 = 56;
const PARTITION_SHIFT: u32 = 32;

/// Allocation space a page is taken from. The tag is stored in the page id
/// so different spaces can get independent recycling policies later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AllocSpace {
    Data = 1,
    /// Tree nodes and index root pages.
    Index = 2,
    /// Bootstrap pages.
    Meta = 3,
}

impl TryFrom<u8> for AllocSpace {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(AllocSpace::Data),
            2 => Ok(AllocSpace::Index),
            3 => Ok(AllocSpace::Meta),
            _ => Err(Error::Corrupted {
                reason: format!("invalid allocation space flag: {value}"),
            }),
        }
    }
}

/// Composes a page id from its parts.
pub fn page_id(partition: PartitionId, space: AllocSpace, index: u32) -> PageId {
    ((space as u64) << FLAG_SHIFT) | ((partition as u64) << PARTITION_SHIFT) | index as u64
}

/// Position of the page inside its cache file.
pub fn page_index(page_id: PageId) -> u32 {
    page_id as u32
}

pub fn page_partition(page_id: PageId) -> PartitionId {
    (page_id >> PARTITION_SHIFT) as PartitionId
}

pub fn page_space(page_id: PageId) -> Result<AllocSpace> {
    AllocSpace::try_from((page_id >> FLAG_SHIFT) as u8)
}

/// A page id qualified by the cache it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FullPageId {
    pub page_id: PageId,
    pub cache_id: CacheId,
}

impl FullPageId {
    pub fn new(page_id: PageId, cache_id: CacheId) -> Self {
        Self { page_id, cache_id }
    }
}

impl fmt::Display for FullPageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FullPageId [pageId={:#018x}, cacheId={}]",
            self.page_id, self.cache_id
        )
    }
}

/// In memory content of a page.
pub struct Page {
    buf: Box<[u8]>,
}

impl Page {
    /// Allocates a zero filled page.
    pub fn alloc(size: usize) -> Self {
        Self {
            buf: vec![0u8; size].into_boxed_slice(),
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.buf
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    pub fn zero(&mut self) {
        self.buf.fill(0);
    }
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page").field("size", &self.buf.len()).finish()
    }
}
