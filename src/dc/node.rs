//! Tree node layout.
//!
//! Every tree page starts with a fixed header:
//!
//!  * +-----------+-----------+-----------+------------+------------------+
//!  * | type 2    | version 2 | count 2   | reserved 2 | self page id 8   |
//!  * +-----------+-----------+-----------+------------+------------------+
//!
//! followed by `max_count` fixed-width key slots. Inner pages also keep
//! `count + 1` child links in a link array right after the key slots. How a
//! row is laid out inside a slot is up to the [`NodeIo`] of the page.
use crate::common::error::{corrupted, Result};
use crate::dc::{accessor::field_accessor, page::PageId};
use byteorder::{BigEndian, ByteOrder};
use paste::paste;
use std::{fmt, mem};

pub const NODE_HEADER_SIZE: usize = 16;

pub type IoType = u16;

pub type IoVersion = u16;

const LINK_SIZE: usize = mem::size_of::<PageId>();

field_accessor!(io_type, IoType, 0);
field_accessor!(io_version, IoVersion, 2);
field_accessor!(count, u16, 4);
field_accessor!(self_id, PageId, 8);

/// Registered versions of a page layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoVersions {
    io_type: IoType,
    latest: IoVersion,
}

impl IoVersions {
    pub const fn new(io_type: IoType, latest: IoVersion) -> Self {
        Self { io_type, latest }
    }

    pub fn io_type(&self) -> IoType {
        self.io_type
    }

    /// Version written into newly initialized pages.
    pub fn latest(&self) -> IoVersion {
        self.latest
    }

    /// Check that a page was written by one of the known versions.
    pub fn check(&self, page: &[u8]) -> Result<()> {
        let (io_type, version) = (get_io_type(page), get_io_version(page));
        if io_type != self.io_type {
            return Err(corrupted(format!(
                "unexpected page type {io_type}, expected {}",
                self.io_type
            )));
        }
        if version == 0 || version > self.latest {
            return Err(corrupted(format!(
                "unknown version {version} of page type {io_type}"
            )));
        }
        Ok(())
    }
}

/// Layout descriptor of one kind of tree page holding rows of type `R`.
///
/// Descriptors are stateless. They only know where slot `idx` lives and
/// how to move a row in and out of it.
pub trait NodeIo<R>: Send + Sync + 'static {
    const VERSIONS: IoVersions;

    /// Leaf pages hold rows. Inner pages hold separators and child links.
    const IS_LEAF: bool;

    /// Width in bytes of one key slot.
    fn item_size() -> usize;

    /// Byte offset of slot `idx` in the page.
    fn offset(idx: usize) -> usize {
        NODE_HEADER_SIZE + idx * Self::item_size()
    }

    /// Number of key slots fitting into a page.
    fn max_count(page_size: usize) -> usize {
        if Self::IS_LEAF {
            (page_size - NODE_HEADER_SIZE) / Self::item_size()
        } else {
            // One more link than keys.
            (page_size - NODE_HEADER_SIZE - LINK_SIZE) / (Self::item_size() + LINK_SIZE)
        }
    }

    /// Write `row` into slot `idx`. Rows the slot cannot hold are rejected
    /// before the page is touched.
    fn store(page: &mut [u8], idx: usize, row: &R) -> Result<()>;

    /// Copy slot `src_idx` of a page laid out by `S` into slot `dst_idx`
    /// of `dst`, without decoding the row.
    fn store_from<S: NodeIo<R>>(
        dst: &mut [u8],
        dst_idx: usize,
        src: &[u8],
        src_idx: usize,
    ) -> Result<()>;

    /// Decode the row in slot `idx`.
    fn lookup_row(page: &[u8], idx: usize) -> Result<R>;
}

/// Initialize an empty node of layout `Io`.
pub(crate) fn init_node<R, Io: NodeIo<R>>(page: &mut [u8], page_id: PageId) {
    page[..NODE_HEADER_SIZE].fill(0);
    set_io_type(page, Io::VERSIONS.io_type());
    set_io_version(page, Io::VERSIONS.latest());
    set_count(page, 0);
    set_self_id(page, page_id);
}

/// Number of keys in a node.
pub(crate) fn key_count(page: &[u8]) -> usize {
    get_count(page) as usize
}

pub(crate) fn set_key_count(page: &mut [u8], cnt: usize) {
    set_count(page, cnt as u16);
}

/// Check the header of a node read from `page_id`.
pub(crate) fn check_self_id(page: &[u8], page_id: PageId) -> Result<()> {
    let self_id = get_self_id(page);
    if self_id != page_id {
        return Err(corrupted(format!(
            "page {page_id:#018x} claims to be page {self_id:#018x}"
        )));
    }
    Ok(())
}

pub(crate) fn node_type(page: &[u8]) -> IoType {
    get_io_type(page)
}

/// Open a gap at slot `idx` by shifting slots `idx..cnt` one to the right.
pub(crate) fn shift_keys_right<R, Io: NodeIo<R>>(page: &mut [u8], idx: usize, cnt: usize) {
    page.copy_within(Io::offset(idx)..Io::offset(cnt), Io::offset(idx + 1));
}

/// Close the gap at slot `idx` by shifting slots `idx+1..cnt` one to the left.
pub(crate) fn shift_keys_left<R, Io: NodeIo<R>>(page: &mut [u8], idx: usize, cnt: usize) {
    page.copy_within(Io::offset(idx + 1)..Io::offset(cnt), Io::offset(idx));
}

fn link_offset<R, Io: NodeIo<R>>(page_size: usize, idx: usize) -> usize {
    Io::offset(Io::max_count(page_size)) + idx * LINK_SIZE
}

pub(crate) fn get_link<R, Io: NodeIo<R>>(page: &[u8], idx: usize) -> PageId {
    BigEndian::read_u64(&page[link_offset::<R, Io>(page.len(), idx)..])
}

pub(crate) fn set_link<R, Io: NodeIo<R>>(page: &mut [u8], idx: usize, link: PageId) {
    let off = link_offset::<R, Io>(page.len(), idx);
    BigEndian::write_u64(&mut page[off..], link);
}

/// Insert `link` at position `idx` of a link array currently holding `links`
/// entries.
pub(crate) fn insert_link<R, Io: NodeIo<R>>(
    page: &mut [u8],
    idx: usize,
    links: usize,
    link: PageId,
) {
    let start = link_offset::<R, Io>(page.len(), idx);
    let end = link_offset::<R, Io>(page.len(), links);
    page.copy_within(start..end, start + LINK_SIZE);
    set_link::<R, Io>(page, idx, link);
}

/// Remove the link at position `idx` of a link array holding `links` entries.
pub(crate) fn remove_link<R, Io: NodeIo<R>>(page: &mut [u8], idx: usize, links: usize) {
    let start = link_offset::<R, Io>(page.len(), idx);
    let end = link_offset::<R, Io>(page.len(), links);
    page.copy_within(start + LINK_SIZE..end, start);
}

/// Debug view of a node header.
pub(crate) struct NodeHeader<'a>(pub &'a [u8]);

impl fmt::Debug for NodeHeader<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeHeader")
            .field("type", &get_io_type(self.0))
            .field("version", &get_io_version(self.0))
            .field("count", &get_count(self.0))
            .field("self_id", &format_args!("{:#018x}", get_self_id(self.0)))
            .finish()
    }
}
