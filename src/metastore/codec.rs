//! Binary format of an [`IndexItem`] inside a tree slot:
//!
//!  * +--------+----------------------+-------------------+
//!  * | len 1  | name (len bytes)     | page id 8 (BE)    |
//!  * +--------+----------------------+-------------------+
//!
//! Slots are [`ITEM_SIZE`] bytes wide. Bytes after the page id are never
//! read.
use crate::common::error::{corrupted, NameTooLongSnafu, Result};
use crate::dc::page::PageId;
use byteorder::{BigEndian, ByteOrder};
use bytes::Bytes;
use snafu::ensure;
use std::{cmp::Ordering, fmt};

/// Longest accepted index name, in bytes of its UTF-8 encoding.
pub const MAX_IDX_NAME_LEN: usize = 64;

/// Width of a slot holding one [`IndexItem`].
pub const ITEM_SIZE: usize = 1 + MAX_IDX_NAME_LEN + PAGE_ID_SIZE;

const PAGE_ID_SIZE: usize = 8;

/// Mapping from an index name to the root page of the index.
///
/// Items are equal and ordered by name only, so an item with page id 0
/// serves as search key.
#[derive(Clone)]
pub struct IndexItem {
    pub name: Bytes,
    pub page_id: PageId,
}

impl IndexItem {
    pub fn new(name: impl Into<Bytes>, page_id: PageId) -> Self {
        Self {
            name: name.into(),
            page_id,
        }
    }

    /// Search key for `name`.
    pub fn key(name: impl Into<Bytes>) -> Self {
        Self::new(name, 0)
    }

    /// Encoded size of the item.
    pub fn encoded_len(&self) -> usize {
        1 + self.name.len() + PAGE_ID_SIZE
    }
}

impl PartialEq for IndexItem {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for IndexItem {}

impl PartialOrd for IndexItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IndexItem {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name.as_ref().cmp(other.name.as_ref())
    }
}

impl fmt::Debug for IndexItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexItem")
            .field("name", &String::from_utf8_lossy(&self.name))
            .field("page_id", &format_args!("{:#018x}", self.page_id))
            .finish()
    }
}

/// Reject names that do not fit into a slot.
pub fn check_name(name: &[u8]) -> Result<()> {
    ensure!(
        name.len() <= MAX_IDX_NAME_LEN,
        NameTooLongSnafu {
            max: MAX_IDX_NAME_LEN,
            actual: name.len(),
            name: String::from_utf8_lossy(name),
        }
    );
    Ok(())
}

/// Write `row` at `off`. Nothing is written if the name is too long.
pub fn store_row(buf: &mut [u8], off: usize, row: &IndexItem) -> Result<()> {
    check_name(&row.name)?;
    let len = row.name.len();
    buf[off] = len as u8;
    buf[off + 1..off + 1 + len].copy_from_slice(&row.name);
    BigEndian::write_u64(&mut buf[off + 1 + len..], row.page_id);
    Ok(())
}

/// Read the row stored at `off`.
pub fn read_row(buf: &[u8], off: usize) -> Result<IndexItem> {
    let len = name_len(buf, off)?;
    let name = Bytes::copy_from_slice(&buf[off + 1..off + 1 + len]);
    let page_id = BigEndian::read_u64(&buf[off + 1 + len..]);
    Ok(IndexItem { name, page_id })
}

/// Copy the row at `src_off` of `src` to `dst_off` of `dst` without
/// decoding it.
pub fn copy_row(dst: &mut [u8], dst_off: usize, src: &[u8], src_off: usize) -> Result<()> {
    let size = 1 + name_len(src, src_off)? + PAGE_ID_SIZE;
    dst[dst_off..dst_off + size].copy_from_slice(&src[src_off..src_off + size]);
    Ok(())
}

/// Name bytes of the row stored at `off`, clamped to the slot.
pub(crate) fn name_at(buf: &[u8], off: usize) -> &[u8] {
    let len = std::cmp::min(buf[off] as usize, MAX_IDX_NAME_LEN);
    &buf[off + 1..off + 1 + len]
}

fn name_len(buf: &[u8], off: usize) -> Result<usize> {
    let len = buf[off] as usize;
    if len > MAX_IDX_NAME_LEN {
        return Err(corrupted(format!(
            "index name length {len} at offset {off} exceeds {MAX_IDX_NAME_LEN}"
        )));
    }
    if off + 1 + len + PAGE_ID_SIZE > buf.len() {
        return Err(corrupted(format!("row at offset {off} runs past the page")));
    }
    Ok(len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::error::Error;
    use proptest::prelude::*;

    #[test]
    fn test_layout() -> Result<()> {
        let mut buf = vec![0u8; 128];
        let row = IndexItem::new("users_idx", 0x0200_0000_0000_0007);
        store_row(&mut buf, 10, &row)?;

        assert_eq!(buf[10], 9);
        assert_eq!(&buf[11..20], b"users_idx");
        assert_eq!(&buf[20..28], &[2, 0, 0, 0, 0, 0, 0, 7]);

        let back = read_row(&buf, 10)?;
        assert_eq!(back.name, row.name);
        assert_eq!(back.page_id, row.page_id);
        Ok(())
    }

    #[test]
    fn test_empty_and_max_names() -> Result<()> {
        let mut buf = vec![0u8; ITEM_SIZE];
        store_row(&mut buf, 0, &IndexItem::new("", 1))?;
        assert_eq!(read_row(&buf, 0)?.name.len(), 0);

        let long = "n".repeat(MAX_IDX_NAME_LEN);
        store_row(&mut buf, 0, &IndexItem::new(long.clone(), 2))?;
        let back = read_row(&buf, 0)?;
        assert_eq!(back.name, long.as_bytes());
        assert_eq!(back.page_id, 2);
        Ok(())
    }

    #[test]
    fn test_copy_row_leaves_rest_untouched() -> Result<()> {
        let mut src = vec![0u8; ITEM_SIZE];
        store_row(&mut src, 0, &IndexItem::new("abc", 5))?;
        let mut dst = vec![0xFFu8; ITEM_SIZE * 2];
        copy_row(&mut dst, ITEM_SIZE, &src, 0)?;

        assert_eq!(read_row(&dst, ITEM_SIZE)?.page_id, 5);
        assert_eq!(dst[ITEM_SIZE + 1 + 3 + 8], 0xFF);
        assert!(dst[..ITEM_SIZE].iter().all(|b| *b == 0xFF));
        Ok(())
    }

    #[test]
    fn test_store_rejects_long_name() {
        let mut buf = vec![0xAAu8; ITEM_SIZE * 2];
        let row = IndexItem::new(vec![b'a'; MAX_IDX_NAME_LEN + 1], 7);
        let err = store_row(&mut buf, 0, &row).unwrap_err();
        assert!(matches!(
            err,
            Error::NameTooLong {
                max: MAX_IDX_NAME_LEN,
                actual: 65,
                ..
            }
        ));
        assert!(buf.iter().all(|b| *b == 0xAA));
    }

    #[test]
    fn test_bad_length_is_corruption() {
        let mut buf = vec![0u8; ITEM_SIZE];
        buf[0] = 200;
        assert!(matches!(read_row(&buf, 0), Err(Error::Corrupted { .. })));
        assert_eq!(name_at(&buf, 0).len(), MAX_IDX_NAME_LEN);
    }

    #[test]
    fn test_ordering_by_name_only() {
        let a = IndexItem::new("a", 9);
        let b = IndexItem::new("b", 1);
        assert!(a < b);
        assert_eq!(IndexItem::new("a", 1), IndexItem::key("a"));
        assert!(IndexItem::key("ab") > IndexItem::key("a"));
    }

    proptest! {
        #[test]
        fn proptest_round_trip(
            name in proptest::collection::vec(any::<u8>(), 0..=MAX_IDX_NAME_LEN),
            page_id in any::<u64>(),
            off in 0usize..64,
        ) {
            let mut buf = vec![0u8; off + ITEM_SIZE];
            let row = IndexItem::new(name.clone(), page_id);
            store_row(&mut buf, off, &row).unwrap();
            let back = read_row(&buf, off).unwrap();
            prop_assert_eq!(back.name.as_ref(), name.as_slice());
            prop_assert_eq!(back.page_id, page_id);
            prop_assert_eq!(row.encoded_len(), 1 + name.len() + 8);
        }
    }
}
