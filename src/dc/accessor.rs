/// field_accessor defines getter and setter functions for a fixed-width
/// big-endian field at a constant byte offset inside a page buffer.
///
/// `field_accessor!(root, PageId, 0)` expands to `get_root(&[u8])` and
/// `set_root(&mut [u8], PageId)`.
macro_rules! field_accessor {
    ($name:ident, $t:ty, $offset:expr) => {
        paste! {
            #[inline(always)]
            pub(crate) fn [<get _ $name>](buf: &[u8]) -> $t {
                <$t>::from_be_bytes(
                    buf[$offset..$offset + mem::size_of::<$t>()]
                        .try_into()
                        .unwrap(),
                )
            }

            #[inline(always)]
            pub(crate) fn [<set _ $name>](buf: &mut [u8], v: $t) {
                buf[$offset..$offset + mem::size_of::<$t>()].copy_from_slice(v.to_be_bytes().as_slice());
            }
        }
    };
}

pub(crate) use field_accessor;
