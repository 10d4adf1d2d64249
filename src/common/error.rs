use crate::dc::page::{CacheId, PageId};
use snafu::Snafu;
use std::{io, result};

/// Result type for operations that could result in [`Error`]
pub type Result<T> = result::Result<T, Error>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    /// The UTF-8 encoding of an index name does not fit into a tree slot.
    #[snafu(display(
        "Too long encoded index name [maxAllowed={max}, currentLength={actual}, name={name}]"
    ))]
    NameTooLong {
        max: usize,
        actual: usize,
        name: String,
    },

    /// I/O failure reported by the page file.
    #[snafu(display("I/O error: {source}"))]
    Io { source: io::Error },

    #[snafu(display("Page {page_id:#018x} of cache {cache_id} not found"))]
    PageNotFound { page_id: PageId, cache_id: CacheId },

    /// Page index space of a cache is exhausted.
    #[snafu(display("Out of space: cannot allocate more pages for cache {cache_id}"))]
    OutOfSpace { cache_id: CacheId },

    /// A structural invariant of the on-disk tree does not hold.
    /// This is never repaired here, callers should treat it as fatal.
    #[snafu(display("Corrupted tree: {reason}"))]
    Corrupted { reason: String },

    #[snafu(display("Invalid config: {reason}"))]
    InvalidConfig { reason: String },
}

impl From<io::Error> for Error {
    fn from(source: io::Error) -> Self {
        Error::Io { source }
    }
}

/// Create a "corrupted" [`Error`] with a formatted reason.
pub(crate) fn corrupted(reason: impl Into<String>) -> Error {
    Error::Corrupted {
        reason: reason.into(),
    }
}
