pub mod common;
pub mod dc;
pub mod env;
pub mod metastore;

pub use common::error::{Error, Result};
pub use dc::bufmgr::{BufMgr, Options, PageMemory};
pub use dc::page::{CacheId, FullPageId, PageId};
pub use metastore::{IndexItem, MetaStore, MetadataStorage, RootPage};
