//! DC (Data Component)
//!
//! Page memory and the generic B+Tree built on top of it.
mod accessor;
pub mod buf;
pub mod bufmgr;
pub mod meta;
pub mod node;
pub mod page;
pub mod tree;
