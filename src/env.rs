//! Environments for the page store to interact with different platforms.
//!
//! Page I/O in this crate is synchronous: callers block on the page file
//! while holding page guards, so the traits here are plain blocking
//! positional readers and writers.

mod sim;
mod stdenv;

pub use sim::SimEnv;
pub use stdenv::StdEnv;

use std::{io::Result, path::Path};

/// Provides an environment to interact with a specific platform.
pub trait Env: Clone + Send + Sync + 'static {
    /// Positional writer and reader returned by the environment.
    type PositionalReaderWriter: PositionalReader + PositionalWriter;

    /// Opens a file for positional read and write, creating it if missing.
    fn open_file<P: AsRef<Path>>(&self, path: P) -> Result<Self::PositionalReaderWriter>;

    /// Recursively create a directory and all of its parent components if they
    /// are missing.
    /// See also [`std::fs::create_dir_all`].
    fn create_dir_all<P: AsRef<Path>>(&self, path: P) -> Result<()>;

    /// Given a path, query the file system to get information about a file,
    /// directory, etc.
    /// See also [`std::fs::metadata`].
    fn metadata<P: AsRef<Path>>(&self, path: P) -> Result<Metadata>;
}

/// A reader that allows positional reads.
pub trait PositionalReader: Send + Sync + 'static {
    /// Reads some bytes from this object at `pos` into `buf`.
    ///
    /// Returns the number of bytes read.
    fn read_at(&self, buf: &mut [u8], pos: u64) -> Result<usize>;

    /// Returns the current size of the underlying file in bytes.
    fn file_size(&self) -> Result<u64>;

    /// Reads the exact number of bytes from this object at `pos` to fill `buf`.
    fn read_exact_at(&self, mut buf: &mut [u8], mut pos: u64) -> Result<()> {
        while !buf.is_empty() {
            match self.read_at(buf, pos) {
                Ok(0) => return Err(std::io::ErrorKind::UnexpectedEof.into()),
                Ok(n) => {
                    buf = &mut buf[n..];
                    pos += n as u64;
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// A writer that allows positional writes.
pub trait PositionalWriter: Send + Sync + 'static {
    /// Writes some bytes to this object at `pos` from `buf`.
    ///
    /// Returns the number of bytes written.
    fn write_at(&self, buf: &[u8], pos: u64) -> Result<usize>;

    /// Synchronizes all modified content and metadata of this file to disk.
    fn sync_all(&self) -> Result<()>;

    fn write_exact_at(&self, mut buf: &[u8], mut pos: u64) -> Result<()> {
        while !buf.is_empty() {
            match self.write_at(buf, pos) {
                Ok(0) => return Err(std::io::ErrorKind::WriteZero.into()),
                Ok(n) => {
                    buf = &buf[n..];
                    pos += n as u64;
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// Metadata information about a file.
#[allow(clippy::len_without_is_empty)]
pub struct Metadata {
    /// The size of the file this metadata is for.
    pub len: u64,
}
