use super::{Env, Metadata, PositionalReader, PositionalWriter};
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    io::{Error, ErrorKind, Result},
    path::{Path, PathBuf},
    sync::Arc,
};

/// An implementation of [`Env`] based on simulation.
///
/// Files live in memory and are shared by every clone of the same
/// `SimEnv`, so reopening a path sees what was written before.
#[derive(Clone, Debug, Default)]
pub struct SimEnv {
    files: Arc<Mutex<HashMap<PathBuf, SimFile>>>,
}

impl SimEnv {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Env for SimEnv {
    type PositionalReaderWriter = SimFile;

    fn open_file<P: AsRef<Path>>(&self, path: P) -> Result<Self::PositionalReaderWriter> {
        let mut files = self.files.lock();
        let file = files.entry(path.as_ref().to_path_buf()).or_default();
        Ok(file.clone())
    }

    fn create_dir_all<P: AsRef<Path>>(&self, _path: P) -> Result<()> {
        Ok(())
    }

    fn metadata<P: AsRef<Path>>(&self, path: P) -> Result<Metadata> {
        match self.files.lock().get(path.as_ref()) {
            Some(file) => Ok(Metadata {
                len: file.0.lock().len() as u64,
            }),
            None => Err(Error::new(ErrorKind::NotFound, "no such sim file")),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct SimFile(Arc<Mutex<Vec<u8>>>);

impl PositionalWriter for SimFile {
    fn write_at(&self, buf: &[u8], offset: u64) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let mut data = self.0.lock();
        if offset + buf.len() as u64 > data.len() as u64 {
            data.resize(offset as usize + buf.len(), 0);
        }
        let dst = &mut data[offset as usize..offset as usize + buf.len()];
        dst.copy_from_slice(buf);
        Ok(buf.len())
    }

    fn sync_all(&self) -> Result<()> {
        Ok(())
    }
}

impl PositionalReader for SimFile {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let data = self.0.lock();
        if offset > data.len() as u64 {
            return Ok(0);
        }

        let unread = &data[offset as usize..];
        let copy_size = std::cmp::min(unread.len(), buf.len());
        buf[..copy_size].copy_from_slice(&unread[..copy_size]);
        Ok(copy_size)
    }

    fn file_size(&self) -> Result<u64> {
        Ok(self.0.lock().len() as u64)
    }
}
