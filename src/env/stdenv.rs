use std::{
    fs::{File, OpenOptions},
    io::Result,
    path::Path,
};

use super::{Env, Metadata, PositionalReader, PositionalWriter};

/// An implementation of [`Env`] based on [`std`].
#[derive(Clone, Debug, Default)]
pub struct StdEnv;

impl Env for StdEnv {
    type PositionalReaderWriter = PositionalReaderWriter;

    fn open_file<P: AsRef<Path>>(&self, path: P) -> Result<Self::PositionalReaderWriter> {
        Ok(PositionalReaderWriter(
            OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(path)?,
        ))
    }

    fn create_dir_all<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::create_dir_all(path)
    }

    fn metadata<P: AsRef<Path>>(&self, path: P) -> Result<Metadata> {
        let raw_metadata = std::fs::metadata(path)?;
        Ok(Metadata {
            len: raw_metadata.len(),
        })
    }
}

pub struct PositionalReaderWriter(File);

impl PositionalWriter for PositionalReaderWriter {
    #[cfg(unix)]
    fn write_at(&self, buf: &[u8], offset: u64) -> Result<usize> {
        use std::os::unix::fs::FileExt;
        self.0.write_at(buf, offset)
    }

    #[cfg(windows)]
    fn write_at(&self, buf: &[u8], offset: u64) -> Result<usize> {
        use std::os::windows::fs::FileExt;
        self.0.seek_write(buf, offset)
    }

    fn sync_all(&self) -> Result<()> {
        self.0.sync_all()
    }
}

impl PositionalReader for PositionalReaderWriter {
    #[cfg(unix)]
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        use std::os::unix::fs::FileExt;
        self.0.read_at(buf, offset)
    }

    #[cfg(windows)]
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        use std::os::windows::fs::FileExt;
        self.0.seek_read(buf, offset)
    }

    fn file_size(&self) -> Result<u64> {
        Ok(self.0.metadata()?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_write() -> Result<()> {
        let env = StdEnv;
        let dir = tempfile::tempdir()?;
        // 100 KB
        let offset = 100 * 1024;
        let path = dir.path().join("tmp_test_file");

        let file = env.open_file(&path)?;
        file.write_exact_at(b"hello", offset)?;
        file.sync_all()?;

        let file = env.open_file(&path)?;
        let mut buf = [0u8; 5];
        file.read_exact_at(&mut buf, offset)?;
        assert_eq!(&buf, b"hello");
        assert_eq!(file.file_size()?, offset + 5);

        // pos 0 content should be zero.
        file.read_exact_at(&mut buf, 0)?;
        assert_eq!(&buf, &[0u8; 5]);

        // pos 200 content should be zero.
        let mut buf = [0u8; 100];
        file.read_exact_at(&mut buf, 200)?;
        assert_eq!(&buf, &[0u8; 100]);

        assert_eq!(env.metadata(&path)?.len, offset + 5);
        Ok(())
    }

    #[test]
    fn test_read_past_end_is_eof() -> Result<()> {
        let env = StdEnv;
        let dir = tempfile::tempdir()?;
        let file = env.open_file(dir.path().join("short"))?;
        file.write_exact_at(b"abc", 0)?;

        let mut buf = [0u8; 8];
        let err = file.read_exact_at(&mut buf, 0).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
        Ok(())
    }
}
