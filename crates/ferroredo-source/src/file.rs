//! Local-filesystem block source.

use std::fs::File;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use ferroredo_error::Result;
use tracing::trace;

use crate::{BlockSource, SourceHandle};

/// Block source over ordinary files: archived logs in the recovery area or
/// online logs on a mounted volume.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileBlockSource;

impl FileBlockSource {
    pub const fn new() -> Self {
        Self
    }
}

impl BlockSource for FileBlockSource {
    type Handle = FileHandle;

    fn name(&self) -> &'static str {
        "file"
    }

    fn open(&self, path: &Path) -> Result<Self::Handle> {
        let file = File::open(path)?;
        trace!(path = %path.display(), "opened redo file");
        Ok(FileHandle {
            file: Some(file),
            path: path.to_path_buf(),
        })
    }
}

/// Positional handle over one local file.
#[derive(Debug)]
pub struct FileHandle {
    file: Option<File>,
    path: PathBuf,
}

impl FileHandle {
    fn file(&self) -> Result<&File> {
        self.file
            .as_ref()
            .ok_or_else(|| ferroredo_error::FerroError::internal("read on closed handle"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SourceHandle for FileHandle {
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let mut read = 0;
        // read_at may return short on signal delivery; keep going until the
        // buffer is full or the file ends.
        while read < buf.len() {
            match self.file()?.read_at(&mut buf[read..], offset + read as u64) {
                Ok(0) => break,
                Ok(n) => read += n,
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(read)
    }

    fn size(&self) -> Result<u64> {
        Ok(self.file()?.metadata()?.len())
    }

    fn close(&mut self) -> Result<()> {
        self.file = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn positional_reads_do_not_share_a_cursor() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"0123456789").unwrap();

        let source = FileBlockSource::new();
        let mut handle = source.open(tmp.path()).unwrap();

        let mut buf = [0u8; 4];
        assert_eq!(handle.read_at(&mut buf, 6).unwrap(), 4);
        assert_eq!(&buf, b"6789");
        assert_eq!(handle.read_at(&mut buf, 0).unwrap(), 4);
        assert_eq!(&buf, b"0123");
    }

    #[test]
    fn read_past_end_is_short_not_error() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"abc").unwrap();

        let source = FileBlockSource::new();
        let mut handle = source.open(tmp.path()).unwrap();

        let mut buf = [0u8; 8];
        assert_eq!(handle.read_at(&mut buf, 0).unwrap(), 3);
        assert_eq!(handle.read_at(&mut buf, 10).unwrap(), 0);
    }

    #[test]
    fn size_tracks_growth() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"abc").unwrap();

        let source = FileBlockSource::new();
        let handle = source.open(tmp.path()).unwrap();
        assert_eq!(handle.size().unwrap(), 3);

        tmp.write_all(b"def").unwrap();
        tmp.flush().unwrap();
        assert_eq!(handle.size().unwrap(), 6);
    }

    #[test]
    fn read_after_close_fails() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"abc").unwrap();

        let source = FileBlockSource::new();
        let mut handle = source.open(tmp.path()).unwrap();
        handle.close().unwrap();

        let mut buf = [0u8; 1];
        assert!(handle.read_at(&mut buf, 0).is_err());
    }

    #[test]
    fn open_missing_file_is_error() {
        let source = FileBlockSource::new();
        assert!(source.open(Path::new("/nonexistent/redo.log")).is_err());
    }
}
