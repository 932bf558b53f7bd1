//! In-memory block source for tests and fixtures.
//!
//! Files are named byte vectors behind a shared registry. Tests use the
//! mutation helpers to model an online log growing under the reader, or a
//! log rotation overwriting blocks mid-read.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ferroredo_error::{FerroError, Result};
use parking_lot::Mutex;

use crate::{BlockSource, SourceHandle};

#[derive(Debug, Default)]
struct Registry {
    files: HashMap<PathBuf, Arc<Mutex<Vec<u8>>>>,
}

/// An in-memory block source. Cloning shares the registry, so a test can
/// keep mutating a file that a reader thread has already opened.
#[derive(Debug, Clone, Default)]
pub struct MemoryBlockSource {
    inner: Arc<Mutex<Registry>>,
}

impl MemoryBlockSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace a file with the given contents.
    pub fn put(&self, path: impl Into<PathBuf>, data: Vec<u8>) {
        let mut inner = self.inner.lock();
        inner.files.insert(path.into(), Arc::new(Mutex::new(data)));
    }

    /// Append bytes to an existing file (an online log growing).
    pub fn append(&self, path: &Path, data: &[u8]) -> Result<()> {
        let file = self.lookup(path)?;
        file.lock().extend_from_slice(data);
        Ok(())
    }

    /// Overwrite a byte range in place (a rotation reusing the file).
    pub fn overwrite(&self, path: &Path, offset: usize, data: &[u8]) -> Result<()> {
        let file = self.lookup(path)?;
        let mut bytes = file.lock();
        if offset + data.len() > bytes.len() {
            bytes.resize(offset + data.len(), 0);
        }
        bytes[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Whether a file exists in the registry.
    pub fn contains(&self, path: &Path) -> bool {
        self.inner.lock().files.contains_key(path)
    }

    fn lookup(&self, path: &Path) -> Result<Arc<Mutex<Vec<u8>>>> {
        self.inner
            .lock()
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| {
                FerroError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("no such memory file: {}", path.display()),
                ))
            })
    }
}

impl BlockSource for MemoryBlockSource {
    type Handle = MemoryFileHandle;

    fn name(&self) -> &'static str {
        "memory"
    }

    fn open(&self, path: &Path) -> Result<Self::Handle> {
        let data = self.lookup(path)?;
        Ok(MemoryFileHandle {
            data: Some(data),
            path: path.to_path_buf(),
        })
    }
}

/// Handle over one in-memory file. Reads observe concurrent mutations made
/// through the owning [`MemoryBlockSource`].
#[derive(Debug)]
pub struct MemoryFileHandle {
    data: Option<Arc<Mutex<Vec<u8>>>>,
    path: PathBuf,
}

impl MemoryFileHandle {
    fn data(&self) -> Result<&Arc<Mutex<Vec<u8>>>> {
        self.data
            .as_ref()
            .ok_or_else(|| FerroError::internal(format!("read on closed handle: {}", self.path.display())))
    }
}

impl SourceHandle for MemoryFileHandle {
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let data = self.data()?.lock();
        let offset = usize::try_from(offset)
            .map_err(|_| FerroError::internal("offset exceeds usize"))?;
        if offset >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - offset);
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        Ok(n)
    }

    fn size(&self) -> Result<u64> {
        Ok(self.data()?.lock().len() as u64)
    }

    fn close(&mut self) -> Result<()> {
        self.data = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_read_close() {
        let source = MemoryBlockSource::new();
        source.put("/mem/redo_1.arc", b"hello blocks".to_vec());

        let mut handle = source.open(Path::new("/mem/redo_1.arc")).unwrap();
        let mut buf = [0u8; 5];
        assert_eq!(handle.read_at(&mut buf, 6).unwrap(), 5);
        assert_eq!(&buf, b"block");
        handle.close().unwrap();
        assert!(handle.read_at(&mut buf, 0).is_err());
    }

    #[test]
    fn growth_is_visible_through_open_handle() {
        let source = MemoryBlockSource::new();
        source.put("/mem/online_2", b"aaaa".to_vec());

        let mut handle = source.open(Path::new("/mem/online_2")).unwrap();
        assert_eq!(handle.size().unwrap(), 4);

        source.append(Path::new("/mem/online_2"), b"bbbb").unwrap();
        assert_eq!(handle.size().unwrap(), 8);

        let mut buf = [0u8; 4];
        assert_eq!(handle.read_at(&mut buf, 4).unwrap(), 4);
        assert_eq!(&buf, b"bbbb");
    }

    #[test]
    fn overwrite_models_rotation() {
        let source = MemoryBlockSource::new();
        source.put("/mem/online_3", vec![1u8; 8]);
        source.overwrite(Path::new("/mem/online_3"), 4, &[9, 9]).unwrap();

        let mut handle = source.open(Path::new("/mem/online_3")).unwrap();
        let mut buf = [0u8; 8];
        handle.read_at(&mut buf, 0).unwrap();
        assert_eq!(buf, [1, 1, 1, 1, 9, 9, 1, 1]);
    }

    #[test]
    fn missing_file_is_not_found() {
        let source = MemoryBlockSource::new();
        let err = source.open(Path::new("/mem/absent")).unwrap_err();
        assert!(matches!(err, FerroError::Io(ref io) if io.kind() == std::io::ErrorKind::NotFound));
    }
}
