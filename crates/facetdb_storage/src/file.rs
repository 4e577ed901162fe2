//! File-based storage backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A storage backend on top of a single OS file.
///
/// # Durability
///
/// - `flush()` pushes buffered bytes to the OS (`File::flush`)
/// - `sync()` forces data and metadata to disk (`File::sync_all`)
///
/// The tracked length is cached in memory; a write is visible to `read_at`
/// as soon as `append` returns, regardless of durability.
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    file: RwLock<File>,
    len: RwLock<u64>,
}

impl FileBackend {
    /// Opens the file at `path`, creating it if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            file: RwLock::new(file),
            len: RwLock::new(len),
        })
    }

    /// Like [`FileBackend::open`], creating missing parent directories first.
    ///
    /// # Errors
    ///
    /// Returns an error if directories cannot be created or the file cannot
    /// be opened.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    /// Path of the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let total = *self.len.read();
        let end = offset.saturating_add(len as u64);
        if offset > total || end > total {
            return Err(StorageError::OutOfBounds {
                offset,
                requested: len,
                len: total,
            });
        }
        if len == 0 {
            return Ok(Vec::new());
        }

        let mut file = self.file.write();
        file.seek(SeekFrom::Start(offset))?;
        let mut buffer = vec![0u8; len];
        file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        if data.is_empty() {
            return Ok(*self.len.read());
        }

        let mut file = self.file.write();
        let mut len = self.len.write();

        let offset = *len;
        file.seek(SeekFrom::End(0))?;
        file.write_all(data)?;
        *len += data.len() as u64;
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.file.write().flush()?;
        Ok(())
    }

    fn len(&self) -> StorageResult<u64> {
        Ok(*self.len.read())
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.file.write().sync_all()?;
        Ok(())
    }

    fn truncate(&mut self, new_len: u64) -> StorageResult<()> {
        let file = self.file.write();
        let mut len = self.len.write();

        if new_len > *len {
            return Err(StorageError::TruncateBeyondEnd {
                requested: new_len,
                len: *len,
            });
        }

        file.set_len(new_len)?;
        file.sync_all()?;
        *len = new_len;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_creates_empty_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.bin");
        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.len().unwrap(), 0);
        assert!(path.exists());
    }

    #[test]
    fn append_then_read_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.bin");
        let mut backend = FileBackend::open(&path).unwrap();

        assert_eq!(backend.append(b"alpha").unwrap(), 0);
        assert_eq!(backend.append(b"beta").unwrap(), 5);
        assert_eq!(backend.read_at(0, 9).unwrap(), b"alphabeta");
        assert_eq!(backend.read_at(5, 4).unwrap(), b"beta");
    }

    #[test]
    fn bytes_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.bin");

        {
            let mut backend = FileBackend::open(&path).unwrap();
            backend.append(b"durable").unwrap();
            backend.sync().unwrap();
        }

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.len().unwrap(), 7);
        assert_eq!(backend.read_at(0, 7).unwrap(), b"durable");
    }

    #[test]
    fn read_out_of_bounds_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.bin");
        let mut backend = FileBackend::open(&path).unwrap();
        backend.append(b"abc").unwrap();

        let err = backend.read_at(1, 10).unwrap_err();
        assert!(matches!(err, StorageError::OutOfBounds { .. }));
    }

    #[test]
    fn truncate_drops_tail_on_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.bin");
        let mut backend = FileBackend::open(&path).unwrap();
        backend.append(b"keep-drop").unwrap();
        backend.truncate(4).unwrap();
        assert_eq!(backend.len().unwrap(), 4);

        drop(backend);
        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.read_at(0, 4).unwrap(), b"keep");
    }

    #[test]
    fn open_with_create_dirs_builds_parents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a").join("b").join("store.bin");
        let backend = FileBackend::open_with_create_dirs(&path).unwrap();
        assert!(backend.is_empty().unwrap());
        assert!(path.exists());
    }
}
