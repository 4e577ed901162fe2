//! Database directory layout and exclusive ownership.
//!
//! A database directory holds:
//!
//! * `LOCK`      — advisory lock file; one engine per directory
//! * `MANIFEST`  — format version, index and vector declarations
//! * `wal.log`   — commit write-ahead log
//! * `records.dat` — the durable record log behind the memtable

use crate::error::{EngineError, EngineResult};
use facetdb_storage::StorageError;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub(crate) const LOCK_FILE: &str = "LOCK";
pub(crate) const MANIFEST_FILE: &str = "MANIFEST";
pub(crate) const WAL_FILE: &str = "wal.log";
pub(crate) const RECORDS_FILE: &str = "records.dat";

fn io_err(err: std::io::Error) -> EngineError {
    EngineError::Storage(StorageError::Io(err))
}

/// Exclusive hold on a database directory, released on drop.
#[derive(Debug)]
pub(crate) struct DirLock {
    file: File,
    path: PathBuf,
}

impl DirLock {
    /// Creates the directory if needed and takes the advisory lock.
    /// Fails with [`EngineError::DatabaseLocked`] when another process
    /// (or another engine in this process) holds it.
    pub(crate) fn acquire(dir: &Path) -> EngineResult<Self> {
        fs::create_dir_all(dir).map_err(io_err)?;
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(dir.join(LOCK_FILE))
            .map_err(io_err)?;
        file.try_lock_exclusive()
            .map_err(|_| EngineError::DatabaseLocked {
                path: dir.to_path_buf(),
            })?;
        Ok(Self {
            file,
            path: dir.to_path_buf(),
        })
    }

    pub(crate) fn dir(&self) -> &Path {
        &self.path
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

/// Reads a whole file, `None` when it does not exist.
pub(crate) fn read_file(dir: &Path, name: &str) -> EngineResult<Option<Vec<u8>>> {
    match fs::read(dir.join(name)) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(io_err(err)),
    }
}

/// Replaces a file atomically: write a sibling temp file, fsync it,
/// rename over the target, fsync the directory. A crash leaves either
/// the old file or the new one, never a torn mix.
pub(crate) fn write_atomic(dir: &Path, name: &str, bytes: &[u8]) -> EngineResult<()> {
    let tmp_path = dir.join(format!("{name}.tmp"));
    let final_path = dir.join(name);
    {
        let mut tmp = File::create(&tmp_path).map_err(io_err)?;
        tmp.write_all(bytes).map_err(io_err)?;
        tmp.sync_all().map_err(io_err)?;
    }
    fs::rename(&tmp_path, &final_path).map_err(io_err)?;
    // Durable rename needs the directory entry synced too.
    File::open(dir).map_err(io_err)?.sync_all().map_err(io_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn second_lock_on_the_same_directory_fails() {
        let dir = tempdir().unwrap();
        let held = DirLock::acquire(dir.path()).unwrap();
        let err = DirLock::acquire(dir.path()).unwrap_err();
        assert!(matches!(err, EngineError::DatabaseLocked { .. }));
        drop(held);
        DirLock::acquire(dir.path()).unwrap();
    }

    #[test]
    fn lock_creates_missing_directories() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("a/b");
        let lock = DirLock::acquire(&nested).unwrap();
        assert_eq!(lock.dir(), nested.as_path());
        assert!(nested.join(LOCK_FILE).exists());
    }

    #[test]
    fn atomic_write_replaces_contents() {
        let dir = tempdir().unwrap();
        assert_eq!(read_file(dir.path(), MANIFEST_FILE).unwrap(), None);
        write_atomic(dir.path(), MANIFEST_FILE, b"one").unwrap();
        write_atomic(dir.path(), MANIFEST_FILE, b"two").unwrap();
        assert_eq!(
            read_file(dir.path(), MANIFEST_FILE).unwrap().as_deref(),
            Some(&b"two"[..])
        );
        assert!(!dir.path().join(format!("{MANIFEST_FILE}.tmp")).exists());
    }
}
