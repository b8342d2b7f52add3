//! Flat on-disk thumbnail store
//!
//! One encoded thumbnail per cache key, stored at `root/key`. There is no index:
//! a readable file at that path is the whole contract.

use crate::error::StoreError;
use parking_lot::RwLock;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

const TEMP_PREFIX: &str = ".tmp-";

/// Disk cache for encoded thumbnail bytes
#[derive(Debug)]
pub struct DiskThumbnailStore {
    root: RwLock<PathBuf>,
}

impl DiskThumbnailStore {
    /// Create a store rooted at `root`. The directory is created lazily by
    /// [`ensure_ready`](Self::ensure_ready).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: RwLock::new(root.into()),
        }
    }

    /// Current root directory
    pub fn root(&self) -> PathBuf {
        self.root.read().clone()
    }

    /// Point subsequent operations at a new root. Existing files are not moved.
    pub fn set_root(&self, root: impl Into<PathBuf>) {
        *self.root.write() = root.into();
    }

    /// Path a key is stored at under the current root
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.root.read().join(key)
    }

    /// Create the root directory if it is missing
    pub fn ensure_ready(&self) -> Result<(), StoreError> {
        let root = self.root();
        fs::create_dir_all(&root).map_err(|e| StoreError::io(&root, e))
    }

    /// Read the bytes stored under `key`. Contents are not validated.
    pub fn read(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.path_for(key);
        fs::read(&path).map_err(|e| StoreError::io(path, e))
    }

    /// Whether a file exists for `key`
    pub fn contains(&self, key: &str) -> bool {
        self.path_for(key).is_file()
    }

    /// Write `data` under `key`, replacing any previous file.
    ///
    /// Bytes go to a temporary file in the same directory which is then renamed
    /// into place, so readers see either the old file or the complete new one.
    /// Holds the root shared for the whole write so [`clear`](Self::clear)
    /// never sees a half-written temporary file.
    pub fn write(&self, key: &str, data: &[u8]) -> Result<(), StoreError> {
        let root = self.root.read();
        let target = root.join(key);

        let mut tmp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(&*root)
            .map_err(|e| StoreError::io(&*root, e))?;
        let written = tmp.write_all(data).and_then(|()| tmp.flush());
        written.map_err(|e| StoreError::io(tmp.path(), e))?;
        tmp.persist(&target)
            .map_err(|e| StoreError::io(&target, e.error))?;

        Ok(())
    }

    /// Delete the file for `key`. A missing file is not an error.
    pub fn remove(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }

    /// Delete everything under the root, leaving it empty.
    ///
    /// Takes the root exclusively, so writes in flight finish first and new
    /// ones wait until the directory is empty again.
    pub fn clear(&self) -> Result<(), StoreError> {
        let root = self.root.write();
        fs::create_dir_all(&*root).map_err(|e| StoreError::io(&*root, e))?;

        let entries = fs::read_dir(&*root).map_err(|e| StoreError::io(&*root, e))?;
        for entry in entries {
            let path = entry.map_err(|e| StoreError::io(&*root, e))?.path();
            let removed = if path.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            match removed {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StoreError::io(path, e)),
            }
        }
        Ok(())
    }

    /// Number of cached thumbnails (temporary files excluded)
    pub fn len(&self) -> usize {
        let root = self.root();
        fs::read_dir(&root)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter(|e| is_thumbnail_file(&e.path()))
                    .count()
            })
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn is_thumbnail_file(path: &Path) -> bool {
    path.is_file()
        && !path
            .file_name()
            .map(|n| n.to_string_lossy().starts_with(TEMP_PREFIX))
            .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use tempfile::tempdir;

    #[test]
    fn test_ensure_ready_is_idempotent() -> Result<()> {
        let temp_dir = tempdir()?;
        let root = temp_dir.path().join("nested").join("thumbs");
        let store = DiskThumbnailStore::new(&root);

        store.ensure_ready()?;
        store.ensure_ready()?;
        assert!(root.is_dir());
        Ok(())
    }

    #[test]
    fn test_write_then_read() -> Result<()> {
        let temp_dir = tempdir()?;
        let store = DiskThumbnailStore::new(temp_dir.path());
        store.ensure_ready()?;

        store.write("work1_a.jpg", b"first")?;
        assert_eq!(store.read("work1_a.jpg")?, b"first");

        // Overwrite
        store.write("work1_a.jpg", b"second")?;
        assert_eq!(store.read("work1_a.jpg")?, b"second");
        assert_eq!(store.len(), 1);
        Ok(())
    }

    #[test]
    fn test_missing_key_is_not_found() -> Result<()> {
        let temp_dir = tempdir()?;
        let store = DiskThumbnailStore::new(temp_dir.path());

        let err = store.read("nope").unwrap_err();
        assert!(err.is_not_found());
        assert!(!store.contains("nope"));
        Ok(())
    }

    #[test]
    fn test_write_without_root_fails() -> Result<()> {
        let temp_dir = tempdir()?;
        let store = DiskThumbnailStore::new(temp_dir.path().join("missing"));
        assert!(store.write("k", b"data").is_err());
        Ok(())
    }

    #[test]
    fn test_clear_recreates_empty_root() -> Result<()> {
        let temp_dir = tempdir()?;
        let store = DiskThumbnailStore::new(temp_dir.path().join("thumbs"));
        store.ensure_ready()?;
        store.write("a", b"1")?;
        store.write("b", b"2")?;
        assert_eq!(store.len(), 2);

        store.clear()?;
        assert!(store.root().is_dir());
        assert!(store.is_empty());
        Ok(())
    }

    #[test]
    fn test_clear_while_writing_never_fails() -> Result<()> {
        let temp_dir = tempdir()?;
        let store = Arc::new(DiskThumbnailStore::new(temp_dir.path().join("thumbs")));
        store.ensure_ready()?;
        let stop = Arc::new(AtomicBool::new(false));

        let writers: Vec<_> = (0..4)
            .map(|w| {
                let store = Arc::clone(&store);
                let stop = Arc::clone(&stop);
                thread::spawn(move || {
                    let mut i = 0;
                    while !stop.load(Ordering::SeqCst) {
                        store.write(&format!("w{}_{}", w, i % 32), &[7u8; 2048])?;
                        i += 1;
                    }
                    Ok::<(), StoreError>(())
                })
            })
            .collect();

        for _ in 0..50 {
            store.clear()?;
        }
        stop.store(true, Ordering::SeqCst);
        for writer in writers {
            writer.join().expect("writer thread panicked")?;
        }

        assert!(store.root().is_dir());
        store.write("after", b"ok")?;
        assert_eq!(store.read("after")?, b"ok");
        Ok(())
    }

    #[test]
    fn test_clear_removes_nested_and_temp_entries() -> Result<()> {
        let temp_dir = tempdir()?;
        let store = DiskThumbnailStore::new(temp_dir.path().join("thumbs"));
        store.ensure_ready()?;
        store.write("a", b"1")?;
        fs::write(store.root().join(".tmp-leftover"), b"partial")?;
        fs::create_dir_all(store.root().join("stray").join("deeper"))?;

        store.clear()?;
        assert_eq!(fs::read_dir(store.root())?.count(), 0);
        Ok(())
    }

    #[test]
    fn test_remove_is_tolerant() -> Result<()> {
        let temp_dir = tempdir()?;
        let store = DiskThumbnailStore::new(temp_dir.path());
        store.write("a", b"1")?;

        store.remove("a")?;
        store.remove("a")?;
        assert!(!store.contains("a"));
        Ok(())
    }

    #[test]
    fn test_set_root_does_not_migrate() -> Result<()> {
        let temp_dir = tempdir()?;
        let first = temp_dir.path().join("first");
        let second = temp_dir.path().join("second");
        let store = DiskThumbnailStore::new(&first);
        store.ensure_ready()?;
        store.write("a", b"1")?;

        store.set_root(&second);
        store.ensure_ready()?;
        assert!(!store.contains("a"));
        assert!(first.join("a").is_file());
        Ok(())
    }
}
