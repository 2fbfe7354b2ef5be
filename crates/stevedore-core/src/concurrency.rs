use crate::LoadError;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::Path;

/// Exclusive advisory lock on a store, held for the duration of one import.
pub struct StoreLock {
    lock_file: File,
}

fn open_lock_file(lock_path: &Path) -> Result<File, LoadError> {
    if let Some(parent) = lock_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| LoadError::io(parent, e))?;
    }
    OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(lock_path)
        .map_err(|e| LoadError::io(lock_path, e))
}

impl StoreLock {
    /// Block until the lock is free.
    pub fn acquire(lock_path: &Path) -> Result<Self, LoadError> {
        let file = open_lock_file(lock_path)?;
        file.lock_exclusive()
            .map_err(|e| LoadError::io(lock_path, e))?;
        Ok(Self { lock_file: file })
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = self.lock_file.unlock();
    }
}
