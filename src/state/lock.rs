//! Single-writer-per-task enforcement via an advisory exclusive file lock.
//!
//! Built on the same temp-file-then-rename atomicity idiom as the rest of
//! the state store, extended with `fs2`'s exclusive lock so two writers
//! touching the same task cannot interleave their read-modify-write cycles.

use crate::errors::StateError;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

pub struct TaskLock {
    file: File,
    path: PathBuf,
}

impl TaskLock {
    pub fn acquire(task_dir: &Path) -> Result<Self, StateError> {
        fs::create_dir_all(task_dir).map_err(|e| StateError::WriteFailed {
            path: task_dir.to_path_buf(),
            source: e,
        })?;
        let path = task_dir.join(".lock");
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&path)
            .map_err(|e| StateError::LockFailed {
                task_id: task_dir.display().to_string(),
                source: e,
            })?;
        file.lock_exclusive().map_err(|e| StateError::LockFailed {
            task_id: task_dir.display().to_string(),
            source: e,
        })?;
        Ok(Self { file, path })
    }
}

impl Drop for TaskLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
        let _ = &self.path;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn acquire_creates_lock_file() {
        let dir = tempdir().unwrap();
        let _lock = TaskLock::acquire(dir.path()).unwrap();
        assert!(dir.path().join(".lock").exists());
    }

    #[test]
    fn lock_releases_on_drop() {
        let dir = tempdir().unwrap();
        {
            let _lock = TaskLock::acquire(dir.path()).unwrap();
        }
        // A second acquire must not block now that the first was dropped.
        let _lock2 = TaskLock::acquire(dir.path()).unwrap();
    }
}
