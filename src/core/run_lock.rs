/*
 * Exclusive, non-blocking run lock on a client destination directory. The lock file
 * carries no content; it exists only for its advisory lock. `RunLock` is a scoped
 * guard: dropping it unlocks and removes the file on every exit path.
 */
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

pub const RUN_LOCK_FILE_NAME: &str = "rubac.runlock";

#[derive(Debug)]
pub enum RunLockError {
    Busy(PathBuf),
    Io(PathBuf, io::Error),
}

impl std::fmt::Display for RunLockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunLockError::Busy(path) => write!(f, "cannot lock file {}", path.display()),
            RunLockError::Io(path, e) => write!(f, "lock file {}: {e}", path.display()),
        }
    }
}

impl std::error::Error for RunLockError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RunLockError::Io(_, e) => Some(e),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    file: Option<File>,
}

impl RunLock {
    /// Takes the lock in `client_dir`, failing immediately with `Busy` if another
    /// holder has it. Never waits.
    pub fn acquire(client_dir: &Path) -> Result<Self, RunLockError> {
        let path = client_dir.join(RUN_LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| RunLockError::Io(path.clone(), e))?;

        if let Err(e) = file.try_lock_exclusive() {
            if e.kind() == fs2::lock_contended_error().kind() {
                log::error!("RunLock: cannot lock file {path:?}, another run is active.");
                return Err(RunLockError::Busy(path));
            }
            return Err(RunLockError::Io(path, e));
        }
        log::debug!("RunLock: Acquired {path:?}");
        Ok(RunLock {
            path,
            file: Some(file),
        })
    }

    pub fn release(mut self) -> io::Result<()> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> io::Result<()> {
        let Some(file) = self.file.take() else {
            return Ok(());
        };
        let removed = fs::remove_file(&self.path);
        let unlocked = FileExt::unlock(&file);
        drop(file);
        log::debug!("RunLock: Released {:?}", self.path);
        removed.and(unlocked)
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = self.release_inner() {
            log::warn!("RunLock: Failed to release {:?}: {e}", self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_second_acquire_fails_fast_with_busy() {
        // Arrange
        let temp_dir = TempDir::new().unwrap();
        let first = RunLock::acquire(temp_dir.path()).expect("first lock");

        // Act
        let second = RunLock::acquire(temp_dir.path());

        // Assert
        assert!(matches!(second, Err(RunLockError::Busy(_))));
        drop(first);
    }

    #[test]
    fn test_drop_unlocks_and_removes_file() {
        let temp_dir = TempDir::new().unwrap();
        let lock_path = temp_dir.path().join(RUN_LOCK_FILE_NAME);
        {
            let _lock = RunLock::acquire(temp_dir.path()).expect("lock");
            assert!(lock_path.exists());
        }
        assert!(!lock_path.exists());
        let again = RunLock::acquire(temp_dir.path()).expect("lock after drop");
        again.release().unwrap();
        assert!(!lock_path.exists());
    }

    #[test]
    fn test_missing_directory_is_io_error() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("nope");
        assert!(matches!(
            RunLock::acquire(&missing),
            Err(RunLockError::Io(_, _))
        ));
    }
}
