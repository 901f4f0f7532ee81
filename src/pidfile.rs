//! Advisory single-instance lock (spec §3 "Ownership", §6 exit codes).
//!
//! One `signetd` process owns the database for a given agents directory.
//! A second invocation against the same directory must fail fast with
//! exit code 2 rather than open a second libsql connection pool against
//! a database another process already owns.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs4::FileExt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PidFileError {
    #[error("another signetd instance already holds the lock at {path}")]
    AlreadyRunning { path: PathBuf },

    #[error("failed to access pid file {path}: {source}")]
    Io { path: PathBuf, #[source] source: std::io::Error },
}

/// Holds the open, locked pid file for the life of the process. The
/// advisory lock is released automatically when this is dropped, whether
/// by normal shutdown or an unwinding panic.
pub struct PidFile {
    path: PathBuf,
    file: File,
}

impl PidFile {
    /// Acquire the lock at `path`, creating it if absent. Returns
    /// [`PidFileError::AlreadyRunning`] if another process holds it.
    pub fn acquire(path: &Path) -> Result<Self, PidFileError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| PidFileError::Io { path: path.to_path_buf(), source })?;
        }

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|source| PidFileError::Io { path: path.to_path_buf(), source })?;

        file.try_lock_exclusive().map_err(|_| PidFileError::AlreadyRunning { path: path.to_path_buf() })?;

        let mut file = file;
        file.set_len(0).map_err(|source| PidFileError::Io { path: path.to_path_buf(), source })?;
        writeln!(file, "{}", std::process::id()).map_err(|source| PidFileError::Io { path: path.to_path_buf(), source })?;

        Ok(Self { path: path.to_path_buf(), file })
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        let _ = self.file.unlock();
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_against_same_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("signetd.pid");
        let first = PidFile::acquire(&path).unwrap();
        let second = PidFile::acquire(&path);
        assert!(matches!(second, Err(PidFileError::AlreadyRunning { .. })));
        drop(first);
    }

    #[test]
    fn lock_is_released_and_file_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("signetd.pid");
        {
            let _held = PidFile::acquire(&path).unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
        let _reacquired = PidFile::acquire(&path).unwrap();
    }
}
