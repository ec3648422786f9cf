//! Exclusive lock file guarding commands that write to the store.
//!
//! `add`, `remove` and `reindex` must not run concurrently against the same
//! store. The lock is a sibling file `<db>.lock` created with `create_new`,
//! holding the owner's pid, and removed when the guard drops.

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::error::ReferError;

#[derive(Debug)]
pub struct StoreLock {
    path: PathBuf,
}

impl StoreLock {
    pub fn acquire(db_path: &Path) -> Result<Self> {
        let path = lock_path(db_path);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create directory {}", parent.display()))?;
            }
        }

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(ReferError::StoreBusy(db_path.to_path_buf()).into())
            }
            Err(e) => {
                return Err(e).with_context(|| format!("create lock file {}", path.display()))
            }
        };
        let lock = Self { path };
        writeln!(file, "{}", std::process::id())
            .with_context(|| format!("write lock file {}", lock.path.display()))?;

        tracing::debug!(lock = %lock.path.display(), "acquired store lock");
        Ok(lock)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!(lock = %self.path.display(), error = %e, "failed to remove lock file");
        }
    }
}

pub fn lock_path(db_path: &Path) -> PathBuf {
    let mut name = db_path.as_os_str().to_os_string();
    name.push(".lock");
    PathBuf::from(name)
}
