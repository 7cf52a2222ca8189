// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 U.S. Federal Government (in countries where recognized)

//! Single-instance lock.
//!
//! A periodic run and a follow-up run may fire at the same moment. The
//! second one must notice and step aside instead of mailing everybody twice.
//! The lock is an advisory exclusive lock on a file; the kernel releases it
//! when the process exits, so a crashed run never leaves a stale lock.

use std::fs::{File, OpenOptions, TryLockError};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{MonitorError, Result};

/// Held for the lifetime of a run. Dropping it releases the lock.
#[derive(Debug)]
pub struct InstanceLock {
    file: File,
    path: PathBuf,
}

impl InstanceLock {
    /// Take the lock at `path` without waiting.
    ///
    /// # Errors
    ///
    /// [`MonitorError::AlreadyRunning`] when another process holds it, an
    /// I/O error when the file cannot be opened.
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)?;

        match file.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => {
                return Err(MonitorError::AlreadyRunning(path.to_path_buf()));
            }
            Err(TryLockError::Error(e)) => return Err(e.into()),
        }

        // Holder pid for operators; the lock itself is what matters.
        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;

        debug!(path = %path.display(), "Acquired instance lock");
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Lock file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}
