// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! The build-directory exclusive lock (spec.md §4.8 invariant: "exactly
//! one cooker may operate per build directory"). Grounded on `moss`'s
//! `installation/lockfile.rs`: an advisory `flock(2)` held for the
//! process lifetime, released by `Drop`.

use std::os::fd::AsRawFd;

use camino::{Utf8Path, Utf8PathBuf};
use fs_err as fs;
use nix::fcntl::{flock, FlockArg};
use thiserror::Error;

const LOCK_FILE_NAME: &str = "cooker.lock";

#[derive(Debug, Error)]
pub enum LockError {
    #[error("open lock file {0}")]
    Open(Utf8PathBuf, #[source] std::io::Error),
    #[error("another cooker already holds the lock on {0}")]
    Contended(Utf8PathBuf),
    #[error("acquire lock on {0}")]
    Acquire(Utf8PathBuf, #[source] nix::Error),
}

/// Held for the cooker's lifetime; dropping releases the lock (spec.md
/// §5 "the build directory lock is held for the cooker's lifetime").
pub struct BuildDirLock {
    path: Utf8PathBuf,
    file: fs::File,
}

impl BuildDirLock {
    pub fn acquire(topdir: &Utf8Path) -> Result<Self, LockError> {
        let path = topdir.join(LOCK_FILE_NAME);
        let file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(&path)
            .map_err(|source| LockError::Open(path.clone(), source))?;

        match flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
            Ok(()) => Ok(Self { path, file }),
            Err(nix::errno::Errno::EWOULDBLOCK) => Err(LockError::Contended(path)),
            Err(error) => Err(LockError::Acquire(path, error)),
        }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }
}

impl Drop for BuildDirLock {
    fn drop(&mut self) {
        let _ = flock(self.file.as_raw_fd(), FlockArg::Unlock);
    }
}
