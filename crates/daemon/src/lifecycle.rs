// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle: socket directory, single-instance lock, bind, teardown.

use std::fs::File;
use std::io;
use std::os::unix::fs::DirBuilderExt;
use std::path::PathBuf;

use fs2::FileExt;
use nix::sys::stat::{umask, Mode};
use thiserror::Error;
use tokio::net::UnixListener;
use tracing::{debug, warn};

use crate::env;

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Socket prefix directory, shared by all users (0755)
    pub sock_prefix: PathBuf,
    /// Per-uid socket directory (0700), flocked for single-instance
    pub sock_dir: PathBuf,
    /// Path to the control socket
    pub socket_path: PathBuf,
}

impl Config {
    /// Resolve paths for the invoking user.
    pub fn load() -> Self {
        let sock_prefix = env::sock_prefix();
        let sock_dir = sock_prefix.join(nix::unistd::getuid().to_string());
        let socket_path = sock_dir.join("sock");
        Self { sock_prefix, sock_dir, socket_path }
    }
}

/// A bound control socket plus the lock that makes this instance the only one.
#[derive(Debug)]
pub struct ServerHandle {
    pub listener: UnixListener,
    // NOTE(lifetime): Held to maintain the exclusive directory lock; released on drop
    #[allow(dead_code)]
    lock_file: File,
}

/// Lifecycle errors
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("another supervisor already holds {0}")]
    AlreadyRunning(PathBuf),

    #[error("failed to create {0}: {1}")]
    CreateDir(PathBuf, io::Error),

    #[error("failed to bind socket at {0}: {1}")]
    BindFailed(PathBuf, io::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Create the socket directories, take the per-uid lock, and bind.
///
/// Returns `Ok(None)` when the filesystem is read-only; the caller re-attempts
/// on a later loop turn. A contested lock is [`LifecycleError::AlreadyRunning`]
/// and the caller exits successfully.
pub fn server_init(config: &Config) -> Result<Option<ServerHandle>, LifecycleError> {
    match make_dir(&config.sock_prefix, 0o755) {
        Ok(()) => {}
        Err(e) if e.raw_os_error() == Some(libc::EROFS) => return Ok(None),
        Err(e) => return Err(LifecycleError::CreateDir(config.sock_prefix.clone(), e)),
    }

    match make_dir(&config.sock_dir, 0o700) {
        Ok(()) => {}
        Err(e) if e.raw_os_error() == Some(libc::EROFS) => return Ok(None),
        Err(e) => return Err(LifecycleError::CreateDir(config.sock_dir.clone(), e)),
    }

    let lock_file = File::open(&config.sock_dir)?;
    if let Err(e) = lock_file.try_lock_exclusive() {
        if e.kind() == io::ErrorKind::WouldBlock {
            return Err(LifecycleError::AlreadyRunning(config.sock_dir.clone()));
        }
        return Err(e.into());
    }

    match std::fs::remove_file(&config.socket_path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) if e.raw_os_error() == Some(libc::EROFS) => return Ok(None),
        Err(e) => {
            warn!("failed to remove stale socket: {e}");
            return Ok(None);
        }
    }

    // Nothing but the owner may connect.
    let old_mask = umask(Mode::from_bits_truncate(0o077));
    let listener = std::os::unix::net::UnixListener::bind(&config.socket_path);
    umask(old_mask);

    let listener = match listener {
        Ok(l) => l,
        Err(e) if e.raw_os_error() == Some(libc::EROFS) => return Ok(None),
        Err(e) => return Err(LifecycleError::BindFailed(config.socket_path.clone(), e)),
    };
    listener.set_nonblocking(true)?;
    let listener = UnixListener::from_std(listener)?;

    debug!("control socket bound at {}", config.socket_path.display());
    Ok(Some(ServerHandle { listener, lock_file }))
}

fn make_dir(path: &std::path::Path, mode: u32) -> io::Result<()> {
    match std::fs::DirBuilder::new().mode(mode).create(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            if path.is_dir() {
                Ok(())
            } else {
                Err(e)
            }
        }
        Err(e) => Err(e),
    }
}

/// Remove the socket file on orderly shutdown.
pub fn cleanup(config: &Config) {
    if config.socket_path.exists() {
        if let Err(e) = std::fs::remove_file(&config.socket_path) {
            warn!("failed to remove socket file: {e}");
        }
    }
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
