//! Non-blocking probe of the unattended-upgrades lock file.
//!
//! The probe never keeps the lock: if it can be taken it is released again
//! before returning, so probing leaves no residual state behind.

use crate::config::LockStyle;
use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg};
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

/// Result of one probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    /// Nobody holds the lock: no upgrade is running.
    Acquired,
    /// Another process holds the lock.
    Held,
}

/// Errors other than "held by someone else".
#[derive(Debug)]
pub enum LockError {
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    Lock {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for LockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockError::Open { path, source } => {
                write!(f, "failed to open lock file {}: {source}", path.display())
            }
            LockError::Lock { path, source } => {
                write!(f, "failed to lock {}: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for LockError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LockError::Open { source, .. } => Some(source),
            LockError::Lock { source, .. } => Some(source),
        }
    }
}

/// Anything that can tell whether the lock is currently free.
pub trait LockProbe {
    fn probe(&self) -> Result<LockState, LockError>;
}

/// Probes a lock file on disk.
#[derive(Debug, Clone)]
pub struct FileLockProbe {
    path: PathBuf,
    style: LockStyle,
}

impl FileLockProbe {
    pub fn new(path: impl Into<PathBuf>, style: LockStyle) -> Self {
        Self {
            path: path.into(),
            style,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> Result<Option<File>, LockError> {
        let opened = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .mode(0o640)
            .custom_flags(nix::libc::O_NOFOLLOW)
            .open(&self.path);

        match opened {
            Ok(file) => Ok(Some(file)),
            Err(e) if e.raw_os_error() == Some(nix::libc::EROFS) => {
                tracing::debug!(
                    path = %self.path.display(),
                    "lock file is on a read-only filesystem, nothing can be upgrading"
                );
                Ok(None)
            }
            Err(e) => Err(LockError::Open {
                path: self.path.clone(),
                source: e,
            }),
        }
    }

    fn probe_fcntl(&self, file: &File) -> Result<LockState, LockError> {
        let fd = file.as_raw_fd();
        match fcntl(fd, FcntlArg::F_SETLK(&whole_file_lock(nix::libc::F_WRLCK as i32))) {
            Ok(_) => {
                let _ = fcntl(fd, FcntlArg::F_SETLK(&whole_file_lock(nix::libc::F_UNLCK as i32)));
                Ok(LockState::Acquired)
            }
            Err(Errno::EACCES) | Err(Errno::EAGAIN) => Ok(LockState::Held),
            Err(Errno::ENOLCK) => {
                tracing::warn!(
                    path = %self.path.display(),
                    "filesystem does not support locking, assuming lock is free"
                );
                Ok(LockState::Acquired)
            }
            Err(errno) => Err(LockError::Lock {
                path: self.path.clone(),
                source: std::io::Error::from(errno),
            }),
        }
    }

    fn probe_flock(&self, file: &File) -> Result<LockState, LockError> {
        use fs2::FileExt;
        match file.try_lock_exclusive() {
            Ok(()) => {
                let _ = FileExt::unlock(file);
                Ok(LockState::Acquired)
            }
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(LockState::Held),
            Err(e) => Err(LockError::Lock {
                path: self.path.clone(),
                source: e,
            }),
        }
    }
}

impl LockProbe for FileLockProbe {
    fn probe(&self) -> Result<LockState, LockError> {
        let Some(file) = self.open()? else {
            return Ok(LockState::Acquired);
        };
        let state = match self.style {
            LockStyle::Fcntl => self.probe_fcntl(&file)?,
            LockStyle::Flock => self.probe_flock(&file)?,
        };
        tracing::debug!(path = %self.path.display(), ?state, "lock probed");
        Ok(state)
    }
}

fn whole_file_lock(kind: i32) -> nix::libc::flock {
    nix::libc::flock {
        l_type: kind as _,
        l_whence: nix::libc::SEEK_SET as _,
        l_start: 0,
        l_len: 0,
        l_pid: 0,
    }
}
