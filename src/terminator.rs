//! Best-effort stop request for a running unattended-upgrade.
//!
//! The upgrade process records its pid in a well-known file. Stopping means
//! sending it SIGTERM once; we never wait, verify, or retry.
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::path::PathBuf;

/// What a stop request ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The pid file is missing or does not hold a usable pid.
    NoPid,
    /// SIGTERM was sent.
    Signalled(i32),
    /// Sending SIGTERM failed (process gone, not permitted, ...).
    SignalFailed(i32),
}

/// Anything that can ask the running upgrade to stop.
pub trait Terminator {
    fn request_stop(&self) -> StopOutcome;
}

/// Read-only access to the upgrade's pid file.
#[derive(Debug, Clone)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The recorded pid, or `None` when there is nothing usable to signal.
    pub fn read_pid(&self) -> Option<i32> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "no pid file, nothing to stop");
                return None;
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to read pid file");
                return None;
            }
        };

        match contents.trim().parse::<i32>() {
            // 0 and negatives would address process groups, never do that.
            Ok(pid) if pid > 0 => Some(pid),
            Ok(pid) => {
                tracing::warn!(pid, path = %self.path.display(), "refusing non-positive pid");
                None
            }
            Err(e) => {
                tracing::debug!(
                    path = %self.path.display(),
                    contents = contents.trim(),
                    error = %e,
                    "unparsable pid file"
                );
                None
            }
        }
    }
}

/// Sends SIGTERM to the pid recorded in a [`PidFile`].
#[derive(Debug, Clone)]
pub struct SignalTerminator {
    pid_file: PidFile,
}

impl SignalTerminator {
    pub fn new(pid_file: PidFile) -> Self {
        Self { pid_file }
    }
}

impl Terminator for SignalTerminator {
    fn request_stop(&self) -> StopOutcome {
        let Some(pid) = self.pid_file.read_pid() else {
            return StopOutcome::NoPid;
        };

        tracing::debug!(pid, "found running unattended-upgrades, sending SIGTERM");
        match kill(Pid::from_raw(pid), Signal::SIGTERM) {
            Ok(()) => StopOutcome::Signalled(pid),
            Err(errno) => {
                tracing::debug!(pid, error = %errno, "error sending SIGTERM");
                StopOutcome::SignalFailed(pid)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;
    use tempfile::tempdir;

    #[test]
    fn test_missing_pid_file_is_silent_noop() {
        let dir = tempdir().unwrap();
        let pid_file = PidFile::new(dir.path().join("uu.pid"));
        assert_eq!(pid_file.read_pid(), None);

        let terminator = SignalTerminator::new(pid_file);
        assert_eq!(terminator.request_stop(), StopOutcome::NoPid);
    }

    #[test]
    fn test_read_pid_trims_whitespace() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("uu.pid");
        std::fs::write(&path, "  4242\n").unwrap();
        assert_eq!(PidFile::new(&path).read_pid(), Some(4242));
    }

    #[test]
    fn test_garbage_pid_is_invalid() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("uu.pid");
        std::fs::write(&path, "not-a-pid").unwrap();

        let pid_file = PidFile::new(&path);
        assert_eq!(pid_file.read_pid(), None);
        assert_eq!(
            SignalTerminator::new(pid_file).request_stop(),
            StopOutcome::NoPid
        );
    }

    #[test]
    fn test_non_positive_pid_is_refused() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("uu.pid");
        for contents in ["0", "-1", "-4242"] {
            std::fs::write(&path, contents).unwrap();
            assert_eq!(
                SignalTerminator::new(PidFile::new(&path)).request_stop(),
                StopOutcome::NoPid,
                "contents {contents}"
            );
        }
    }

    #[test]
    fn test_sigterm_reaches_running_process() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("uu.pid");
        let mut child = std::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .unwrap();
        let pid = child.id() as i32;
        std::fs::write(&path, pid.to_string()).unwrap();

        let outcome = SignalTerminator::new(PidFile::new(&path)).request_stop();
        assert_eq!(outcome, StopOutcome::Signalled(pid));

        let status = child.wait().unwrap();
        assert_eq!(status.signal(), Some(Signal::SIGTERM as i32));
    }

    #[test]
    fn test_signal_to_nonexistent_pid_is_not_fatal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("uu.pid");
        // Far above any kernel pid_max.
        std::fs::write(&path, "2147483646").unwrap();

        let outcome = SignalTerminator::new(PidFile::new(&path)).request_stop();
        assert_eq!(outcome, StopOutcome::SignalFailed(2147483646));
    }
}
