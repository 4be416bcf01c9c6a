/// Upgrade process lifecycle: spawn unattended-upgrade (optionally in
/// shutdown-install mode) and poll it for liveness without blocking.
use crate::config::UpgradeConfig;
use std::process::Stdio;
use tokio::process::{Child, Command};

/// Liveness of the launched upgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Running,
    /// Exit code, `None` if killed by a signal or the status was lost.
    Exited(Option<i32>),
}

/// Handle to a launched upgrade process.
pub trait UpgradeProcess {
    /// Non-blocking liveness check.
    fn poll(&mut self) -> ProcessStatus;
}

/// Starts the upgrade process.
pub trait Launcher {
    type Process: UpgradeProcess;

    fn launch(&self, shutdown_mode: bool) -> Result<Self::Process, LaunchError>;
}

/// Failure to start the upgrade process.
#[derive(Debug)]
pub enum LaunchError {
    Spawn {
        command: String,
        source: std::io::Error,
    },
}

impl std::fmt::Display for LaunchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LaunchError::Spawn { command, source } => {
                write!(f, "failed to spawn {command}: {source}")
            }
        }
    }
}

impl std::error::Error for LaunchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LaunchError::Spawn { source, .. } => Some(source),
        }
    }
}

/// Launches the configured unattended-upgrade command.
#[derive(Debug, Clone)]
pub struct UpgradeLauncher {
    command: String,
    args: Vec<String>,
    shutdown_env: String,
}

impl UpgradeLauncher {
    pub fn new(config: &UpgradeConfig) -> Self {
        Self {
            command: config.command.clone(),
            args: config.args.clone(),
            shutdown_env: config.shutdown_env.clone(),
        }
    }
}

impl Launcher for UpgradeLauncher {
    type Process = UpgradeChild;

    /// Spawn with the inherited environment, plus `shutdown_env=1` in
    /// shutdown mode. Stdio is inherited so the upgrade can still talk to
    /// the console.
    fn launch(&self, shutdown_mode: bool) -> Result<UpgradeChild, LaunchError> {
        let mut command = Command::new(&self.command);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        if shutdown_mode {
            command.env(&self.shutdown_env, "1");
        }

        tracing::debug!(
            command = %self.command,
            args = ?self.args,
            shutdown_mode,
            "starting unattended-upgrades"
        );
        let child = command.spawn().map_err(|e| LaunchError::Spawn {
            command: self.command.clone(),
            source: e,
        })?;

        let pid = child.id().unwrap_or(0);
        tracing::debug!(pid, "unattended-upgrades started");
        Ok(UpgradeChild { child, pid })
    }
}

/// A spawned upgrade process. Owned exclusively by the coordinator.
#[derive(Debug)]
pub struct UpgradeChild {
    child: Child,
    pid: u32,
}

impl UpgradeProcess for UpgradeChild {
    fn poll(&mut self) -> ProcessStatus {
        match self.child.try_wait() {
            Ok(None) => ProcessStatus::Running,
            Ok(Some(status)) => {
                tracing::info!(pid = self.pid, exit_code = ?status.code(), "unattended-upgrades exited");
                ProcessStatus::Exited(status.code())
            }
            Err(e) => {
                // Treat as gone; polling a lost child again would spin forever.
                tracing::warn!(pid = self.pid, error = %e, "failed to poll unattended-upgrades");
                ProcessStatus::Exited(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const FLAG: &str = "UU_SHUTDOWN_LAUNCHER_TEST_FLAG";

    fn launcher(command: &str, args: &[&str]) -> UpgradeLauncher {
        UpgradeLauncher::new(&UpgradeConfig {
            command: command.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            shutdown_env: FLAG.to_string(),
        })
    }

    async fn wait_for_exit(process: &mut UpgradeChild) -> Option<i32> {
        for _ in 0..500 {
            if let ProcessStatus::Exited(code) = process.poll() {
                return code;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("process did not exit in time");
    }

    #[tokio::test]
    async fn test_shutdown_mode_sets_environment_flag() {
        let launcher = launcher("sh", &["-c", &format!("exit ${{{FLAG}:-7}}")]);
        let mut process = launcher.launch(true).unwrap();
        assert_eq!(wait_for_exit(&mut process).await, Some(1));
    }

    #[tokio::test]
    async fn test_normal_mode_leaves_environment_alone() {
        let launcher = launcher("sh", &["-c", &format!("exit ${{{FLAG}:-7}}")]);
        let mut process = launcher.launch(false).unwrap();
        assert_eq!(wait_for_exit(&mut process).await, Some(7));
    }

    #[tokio::test]
    async fn test_poll_reports_running_then_exited() {
        let launcher = launcher("sleep", &["0.3"]);
        let mut process = launcher.launch(true).unwrap();
        assert_eq!(process.poll(), ProcessStatus::Running);
        assert_eq!(wait_for_exit(&mut process).await, Some(0));
        // Further polls keep reporting the exit.
        assert_eq!(process.poll(), ProcessStatus::Exited(Some(0)));
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let launcher = launcher("nonexistent-binary-xyz", &[]);
        let err = launcher.launch(true).unwrap_err();
        assert!(matches!(err, LaunchError::Spawn { .. }));
        assert!(err.to_string().contains("failed to spawn nonexistent-binary-xyz"));
    }
}
