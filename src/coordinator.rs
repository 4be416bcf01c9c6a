/// Shutdown coordinator: optionally lets a shutdown-mode upgrade run to
/// completion, then waits (bounded) for the upgrade lock to become free,
/// stopping the upgrade when it must not finish.
///
/// The wait is a plain poll loop with a fixed interval. The only suspension
/// points are the sleeps between polls.
use crate::config::RunConfig;
use crate::launcher::{LaunchError, Launcher, ProcessStatus, UpgradeProcess};
use crate::lock::{LockError, LockProbe, LockState};
use crate::notify::{self, Notify};
use crate::terminator::Terminator;
use std::time::Duration;
use tokio::time::Instant;
use tracing::Level;

/// How a coordinator run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The lock was free from the start; nothing was reported.
    NothingToDo,
    /// The lock was held at some point and every upgrade finished.
    AllInstalled,
    /// The lock was held and the upgrade was asked to stop.
    Stopped,
    /// The lock never became free before the deadline.
    DeadlineExceeded,
}

impl Outcome {
    pub fn exit_code(self) -> u8 {
        match self {
            Outcome::NothingToDo | Outcome::AllInstalled | Outcome::Stopped => 0,
            Outcome::DeadlineExceeded => 1,
        }
    }
}

/// Failures that abort the coordinator.
#[derive(Debug)]
pub enum CoordinatorError {
    Lock(LockError),
    Launch(LaunchError),
}

impl std::fmt::Display for CoordinatorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoordinatorError::Lock(e) => write!(f, "lock probe failed: {e}"),
            CoordinatorError::Launch(e) => write!(f, "cannot run unattended-upgrades: {e}"),
        }
    }
}

impl std::error::Error for CoordinatorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CoordinatorError::Lock(e) => Some(e),
            CoordinatorError::Launch(e) => Some(e),
        }
    }
}

impl From<LockError> for CoordinatorError {
    fn from(e: LockError) -> Self {
        CoordinatorError::Lock(e)
    }
}

impl From<LaunchError> for CoordinatorError {
    fn from(e: LaunchError) -> Self {
        CoordinatorError::Launch(e)
    }
}

/// Mutable state of the main poll loop.
#[derive(Debug)]
struct PollState {
    start: Instant,
    lock_was_ever_held: bool,
    termination_signaled: bool,
}

impl PollState {
    fn new() -> Self {
        Self {
            start: Instant::now(),
            lock_was_ever_held: false,
            termination_signaled: false,
        }
    }
}

pub struct Coordinator<'a, P, L, T, N> {
    config: &'a RunConfig,
    shutdown_mode: bool,
    poll_interval: Duration,
    probe: P,
    launcher: L,
    terminator: T,
    notifier: N,
}

impl<'a, P, L, T, N> Coordinator<'a, P, L, T, N>
where
    P: LockProbe,
    L: Launcher,
    T: Terminator,
    N: Notify,
{
    pub fn new(
        config: &'a RunConfig,
        install_on_shutdown: bool,
        poll_interval: Duration,
        probe: P,
        launcher: L,
        terminator: T,
        notifier: N,
    ) -> Self {
        Self {
            config,
            shutdown_mode: config.shutdown_mode(install_on_shutdown),
            poll_interval,
            probe,
            launcher,
            terminator,
            notifier,
        }
    }

    pub fn shutdown_mode(&self) -> bool {
        self.shutdown_mode
    }

    fn deadline(&self) -> Duration {
        Duration::from_secs(self.config.delay_minutes.saturating_mul(60))
    }

    /// Run the whole shutdown sequence once.
    pub async fn run(&self) -> Result<Outcome, CoordinatorError> {
        if self.shutdown_mode {
            self.install_on_shutdown().await?;
        }

        let mut state = PollState::new();
        loop {
            match self.probe.probe()? {
                LockState::Acquired => {
                    tracing::debug!("lock not taken");
                    break;
                }
                LockState::Held => {
                    state.lock_was_ever_held = true;
                    if !self.shutdown_mode {
                        self.request_stop(&mut state);
                    }
                }
            }

            self.notifier.notify_progress();
            tokio::time::sleep(self.poll_interval).await;

            if state.start.elapsed() > self.deadline() {
                if self.shutdown_mode {
                    self.request_stop(&mut state);
                }
                tracing::warn!(
                    delay_minutes = self.config.delay_minutes,
                    "Giving up on lockfile after {} minutes delay",
                    self.config.delay_minutes
                );
                return Ok(Outcome::DeadlineExceeded);
            }
        }

        Ok(self.report(&state))
    }

    /// Launch the upgrade in shutdown mode and wait for it, without a
    /// deadline, so an install is never cut off halfway by this phase.
    async fn install_on_shutdown(&self) -> Result<(), CoordinatorError> {
        let mut process = self.launcher.launch(true)?;
        self.notifier.notify(notify::SHUTDOWN_MODE_MESSAGE, Level::WARN);

        loop {
            if let ProcessStatus::Exited(code) = process.poll() {
                tracing::debug!(exit_code = ?code, "shutdown-mode upgrade finished");
                return Ok(());
            }
            self.notifier.notify_progress();
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    fn request_stop(&self, state: &mut PollState) {
        let outcome = self.terminator.request_stop();
        tracing::debug!(?outcome, "stop requested");
        state.termination_signaled = true;
    }

    fn report(&self, state: &PollState) -> Outcome {
        if !state.lock_was_ever_held {
            return Outcome::NothingToDo;
        }
        if state.termination_signaled {
            self.notifier.notify(notify::STOPPED_MESSAGE, Level::INFO);
            Outcome::Stopped
        } else {
            self.notifier.notify(notify::ALL_INSTALLED_MESSAGE, Level::INFO);
            Outcome::AllInstalled
        }
    }
}
