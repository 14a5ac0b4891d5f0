use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::display::ReadinessProbe;
use crate::events::{EventEmitter, SupervisorEvent};
use crate::protocol_constants::{DEFAULT_MAX_RESTARTS, RESTART_DELAY_MS};
use crate::retry::sleep_or_cancel;
use crate::utils::now_millis;

use super::error::{SupervisorError, SupervisorResult};
use super::handle::{DisplayServerHandle, ServerState};
use super::process::{ChildExit, ChildProcess, LaunchSpec, ProcessLauncher};
use super::readiness::{poll_until_ready, ReadinessConfig};

/// How crashes are handled while the display server is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    /// Restarts allowed before a crash becomes fatal.
    pub max_restarts: u32,
    /// Pause between a crash and the relaunch.
    pub delay: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_restarts: DEFAULT_MAX_RESTARTS,
            delay: Duration::from_millis(RESTART_DELAY_MS),
        }
    }
}

/// How monitoring ended, when it ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorExit {
    /// Shutdown was requested.
    Shutdown,
    /// The display server exited on its own with status 0.
    Stopped(ChildExit),
}

/// Owns the display server child process.
///
/// The supervisor is the only writer of [`DisplayServerHandle`]; observers
/// follow it through [`subscribe`](Self::subscribe).
pub struct Supervisor {
    launcher: Arc<dyn ProcessLauncher>,
    probe: Arc<dyn ReadinessProbe>,
    emitter: Arc<dyn EventEmitter>,
    spec: LaunchSpec,
    readiness: ReadinessConfig,
    policy: RestartPolicy,
    grace: Duration,
    child: Option<Box<dyn ChildProcess>>,
    handle: watch::Sender<DisplayServerHandle>,
}

impl Supervisor {
    pub fn new(
        launcher: Arc<dyn ProcessLauncher>,
        probe: Arc<dyn ReadinessProbe>,
        emitter: Arc<dyn EventEmitter>,
        spec: LaunchSpec,
        readiness: ReadinessConfig,
        policy: RestartPolicy,
        grace: Duration,
    ) -> Self {
        let (handle, _) = watch::channel(DisplayServerHandle::new(
            spec.program.clone(),
            spec.args.clone(),
        ));
        Self {
            launcher,
            probe,
            emitter,
            spec,
            readiness,
            policy,
            grace,
            child: None,
            handle,
        }
    }

    /// Follows state changes of the display server.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<DisplayServerHandle> {
        self.handle.subscribe()
    }

    /// Current snapshot.
    #[must_use]
    pub fn handle(&self) -> DisplayServerHandle {
        self.handle.borrow().clone()
    }

    fn set_state(&self, state: ServerState) {
        let pid = self.child.as_ref().and_then(|c| c.id());
        self.handle.send_modify(|h| {
            h.state = state;
            h.pid = pid;
        });
        self.emitter.emit_supervisor(SupervisorEvent::StateChanged {
            state,
            pid,
            timestamp: now_millis(),
        });
    }

    /// Spawns the display server. State becomes `Starting`.
    pub fn launch(&mut self) -> SupervisorResult<()> {
        let child = self
            .launcher
            .launch(&self.spec)
            .map_err(|source| SupervisorError::Spawn {
                program: self.spec.program.clone(),
                source,
            })?;
        self.child = Some(child);
        self.set_state(ServerState::Starting);
        Ok(())
    }

    /// Polls readiness while watching for an early exit. State becomes
    /// `Ready` on success.
    pub async fn await_ready(&mut self, cancel: &CancellationToken) -> SupervisorResult<()> {
        let Some(child) = self.child.as_mut() else {
            return Err(SupervisorError::NotRunning);
        };

        let outcome = tokio::select! {
            ready = poll_until_ready(self.probe.as_ref(), &self.readiness, cancel) => {
                ready.map(|_| ())
            }
            exit = child.wait() => {
                let status = exit.map_err(SupervisorError::Wait)?;
                Err(SupervisorError::ExitedDuringStartup { status })
            }
        };

        match outcome {
            Ok(()) => {
                self.set_state(ServerState::Ready);
                Ok(())
            }
            Err(SupervisorError::ExitedDuringStartup { status }) => {
                log::error!("[Supervisor] Display server exited during startup ({})", status);
                self.child = None;
                self.set_state(ServerState::Crashed);
                Err(SupervisorError::ExitedDuringStartup { status })
            }
            Err(e) => Err(e),
        }
    }

    /// Launches and waits for readiness. A child that never becomes ready is
    /// terminated before the error is returned.
    pub async fn start(&mut self, cancel: &CancellationToken) -> SupervisorResult<()> {
        self.launch()?;
        if let Err(e) = self.await_ready(cancel).await {
            self.terminate().await;
            return Err(e);
        }
        Ok(())
    }

    /// Watches the running child, restarting it after crashes.
    ///
    /// Returns when shutdown is requested or the child exits cleanly, and
    /// fails once crashes exceed the restart policy.
    pub async fn monitor(
        &mut self,
        cancel: &CancellationToken,
    ) -> SupervisorResult<SupervisorExit> {
        loop {
            let Some(child) = self.child.as_mut() else {
                return Err(SupervisorError::NotRunning);
            };

            let exit = tokio::select! {
                _ = cancel.cancelled() => return Ok(SupervisorExit::Shutdown),
                exit = child.wait() => exit.map_err(SupervisorError::Wait)?,
            };
            self.child = None;

            if exit.success() {
                log::warn!("[Supervisor] Display server stopped ({})", exit);
                self.set_state(ServerState::Stopped);
                return Ok(SupervisorExit::Stopped(exit));
            }

            log::error!("[Supervisor] Display server crashed ({})", exit);
            self.set_state(ServerState::Crashed);

            if !self.restart(exit, cancel).await? {
                return Ok(SupervisorExit::Shutdown);
            }
            self.set_state(ServerState::Running);
        }
    }

    /// Relaunches after a crash until a child becomes ready.
    ///
    /// Returns `Ok(false)` if cancelled while restarting.
    async fn restart(
        &mut self,
        mut last_exit: ChildExit,
        cancel: &CancellationToken,
    ) -> SupervisorResult<bool> {
        loop {
            let restarts = self.handle.borrow().restart_count;
            if restarts >= self.policy.max_restarts {
                log::error!(
                    "[Supervisor] Giving up after {} restarts (last exit: {})",
                    restarts,
                    last_exit
                );
                return Err(SupervisorError::ChildCrash {
                    crashes: restarts + 1,
                    limit: self.policy.max_restarts,
                    last_exit,
                });
            }

            let attempt = restarts + 1;
            self.handle.send_modify(|h| h.restart_count = attempt);
            self.emitter.emit_supervisor(SupervisorEvent::Restarting {
                attempt,
                delay_ms: self.policy.delay.as_millis() as u64,
                timestamp: now_millis(),
            });
            log::info!(
                "[Supervisor] Restarting display server in {}ms (attempt {}/{})",
                self.policy.delay.as_millis(),
                attempt,
                self.policy.max_restarts
            );

            if !sleep_or_cancel(self.policy.delay, cancel).await {
                return Ok(false);
            }

            self.launch()?;
            match self.await_ready(cancel).await {
                Ok(()) => return Ok(true),
                Err(SupervisorError::Cancelled) => return Ok(false),
                Err(SupervisorError::ExitedDuringStartup { status }) => last_exit = status,
                Err(e @ SupervisorError::ReadinessTimeout { .. }) => {
                    log::error!(
                        "[Supervisor] Restarted display server never became ready: {}",
                        e
                    );
                    last_exit = self
                        .terminate_child()
                        .await
                        .unwrap_or(ChildExit { code: None, signal: None });
                    self.set_state(ServerState::Crashed);
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn terminate_child(&mut self) -> Option<ChildExit> {
        let mut child = self.child.take()?;
        match child.terminate(self.grace).await {
            Ok(exit) => {
                log::info!("[Supervisor] Display server terminated ({})", exit);
                Some(exit)
            }
            Err(e) => {
                log::warn!("[Supervisor] Failed to terminate display server: {}", e);
                None
            }
        }
    }

    /// Stops the child if one is running. State becomes `Stopped`.
    /// Safe to call repeatedly.
    pub async fn terminate(&mut self) -> Option<ChildExit> {
        let exit = self.terminate_child().await;
        if self.handle.borrow().state != ServerState::Stopped {
            self.set_state(ServerState::Stopped);
        }
        exit
    }

    /// Marks the child as running and monitors it until shutdown, a clean
    /// exit, or a fatal crash. The child is always terminated on return.
    pub async fn run(mut self, cancel: CancellationToken) -> SupervisorResult<SupervisorExit> {
        if self.child.is_some() {
            self.set_state(ServerState::Running);
        }
        let result = self.monitor(&cancel).await;
        self.terminate().await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RecordingEventEmitter;
    use crate::supervisor::fake::FakeLauncher;
    use crate::supervisor::process::OutputMode;
    use crate::supervisor::readiness::test_support::RefusingUntil;
    use std::path::PathBuf;

    const DELAY: Duration = Duration::from_millis(1_000);

    fn supervisor(launcher: &FakeLauncher, max_restarts: u32) -> (Supervisor, Arc<RecordingEventEmitter>) {
        let emitter = Arc::new(RecordingEventEmitter::default());
        let supervisor = Supervisor::new(
            Arc::new(launcher.clone()),
            Arc::new(RefusingUntil::after(Duration::ZERO)),
            emitter.clone(),
            LaunchSpec {
                program: PathBuf::from("/opt/ft-server"),
                args: vec!["-D32x32".to_string()],
                output: OutputMode::Discard,
                sudo: false,
            },
            ReadinessConfig::default(),
            RestartPolicy {
                max_restarts,
                delay: DELAY,
            },
            Duration::from_secs(3),
        );
        (supervisor, emitter)
    }

    /// Lets spawned tasks run without advancing the paused clock.
    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn start_reaches_ready_with_pid() {
        let launcher = FakeLauncher::default();
        let (mut supervisor, _) = supervisor(&launcher, 3);

        supervisor.start(&CancellationToken::new()).await.unwrap();

        let handle = supervisor.handle();
        assert_eq!(handle.state, ServerState::Ready);
        assert_eq!(handle.pid, Some(1000));
        assert_eq!(handle.arguments, vec!["-D32x32"]);
        assert_eq!(launcher.launch_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn launch_failure_is_a_spawn_error() {
        let launcher = FakeLauncher::failing();
        let (mut supervisor, _) = supervisor(&launcher, 3);

        let err = supervisor.start(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, SupervisorError::Spawn { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn early_exit_fails_startup() {
        let launcher = FakeLauncher::default();
        let emitter = Arc::new(RecordingEventEmitter::default());
        let mut supervisor = Supervisor::new(
            Arc::new(launcher.clone()),
            Arc::new(RefusingUntil::after(Duration::from_secs(60))),
            emitter,
            LaunchSpec {
                program: PathBuf::from("/opt/ft-server"),
                args: Vec::new(),
                output: OutputMode::Discard,
                sudo: false,
            },
            ReadinessConfig::default(),
            RestartPolicy::default(),
            Duration::from_secs(3),
        );

        let exiter = launcher.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            exiter.exit(0, ChildExit::from_code(1));
        });

        let err = supervisor.start(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(
            err,
            SupervisorError::ExitedDuringStartup { status } if status == ChildExit::from_code(1)
        ));
        assert_eq!(supervisor.handle().state, ServerState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn crash_while_running_restarts_exactly_once_after_delay() {
        let launcher = FakeLauncher::default();
        let (mut supervisor, emitter) = supervisor(&launcher, 3);
        let cancel = CancellationToken::new();
        supervisor.start(&cancel).await.unwrap();
        let mut states = supervisor.subscribe();

        let task = tokio::spawn(supervisor.run(cancel.clone()));
        settle().await;
        assert_eq!(states.borrow_and_update().state, ServerState::Running);

        let crashed_at = tokio::time::Instant::now();
        launcher.exit(0, ChildExit::from_signal(11));
        settle().await;
        assert_eq!(states.borrow_and_update().state, ServerState::Crashed);
        assert_eq!(launcher.launch_count(), 1);

        tokio::time::sleep(DELAY + Duration::from_millis(100)).await;
        assert_eq!(launcher.launch_count(), 2);
        assert_eq!(launcher.launch_times()[1] - crashed_at, DELAY);

        let handle = states.borrow_and_update().clone();
        assert_eq!(handle.state, ServerState::Running);
        assert_eq!(handle.restart_count, 1);
        assert_eq!(handle.pid, Some(1001));
        let specs = launcher.specs();
        assert_eq!(specs[1], specs[0]);
        assert_eq!(specs[1].args, vec!["-D32x32"]);

        // Nothing else happens while the new child stays up.
        tokio::time::sleep(DELAY * 5).await;
        assert_eq!(launcher.launch_count(), 2);

        cancel.cancel();
        assert_eq!(task.await.unwrap().unwrap(), SupervisorExit::Shutdown);
        assert!(launcher.was_terminated(1));
        assert_eq!(
            emitter
                .supervisor_events()
                .iter()
                .filter(|e| matches!(e, SupervisorEvent::Restarting { .. }))
                .count(),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn exceeding_restart_limit_is_fatal() {
        let launcher = FakeLauncher::default();
        let (mut supervisor, _) = supervisor(&launcher, 1);
        let cancel = CancellationToken::new();
        supervisor.start(&cancel).await.unwrap();

        let task = tokio::spawn(supervisor.run(cancel.clone()));
        settle().await;

        launcher.exit(0, ChildExit::from_code(1));
        tokio::time::sleep(DELAY + Duration::from_millis(100)).await;
        assert_eq!(launcher.launch_count(), 2);

        launcher.exit(1, ChildExit::from_code(2));
        let err = task.await.unwrap().unwrap_err();
        match err {
            SupervisorError::ChildCrash {
                crashes,
                limit,
                last_exit,
            } => {
                assert_eq!(crashes, 2);
                assert_eq!(limit, 1);
                assert_eq!(last_exit, ChildExit::from_code(2));
            }
            other => panic!("unexpected error: {other}"),
        }

        tokio::time::sleep(DELAY * 5).await;
        assert_eq!(launcher.launch_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn clean_exit_is_not_restarted() {
        let launcher = FakeLauncher::default();
        let (mut supervisor, _) = supervisor(&launcher, 3);
        let cancel = CancellationToken::new();
        supervisor.start(&cancel).await.unwrap();

        let task = tokio::spawn(supervisor.run(cancel.clone()));
        settle().await;
        launcher.exit(0, ChildExit::from_code(0));

        assert_eq!(
            task.await.unwrap().unwrap(),
            SupervisorExit::Stopped(ChildExit::from_code(0))
        );
        tokio::time::sleep(DELAY * 2).await;
        assert_eq!(launcher.launch_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_restart_delay_skips_relaunch() {
        let launcher = FakeLauncher::default();
        let (mut supervisor, _) = supervisor(&launcher, 3);
        let cancel = CancellationToken::new();
        supervisor.start(&cancel).await.unwrap();

        let task = tokio::spawn(supervisor.run(cancel.clone()));
        settle().await;
        launcher.exit(0, ChildExit::from_code(1));
        settle().await;
        cancel.cancel();

        assert_eq!(task.await.unwrap().unwrap(), SupervisorExit::Shutdown);
        assert_eq!(launcher.launch_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn terminate_is_idempotent() {
        let launcher = FakeLauncher::default();
        let (mut supervisor, _) = supervisor(&launcher, 3);
        supervisor.start(&CancellationToken::new()).await.unwrap();

        assert_eq!(supervisor.terminate().await, Some(ChildExit::from_signal(15)));
        assert_eq!(supervisor.terminate().await, None);
        assert!(launcher.was_terminated(0));
        assert_eq!(supervisor.handle().state, ServerState::Stopped);
        assert_eq!(supervisor.handle().pid, None);
    }
}
