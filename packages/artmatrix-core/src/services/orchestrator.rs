//! Top-level run loop.
//!
//! Startup order: launch the display server, wait for readiness, connect
//! the transport, then start the frame sender and the bus subscriber.
//! Whichever of shutdown, a supervisor failure, or a fatal bus error comes
//! first cancels everything else; the display server is always terminated
//! before [`Orchestrator::run`] returns.

use std::time::Duration;

use tokio::task::JoinHandle;

use crate::bus::{BusResult, MqttSubscriber};
use crate::error::{ArtMatrixError, ArtMatrixResult};
use crate::protocol_constants::TASK_JOIN_TIMEOUT_MS;
use crate::state::OrchestratorState;
use crate::supervisor::{Supervisor, SupervisorError, SupervisorExit, SupervisorResult};

use super::frame_dispatcher::frame_pipeline;

/// Owns one run of the bridge.
pub struct Orchestrator {
    state: OrchestratorState,
}

impl Orchestrator {
    #[must_use]
    pub fn new(state: OrchestratorState) -> Self {
        Self { state }
    }

    #[must_use]
    pub fn state(&self) -> &OrchestratorState {
        &self.state
    }

    /// Runs until shutdown is requested or something fatal happens.
    ///
    /// # Errors
    ///
    /// Startup failures (readiness, transport), a display server that keeps
    /// crashing, or a broker that refuses the connection.
    pub async fn run(self) -> ArtMatrixResult<()> {
        let state = self.state;
        let config = &state.config;
        let lifecycle = state.lifecycle.clone();
        let cancel = lifecycle.token();

        let mut supervisor = Supervisor::new(
            state.launcher.clone(),
            state.probe.clone(),
            state.emitter.clone(),
            state.launch_spec(),
            config.server.readiness,
            config.server.restart,
            config.server.terminate_grace,
        );

        match supervisor.start(&cancel).await {
            Ok(()) => {}
            Err(SupervisorError::Cancelled) => {
                supervisor.terminate().await;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }

        let sink = match state.connector.connect().await {
            Ok(sink) => sink,
            Err(e) => {
                log::error!("[Orchestrator] Cannot reach display server: {}", e);
                supervisor.terminate().await;
                return Err(e.into());
            }
        };

        let subscriber = MqttSubscriber::new(config.bus.clone(), state.emitter.clone());
        let (dispatcher, sender) = frame_pipeline(
            subscriber.topics().clone(),
            &config.display,
            sink,
            supervisor.subscribe(),
            state.emitter.clone(),
        );

        let mut sender_task = tokio::spawn(sender.run(cancel.clone()));
        let mut supervisor_task: JoinHandle<SupervisorResult<SupervisorExit>> =
            tokio::spawn(supervisor.run(cancel.clone()));
        let subscriber_cancel = cancel.clone();
        let mut subscriber_task: JoinHandle<BusResult<()>> = tokio::spawn(async move {
            subscriber
                .run(&subscriber_cancel, move |event| {
                    dispatcher.dispatch(event);
                })
                .await
        });

        log::info!("[Orchestrator] Running");

        let mut supervisor_done = false;
        let mut subscriber_done = false;
        let outcome: ArtMatrixResult<()> = tokio::select! {
            _ = cancel.cancelled() => Ok(()),
            joined = &mut supervisor_task => {
                supervisor_done = true;
                match flatten(joined) {
                    Ok(SupervisorExit::Stopped(exit)) => {
                        lifecycle.request_shutdown(&format!("display server stopped ({exit})"));
                        Ok(())
                    }
                    Ok(SupervisorExit::Shutdown) => Ok(()),
                    Err(e) => {
                        lifecycle.request_shutdown("display server failed");
                        Err(e)
                    }
                }
            }
            joined = &mut subscriber_task => {
                subscriber_done = true;
                let result = flatten(joined);
                lifecycle.request_shutdown("message bus subscriber stopped");
                result
            }
        };

        // Everything below runs with the token cancelled.
        let join_timeout = Duration::from_millis(TASK_JOIN_TIMEOUT_MS);
        if !subscriber_done {
            await_task("subscriber", &mut subscriber_task, join_timeout).await;
        }
        if !supervisor_done {
            // Allow the SIGTERM grace period on top of the usual budget.
            let budget = join_timeout + config.server.terminate_grace;
            if let Some(Err(e)) = await_task("supervisor", &mut supervisor_task, budget).await {
                log::warn!("[Orchestrator] Supervisor reported during shutdown: {}", e);
            }
        }
        await_task("frame sender", &mut sender_task, join_timeout).await;

        match &outcome {
            Ok(()) => log::info!("[Orchestrator] Stopped"),
            Err(e) => log::error!("[Orchestrator] Stopped with error [{}]: {}", e.code(), e),
        }
        outcome
    }
}

/// Collapses a task's join error into the task's own error type.
fn flatten<T, E>(joined: Result<Result<T, E>, tokio::task::JoinError>) -> ArtMatrixResult<T>
where
    E: Into<ArtMatrixError>,
{
    match joined {
        Ok(result) => result.map_err(Into::into),
        Err(e) => Err(ArtMatrixError::Internal(format!("task failed: {e}"))),
    }
}

/// Joins a task with a bound, aborting it if the bound expires.
async fn await_task<T>(name: &str, task: &mut JoinHandle<T>, limit: Duration) -> Option<T> {
    match tokio::time::timeout(limit, &mut *task).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            log::warn!("[Orchestrator] {} task failed: {}", name, e);
            None
        }
        Err(_) => {
            log::warn!(
                "[Orchestrator] {} did not stop within {}ms, aborting",
                name,
                limit.as_millis()
            );
            task.abort();
            None
        }
    }
}
