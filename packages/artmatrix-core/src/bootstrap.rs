//! Application bootstrap and dependency wiring.
//!
//! This module contains the composition root - the single place where the
//! production implementations of every seam are chosen and handed to the
//! [`Orchestrator`]. Tests build [`OrchestratorState`] directly with fakes.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::display::EndpointProbe;
use crate::error::{ArtMatrixError, ArtMatrixResult};
use crate::events::{EventEmitter, LoggingEventEmitter};
use crate::lifecycle::{Lifecycle, ShutdownLifecycle};
use crate::services::Orchestrator;
use crate::state::{Config, OrchestratorState};
use crate::supervisor::{resolve_executable, TokioProcessLauncher};

/// Container for the bootstrapped orchestrator and its shutdown handle.
pub struct BootstrappedServices {
    /// Ready to run.
    pub orchestrator: Orchestrator,
    /// Request shutdown from signal handlers.
    pub lifecycle: Arc<ShutdownLifecycle>,
}

impl BootstrappedServices {
    /// Initiates graceful shutdown. Safe to call more than once.
    pub fn shutdown(&self, reason: &str) {
        self.lifecycle.request_shutdown(reason);
    }
}

/// Validates `config`, resolves the display server binary, and wires the
/// production seams.
///
/// # Errors
///
/// Invalid configuration, or no display server executable found.
pub fn bootstrap_services(config: Config) -> ArtMatrixResult<BootstrappedServices> {
    config.validate().map_err(ArtMatrixError::Configuration)?;

    let executable = resolve_executable(&config.server.search())?;

    let lifecycle = Arc::new(ShutdownLifecycle::new(CancellationToken::new()));
    let emitter: Arc<dyn EventEmitter> = Arc::new(LoggingEventEmitter);

    log::info!(
        "[Bootstrap] Display {}x{} at {}, broker {}",
        config.display.width,
        config.display.height,
        config.display.endpoint(),
        config.bus.broker()
    );

    let state = OrchestratorState {
        probe: Arc::new(EndpointProbe::new(config.display.endpoint())),
        connector: Arc::new(config.display.connector()),
        launcher: Arc::new(TokioProcessLauncher),
        lifecycle: Arc::clone(&lifecycle) as Arc<dyn Lifecycle>,
        emitter,
        executable,
        config,
    };

    Ok(BootstrappedServices {
        orchestrator: Orchestrator::new(state),
        lifecycle,
    })
}
