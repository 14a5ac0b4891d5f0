use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use super::process::ChildExit;

/// Errors from locating, launching, and watching the display server.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// No usable binary in any candidate location.
    #[error("could not find an executable {binary}; searched: {}", join_paths(.searched))]
    ExecutableNotFound {
        binary: String,
        searched: Vec<PathBuf>,
    },

    /// The OS refused to start the process.
    #[error("failed to launch {}: {source}", .program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The display server never answered the readiness probe.
    #[error(
        "display server not ready after {}ms ({attempts} probes, last error: {})",
        .waited.as_millis(),
        .last_error.as_deref().unwrap_or("none")
    )]
    ReadinessTimeout {
        waited: Duration,
        attempts: u32,
        last_error: Option<String>,
    },

    /// The child died before it became ready.
    #[error("display server exited during startup ({status})")]
    ExitedDuringStartup { status: ChildExit },

    /// Crashed more often than the restart policy allows.
    #[error("display server crashed {crashes} times (restart limit {limit}); last exit: {last_exit}")]
    ChildCrash {
        crashes: u32,
        limit: u32,
        last_exit: ChildExit,
    },

    /// Waiting on the child failed at the OS level.
    #[error("failed to wait on display server: {0}")]
    Wait(#[source] io::Error),

    /// An operation that needs a live child found none.
    #[error("display server is not running")]
    NotRunning,

    /// Shutdown was requested while an operation was pending.
    #[error("cancelled")]
    Cancelled,
}

/// Result alias for supervisor operations.
pub type SupervisorResult<T> = Result<T, SupervisorError>;

fn join_paths(paths: &[PathBuf]) -> String {
    if paths.is_empty() {
        return "(nothing)".to_string();
    }
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
