//! Display server process supervision.
//!
//! - [`locate`]: find the `ft-server` binary
//! - [`backend`]: build its command line
//! - [`process`]: spawn and signal it
//! - [`Supervisor`]: readiness, crash restarts, and termination

pub mod backend;
mod error;
#[cfg(test)]
pub(crate) mod fake;
mod handle;
pub mod locate;
pub mod process;
mod readiness;
mod runner;

pub use backend::{BackendMode, HardwareOptions, ServerArgs};
pub use error::{SupervisorError, SupervisorResult};
pub use handle::{DisplayServerHandle, ServerState};
pub use locate::{resolve_executable, ExecutableSearch};
pub use process::{
    ChildExit, ChildProcess, LaunchSpec, OutputMode, ProcessLauncher, TokioProcessLauncher,
};
pub use readiness::{poll_until_ready, ReadinessConfig};
pub use runner::{RestartPolicy, Supervisor, SupervisorExit};

#[cfg(test)]
pub(crate) use readiness::test_support::RefusingUntil;
