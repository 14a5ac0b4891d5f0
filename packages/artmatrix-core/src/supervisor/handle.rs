use std::fmt;
use std::path::PathBuf;

/// Lifecycle state of the supervised display server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Spawned, not yet accepting frames.
    Starting,
    /// Readiness probe succeeded.
    Ready,
    /// Being monitored for unexpected exit.
    Running,
    /// Exited abnormally; a restart may follow.
    Crashed,
    /// Terminated on request, or exited cleanly.
    Stopped,
}

impl ServerState {
    /// Whether frames sent now have a receiver.
    #[must_use]
    pub fn accepts_frames(self) -> bool {
        matches!(self, Self::Ready | Self::Running)
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Crashed => "crashed",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Snapshot of the supervised child process.
///
/// Only the supervisor mutates it; everyone else receives copies through a
/// `watch` channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayServerHandle {
    /// OS process id of the current child, if one is alive.
    pub pid: Option<u32>,
    /// Resolved display server binary.
    pub executable_path: PathBuf,
    /// Arguments passed to the binary (excluding any privilege wrapper).
    pub arguments: Vec<String>,
    pub state: ServerState,
    /// Restarts performed since the orchestrator started.
    pub restart_count: u32,
}

impl DisplayServerHandle {
    #[must_use]
    pub fn new(executable_path: PathBuf, arguments: Vec<String>) -> Self {
        Self {
            pid: None,
            executable_path,
            arguments,
            state: ServerState::Stopped,
            restart_count: 0,
        }
    }
}
