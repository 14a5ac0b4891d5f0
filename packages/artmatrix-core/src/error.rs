//! Centralized error types for the artmatrix core library.
//!
//! Each component defines its own `thiserror` enum next to the code that
//! fails. This module gathers them into [`ArtMatrixError`], gives every
//! variant a stable machine-readable code, and maps fatal errors to process
//! exit codes.

use thiserror::Error;

use crate::artwork::TranscodeError;
use crate::bus::BusError;
use crate::display::TransportError;
use crate::supervisor::SupervisorError;

/// Trait for error types that provide machine-readable error codes.
///
/// Codes are stable and safe to match on in scripts and log queries.
pub trait ErrorCode {
    /// Returns a machine-readable error code.
    fn code(&self) -> &'static str;
}

impl ErrorCode for TranscodeError {
    fn code(&self) -> &'static str {
        match self {
            Self::UnrecognizedFormat => "unrecognized_image_format",
            Self::Decode { .. } | Self::Io(_) => "image_decode_failed",
            Self::Dimension { .. } => "invalid_dimensions",
            Self::Frame(_) => "frame_size_mismatch",
        }
    }
}

impl ErrorCode for TransportError {
    fn code(&self) -> &'static str {
        match self {
            Self::Resolve { .. } | Self::NoAddress(_) => "display_resolve_failed",
            Self::Refused { .. } => "display_refused",
            Self::Timeout { .. } => "display_timeout",
            Self::Connect { .. } => "display_connect_failed",
            Self::Send { .. } | Self::ShortWrite { .. } => "display_send_failed",
            Self::FrameTooLarge { .. } => "frame_too_large",
        }
    }
}

impl ErrorCode for SupervisorError {
    fn code(&self) -> &'static str {
        match self {
            Self::ExecutableNotFound { .. } => "executable_not_found",
            Self::Spawn { .. } => "spawn_failed",
            Self::ReadinessTimeout { .. } => "readiness_timeout",
            Self::ExitedDuringStartup { .. } => "exited_during_startup",
            Self::ChildCrash { .. } => "restart_limit_exceeded",
            Self::Wait(_) => "wait_failed",
            Self::NotRunning => "not_running",
            Self::Cancelled => "cancelled",
        }
    }
}

impl ErrorCode for BusError {
    fn code(&self) -> &'static str {
        match self {
            Self::ConnectionRefused { .. } => "bus_connection_refused",
            Self::Tls { .. } => "bus_tls_config",
        }
    }
}

/// Application-wide error type.
#[derive(Debug, Error)]
pub enum ArtMatrixError {
    /// Cover art could not be turned into a frame.
    #[error(transparent)]
    Transcode(#[from] TranscodeError),

    /// The display server connection failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Locating, starting, or keeping the display server alive failed.
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    /// The message bus refused us for good.
    #[error(transparent)]
    Bus(#[from] BusError),

    /// Invalid or inconsistent configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A background task failed unexpectedly.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ArtMatrixError {
    /// Returns a machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Transcode(e) => e.code(),
            Self::Transport(e) => e.code(),
            Self::Supervisor(e) => e.code(),
            Self::Bus(e) => e.code(),
            Self::Configuration(_) => "configuration_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Process exit status for this error.
    ///
    /// | code | meaning |
    /// |------|---------|
    /// | 1 | configuration or other error |
    /// | 2 | display server executable not found |
    /// | 3 | display server failed to become ready |
    /// | 4 | display server exceeded its restart limit |
    /// | 5 | message bus refused the connection |
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Supervisor(SupervisorError::ExecutableNotFound { .. }) => 2,
            Self::Supervisor(
                SupervisorError::ReadinessTimeout { .. }
                | SupervisorError::ExitedDuringStartup { .. },
            ) => 3,
            Self::Supervisor(SupervisorError::ChildCrash { .. }) => 4,
            Self::Bus(BusError::ConnectionRefused { .. }) => 5,
            _ => 1,
        }
    }
}

/// Convenient Result alias for application-wide operations.
pub type ArtMatrixResult<T> = Result<T, ArtMatrixError>;
