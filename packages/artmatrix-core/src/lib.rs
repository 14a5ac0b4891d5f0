//! artmatrix core - shared library for the AirPlay cover art LED bridge.
//!
//! Listens to the metadata shairport-sync publishes over MQTT, turns cover
//! art into frames sized for an LED matrix, and streams them to a
//! flaschen-taschen `ft-server` that this crate also launches and keeps
//! alive.
//!
//! # Architecture
//!
//! - [`artwork`]: image bytes to fixed-size RGB frames
//! - [`volume`]: volume payload parsing and the volume bar overlay
//! - [`display`]: frames, wire format, UDP/TCP client, readiness probe
//! - [`bus`]: MQTT subscriber and event classification
//! - [`supervisor`]: locating, launching, and restarting `ft-server`
//! - [`services`]: frame pipeline and the top-level orchestrator
//! - [`bootstrap`]: composition root
//! - [`events`]: observable domain events
//! - [`error`]: centralized error types and exit codes
//!
//! # Abstraction Traits
//!
//! - [`ProcessLauncher`](supervisor::ProcessLauncher) / [`ChildProcess`](supervisor::ChildProcess): child processes
//! - [`ReadinessProbe`](display::ReadinessProbe): display server readiness
//! - [`FrameSink`](display::FrameSink): frame delivery
//! - [`EventEmitter`](events::EventEmitter): emitting domain events
//! - [`Lifecycle`](lifecycle::Lifecycle): requesting shutdown

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod artwork;
pub mod bootstrap;
pub mod bus;
pub mod display;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod protocol_constants;
pub mod retry;
pub mod services;
pub mod state;
pub mod supervisor;
pub mod utils;
pub mod volume;

// Re-export commonly used types at the crate root
pub use artwork::{transcode, FitMode, TranscodeError};
pub use bus::{BusConfig, BusError, MqttSubscriber, PlaybackEvent, TlsConfig};
pub use display::{DisplayClient, DisplayEndpoint, DisplayFrame, Transport, TransportError, WireOptions};
pub use error::{ArtMatrixError, ArtMatrixResult, ErrorCode};
pub use events::{EventEmitter, LoggingEventEmitter, NoopEventEmitter};
pub use lifecycle::{Lifecycle, ShutdownLifecycle};
pub use state::{Config, DisplayConfig, DisplayServerConfig, OrchestratorState};
pub use supervisor::{
    BackendMode, HardwareOptions, OutputMode, ReadinessConfig, RestartPolicy, Supervisor,
    SupervisorError,
};
pub use utils::now_millis;
pub use volume::{VolumeLevel, VolumeOverlayConfig};

// Re-export bootstrap types
pub use bootstrap::{bootstrap_services, BootstrappedServices};
pub use services::Orchestrator;
