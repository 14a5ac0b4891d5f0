//! Display transport: frames, the flaschen-taschen wire format, and the
//! network client that delivers frames to `ft-server`.
//!
//! # Module Structure
//!
//! - `frame` - [`DisplayFrame`], the validated RGB buffer
//! - `wire` - PPM packet encoding with the flaschen-taschen footer
//! - `client` - UDP/TCP client and the [`FrameSink`] seam
//! - `probe` - Readiness probing used by the supervisor

pub mod client;
pub mod frame;
pub mod probe;
pub mod wire;

pub use client::{
    DisplayClient, DisplayConnector, DisplayEndpoint, FrameSink, FrameSinkConnector, Transport,
    TransportError, TransportResult,
};
pub use frame::{DisplayFrame, FrameError};
pub use probe::{EndpointProbe, ReadinessProbe};
pub use wire::{encode_frame, encoded_len, WireOptions};
