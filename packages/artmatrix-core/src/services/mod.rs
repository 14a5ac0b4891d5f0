//! Application services layer.
//!
//! This module contains the services that orchestrate between the bus,
//! the supervisor, and the display transport.

pub mod frame_dispatcher;
pub mod orchestrator;

pub use frame_dispatcher::{frame_pipeline, DispatchOutcome, FrameDispatcher, FrameSender};
pub use orchestrator::Orchestrator;
