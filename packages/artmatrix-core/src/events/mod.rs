//! Domain events for observing the pipeline, supervisor, and bus.
//!
//! This module provides:
//! - [`EventEmitter`] trait for services to emit events
//! - Event types for each component
//!
//! Emission is fire-and-forget; no component's behaviour depends on who is
//! listening.

mod emitter;

pub use emitter::{EventEmitter, LoggingEventEmitter, NoopEventEmitter};

#[cfg(test)]
pub(crate) use emitter::RecordingEventEmitter;

use crate::bus::SubscriberState;
use crate::supervisor::ServerState;

/// Why a frame never reached the display server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// A newer frame replaced it while it waited behind the one in flight.
    Busy,
    /// The display server is starting or restarting.
    NotReady,
    /// The sender task has stopped.
    Closed,
}

/// Events from the cover-art and volume → frame → transport path.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// A frame was written to the display server.
    FrameSent {
        /// Encoded packet size.
        bytes: usize,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// A frame was discarded without being sent.
    FrameDropped {
        reason: DropReason,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// The transport rejected a frame.
    SendFailed {
        error: String,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// A blank frame was queued because cover art was cleared or the
    /// playback session ended.
    DisplayCleared {
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// The volume bar was drawn.
    VolumeShown {
        percent: u8,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// The volume bar timed out and was cleared.
    VolumeHidden {
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// A cover-art payload could not be decoded.
    DecodeFailed {
        error: String,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
}

/// Events from the display-server supervisor.
#[derive(Debug, Clone, PartialEq)]
pub enum SupervisorEvent {
    /// The child moved to a new lifecycle state.
    StateChanged {
        state: ServerState,
        pid: Option<u32>,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// A crashed child is about to be relaunched.
    Restarting {
        /// 1-based restart attempt.
        attempt: u32,
        delay_ms: u64,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
}

/// Events from the message-bus subscriber.
#[derive(Debug, Clone, PartialEq)]
pub enum BusEvent {
    StateChanged {
        state: SubscriberState,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// Waiting before the next reconnect attempt.
    Reconnecting {
        delay_ms: u64,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
}
