//! Event emitter abstraction for decoupling services from observers.
//!
//! Services depend on the [`EventEmitter`] trait rather than on a concrete
//! sink, enabling testing and alternative reporting.

use super::{BusEvent, PipelineEvent, SupervisorEvent};

/// Trait for emitting domain events without knowledge of who consumes them.
///
/// # Example
///
/// ```ignore
/// struct MyService {
///     emitter: Arc<dyn EventEmitter>,
/// }
///
/// impl MyService {
///     fn do_something(&self) {
///         self.emitter.emit_pipeline(PipelineEvent::FrameSent { ... });
///     }
/// }
/// ```
pub trait EventEmitter: Send + Sync {
    /// Emits a frame pipeline event.
    fn emit_pipeline(&self, event: PipelineEvent);

    /// Emits a display-server lifecycle event.
    fn emit_supervisor(&self, event: SupervisorEvent);

    /// Emits a message-bus connection event.
    fn emit_bus(&self, event: BusEvent);
}

/// No-op emitter for embedding or testing.
pub struct NoopEventEmitter;

impl EventEmitter for NoopEventEmitter {
    fn emit_pipeline(&self, _event: PipelineEvent) {}

    fn emit_supervisor(&self, _event: SupervisorEvent) {}

    fn emit_bus(&self, _event: BusEvent) {}
}

/// Logging emitter used by the server.
///
/// Logs all events at debug level; component log lines already cover the
/// interesting transitions at info and above.
pub struct LoggingEventEmitter;

impl EventEmitter for LoggingEventEmitter {
    fn emit_pipeline(&self, event: PipelineEvent) {
        tracing::debug!(?event, "pipeline_event");
    }

    fn emit_supervisor(&self, event: SupervisorEvent) {
        tracing::debug!(?event, "supervisor_event");
    }

    fn emit_bus(&self, event: BusEvent) {
        tracing::debug!(?event, "bus_event");
    }
}

/// Test emitter that records every event in order.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct RecordingEventEmitter {
    pub pipeline: parking_lot::Mutex<Vec<PipelineEvent>>,
    pub supervisor: parking_lot::Mutex<Vec<SupervisorEvent>>,
    pub bus: parking_lot::Mutex<Vec<BusEvent>>,
}

#[cfg(test)]
impl RecordingEventEmitter {
    pub fn pipeline_events(&self) -> Vec<PipelineEvent> {
        self.pipeline.lock().clone()
    }

    pub fn supervisor_events(&self) -> Vec<SupervisorEvent> {
        self.supervisor.lock().clone()
    }

    pub fn count_pipeline(&self, pred: impl Fn(&PipelineEvent) -> bool) -> usize {
        self.pipeline.lock().iter().filter(|e| pred(e)).count()
    }
}

#[cfg(test)]
impl EventEmitter for RecordingEventEmitter {
    fn emit_pipeline(&self, event: PipelineEvent) {
        self.pipeline.lock().push(event);
    }

    fn emit_supervisor(&self, event: SupervisorEvent) {
        self.supervisor.lock().push(event);
    }

    fn emit_bus(&self, event: BusEvent) {
        self.bus.lock().push(event);
    }
}
