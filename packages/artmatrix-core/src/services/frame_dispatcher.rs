//! Turns playback events into frames on the display.
//!
//! [`FrameDispatcher`] runs on the subscriber's side and never blocks: it
//! classifies each event and parks the resulting job in a latest-wins
//! handoff. The [`FrameSender`] owns the [`FrameSink`], decodes cover art on
//! the blocking pool, and writes frames one at a time. With one frame in
//! flight, a newer cover job replaces the pending one (the stale job is
//! dropped and logged), so the display always ends on the latest state.
//! Volume changes get their own slot and are drawn on an overlay layer that
//! is cleared again once the volume stops changing.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{watch, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::artwork::{transcode, FitMode};
use crate::bus::{EventKind, PlaybackEvent, TopicMap};
use crate::display::{DisplayFrame, FrameSink, TransportError, WireOptions};
use crate::events::{DropReason, EventEmitter, PipelineEvent};
use crate::state::DisplayConfig;
use crate::supervisor::DisplayServerHandle;
use crate::utils::now_millis;
use crate::volume::{render_volume_bar, VolumeLevel, VolumeOverlayConfig};

/// Cover work handed from the dispatcher to the sender.
#[derive(Debug)]
enum FrameJob {
    /// Encoded cover art to decode and show.
    Cover(Bytes),
    /// Clear the display.
    Blank,
}

/// What [`FrameDispatcher::dispatch`] did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Handed to the sender.
    Queued,
    /// Not relevant to the display.
    Ignored,
    /// Relevant, but discarded.
    Dropped(DropReason),
}

#[derive(Default)]
struct Pending {
    cover: Option<FrameJob>,
    volume: Option<VolumeLevel>,
    dispatcher_gone: bool,
    sender_gone: bool,
}

/// One pending slot per kind of work, shared by both halves.
#[derive(Default)]
struct Handoff {
    pending: Mutex<Pending>,
    wake: Notify,
}

/// What the sender should do next.
enum Work {
    Cover(FrameJob),
    Volume(VolumeLevel),
    Idle,
    Finished,
}

impl Handoff {
    fn next(&self) -> Work {
        let mut pending = self.pending.lock();
        if let Some(job) = pending.cover.take() {
            Work::Cover(job)
        } else if let Some(level) = pending.volume.take() {
            Work::Volume(level)
        } else if pending.dispatcher_gone {
            Work::Finished
        } else {
            Work::Idle
        }
    }
}

/// Non-blocking front half of the frame pipeline.
pub struct FrameDispatcher {
    topics: TopicMap,
    handoff: Arc<Handoff>,
    overlay_enabled: bool,
    server: watch::Receiver<DisplayServerHandle>,
    emitter: Arc<dyn EventEmitter>,
}

/// Volume bar settings resolved against the display.
struct Overlay {
    bar_width: u32,
    timeout: Duration,
    options: WireOptions,
    /// When the bar is due to be cleared.
    deadline: Option<Instant>,
}

/// Back half of the frame pipeline: sole owner of the display connection.
pub struct FrameSender {
    handoff: Arc<Handoff>,
    sink: Box<dyn FrameSink>,
    width: u32,
    height: u32,
    fit: FitMode,
    options: WireOptions,
    overlay: Option<Overlay>,
    server: watch::Receiver<DisplayServerHandle>,
    /// Restart count at the last send attempt.
    seen_restarts: u32,
    emitter: Arc<dyn EventEmitter>,
}

/// Builds a connected dispatcher/sender pair.
pub fn frame_pipeline(
    topics: TopicMap,
    display: &DisplayConfig,
    sink: Box<dyn FrameSink>,
    server: watch::Receiver<DisplayServerHandle>,
    emitter: Arc<dyn EventEmitter>,
) -> (FrameDispatcher, FrameSender) {
    let handoff = Arc::new(Handoff::default());
    let overlay = display.volume.map(|volume: VolumeOverlayConfig| Overlay {
        bar_width: volume.bar_width,
        timeout: volume.timeout,
        options: volume.wire_options(&display.wire),
        deadline: None,
    });
    let seen_restarts = server.borrow().restart_count;
    let dispatcher = FrameDispatcher {
        topics,
        handoff: Arc::clone(&handoff),
        overlay_enabled: overlay.is_some(),
        server: server.clone(),
        emitter: Arc::clone(&emitter),
    };
    let sender = FrameSender {
        handoff,
        sink,
        width: display.width,
        height: display.height,
        fit: display.fit,
        options: display.wire,
        overlay,
        server,
        seen_restarts,
        emitter,
    };
    (dispatcher, sender)
}

enum Job {
    Cover(FrameJob),
    Volume(VolumeLevel),
}

impl FrameDispatcher {
    fn drop_frame(&self, reason: DropReason) -> DispatchOutcome {
        self.emitter.emit_pipeline(PipelineEvent::FrameDropped {
            reason,
            timestamp: now_millis(),
        });
        DispatchOutcome::Dropped(reason)
    }

    /// Classifies `event` and queues a frame job if it affects the display.
    pub fn dispatch(&self, event: PlaybackEvent) -> DispatchOutcome {
        let kind = self.topics.classify(&event);
        let job = match kind {
            EventKind::CoverArt { format } => {
                log::debug!(
                    "[Pipeline] Cover art received ({} bytes, {})",
                    event.payload.len(),
                    format.map_or_else(|| "unknown signature".to_string(), |f| format!("{f:?}"))
                );
                Job::Cover(FrameJob::Cover(event.payload))
            }
            EventKind::CoverCleared | EventKind::SessionEnded => {
                log::info!("[Pipeline] Clearing display ({})", event.topic);
                Job::Cover(FrameJob::Blank)
            }
            EventKind::VolumeChanged if self.overlay_enabled => {
                let text = String::from_utf8_lossy(&event.payload);
                match text.parse::<VolumeLevel>() {
                    Ok(level) => {
                        log::debug!("[Pipeline] Volume {}%", level.percent());
                        Job::Volume(level)
                    }
                    Err(e) => {
                        log::warn!("[Pipeline] Ignoring volume {:?}: {}", text, e);
                        return DispatchOutcome::Ignored;
                    }
                }
            }
            EventKind::VolumeChanged => return DispatchOutcome::Ignored,
            EventKind::Metadata { subtopic } => {
                let text: String = String::from_utf8_lossy(&event.payload)
                    .chars()
                    .take(80)
                    .collect();
                log::debug!("[Pipeline] {}: {}", subtopic, text);
                return DispatchOutcome::Ignored;
            }
            EventKind::Unrecognized => {
                log::debug!("[Pipeline] Ignoring message on {}", event.topic);
                return DispatchOutcome::Ignored;
            }
        };

        let state = self.server.borrow().state;
        if !state.accepts_frames() {
            log::info!("[Pipeline] Display server is {}, dropping frame", state);
            return self.drop_frame(DropReason::NotReady);
        }

        let blank = matches!(job, Job::Cover(FrameJob::Blank));
        let replaced = {
            let mut pending = self.handoff.pending.lock();
            if pending.sender_gone {
                None
            } else {
                Some(match job {
                    Job::Cover(job) => pending.cover.replace(job).is_some(),
                    Job::Volume(level) => pending.volume.replace(level).is_some(),
                })
            }
        };
        let Some(replaced) = replaced else {
            log::warn!("[Pipeline] Frame sender has stopped, dropping frame");
            return self.drop_frame(DropReason::Closed);
        };
        self.handoff.wake.notify_one();

        if replaced {
            log::info!("[Pipeline] Display busy, replacing the pending frame");
            self.emitter.emit_pipeline(PipelineEvent::FrameDropped {
                reason: DropReason::Busy,
                timestamp: now_millis(),
            });
        }
        if blank {
            self.emitter.emit_pipeline(PipelineEvent::DisplayCleared {
                timestamp: now_millis(),
            });
        }
        DispatchOutcome::Queued
    }
}

impl Drop for FrameDispatcher {
    fn drop(&mut self) {
        self.handoff.pending.lock().dispatcher_gone = true;
        self.handoff.wake.notify_one();
    }
}

/// Why the idle sender woke up.
enum Wake {
    Work,
    OverlayExpired,
    Cancelled,
}

async fn expiry(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Level for a failed send. A UDP refusal right after a restart is usually
/// the old server's ICMP error surfacing on the connected socket.
fn send_failure_level(error: &TransportError, first_since_restart: bool) -> log::Level {
    if first_since_restart && error.is_refused() {
        log::Level::Debug
    } else {
        log::Level::Warn
    }
}

impl FrameSender {
    /// Sends frames until the dispatcher is dropped or `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) {
        log::info!("[Pipeline] Sending frames to {}", self.sink.describe());
        let handoff = Arc::clone(&self.handoff);
        loop {
            if cancel.is_cancelled() {
                break;
            }
            match handoff.next() {
                Work::Cover(job) => self.show_cover(job).await,
                Work::Volume(level) => self.show_volume(level).await,
                Work::Finished => break,
                Work::Idle => {
                    let deadline = self.overlay.as_ref().and_then(|o| o.deadline);
                    let wake = tokio::select! {
                        _ = cancel.cancelled() => Wake::Cancelled,
                        _ = handoff.wake.notified() => Wake::Work,
                        _ = expiry(deadline) => Wake::OverlayExpired,
                    };
                    match wake {
                        Wake::Cancelled => break,
                        Wake::Work => {}
                        Wake::OverlayExpired => self.hide_volume().await,
                    }
                }
            }
        }
        log::info!("[Pipeline] Frame sender stopped");
    }

    async fn show_cover(&mut self, job: FrameJob) {
        let frame = match job {
            FrameJob::Blank => match DisplayFrame::blank(self.width, self.height) {
                Ok(frame) => frame,
                Err(e) => {
                    log::error!("[Pipeline] Cannot build blank frame: {}", e);
                    return;
                }
            },
            FrameJob::Cover(bytes) => {
                match Self::decode(bytes, self.width, self.height, self.fit).await {
                    Ok(frame) => frame,
                    Err(error) => {
                        log::warn!("[Pipeline] Skipping cover art: {}", error);
                        self.emitter.emit_pipeline(PipelineEvent::DecodeFailed {
                            error,
                            timestamp: now_millis(),
                        });
                        return;
                    }
                }
            }
        };
        let options = self.options;
        self.send(&frame, &options).await;
    }

    async fn show_volume(&mut self, level: VolumeLevel) {
        let Some(overlay) = self.overlay.as_mut() else {
            return;
        };
        overlay.deadline = Some(Instant::now() + overlay.timeout);
        let (bar_width, options) = (overlay.bar_width, overlay.options);

        let frame = match render_volume_bar(&level, self.width, self.height, bar_width) {
            Ok(frame) => frame,
            Err(e) => {
                log::error!("[Pipeline] Cannot draw volume bar: {}", e);
                return;
            }
        };
        if self.send(&frame, &options).await {
            self.emitter.emit_pipeline(PipelineEvent::VolumeShown {
                percent: level.percent(),
                timestamp: now_millis(),
            });
        }
    }

    async fn hide_volume(&mut self) {
        let Some(overlay) = self.overlay.as_mut() else {
            return;
        };
        overlay.deadline = None;
        let options = overlay.options;

        let frame = match DisplayFrame::blank(self.width, self.height) {
            Ok(frame) => frame,
            Err(e) => {
                log::error!("[Pipeline] Cannot build blank frame: {}", e);
                return;
            }
        };
        log::debug!("[Pipeline] Hiding volume bar");
        if self.send(&frame, &options).await {
            self.emitter.emit_pipeline(PipelineEvent::VolumeHidden {
                timestamp: now_millis(),
            });
        }
    }

    /// Writes one frame if the display server can take it. Returns whether
    /// it was sent.
    async fn send(&mut self, frame: &DisplayFrame, options: &WireOptions) -> bool {
        // The server may have crashed while we were decoding.
        let (state, restarts) = {
            let server = self.server.borrow();
            (server.state, server.restart_count)
        };
        if !state.accepts_frames() {
            log::info!("[Pipeline] Display server is {}, dropping frame", state);
            self.emitter.emit_pipeline(PipelineEvent::FrameDropped {
                reason: DropReason::NotReady,
                timestamp: now_millis(),
            });
            return false;
        }
        let first_since_restart = std::mem::replace(&mut self.seen_restarts, restarts) != restarts;

        match self.sink.send_frame(frame, options).await {
            Ok(bytes) => {
                log::debug!(
                    "[Pipeline] Sent {}x{} frame on layer {} ({} bytes)",
                    frame.width(),
                    frame.height(),
                    options.layer,
                    bytes
                );
                self.emitter.emit_pipeline(PipelineEvent::FrameSent {
                    bytes,
                    timestamp: now_millis(),
                });
                true
            }
            Err(e) => {
                log::log!(
                    send_failure_level(&e, first_since_restart),
                    "[Pipeline] Failed to send frame: {}",
                    e
                );
                self.emitter.emit_pipeline(PipelineEvent::SendFailed {
                    error: e.to_string(),
                    timestamp: now_millis(),
                });
                false
            }
        }
    }

    /// Decodes on the blocking pool. A panicking decoder counts as a decode
    /// failure.
    async fn decode(
        bytes: Bytes,
        width: u32,
        height: u32,
        fit: FitMode,
    ) -> Result<DisplayFrame, String> {
        match tokio::task::spawn_blocking(move || transcode(&bytes, width, height, fit)).await {
            Ok(Ok(frame)) => Ok(frame),
            Ok(Err(e)) => Err(e.to_string()),
            Err(e) => Err(format!("decoder failed: {e}")),
        }
    }
}

impl Drop for FrameSender {
    fn drop(&mut self) {
        self.handoff.pending.lock().sender_gone = true;
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tokio::sync::{mpsc, Semaphore};

    use crate::display::{DisplayFrame, FrameSink, TransportError, TransportResult, WireOptions};

    /// Sink that records frames, optionally waiting on a gate per send.
    #[derive(Clone, Default)]
    pub struct RecordingSink {
        pub frames: Arc<Mutex<Vec<(DisplayFrame, WireOptions)>>>,
        pub gate: Option<Arc<Semaphore>>,
        pub started: Option<mpsc::UnboundedSender<()>>,
        pub fail: bool,
    }

    impl RecordingSink {
        pub fn sent(&self) -> Vec<DisplayFrame> {
            self.frames.lock().iter().map(|(f, _)| f.clone()).collect()
        }

        pub fn sent_on_layer(&self, layer: u8) -> Vec<DisplayFrame> {
            self.frames
                .lock()
                .iter()
                .filter(|(_, o)| o.layer == layer)
                .map(|(f, _)| f.clone())
                .collect()
        }
    }

    #[async_trait]
    impl FrameSink for RecordingSink {
        async fn send_frame(
            &mut self,
            frame: &DisplayFrame,
            options: &WireOptions,
        ) -> TransportResult<usize> {
            if let Some(started) = &self.started {
                let _ = started.send(());
            }
            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            }
            if self.fail {
                return Err(TransportError::Refused {
                    endpoint: "udp://test:1337".to_string(),
                });
            }
            self.frames.lock().push((frame.clone(), *options));
            Ok(frame.pixels().len())
        }

        fn describe(&self) -> String {
            "recording sink".to_string()
        }
    }
}
