//! Fixed protocol constants that should NOT be changed.
//!
//! These values are defined by external programs (flaschen-taschen `ft-server`,
//! shairport-sync's MQTT publisher) and changing them would break interop.

// ─────────────────────────────────────────────────────────────────────────────
// Flaschen-Taschen Wire Protocol
// ─────────────────────────────────────────────────────────────────────────────

/// PPM magic for binary RGB images. `ft-server` accepts nothing else over UDP.
pub const PPM_MAGIC: &str = "P6";

/// Maximum channel value declared in the PPM header (8 bits per channel).
pub const PPM_MAX_VALUE: u16 = 255;

/// Bytes per pixel on the wire (R, G, B).
pub const BYTES_PER_PIXEL: usize = 3;

/// Largest UDP payload that fits in a single IPv4 datagram.
///
/// 65535 - 8 (UDP header) - 20 (IPv4 header).
pub const MAX_UDP_PAYLOAD: usize = 65_507;

/// Default port `ft-server` listens on.
pub const DEFAULT_DISPLAY_PORT: u16 = 1337;

/// Default display geometry (columns and rows).
pub const DEFAULT_DISPLAY_SIZE: u32 = 64;

/// Color substituted for pure black when the frame is not transparent.
///
/// `ft-server` treats (0, 0, 0) as "see-through" to lower layers.
pub const OPAQUE_BLACK: [u8; 3] = [1, 1, 1];

/// Highest layer index `ft-server` composes (layers 0 through 15).
pub const MAX_DISPLAY_LAYER: u8 = 15;

// ─────────────────────────────────────────────────────────────────────────────
// Display Server Binary
// ─────────────────────────────────────────────────────────────────────────────

/// File name of the flaschen-taschen display server binary.
pub const DISPLAY_SERVER_BINARY: &str = "ft-server";

// ─────────────────────────────────────────────────────────────────────────────
// MQTT / shairport-sync
// ─────────────────────────────────────────────────────────────────────────────

/// Default MQTT broker port (plain TCP).
pub const DEFAULT_MQTT_PORT: u16 = 1883;

/// Default topic root shairport-sync publishes under.
pub const DEFAULT_TOPIC_ROOT: &str = "shairport-sync";

/// Subtopic carrying cover art as raw image bytes.
pub const COVER_SUBTOPIC: &str = "cover";

/// Subtopic published when the AirPlay session ends.
pub const ACTIVE_END_SUBTOPIC: &str = "active_end";

/// Subtopic carrying `airplay_volume,volume,lowest_volume,highest_volume`.
pub const VOLUME_SUBTOPIC: &str = "volume";

/// Core metadata subtopics published by shairport-sync.
pub const CORE_METADATA_SUBTOPICS: [&str; 5] = ["artist", "album", "title", "genre", "cover"];

/// Play-state subtopics published by shairport-sync.
pub const PLAY_METADATA_SUBTOPICS: [&str; 9] = [
    "songalbum",
    "volume",
    "client_ip",
    "active_start",
    "active_end",
    "play_start",
    "play_end",
    "play_flush",
    "play_resume",
];

/// Largest MQTT packet accepted from the broker.
///
/// Cover art routinely exceeds the client's 10 KiB default.
pub const MAX_INCOMING_PACKET_BYTES: usize = 16 * 1024 * 1024;

/// Capacity of the MQTT client's outgoing request channel.
///
/// Must exceed the number of subscriptions issued per connect so that
/// `try_subscribe` never fails on a fresh connection.
pub const MQTT_REQUEST_CHANNEL_CAPACITY: usize = 32;

// ─────────────────────────────────────────────────────────────────────────────
// Volume Overlay
// ─────────────────────────────────────────────────────────────────────────────

/// Default volume bar width in pixels, outline included.
pub const VOLUME_BAR_WIDTH: u32 = 4;

/// Default layer for the volume bar, directly above the cover art.
pub const VOLUME_OVERLAY_LAYER: u8 = 1;

/// Outline colour around the filled part of the bar.
pub const VOLUME_BAR_BORDER: [u8; 3] = [40, 40, 40];

/// Colour of fully reached rows.
pub const VOLUME_BAR_FILL: [u8; 3] = [255, 255, 255];

// ─────────────────────────────────────────────────────────────────────────────
// Timing Defaults
// ─────────────────────────────────────────────────────────────────────────────

/// First reconnect delay after losing the broker (ms).
pub const RECONNECT_INITIAL_MS: u64 = 1_000;

/// Reconnect delay ceiling (ms).
pub const RECONNECT_MAX_MS: u64 = 30_000;

/// Interval between readiness probes (ms).
pub const READINESS_POLL_INTERVAL_MS: u64 = 200;

/// Total time allowed for the display server to accept frames (ms).
pub const READINESS_TIMEOUT_MS: u64 = 5_000;

/// Upper bound on establishing a TCP connection to the display server (ms).
pub const TCP_CONNECT_TIMEOUT_MS: u64 = 2_000;

/// How long a UDP probe waits for an ICMP refusal before assuming success (ms).
pub const UDP_PROBE_WINDOW_MS: u64 = 50;

/// Delay before restarting a crashed display server (ms).
pub const RESTART_DELAY_MS: u64 = 1_000;

/// Restarts allowed before a crash becomes fatal.
pub const DEFAULT_MAX_RESTARTS: u32 = 3;

/// Time between SIGTERM and SIGKILL when stopping the display server (ms).
pub const TERMINATE_GRACE_MS: u64 = 3_000;

/// How long the volume bar stays up after the last change (ms).
pub const VOLUME_OVERLAY_TIMEOUT_MS: u64 = 5_000;

/// Upper bound on joining background tasks during shutdown (ms).
pub const TASK_JOIN_TIMEOUT_MS: u64 = 2_000;
