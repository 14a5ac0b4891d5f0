//! Playback events and their classification.

use bytes::Bytes;
use image::ImageFormat;

use crate::artwork::sniff_format;
use crate::protocol_constants::{
    ACTIVE_END_SUBTOPIC, CORE_METADATA_SUBTOPICS, COVER_SUBTOPIC, PLAY_METADATA_SUBTOPICS,
    VOLUME_SUBTOPIC,
};
use crate::utils::now_millis;

/// One message received from the bus. Owned by whoever handles it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackEvent {
    pub topic: String,
    pub payload: Bytes,
    /// Unix timestamp in milliseconds at receipt.
    pub timestamp: u64,
}

impl PlaybackEvent {
    #[must_use]
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            timestamp: now_millis(),
        }
    }
}

/// What a [`PlaybackEvent`] means for the display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// New cover art. `format` is the sniffed signature, if recognised.
    CoverArt { format: Option<ImageFormat> },
    /// Cover art was published empty.
    CoverCleared,
    /// The AirPlay session ended.
    SessionEnded,
    /// Volume changed; the payload still needs parsing.
    VolumeChanged,
    /// Any other known metadata subtopic (artist, title, ...).
    Metadata { subtopic: String },
    /// Outside our topic root, or an unknown subtopic.
    Unrecognized,
}

impl EventKind {
    /// Whether the display should go blank.
    #[must_use]
    pub fn clears_display(&self) -> bool {
        matches!(self, Self::CoverCleared | Self::SessionEnded)
    }
}

/// Maps topics under one root to subtopics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicMap {
    root: String,
}

impl TopicMap {
    /// `root` is used as-is, minus any trailing `/`.
    #[must_use]
    pub fn new(root: impl Into<String>) -> Self {
        let root = root.into();
        Self {
            root: root.trim_end_matches('/').to_string(),
        }
    }

    #[must_use]
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Topics to subscribe to after every (re)connect.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<String> {
        CORE_METADATA_SUBTOPICS
            .iter()
            .chain(PLAY_METADATA_SUBTOPICS.iter())
            .map(|sub| format!("{}/{}", self.root, sub))
            .collect()
    }

    /// Subtopic of `topic` under this root.
    #[must_use]
    pub fn subtopic<'a>(&self, topic: &'a str) -> Option<&'a str> {
        topic
            .strip_prefix(self.root.as_str())?
            .strip_prefix('/')
            .filter(|sub| !sub.is_empty())
    }

    /// Classifies an event by topic, inspecting the payload only for cover
    /// art.
    #[must_use]
    pub fn classify(&self, event: &PlaybackEvent) -> EventKind {
        let Some(sub) = self.subtopic(&event.topic) else {
            return EventKind::Unrecognized;
        };
        match sub {
            COVER_SUBTOPIC if event.payload.is_empty() => EventKind::CoverCleared,
            COVER_SUBTOPIC => EventKind::CoverArt {
                format: sniff_format(&event.payload),
            },
            ACTIVE_END_SUBTOPIC => EventKind::SessionEnded,
            VOLUME_SUBTOPIC => EventKind::VolumeChanged,
            _ if is_known(sub) => EventKind::Metadata {
                subtopic: sub.to_string(),
            },
            _ => EventKind::Unrecognized,
        }
    }
}

fn is_known(sub: &str) -> bool {
    CORE_METADATA_SUBTOPICS
        .iter()
        .chain(PLAY_METADATA_SUBTOPICS.iter())
        .any(|known| *known == sub)
}
