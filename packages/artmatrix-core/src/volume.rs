//! Volume bar overlay.
//!
//! shairport-sync publishes `<root>/volume` as four comma-separated numbers:
//! `airplay_volume,volume,lowest_volume,highest_volume`, all in dB. The bar
//! is drawn along the right edge of the matrix on a layer above the cover
//! art, so everything outside the bar is left black (see-through).

use std::str::FromStr;
use std::time::Duration;

use image::{Rgb, RgbImage};
use thiserror::Error;

use crate::display::{DisplayFrame, FrameError, WireOptions};
use crate::protocol_constants::{
    VOLUME_BAR_BORDER, VOLUME_BAR_FILL, VOLUME_BAR_WIDTH, VOLUME_OVERLAY_LAYER,
    VOLUME_OVERLAY_TIMEOUT_MS,
};

/// Errors parsing a volume payload.
#[derive(Debug, Error, PartialEq)]
pub enum VolumeParseError {
    #[error("expected 4 comma-separated values, got {0}")]
    FieldCount(usize),

    #[error("invalid volume value {0:?}")]
    Value(String),
}

/// One `volume` message.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeLevel {
    /// AirPlay volume (-30.0 to 0.0, or -144.0 when muted).
    pub airplay_db: f32,
    /// Output volume after shairport-sync's mapping.
    pub volume_db: f32,
    pub min_db: f32,
    pub max_db: f32,
}

impl FromStr for VolumeLevel {
    type Err = VolumeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.trim().split(',').map(str::trim).collect();
        if fields.len() != 4 {
            return Err(VolumeParseError::FieldCount(fields.len()));
        }
        let mut values = [0f32; 4];
        for (slot, field) in values.iter_mut().zip(&fields) {
            *slot = field
                .parse::<f32>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| VolumeParseError::Value((*field).to_string()))?;
        }
        let [airplay_db, volume_db, min_db, max_db] = values;
        Ok(Self {
            airplay_db,
            volume_db,
            min_db,
            max_db,
        })
    }
}

impl VolumeLevel {
    /// Position of `volume_db` within `[min_db, max_db]`, clamped to 0..=1.
    ///
    /// A degenerate range reads as silent.
    #[must_use]
    pub fn fraction(&self) -> f32 {
        let span = self.max_db - self.min_db;
        if span == 0.0 {
            return 0.0;
        }
        ((self.volume_db - self.min_db) / span).clamp(0.0, 1.0)
    }

    /// Whole percent, for logs and events.
    #[must_use]
    pub fn percent(&self) -> u8 {
        (self.fraction() * 100.0).round() as u8
    }
}

/// How the volume overlay looks and behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeOverlayConfig {
    /// Bar width in pixels, including the outline.
    pub bar_width: u32,
    /// Layer the bar is drawn on; must sit above the cover art.
    pub layer: u8,
    /// Time after the last volume change before the bar is hidden.
    pub timeout: Duration,
}

impl Default for VolumeOverlayConfig {
    fn default() -> Self {
        Self {
            bar_width: VOLUME_BAR_WIDTH,
            layer: VOLUME_OVERLAY_LAYER,
            timeout: Duration::from_millis(VOLUME_OVERLAY_TIMEOUT_MS),
        }
    }
}

impl VolumeOverlayConfig {
    /// Wire options for overlay frames: same placement as the cover art,
    /// own layer, black left see-through.
    #[must_use]
    pub fn wire_options(&self, base: &WireOptions) -> WireOptions {
        WireOptions {
            layer: self.layer,
            transparent: true,
            ..*base
        }
    }
}

/// Draws the volume bar for `level` on an otherwise black frame.
///
/// The bar fills from the bottom, one row per `1 / height` of volume. Whole
/// rows are white; a partly reached row is drawn proportionally dimmer. A
/// dark outline surrounds only the filled part. Silence draws nothing.
pub fn render_volume_bar(
    level: &VolumeLevel,
    width: u32,
    height: u32,
    bar_width: u32,
) -> Result<DisplayFrame, FrameError> {
    if width == 0 || height == 0 {
        return Err(FrameError::ZeroDimension { width, height });
    }
    let mut canvas = RgbImage::new(width, height);

    let rows = level.fraction() * height as f32;
    if rows > 0.0 {
        let full = rows.floor() as u32;
        let partial = rows - full as f32;

        let x1 = width - bar_width.clamp(1, width);
        let x2 = width - 1;
        let bottom = height - 1;
        let top = height - full - u32::from(partial > 0.0);

        let border = Rgb(VOLUME_BAR_BORDER);
        for x in x1..=x2 {
            canvas.put_pixel(x, top, border);
            canvas.put_pixel(x, bottom, border);
        }
        for y in top..=bottom {
            canvas.put_pixel(x1, y, border);
            canvas.put_pixel(x2, y, border);
        }

        let inner = (x1 + 1)..x2;
        for i in 0..full {
            for x in inner.clone() {
                canvas.put_pixel(x, bottom - i, Rgb(VOLUME_BAR_FILL));
            }
        }
        if partial > 0.0 && full < height {
            let shade = (255.0 * partial) as u8;
            for x in inner {
                canvas.put_pixel(x, bottom - full, Rgb([shade; 3]));
            }
        }
    }

    DisplayFrame::new(width, height, canvas.into_raw())
}
