//! Cover art transcoding.
//!
//! Turns the raw image bytes shairport-sync publishes (JPEG or PNG in
//! practice) into a [`DisplayFrame`] sized exactly to the matrix.
//!
//! # Aspect policy
//!
//! Album art is nearly always square but displays are not. Three policies
//! are supported, selected by [`FitMode`]:
//!
//! 1. **Fill** (default): scale to cover the display, then center-crop
//! 2. **Fit**: shrink to fit inside the display, letterboxed on black; art
//!    that already fits is centred at its native size
//! 3. **Stretch**: scale each axis independently
//!
//! # Example
//!
//! ```ignore
//! use artmatrix_core::artwork::{transcode, FitMode};
//!
//! let frame = transcode(&jpeg_bytes, 64, 32, FitMode::Fill)?;
//! assert_eq!(frame.pixels().len(), 64 * 32 * 3);
//! ```

use std::io::{self, Cursor};

use image::imageops::{self, FilterType};
use image::{ImageError, ImageFormat, ImageReader, RgbImage};
use serde::Deserialize;
use thiserror::Error;

use crate::display::{DisplayFrame, FrameError};

/// Resampling filter. Lanczos keeps album-art edges readable at matrix sizes.
const FILTER: FilterType = FilterType::Lanczos3;

/// Errors turning image bytes into a frame.
#[derive(Debug, Error)]
pub enum TranscodeError {
    /// The bytes do not start with any known image signature.
    #[error("unrecognized image format")]
    UnrecognizedFormat,

    /// The format was recognised but the data is corrupt or truncated.
    #[error("failed to decode {format:?} image: {source}")]
    Decode {
        format: ImageFormat,
        #[source]
        source: ImageError,
    },

    /// Reading the in-memory buffer failed.
    #[error("failed to read image bytes: {0}")]
    Io(#[from] io::Error),

    /// The requested output size is empty.
    #[error("target dimensions must be positive (got {width}x{height})")]
    Dimension { width: u32, height: u32 },

    /// The resized buffer did not match the requested geometry.
    #[error(transparent)]
    Frame(#[from] FrameError),
}

impl TranscodeError {
    /// Returns true for errors caused by the input bytes themselves.
    #[must_use]
    pub fn is_decode(&self) -> bool {
        matches!(
            self,
            Self::UnrecognizedFormat | Self::Decode { .. } | Self::Io(_)
        )
    }
}

/// How to reconcile the image's aspect ratio with the display's.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FitMode {
    /// Cover the whole display, cropping the overflow around the center.
    #[default]
    Fill,
    /// Show the whole image, centred, with black bars. Only ever shrinks.
    Fit,
    /// Distort to the display's aspect ratio.
    Stretch,
}

/// Guesses the image format from the leading signature bytes.
#[must_use]
pub fn sniff_format(bytes: &[u8]) -> Option<ImageFormat> {
    image::guess_format(bytes).ok()
}

/// Decodes `bytes` and resizes the result to exactly `width × height` RGB.
///
/// Pure: no I/O besides reading the given buffer.
///
/// # Errors
///
/// - [`TranscodeError::Dimension`] when either target dimension is zero
/// - [`TranscodeError::UnrecognizedFormat`] / [`TranscodeError::Decode`] for
///   unknown, corrupt, or truncated input
pub fn transcode(
    bytes: &[u8],
    width: u32,
    height: u32,
    fit: FitMode,
) -> Result<DisplayFrame, TranscodeError> {
    if width == 0 || height == 0 {
        return Err(TranscodeError::Dimension { width, height });
    }

    let reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
    let format = reader.format().ok_or(TranscodeError::UnrecognizedFormat)?;
    let image = reader
        .decode()
        .map_err(|source| TranscodeError::Decode { format, source })?;

    log::debug!(
        "[Artwork] Decoded {:?} {}x{} {:?}",
        format,
        image.width(),
        image.height(),
        image.color()
    );

    let rgb = match fit {
        FitMode::Fill => image.resize_to_fill(width, height, FILTER).to_rgb8(),
        FitMode::Stretch => image.resize_exact(width, height, FILTER).to_rgb8(),
        FitMode::Fit => {
            let scaled = if image.width() <= width && image.height() <= height {
                image.to_rgb8()
            } else {
                image.resize(width, height, FILTER).to_rgb8()
            };
            let mut canvas = RgbImage::new(width, height);
            let x = (width - scaled.width()) / 2;
            let y = (height - scaled.height()) / 2;
            imageops::overlay(&mut canvas, &scaled, i64::from(x), i64::from(y));
            canvas
        }
    };

    Ok(DisplayFrame::new(width, height, rgb.into_raw())?)
}


#[cfg(test)]
mod tests {
    use super::test_images::{bands, solid};
    use super::*;

    #[test]
    fn jpeg_cover_scales_down_to_matrix() {
        let jpeg = solid(500, 500, [200, 40, 40], ImageFormat::Jpeg);
        let frame = transcode(&jpeg, 32, 32, FitMode::Fill).unwrap();

        assert_eq!((frame.width(), frame.height()), (32, 32));
        assert_eq!(frame.pixels().len(), 32 * 32 * 3);
        let [r, g, b] = frame.pixel(16, 16).unwrap();
        assert!(r > 150 && g < 90 && b < 90, "got {r},{g},{b}");
    }

    #[test]
    fn every_fit_mode_produces_exact_geometry() {
        let wide = bands(300, 100);
        let tall = solid(40, 400, [10, 20, 30], ImageFormat::Png);

        for fit in [FitMode::Fill, FitMode::Fit, FitMode::Stretch] {
            for (w, h) in [(64, 64), (64, 32), (16, 48)] {
                for src in [&wide, &tall] {
                    let frame = transcode(src, w, h, fit).unwrap();
                    assert_eq!(frame.pixels().len(), (w * h * 3) as usize, "{fit:?} {w}x{h}");
                }
            }
        }
    }

    #[test]
    fn fill_crops_around_center() {
        let frame = transcode(&bands(300, 100), 30, 30, FitMode::Fill).unwrap();
        // The centre third is green, so the crop is green away from its edges.
        for x in [4, 15, 25] {
            let [r, g, b] = frame.pixel(x, 15).unwrap();
            assert!(g > 200 && r < 60 && b < 60, "x={x}: {r},{g},{b}");
        }
    }

    #[test]
    fn fit_letterboxes_with_black() {
        let frame = transcode(&bands(300, 100), 30, 30, FitMode::Fit).unwrap();
        assert_eq!(frame.pixel(15, 0), Some([0, 0, 0]));
        assert_eq!(frame.pixel(15, 29), Some([0, 0, 0]));
        let [r, g, _] = frame.pixel(15, 15).unwrap();
        assert!(g > 200 && r < 60);
    }

    #[test]
    fn fit_centres_small_art_without_upscaling() {
        let png = solid(8, 8, [30, 200, 90], ImageFormat::Png);
        let frame = transcode(&png, 32, 32, FitMode::Fit).unwrap();

        assert_eq!(frame.pixel(12, 12), Some([30, 200, 90]));
        assert_eq!(frame.pixel(19, 19), Some([30, 200, 90]));
        assert_eq!(frame.pixel(11, 16), Some([0, 0, 0]));
        assert_eq!(frame.pixel(20, 16), Some([0, 0, 0]));
        assert_eq!(frame.pixel(16, 11), Some([0, 0, 0]));
    }

    #[test]
    fn zero_dimensions_are_rejected() {
        let png = solid(4, 4, [1, 2, 3], ImageFormat::Png);
        let err = transcode(&png, 0, 32, FitMode::Fill).unwrap_err();
        assert!(matches!(err, TranscodeError::Dimension { width: 0, height: 32 }));
        assert!(!err.is_decode());
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let inputs: Vec<Vec<u8>> = vec![
            Vec::new(),
            b"definitely not an image".to_vec(),
            (0u8..=255).cycle().take(4096).collect(),
        ];
        for input in inputs {
            let err = transcode(&input, 32, 32, FitMode::Fill).unwrap_err();
            assert!(err.is_decode(), "{err}");
        }
    }

    #[test]
    fn truncated_images_are_decode_errors() {
        let png = solid(64, 64, [9, 9, 9], ImageFormat::Png);
        let err = transcode(&png[..30], 32, 32, FitMode::Fill).unwrap_err();
        assert!(matches!(err, TranscodeError::Decode { format: ImageFormat::Png, .. }));

        let jpeg = solid(64, 64, [9, 9, 9], ImageFormat::Jpeg);
        let err = transcode(&jpeg[..20], 32, 32, FitMode::Fill).unwrap_err();
        assert!(err.is_decode(), "{err}");
    }

    #[test]
    fn sniff_recognises_common_cover_formats() {
        assert_eq!(
            sniff_format(&solid(2, 2, [0, 0, 0], ImageFormat::Jpeg)),
            Some(ImageFormat::Jpeg)
        );
        assert_eq!(
            sniff_format(&solid(2, 2, [0, 0, 0], ImageFormat::Png)),
            Some(ImageFormat::Png)
        );
        assert_eq!(sniff_format(b"artist name"), None);
    }
}
