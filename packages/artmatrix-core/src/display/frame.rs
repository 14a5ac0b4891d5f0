//! Size-normalised RGB pixel buffers.

use bytes::Bytes;
use thiserror::Error;

use crate::protocol_constants::BYTES_PER_PIXEL;

/// Errors constructing a [`DisplayFrame`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// Width or height is zero.
    #[error("frame dimensions must be positive (got {width}x{height})")]
    ZeroDimension { width: u32, height: u32 },

    /// Pixel buffer does not hold exactly `width * height` RGB triples.
    #[error("pixel buffer holds {actual} bytes, expected {expected}")]
    PixelLength { expected: usize, actual: usize },
}

/// A fully decoded, row-major RGB frame matching the display geometry.
///
/// The buffer always holds exactly `width * height * 3` bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayFrame {
    width: u32,
    height: u32,
    pixels: Bytes,
}

impl DisplayFrame {
    /// Creates a frame, validating the buffer length against the geometry.
    pub fn new(width: u32, height: u32, pixels: impl Into<Bytes>) -> Result<Self, FrameError> {
        if width == 0 || height == 0 {
            return Err(FrameError::ZeroDimension { width, height });
        }
        let pixels = pixels.into();
        let expected = Self::byte_len(width, height);
        if pixels.len() != expected {
            return Err(FrameError::PixelLength {
                expected,
                actual: pixels.len(),
            });
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// An all-black frame, used to clear the display.
    pub fn blank(width: u32, height: u32) -> Result<Self, FrameError> {
        Self::new(width, height, vec![0u8; Self::byte_len(width, height)])
    }

    fn byte_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * BYTES_PER_PIXEL
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Raw row-major RGB bytes.
    #[must_use]
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Returns the RGB triple at `(x, y)`, or `None` when out of bounds.
    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * BYTES_PER_PIXEL;
        let p = &self.pixels[offset..offset + BYTES_PER_PIXEL];
        Some([p[0], p[1], p[2]])
    }

    /// Iterates RGB triples in row-major order.
    pub fn rgb_triples(&self) -> impl Iterator<Item = [u8; 3]> + '_ {
        self.pixels
            .chunks_exact(BYTES_PER_PIXEL)
            .map(|p| [p[0], p[1], p[2]])
    }
}
