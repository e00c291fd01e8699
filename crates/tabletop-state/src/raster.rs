//! Pixel rasters and their blob encoding.
//!
//! Cell drawings are RGBA rasters one cell in size; fog masks are
//! single-channel rasters covering the whole map, where [`FOG_HIDDEN`]
//! hides and [`FOG_REVEALED`] reveals.
//!
//! # Blob layout
//!
//! ```text
//! b"RSTR" | width u32 LE | height u32 LE | channels u8 | lz4 block
//! ```
//!
//! The lz4 block carries its uncompressed size as a 4-byte prefix. That
//! size is checked against the header before decompressing, so a hostile
//! blob cannot make us allocate more than its declared shape.
//! Encoding is lossless, which matters for fog: masks gate visibility.

use std::fmt;

use tabletop_protocol::Blob;

use crate::StateError;

/// Channels of a cell drawing (RGBA).
pub const CELL_CHANNELS: u8 = 4;
/// Channels of a fog mask.
pub const FOG_CHANNELS: u8 = 1;
/// Fog mask value for a hidden pixel.
pub const FOG_HIDDEN: u8 = 255;
/// Fog mask value for a revealed pixel.
pub const FOG_REVEALED: u8 = 0;

const MAGIC: &[u8; 4] = b"RSTR";
const HEADER_LEN: usize = 13;
/// Largest pixel buffer a blob may declare.
const MAX_PIXEL_BYTES: usize = 1 << 30;

/// A fixed-size pixel buffer, row-major, interleaved channels.
#[derive(Clone, PartialEq, Eq)]
pub struct Raster {
    width: u32,
    height: u32,
    channels: u8,
    pixels: Vec<u8>,
}

impl Raster {
    /// A raster with every byte set to `value`.
    pub fn filled(width: u32, height: u32, channels: u8, value: u8) -> Self {
        let len = width as usize * height as usize * channels as usize;
        Self {
            width,
            height,
            channels,
            pixels: vec![value; len],
        }
    }

    /// Wraps an existing buffer, checking its length against the shape.
    pub fn from_pixels(
        width: u32,
        height: u32,
        channels: u8,
        pixels: Vec<u8>,
    ) -> Result<Self, StateError> {
        let expected = width as usize * height as usize * channels as usize;
        if pixels.len() != expected {
            return Err(StateError::CorruptRaster(format!(
                "{} bytes for a {width}x{height}x{channels} raster",
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            channels,
            pixels,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn shape(&self) -> (u32, u32, u8) {
        (self.width, self.height, self.channels)
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Channel values of one pixel, or `None` outside the raster.
    pub fn pixel(&self, x: u32, y: u32) -> Option<&[u8]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let c = self.channels as usize;
        let start = (y as usize * self.width as usize + x as usize) * c;
        self.pixels.get(start..start + c)
    }

    /// Sets every byte to `value`.
    pub fn fill(&mut self, value: u8) {
        self.pixels.fill(value);
    }

    /// Sets every channel of the pixels whose centers fall inside the circle.
    pub fn fill_circle(&mut self, cx: f64, cy: f64, radius: f64, value: u8) {
        if radius.is_nan() || radius <= 0.0 || self.width == 0 || self.height == 0 {
            return;
        }
        let x0 = (cx - radius).floor().max(0.0) as u32;
        let y0 = (cy - radius).floor().max(0.0) as u32;
        let x1 = ((cx + radius).ceil().max(0.0) as u32).min(self.width - 1);
        let y1 = ((cy + radius).ceil().max(0.0) as u32).min(self.height - 1);
        let r2 = radius * radius;
        let c = self.channels as usize;

        for y in y0..=y1 {
            let dy = y as f64 + 0.5 - cy;
            for x in x0..=x1 {
                let dx = x as f64 + 0.5 - cx;
                if dx * dx + dy * dy <= r2 {
                    let start = (y as usize * self.width as usize + x as usize) * c;
                    self.pixels[start..start + c].fill(value);
                }
            }
        }
    }

    /// Encodes into a self-contained blob.
    pub fn encode(&self) -> Blob {
        let compressed = lz4_flex::compress_prepend_size(&self.pixels);
        let mut bytes = Vec::with_capacity(HEADER_LEN + compressed.len());
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&self.width.to_le_bytes());
        bytes.extend_from_slice(&self.height.to_le_bytes());
        bytes.push(self.channels);
        bytes.extend_from_slice(&compressed);
        Blob::encode(&bytes)
    }

    /// Decodes a blob of any shape.
    pub fn decode(blob: &Blob) -> Result<Self, StateError> {
        Self::decode_checked(blob, None)
    }

    /// Decodes a blob and requires a specific shape.
    ///
    /// The header is checked against `expected` before anything is
    /// decompressed, so a blob declaring some other shape never
    /// allocates its payload.
    pub fn decode_shaped(blob: &Blob, expected: (u32, u32, u8)) -> Result<Self, StateError> {
        Self::decode_checked(blob, Some(expected))
    }

    fn decode_checked(blob: &Blob, shape: Option<(u32, u32, u8)>) -> Result<Self, StateError> {
        let bytes = blob.decode()?;
        if bytes.len() < HEADER_LEN + 4 || &bytes[..4] != MAGIC {
            return Err(StateError::CorruptRaster("missing raster header".into()));
        }
        let width = read_u32(&bytes[4..8]);
        let height = read_u32(&bytes[8..12]);
        let channels = bytes[12];
        let body = &bytes[HEADER_LEN..];

        if let Some(expected) = shape {
            let found = (width, height, channels);
            if found != expected {
                return Err(StateError::RasterShape { expected, found });
            }
        }

        let needed = (width as usize)
            .checked_mul(height as usize)
            .and_then(|n| n.checked_mul(channels as usize))
            .filter(|n| *n <= MAX_PIXEL_BYTES)
            .ok_or_else(|| StateError::CorruptRaster("declared shape too large".into()))?;
        let declared = read_u32(&body[..4]) as usize;
        if declared != needed {
            return Err(StateError::CorruptRaster(format!(
                "payload declares {declared} bytes, shape needs {needed}"
            )));
        }

        let pixels = lz4_flex::decompress_size_prepended(body)
            .map_err(|e| StateError::CorruptRaster(e.to_string()))?;
        Self::from_pixels(width, height, channels, pixels)
    }

    pub(crate) fn expect_shape(&self, expected: (u32, u32, u8)) -> Result<(), StateError> {
        if self.shape() != expected {
            return Err(StateError::RasterShape {
                expected,
                found: self.shape(),
            });
        }
        Ok(())
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(buf)
}

impl fmt::Debug for Raster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Raster")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("channels", &self.channels)
            .finish_non_exhaustive()
    }
}
