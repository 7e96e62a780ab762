//! Carrier canvas allocation and raster file I/O.
//!
//! Issued carriers are solid white RGB8 canvases rendered as PNG (lossless,
//! so the LSB plane survives). Submitted files may be any format the `image`
//! crate decodes; they are normalized to RGB8 before extraction.

use super::codec::PixelBuffer;
use image::{DynamicImage, ImageFormat, ImageReader, Limits, RgbImage};
use std::io::Cursor;

/// Channels per pixel of the carrier format (RGB).
pub const CARRIER_CHANNELS: u8 = 3;

/// Default canvas, matching the images handed out by earlier deployments.
pub const DEFAULT_WIDTH: u32 = 800;
pub const DEFAULT_HEIGHT: u32 = 600;

/// Submitted files larger than this on either side are refused.
pub const DEFAULT_MAX_DIMENSION: u32 = 4096;

#[derive(Debug, thiserror::Error)]
pub enum CarrierError {
    #[error("could not decode image: {0}")]
    Decode(#[source] image::ImageError),
    #[error("could not encode image: {0}")]
    Encode(#[source] image::ImageError),
    #[error("pixel buffer is not a 3-channel {width}x{height} image")]
    DimensionMismatch { width: u32, height: u32 },
    #[error("could not read image: {0}")]
    Io(#[from] std::io::Error),
}

/// Fixed carrier geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CarrierSpec {
    pub width: u32,
    pub height: u32,
}

impl Default for CarrierSpec {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
        }
    }
}

impl CarrierSpec {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A fresh solid-white canvas.
    pub fn blank(&self) -> PixelBuffer {
        PixelBuffer::filled(self.width, self.height, CARRIER_CHANNELS, 0xFF)
    }

    /// Payload bytes this canvas can hold, or `None` when `width × height ×
    /// channels` overflows. Computed from the geometry alone; nothing is
    /// allocated.
    pub fn capacity_bytes(&self) -> Option<u64> {
        let bits = u64::from(self.width)
            .checked_mul(u64::from(self.height))?
            .checked_mul(u64::from(CARRIER_CHANNELS))?;
        usize::try_from(bits).ok()?;
        Some(bits.saturating_sub(super::codec::HEADER_BITS) / 8)
    }
}

/// Render an RGB8 pixel buffer as PNG bytes.
pub fn render_png(pixels: &PixelBuffer) -> Result<Vec<u8>, CarrierError> {
    if pixels.channels() != CARRIER_CHANNELS {
        return Err(CarrierError::DimensionMismatch {
            width: pixels.width(),
            height: pixels.height(),
        });
    }
    let (width, height) = (pixels.width(), pixels.height());
    let rgb = RgbImage::from_raw(width, height, pixels.as_bytes().to_vec())
        .ok_or(CarrierError::DimensionMismatch { width, height })?;

    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(rgb)
        .write_to(&mut out, ImageFormat::Png)
        .map_err(CarrierError::Encode)?;
    Ok(out.into_inner())
}

/// Decode a submitted raster file into the carrier pixel format.
///
/// Alpha and higher bit depths are dropped by the RGB8 conversion; the LSB
/// plane of an RGB8 PNG is preserved exactly.
pub fn decode(bytes: &[u8], max_dimension: u32) -> Result<PixelBuffer, CarrierError> {
    let mut limits = Limits::default();
    limits.max_image_width = Some(max_dimension);
    limits.max_image_height = Some(max_dimension);

    let mut reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
    reader.limits(limits);
    let rgb = reader.decode().map_err(CarrierError::Decode)?.to_rgb8();

    let (width, height) = rgb.dimensions();
    PixelBuffer::from_raw(width, height, CARRIER_CHANNELS, rgb.into_raw())
        .ok_or(CarrierError::DimensionMismatch { width, height })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stego::codec;

    #[test]
    fn default_canvas_matches_legacy_size() {
        let spec = CarrierSpec::default();
        let blank = spec.blank();
        assert_eq!((blank.width(), blank.height()), (800, 600));
        assert_eq!(blank.channels(), 3);
        assert!(blank.as_bytes().iter().all(|b| *b == 0xFF));
        assert_eq!(spec.capacity_bytes(), Some((800 * 600 * 3 - 32) / 8));
        assert_eq!(spec.capacity_bytes(), Some(codec::capacity_bytes(&blank)));
    }

    #[test]
    fn capacity_matches_allocated_canvas() {
        for (w, h) in [(1, 1), (3, 3), (16, 16), (97, 41)] {
            let spec = CarrierSpec::new(w, h);
            let allocated = codec::capacity_bytes(&spec.blank());
            assert_eq!(spec.capacity_bytes(), Some(allocated), "{w}x{h}");
        }
    }

    #[test]
    fn oversized_geometry_has_no_capacity() {
        assert_eq!(CarrierSpec::new(u32::MAX, u32::MAX).capacity_bytes(), None);
    }

    #[test]
    fn png_round_trip_keeps_embedded_payload() {
        let spec = CarrierSpec::new(64, 48);
        let stego = codec::embed(&spec.blank(), b"lossless please").unwrap();
        let png = render_png(&stego).unwrap();
        assert_eq!(&png[1..4], b"PNG");

        let decoded = decode(&png, DEFAULT_MAX_DIMENSION).unwrap();
        assert_eq!(decoded, stego);
        assert_eq!(codec::extract(&decoded).unwrap(), b"lossless please");
    }

    #[test]
    fn rgba_upload_is_normalized_to_rgb() {
        let spec = CarrierSpec::new(16, 16);
        let stego = codec::embed(&spec.blank(), b"rgba").unwrap();
        let rgb = RgbImage::from_raw(16, 16, stego.as_bytes().to_vec()).unwrap();
        let rgba = DynamicImage::ImageRgb8(rgb).to_rgba8();

        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(rgba)
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();

        let decoded = decode(&out.into_inner(), DEFAULT_MAX_DIMENSION).unwrap();
        assert_eq!(decoded.channels(), 3);
        assert_eq!(codec::extract(&decoded).unwrap(), b"rgba");
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        let err = decode(b"definitely not an image", DEFAULT_MAX_DIMENSION).unwrap_err();
        assert!(matches!(err, CarrierError::Decode(_)));
    }

    #[test]
    fn oversized_upload_is_refused() {
        let png = render_png(&CarrierSpec::new(32, 8).blank()).unwrap();
        assert!(decode(&png, 16).is_err());
    }

    #[test]
    fn render_rejects_non_rgb_buffers() {
        let gray = PixelBuffer::filled(4, 4, 1, 0);
        assert!(matches!(
            render_png(&gray),
            Err(CarrierError::DimensionMismatch { .. })
        ));
    }
}
