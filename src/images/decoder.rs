use std::time::Instant;

use image::ImageError;
use log::trace;

use super::{DecodeError, DecodedImage, Decoder};

/// Decoder backed by the `image` crate
#[derive(Clone, Copy, Debug, Default)]
pub struct RasterDecoder;

impl RasterDecoder {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Decoder for RasterDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<DecodedImage, DecodeError> {
        let start = Instant::now();
        let image = image::load_from_memory(bytes).map_err(|e| match e {
            ImageError::Unsupported(u) => DecodeError::UnsupportedFormat(u.to_string()),
            other => DecodeError::CorruptData(other.to_string()),
        })?;
        let rgba = image.into_rgba8();
        let (width, height) = rgba.dimensions();
        trace!(
            "Decoded {width}x{height} image in {:.1}ms",
            start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(DecodedImage {
            width,
            height,
            pixels: rgba.into_raw(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_helpers::png_bytes;

    #[test]
    fn decodes_png() {
        let image = RasterDecoder::new().decode(&png_bytes(7, 3)).unwrap();
        assert_eq!((image.width, image.height), (7, 3));
        assert_eq!(image.pixels.len(), 7 * 3 * 4);
    }

    #[test]
    fn unknown_bytes_are_unsupported() {
        let err = RasterDecoder::new().decode(b"plain text, not an image").unwrap_err();
        assert!(matches!(err, DecodeError::UnsupportedFormat(_)));
    }

    #[test]
    fn truncated_png_is_corrupt() {
        let mut bytes = png_bytes(16, 16);
        bytes.truncate(bytes.len() / 2);
        let err = RasterDecoder::new().decode(&bytes).unwrap_err();
        assert!(matches!(err, DecodeError::CorruptData(_)));
    }
}
