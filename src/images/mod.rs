//! Page image decoding

mod decoder;

pub use decoder::RasterDecoder;

/// File extensions of page images the decoder understands
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "png",
    "jpg",
    "jpeg",
    "gif",
    "webp",
    #[cfg(feature = "image-bmp")]
    "bmp",
    #[cfg(feature = "image-tiff")]
    "tif",
    #[cfg(feature = "image-tiff")]
    "tiff",
];

/// Errors from turning encoded bytes into pixels
#[derive(Debug, Clone, thiserror::Error)]
pub enum DecodeError {
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),

    #[error("corrupt image data: {0}")]
    CorruptData(String),
}

/// A fully decoded page, ready for display.
///
/// Pixels are tightly packed RGBA8 rows.
#[derive(Clone)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl DecodedImage {
    /// Wider than tall: a single image spanning two physical pages
    #[must_use]
    pub fn is_two_page_spread(&self) -> bool {
        self.width > self.height
    }
}

impl std::fmt::Debug for DecodedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodedImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

/// Converts encoded page bytes into a [`DecodedImage`]
pub trait Decoder: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<DecodedImage, DecodeError>;
}

/// Combined size of images laid out side by side with `gap` pixels between
/// neighbours: (total width, tallest height). The width saturates at
/// `u32::MAX`.
#[must_use]
pub fn spread_size<'a>(images: impl IntoIterator<Item = &'a DecodedImage>, gap: u32) -> (u32, u32) {
    let mut width = 0u32;
    let mut height = 0u32;
    for (i, image) in images.into_iter().enumerate() {
        if i > 0 {
            width = width.saturating_add(gap);
        }
        width = width.saturating_add(image.width);
        height = height.max(image.height);
    }
    (width, height)
}
