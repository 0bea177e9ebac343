//! Rendered frames and their encoding.

use std::io::Cursor;
use std::sync::Arc;

use image::codecs::webp::WebPEncoder;
use image::{ExtendedColorType, ImageReader, RgbaImage};

/// Dimensions assumed for a remote frame whose header cannot be read.
pub const REMOTE_FRAME_FALLBACK_SIZE: (u32, u32) = (1280, 720);

/// An encoded thumbnail ready to be painted.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedFrame {
    /// Encoded image payload.
    pub image: Arc<[u8]>,
    pub width: u32,
    pub height: u32,
    /// Position in the video the frame was taken from, in seconds.
    pub timestamp: f64,
    /// Produced by the remote thumbnail cache rather than a local decode.
    pub from_remote: bool,
}

impl RenderedFrame {
    /// Wrap a frame delivered by the remote thumbnail cache, reading its
    /// dimensions from the image header.
    pub fn from_remote(timestamp: f64, image: Vec<u8>) -> Self {
        let (width, height) = image_dimensions(&image).unwrap_or(REMOTE_FRAME_FALLBACK_SIZE);
        Self {
            image: image.into(),
            width,
            height,
            timestamp,
            from_remote: true,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("Failed to encode frame: {0}")]
    Image(#[from] image::ImageError),

    #[error("Encoder task failed: {0}")]
    Join(String),
}

/// Encode an RGBA frame as lossless WebP.
pub fn encode_webp(frame: &RgbaImage) -> Result<Vec<u8>, EncodeError> {
    let mut out = Vec::new();
    WebPEncoder::new_lossless(&mut out).encode(
        frame.as_raw(),
        frame.width(),
        frame.height(),
        ExtendedColorType::Rgba8,
    )?;
    Ok(out)
}

/// Encode on the blocking pool so a large frame does not stall the runtime.
pub async fn encode_frame(frame: RgbaImage) -> Result<Vec<u8>, EncodeError> {
    tokio::task::spawn_blocking(move || encode_webp(&frame))
        .await
        .map_err(|e| EncodeError::Join(e.to_string()))?
}

/// Read `(width, height)` from an encoded image's header without decoding it.
pub fn image_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}
