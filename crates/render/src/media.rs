//! The media element a render attempt decodes through.
//!
//! [`MediaElement`] mirrors the small surface of a playable video the render
//! worker needs: load a stream positioned at a timestamp, seek, report
//! readiness and capture the current frame. Elements are created by a
//! [`MediaBackend`] and may be kept on a rendered cache entry so a later
//! attempt for the same video can seek instead of reloading.

use std::sync::Arc;

use async_trait::async_trait;
use image::RgbaImage;

/// How much data an element has buffered at its current position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReadyState {
    HaveNothing,
    HaveMetadata,
    HaveCurrentData,
    HaveFutureData,
    HaveEnoughData,
}

impl ReadyState {
    /// Whether a frame can be captured at the current position.
    pub fn has_current_frame(self) -> bool {
        self >= ReadyState::HaveCurrentData
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("Failed to load stream: {0}")]
    Load(String),

    #[error("Seek failed: {0}")]
    Seek(String),

    #[error("Failed to decode frame: {0}")]
    Decode(String),

    #[error("Media element has no stream loaded")]
    NotLoaded,
}

/// A decodable video handle. Methods take `&self`; implementations keep
/// their playback state behind interior mutability so a handle can be
/// shared through an [`Arc`].
#[async_trait]
pub trait MediaElement: Send + Sync {
    /// Load `url` positioned at `timestamp`. Resolves once data at that
    /// position is available.
    async fn load(&self, url: &str, timestamp: f64) -> Result<(), MediaError>;

    /// Move an already loaded element to `timestamp`. Resolves once the
    /// seek has completed.
    async fn seek(&self, timestamp: f64) -> Result<(), MediaError>;

    /// Wait for an in-progress seek to finish.
    async fn seeked(&self) -> Result<(), MediaError>;

    fn ready_state(&self) -> ReadyState;

    fn is_seeking(&self) -> bool;

    /// Native `(width, height)` of the loaded stream.
    fn video_size(&self) -> (u32, u32);

    /// Capture the frame at the current position.
    async fn capture_frame(&self) -> Result<RgbaImage, MediaError>;

    /// Drop the stream and free decoder resources. The element may be
    /// loaded again afterwards.
    fn release(&self);
}

/// Factory for fresh media elements.
pub trait MediaBackend: Send + Sync {
    fn create_element(&self) -> Arc<dyn MediaElement>;
}
