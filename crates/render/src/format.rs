//! Playback format lookup.
//!
//! Before decoding, a render attempt asks a [`FormatResolver`] which stream
//! to open for a video. The resolver may instead report that the frame is
//! already available from the remote thumbnail cache, in which case no
//! local decode happens at all.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use rebrand_core::sync::lock;
use rebrand_core::VideoId;

/// A decodable stream and its native dimensions.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackFormat {
    pub url: String,
    pub width: u32,
    pub height: u32,
}

/// Result of a format lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum FormatLookup {
    /// Decode locally from this stream.
    Stream(PlaybackFormat),
    /// The frame is already served by the remote thumbnail cache.
    ServedFromRemoteCache,
}

#[async_trait]
pub trait FormatResolver: Send + Sync {
    /// Pick a stream for `video_id` suitable for a `width`×`height` frame.
    /// `None` means no usable format exists.
    async fn playback_format(
        &self,
        video_id: &VideoId,
        width: u32,
        height: u32,
    ) -> Option<FormatLookup>;
}

/// Resolver over a fixed table of known streams.
#[derive(Debug, Default)]
pub struct StaticFormatResolver {
    formats: Mutex<HashMap<VideoId, PlaybackFormat>>,
}

impl StaticFormatResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, video_id: VideoId, format: PlaybackFormat) {
        lock(&self.formats).insert(video_id, format);
    }
}

#[async_trait]
impl FormatResolver for StaticFormatResolver {
    async fn playback_format(
        &self,
        video_id: &VideoId,
        _width: u32,
        _height: u32,
    ) -> Option<FormatLookup> {
        lock(&self.formats)
            .get(video_id)
            .cloned()
            .map(FormatLookup::Stream)
    }
}
