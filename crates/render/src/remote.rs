//! Remote thumbnail cache: the fallback renderer.
//!
//! When a local decode fails, the [`RemoteRenderer`] is asked to produce the
//! frame server-side. Results arrive later as [`RemoteEvent`]s, which the
//! pipeline's listener turns into frame cache updates.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::StatusCode;
use tokio::sync::mpsc;

use rebrand_core::sync::lock;
use rebrand_core::VideoId;

/// Asks a remote service to render frames.
pub trait RemoteRenderer: Send + Sync {
    /// Request a render of `video_id` at `timestamp`. Delivery happens out
    /// of band; repeated requests for a frame already being fetched are
    /// ignored.
    fn request_render(&self, video_id: &VideoId, timestamp: f64);

    /// Whether a fetch for this frame is in flight.
    fn is_fetching(&self, video_id: &VideoId, timestamp: f64) -> bool;
}

/// Renderer used when the remote cache is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRemoteRenderer;

impl RemoteRenderer for NoRemoteRenderer {
    fn request_render(&self, video_id: &VideoId, timestamp: f64) {
        tracing::debug!(video_id = %video_id, timestamp, "Remote rendering disabled");
    }

    fn is_fetching(&self, _video_id: &VideoId, _timestamp: f64) -> bool {
        false
    }
}

/// Outcome of a remote render.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteEvent {
    /// The encoded frame is available.
    Frame {
        video_id: VideoId,
        timestamp: f64,
        image: Vec<u8>,
    },
    /// The remote cache could not produce the frame.
    Failed { video_id: VideoId, timestamp: f64 },
}

#[derive(Debug, thiserror::Error)]
pub enum ThumbnailCacheError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Thumbnail cache error ({status}): {body}")]
    ApiError { status: u16, body: String },

    #[error("Thumbnail cache returned an empty body")]
    Empty,
}

type FetchKey = (VideoId, u64);

fn fetch_key(video_id: &VideoId, timestamp: f64) -> FetchKey {
    (video_id.clone(), timestamp.to_bits())
}

struct ClientInner {
    client: reqwest::Client,
    server_url: String,
    events: mpsc::UnboundedSender<RemoteEvent>,
    in_flight: Mutex<HashSet<FetchKey>>,
}

/// HTTP client for `GET /api/v1/getThumbnail`. Cheap to clone.
#[derive(Clone)]
pub struct ThumbnailCacheClient {
    inner: Arc<ClientInner>,
}

impl ThumbnailCacheClient {
    /// Create a client for the cache at `server_url`, delivering results to
    /// `events`.
    pub fn new(
        server_url: String,
        timeout: Duration,
        events: mpsc::UnboundedSender<RemoteEvent>,
    ) -> Result<Self, ThumbnailCacheError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, server_url, events))
    }

    pub fn with_client(
        client: reqwest::Client,
        server_url: String,
        events: mpsc::UnboundedSender<RemoteEvent>,
    ) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                client,
                server_url,
                events,
                in_flight: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// Fetch the frame, asking the server to generate it if needed.
    pub async fn fetch_thumbnail(
        &self,
        video_id: &VideoId,
        timestamp: f64,
    ) -> Result<Vec<u8>, ThumbnailCacheError> {
        self.inner.fetch(video_id, timestamp).await
    }
}

impl ClientInner {
    async fn fetch(
        &self,
        video_id: &VideoId,
        timestamp: f64,
    ) -> Result<Vec<u8>, ThumbnailCacheError> {
        let time = timestamp.to_string();
        let response = self
            .client
            .get(format!("{}/api/v1/getThumbnail", self.server_url))
            .query(&[
                ("videoID", video_id.as_str()),
                ("time", time.as_str()),
                ("generateNow", "true"),
            ])
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ThumbnailCacheError::ApiError {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(ThumbnailCacheError::Empty);
        }
        Ok(bytes.to_vec())
    }

    async fn fetch_and_report(self: Arc<Self>, video_id: VideoId, timestamp: f64) {
        let event = match self.fetch(&video_id, timestamp).await {
            Ok(image) => RemoteEvent::Frame {
                video_id: video_id.clone(),
                timestamp,
                image,
            },
            Err(e) => {
                tracing::warn!(
                    video_id = %video_id,
                    timestamp,
                    error = %e,
                    "Remote thumbnail render failed",
                );
                RemoteEvent::Failed {
                    video_id: video_id.clone(),
                    timestamp,
                }
            }
        };
        lock(&self.in_flight).remove(&fetch_key(&video_id, timestamp));
        if self.events.send(event).is_err() {
            tracing::debug!(video_id = %video_id, "Remote event listener gone");
        }
    }
}

impl RemoteRenderer for ThumbnailCacheClient {
    fn request_render(&self, video_id: &VideoId, timestamp: f64) {
        if !lock(&self.inner.in_flight).insert(fetch_key(video_id, timestamp)) {
            return;
        }
        tracing::info!(video_id = %video_id, timestamp, "Requesting remote thumbnail render");

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let inner = Arc::clone(&self.inner);
                handle.spawn(inner.fetch_and_report(video_id.clone(), timestamp));
            }
            Err(_) => {
                lock(&self.inner.in_flight).remove(&fetch_key(video_id, timestamp));
                let _ = self.inner.events.send(RemoteEvent::Failed {
                    video_id: video_id.clone(),
                    timestamp,
                });
            }
        }
    }

    fn is_fetching(&self, video_id: &VideoId, timestamp: f64) -> bool {
        lock(&self.inner.in_flight).contains(&fetch_key(video_id, timestamp))
    }
}
