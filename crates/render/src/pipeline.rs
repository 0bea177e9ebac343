//! [`ThumbnailPipeline`]: the operations the UI layer calls.
//!
//! Ties the branding service to the render machinery. Every public
//! operation resolves to a usable result or an explicit absence; render
//! errors are logged and mapped to `None` here.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Notify};

use rebrand_branding::BrandingService;
use rebrand_core::{PipelineConfig, ThumbnailCandidate, TitleCandidate, VideoId};

use crate::cancel::StopReason;
use crate::error::RenderError;
use crate::format::FormatResolver;
use crate::frame::RenderedFrame;
use crate::media::MediaBackend;
use crate::remote::{RemoteEvent, RemoteRenderer};
use crate::worker::{RenderContext, RenderRequest, RenderSettings, RenderWorker};

/// A thumbnail the UI wants painted.
#[derive(Debug, Clone, PartialEq)]
pub struct ThumbnailRequest {
    pub video_id: VideoId,
    pub width: u32,
    pub height: u32,
    /// Render this timestamp instead of the best thumbnail candidate's.
    pub timestamp: Option<f64>,
    /// Look branding up through the hash-bucket endpoint.
    pub by_hash: bool,
    pub keep_media: bool,
}

impl ThumbnailRequest {
    pub fn new(video_id: VideoId, width: u32, height: u32) -> Self {
        Self {
            video_id,
            width,
            height,
            timestamp: None,
            by_hash: true,
            keep_media: false,
        }
    }

    pub fn at(mut self, timestamp: f64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

pub struct ThumbnailPipeline {
    branding: Arc<BrandingService>,
    render: RenderContext,
    /// Woken on every remote frame or remote failure.
    remote_activity: Notify,
    start_local_render_timeout: Duration,
}

impl ThumbnailPipeline {
    pub fn new(
        config: &PipelineConfig,
        branding: Arc<BrandingService>,
        formats: Arc<dyn FormatResolver>,
        media: Arc<dyn MediaBackend>,
        remote: Arc<dyn RemoteRenderer>,
    ) -> Self {
        Self::with_settings(
            config.max_active_renders,
            RenderSettings::from_config(config),
            config.start_local_render_timeout,
            branding,
            formats,
            media,
            remote,
        )
    }

    pub fn with_settings(
        max_active_renders: usize,
        settings: RenderSettings,
        start_local_render_timeout: Duration,
        branding: Arc<BrandingService>,
        formats: Arc<dyn FormatResolver>,
        media: Arc<dyn MediaBackend>,
        remote: Arc<dyn RemoteRenderer>,
    ) -> Self {
        Self {
            branding,
            render: RenderContext::new(max_active_renders, settings, formats, media, remote),
            remote_activity: Notify::new(),
            start_local_render_timeout,
        }
    }

    pub fn branding(&self) -> &BrandingService {
        &self.branding
    }

    pub fn context(&self) -> &RenderContext {
        &self.render
    }

    // ---- branding ----

    pub async fn get_best_thumbnail(
        &self,
        video_id: &VideoId,
        by_hash: bool,
    ) -> Option<ThumbnailCandidate> {
        self.branding.get_best_thumbnail(video_id, by_hash).await
    }

    pub async fn get_best_title(&self, video_id: &VideoId, by_hash: bool) -> Option<TitleCandidate> {
        self.branding.get_best_title(video_id, by_hash).await
    }

    pub async fn display_title(
        &self,
        video_id: &VideoId,
        by_hash: bool,
        original_title: &str,
    ) -> String {
        self.branding
            .display_title(video_id, by_hash, original_title)
            .await
    }

    /// Force the next branding read for `video_id` to refetch.
    pub fn invalidate(&self, video_id: &VideoId) {
        self.branding.invalidate(video_id);
    }

    // ---- rendering ----

    /// Produce the custom thumbnail for a video.
    ///
    /// Without an explicit timestamp the best thumbnail candidate decides;
    /// a missing or "original" candidate yields `None`. A stopped or
    /// superseded attempt is retried once at 0×0 before giving up.
    pub async fn create_thumbnail(&self, request: &ThumbnailRequest) -> Option<RenderedFrame> {
        let video_id = &request.video_id;
        let timestamp = match request.timestamp {
            Some(timestamp) => timestamp,
            None => self
                .branding
                .get_best_thumbnail(video_id, request.by_hash)
                .await?
                .render_timestamp()?,
        };

        self.wait_for_remote_fetch(video_id, timestamp).await;

        let primary = RenderRequest {
            keep_media: request.keep_media,
            ..RenderRequest::new(video_id.clone(), request.width, request.height, timestamp)
        };
        match self.render(&primary).await {
            Ok(frame) => frame,
            Err(e @ (RenderError::Superseded | RenderError::Stopped(StopReason::PreRendered))) => {
                tracing::debug!(
                    video_id = %video_id,
                    timestamp,
                    reason = %e,
                    "Retrying render at lower resolution",
                );
                match self.render(&primary.degraded()).await {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::warn!(
                            video_id = %video_id,
                            timestamp,
                            error = %e,
                            "Failed to render thumbnail",
                        );
                        None
                    }
                }
            }
            Err(e) => {
                tracing::debug!(
                    video_id = %video_id,
                    timestamp,
                    error = %e,
                    "No thumbnail rendered",
                );
                None
            }
        }
    }

    /// Run a single render attempt.
    pub async fn render(
        &self,
        request: &RenderRequest,
    ) -> Result<Option<RenderedFrame>, RenderError> {
        RenderWorker::new(&self.render, request).run().await
    }

    /// Give an in-flight remote fetch a head start before decoding locally.
    async fn wait_for_remote_fetch(&self, video_id: &VideoId, timestamp: f64) {
        let notified = self.remote_activity.notified();
        if !self.render.remote.is_fetching(video_id, timestamp) {
            return;
        }
        tracing::debug!(
            video_id = %video_id,
            timestamp,
            "Waiting for remote thumbnail before rendering locally",
        );
        let _ = tokio::time::timeout(self.start_local_render_timeout, notified).await;
    }

    pub fn is_cached_thumbnail_loaded(&self, video_id: &VideoId, timestamp: f64) -> bool {
        self.render.frames.is_cached_thumbnail_loaded(video_id, timestamp)
    }

    /// Stop every render for `video_id` and forget its frames.
    pub fn release_video(&self, video_id: &VideoId) {
        self.render.stops.stop(video_id, StopReason::Invalidated);
        for media in self.render.frames.remove_video(video_id) {
            media.release();
        }
    }

    // ---- remote fallback ----

    /// A pre-rendered frame arrived from the remote cache.
    pub fn pre_rendered_arrived(&self, video_id: &VideoId, timestamp: f64, image: Vec<u8>) {
        let frame = RenderedFrame::from_remote(timestamp, image);
        let resolved = self.render.frames.remote_frame_arrived(video_id, frame);
        self.render.stops.stop(video_id, StopReason::PreRendered);
        let woken = self.render.scheduler.notify_available(video_id);
        self.remote_activity.notify_waiters();
        tracing::debug!(
            video_id = %video_id,
            timestamp,
            resolved,
            woken,
            "Pre-rendered thumbnail arrived",
        );
    }

    /// The remote cache could not render `timestamp`.
    pub fn remote_render_failed(&self, video_id: &VideoId, timestamp: f64) {
        let resolved = self.render.frames.remote_render_failed(video_id, timestamp);
        self.remote_activity.notify_waiters();
        tracing::debug!(
            video_id = %video_id,
            timestamp,
            resolved,
            "Remote thumbnail render failed",
        );
    }

    /// Apply remote events until the sending side closes.
    pub async fn run_remote_listener(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<RemoteEvent>,
    ) {
        while let Some(event) = events.recv().await {
            match event {
                RemoteEvent::Frame {
                    video_id,
                    timestamp,
                    image,
                } => self.pre_rendered_arrived(&video_id, timestamp, image),
                RemoteEvent::Failed {
                    video_id,
                    timestamp,
                } => self.remote_render_failed(&video_id, timestamp),
            }
        }
        tracing::debug!("Remote event channel closed");
    }
}
