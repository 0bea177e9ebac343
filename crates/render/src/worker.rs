//! The render worker: one attempt to produce a frame.
//!
//! A [`RenderWorker`] walks a fixed sequence of phases:
//!
//! ```text
//! Init -> AwaitingSlot -> AwaitingFormat -> Seeking -> Decoding -> Encoding -> Done
//!            |                 |               |           |           |
//!            +-----------------+---------------+-----------+-----------+--> Failed
//! ```
//!
//! `Init` either finds the frame in the [`FrameCache`] (done), attaches to
//! an identical in-progress attempt (done once that one settles), or claims
//! a pending entry for itself. Every later phase races the video's stop
//! signal, and everything after slot admission also races the attempt's
//! deadline, which is measured from the start of the attempt.
//!
//! A held [`RenderSlot`] is dropped as soon as the local attempt concludes,
//! before waiting on any remote fallback.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, sleep_until, timeout, Instant};

use rebrand_core::{PipelineConfig, VideoId};

use crate::cancel::{CancellationRegistry, StopReason};
use crate::error::RenderError;
use crate::format::{FormatLookup, FormatResolver};
use crate::frame::{encode_frame, RenderedFrame};
use crate::frame_cache::{
    Claim, EntryId, FailureOutcome, FrameCache, FrameWaiter, Lookup, Settlement,
};
use crate::media::{MediaBackend, MediaElement};
use crate::remote::RemoteRenderer;
use crate::scheduler::{Admission, RenderScheduler, RenderSlot, SlotError};

/// Delay between readiness checks while a media element buffers.
pub const READY_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Position used instead of 0 so the first frame is not blank.
pub const ZERO_TIMESTAMP_NUDGE: f64 = 0.001;

/// What to render.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderRequest {
    pub video_id: VideoId,
    /// Minimum acceptable size; 0×0 accepts any size.
    pub width: u32,
    pub height: u32,
    pub timestamp: f64,
    /// Keep the media element on the cache entry for later reuse.
    pub keep_media: bool,
}

impl RenderRequest {
    pub fn new(video_id: VideoId, width: u32, height: u32, timestamp: f64) -> Self {
        Self {
            video_id,
            width,
            height,
            timestamp,
            keep_media: false,
        }
    }

    /// The same request accepting a frame of any size.
    pub fn degraded(&self) -> Self {
        Self {
            width: 0,
            height: 0,
            ..self.clone()
        }
    }
}

/// Timing and policy knobs of a render attempt.
#[derive(Debug, Clone)]
pub struct RenderSettings {
    /// Whole-attempt deadline, slot wait included.
    pub render_timeout: Duration,
    /// How long a failed attempt waits for the remote fallback.
    pub fallback_timeout: Duration,
    pub fallback_enabled: bool,
    pub nudge_zero_timestamp: bool,
    pub ready_poll_interval: Duration,
}

impl RenderSettings {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            render_timeout: config.render_timeout,
            fallback_timeout: config.fallback_timeout,
            fallback_enabled: config.remote_fallback_enabled(),
            nudge_zero_timestamp: !config.constrained_platform,
            ready_poll_interval: READY_POLL_INTERVAL,
        }
    }
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

/// Everything a render attempt works against.
pub struct RenderContext {
    pub frames: FrameCache,
    pub scheduler: RenderScheduler,
    pub stops: CancellationRegistry,
    pub formats: Arc<dyn FormatResolver>,
    pub media: Arc<dyn MediaBackend>,
    pub remote: Arc<dyn RemoteRenderer>,
    pub settings: RenderSettings,
}

impl RenderContext {
    pub fn new(
        max_active_renders: usize,
        settings: RenderSettings,
        formats: Arc<dyn FormatResolver>,
        media: Arc<dyn MediaBackend>,
        remote: Arc<dyn RemoteRenderer>,
    ) -> Self {
        Self {
            frames: FrameCache::new(),
            scheduler: RenderScheduler::new(max_active_renders),
            stops: CancellationRegistry::new(),
            formats,
            media,
            remote,
            settings,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderPhase {
    Init,
    AwaitingSlot,
    AwaitingFormat,
    Seeking,
    Decoding,
    Encoding,
    Done,
    Failed,
}

/// Result of racing one phase against the stop signal and the deadline.
enum Step<T> {
    Stopped(StopReason),
    TimedOut,
    Ready(T),
}

/// The pending entry this attempt owns, and the media element it decodes
/// through.
struct Attempt {
    entry_id: EntryId,
    waiter: FrameWaiter,
    media: Option<Arc<dyn MediaElement>>,
    reused: bool,
}

impl Attempt {
    fn release_media(&mut self) {
        if let Some(media) = self.media.take() {
            media.release();
        }
    }

    /// The entry was settled by someone else (a remote frame arrived).
    fn settled_elsewhere(&mut self) -> Option<RenderedFrame> {
        match self.waiter.try_recv() {
            Ok(Settlement::Frame(frame)) => Some(frame),
            _ => None,
        }
    }
}

/// One render attempt.
pub struct RenderWorker<'a> {
    ctx: &'a RenderContext,
    request: &'a RenderRequest,
    phase: RenderPhase,
    started: Instant,
    deadline: Instant,
}

impl<'a> RenderWorker<'a> {
    pub fn new(ctx: &'a RenderContext, request: &'a RenderRequest) -> Self {
        let started = Instant::now();
        Self {
            ctx,
            request,
            phase: RenderPhase::Init,
            started,
            deadline: started + ctx.settings.render_timeout,
        }
    }

    /// Run the attempt to completion.
    ///
    /// `Ok(None)` means no frame could be produced, locally or remotely.
    /// Errors are the outcomes a caller may react to: a slot-wait timeout,
    /// a stop, or being superseded by a better frame.
    pub async fn run(mut self) -> Result<Option<RenderedFrame>, RenderError> {
        let ctx = self.ctx;
        let request = self.request;
        let video_id = &request.video_id;

        let claim = match ctx.frames.find_or_claim(
            video_id,
            request.width,
            request.height,
            request.timestamp,
        ) {
            Lookup::Rendered(frame) => {
                self.enter(RenderPhase::Done);
                return Ok(Some(frame));
            }
            Lookup::Pending(waiter) => {
                let limit = ctx.settings.render_timeout + ctx.settings.fallback_timeout;
                return match wait_for_settlement(waiter, limit).await {
                    Settlement::Stopped(reason) => {
                        self.enter(RenderPhase::Failed);
                        Err(RenderError::Stopped(reason))
                    }
                    settlement => {
                        self.enter(RenderPhase::Done);
                        Ok(settlement.into_frame())
                    }
                };
            }
            Lookup::Claimed(claim) => claim,
        };

        let Claim {
            entry_id,
            waiter,
            reusable_media,
        } = claim;
        let mut attempt = Attempt {
            entry_id,
            waiter,
            reused: reusable_media.is_some(),
            media: reusable_media,
        };
        let stop = ctx.stops.subscribe(video_id);

        self.enter(RenderPhase::AwaitingSlot);
        let slot = loop {
            let step = tokio::select! {
                biased;
                reason = stop.stopped() => Step::Stopped(reason),
                admission = ctx.scheduler.acquire(video_id, self.deadline) => match admission {
                    Ok(admission) => Step::Ready(admission),
                    Err(SlotError::TimedOut) => Step::TimedOut,
                },
            };
            match step {
                Step::Ready(Admission::Granted(slot)) => break slot,
                Step::Ready(Admission::CacheReady) => {
                    if let Some(frame) = attempt.settled_elsewhere() {
                        attempt.release_media();
                        self.enter(RenderPhase::Done);
                        return Ok(Some(frame));
                    }
                }
                Step::Stopped(reason) => return self.unwind_stopped(attempt, reason),
                Step::TimedOut => {
                    attempt.release_media();
                    ctx.frames.abandon(video_id, attempt.entry_id);
                    self.enter(RenderPhase::Failed);
                    tracing::debug!(
                        video_id = %video_id,
                        timestamp = request.timestamp,
                        "Render timed out waiting for a slot",
                    );
                    return Err(RenderError::TimedOut);
                }
            }
        };

        if let Some(frame) = attempt.settled_elsewhere() {
            attempt.release_media();
            self.enter(RenderPhase::Done);
            return Ok(Some(frame));
        }

        self.enter(RenderPhase::AwaitingFormat);
        let deadline = self.deadline;
        let step = tokio::select! {
            biased;
            reason = stop.stopped() => Step::Stopped(reason),
            _ = sleep_until(deadline) => Step::TimedOut,
            lookup = ctx.formats.playback_format(video_id, request.width, request.height) => {
                Step::Ready(lookup)
            }
        };
        let format = match step {
            Step::Ready(Some(FormatLookup::Stream(format))) => format,
            Step::Ready(Some(FormatLookup::ServedFromRemoteCache)) => {
                drop(slot);
                return Ok(self.serve_from_remote(attempt));
            }
            Step::Ready(None) => return self.fail_over(slot, attempt, RenderError::NoFormat).await,
            Step::TimedOut => return self.fail_over(slot, attempt, RenderError::TimedOut).await,
            Step::Stopped(reason) => {
                drop(slot);
                return self.unwind_stopped(attempt, reason);
            }
        };

        let media = match &attempt.media {
            Some(media) => Arc::clone(media),
            None => {
                let media = ctx.media.create_element();
                attempt.media = Some(Arc::clone(&media));
                media
            }
        };
        ctx.frames
            .begin_decode(video_id, attempt.entry_id, format.width, format.height);

        self.enter(RenderPhase::Seeking);
        let reused = attempt.reused;
        let step = tokio::select! {
            biased;
            reason = stop.stopped() => Step::Stopped(reason),
            _ = sleep_until(deadline) => Step::TimedOut,
            produced = self.decode(&media, &format.url, reused) => Step::Ready(produced),
        };
        drop(media);

        match step {
            Step::Ready(Ok(frame)) => {
                let retain = if request.keep_media {
                    attempt.media.take()
                } else {
                    attempt.release_media();
                    None
                };
                let delivered = ctx
                    .frames
                    .complete(video_id, attempt.entry_id, frame.clone(), retain);
                drop(slot);
                self.enter(RenderPhase::Done);
                tracing::debug!(
                    video_id = %video_id,
                    timestamp = request.timestamp,
                    elapsed_ms = self.elapsed_ms(),
                    resolution = if request.width > 0 { "full" } else { "smaller" },
                    waiters = delivered,
                    "Rendered thumbnail",
                );
                Ok(Some(frame))
            }
            Step::Ready(Err(RenderError::Superseded)) => {
                attempt.release_media();
                drop(slot);
                ctx.frames.supersede(
                    video_id,
                    attempt.entry_id,
                    request.width,
                    request.height,
                    request.timestamp,
                );
                self.enter(RenderPhase::Done);
                tracing::debug!(
                    video_id = %video_id,
                    timestamp = request.timestamp,
                    "Already rendered",
                );
                Err(RenderError::Superseded)
            }
            Step::Ready(Err(e)) => self.fail_over(slot, attempt, e).await,
            Step::TimedOut => self.fail_over(slot, attempt, RenderError::TimedOut).await,
            Step::Stopped(reason) => {
                drop(slot);
                self.unwind_stopped(attempt, reason)
            }
        }
    }

    /// Seeking through Encoding.
    async fn decode(
        &mut self,
        media: &Arc<dyn MediaElement>,
        url: &str,
        reused: bool,
    ) -> Result<RenderedFrame, RenderError> {
        let ctx = self.ctx;
        let request = self.request;
        let position = self.start_position();

        if reused {
            media.seek(position).await?;
        } else {
            media.load(url, position).await?;
        }

        self.enter(RenderPhase::Decoding);
        loop {
            if ctx
                .frames
                .better_rendered(
                    &request.video_id,
                    request.width,
                    request.height,
                    request.timestamp,
                )
                .is_some()
            {
                return Err(RenderError::Superseded);
            }
            if media.is_seeking() {
                media.seeked().await?;
                continue;
            }
            if !media.ready_state().has_current_frame() {
                sleep(ctx.settings.ready_poll_interval).await;
                continue;
            }
            break;
        }

        self.enter(RenderPhase::Encoding);
        let captured = media.capture_frame().await?;
        let (width, height) = captured.dimensions();
        let image = encode_frame(captured).await?;
        Ok(RenderedFrame {
            image: image.into(),
            width,
            height,
            timestamp: request.timestamp,
            from_remote: false,
        })
    }

    /// Hand the attempt's waiters to the failure protocol and wait, bounded,
    /// for the remote fallback.
    async fn fail_over(
        &mut self,
        slot: RenderSlot,
        mut attempt: Attempt,
        cause: RenderError,
    ) -> Result<Option<RenderedFrame>, RenderError> {
        let ctx = self.ctx;
        let request = self.request;
        attempt.release_media();
        drop(slot);
        self.enter(RenderPhase::Failed);

        let outcome = ctx.frames.fail(
            &request.video_id,
            attempt.entry_id,
            request.timestamp,
            ctx.settings.fallback_enabled,
        );
        tracing::info!(
            video_id = %request.video_id,
            timestamp = request.timestamp,
            elapsed_ms = self.elapsed_ms(),
            error = %cause,
            outcome = ?outcome,
            "Local render failed",
        );
        if outcome == FailureOutcome::RequestFallback {
            ctx.remote.request_render(&request.video_id, request.timestamp);
        }

        let settlement = wait_for_settlement(attempt.waiter, ctx.settings.fallback_timeout).await;
        Ok(settlement.into_frame())
    }

    /// The format resolver says the remote cache already has this frame.
    fn serve_from_remote(&mut self, mut attempt: Attempt) -> Option<RenderedFrame> {
        let ctx = self.ctx;
        let request = self.request;
        attempt.release_media();
        let frame = ctx
            .frames
            .remote_frame(&request.video_id, request.timestamp)
            .or_else(|| attempt.settled_elsewhere());
        ctx.frames.withdraw(&request.video_id, attempt.entry_id, frame.as_ref());
        self.enter(RenderPhase::Done);
        frame
    }

    /// Unwind after a stop without touching the failure protocol. A frame
    /// that arrived with the stop is still returned; otherwise callers
    /// attached to the entry are told about the stop as well.
    fn unwind_stopped(
        &mut self,
        mut attempt: Attempt,
        reason: StopReason,
    ) -> Result<Option<RenderedFrame>, RenderError> {
        attempt.release_media();
        if let Some(frame) = attempt.settled_elsewhere() {
            self.enter(RenderPhase::Done);
            return Ok(Some(frame));
        }
        self.ctx
            .frames
            .stop_pending(&self.request.video_id, attempt.entry_id, reason);
        self.enter(RenderPhase::Failed);
        tracing::debug!(
            video_id = %self.request.video_id,
            timestamp = self.request.timestamp,
            reason = %reason,
            "Stopped while waiting",
        );
        Err(RenderError::Stopped(reason))
    }

    fn start_position(&self) -> f64 {
        if self.request.timestamp == 0.0 && self.ctx.settings.nudge_zero_timestamp {
            ZERO_TIMESTAMP_NUDGE
        } else {
            self.request.timestamp
        }
    }

    fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn enter(&mut self, phase: RenderPhase) {
        tracing::trace!(
            video_id = %self.request.video_id,
            timestamp = self.request.timestamp,
            from = ?self.phase,
            to = ?phase,
            "Render phase",
        );
        self.phase = phase;
    }
}

/// Wait up to `limit` for a frame waiter. A dropped sender or a timeout
/// both mean no frame.
async fn wait_for_settlement(waiter: FrameWaiter, limit: Duration) -> Settlement {
    match timeout(limit, waiter).await {
        Ok(Ok(settlement)) => settlement,
        Ok(Err(_)) | Err(_) => Settlement::Missing,
    }
}
