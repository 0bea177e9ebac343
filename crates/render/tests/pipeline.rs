//! End-to-end render pipeline tests.
//!
//! The media backend, format resolver, remote renderer and branding source
//! are in-memory fakes; no test needs ffmpeg or the network.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use image::{Rgba, RgbaImage};
use tokio::time::Instant;

use rebrand_branding::{BrandingApiError, BrandingService, BrandingSource, BrandingSubmission};
use rebrand_core::{BrandingResult, BrandingUuid, PipelineConfig, ThumbnailCandidate, VideoId};
use rebrand_render::frame::encode_webp;
use rebrand_render::scheduler::Admission;
use rebrand_render::{
    FormatLookup, FormatResolver, MediaBackend, MediaElement, MediaError, PlaybackFormat,
    ReadyState, RemoteRenderer, RenderError, RenderRequest, RenderSettings, StopReason,
    ThumbnailPipeline, ThumbnailRequest,
};

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MediaStats {
    created: AtomicUsize,
    captures: AtomicUsize,
    releases: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
}

fn count(counter: &AtomicUsize) -> usize {
    counter.load(Ordering::SeqCst)
}

struct FakeMedia {
    load_delay: Duration,
    fail: bool,
    size: (u32, u32),
    loaded: AtomicBool,
    stats: Arc<MediaStats>,
}

#[async_trait]
impl MediaElement for FakeMedia {
    async fn load(&self, _url: &str, _timestamp: f64) -> Result<(), MediaError> {
        self.loaded.store(true, Ordering::SeqCst);
        let active = self.stats.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.peak.fetch_max(active, Ordering::SeqCst);
        tokio::time::sleep(self.load_delay).await;
        if self.fail {
            return Err(MediaError::Load("corrupt stream".into()));
        }
        Ok(())
    }

    async fn seek(&self, _timestamp: f64) -> Result<(), MediaError> {
        Ok(())
    }

    async fn seeked(&self) -> Result<(), MediaError> {
        Ok(())
    }

    fn ready_state(&self) -> ReadyState {
        ReadyState::HaveEnoughData
    }

    fn is_seeking(&self) -> bool {
        false
    }

    fn video_size(&self) -> (u32, u32) {
        self.size
    }

    async fn capture_frame(&self) -> Result<RgbaImage, MediaError> {
        self.stats.captures.fetch_add(1, Ordering::SeqCst);
        let (width, height) = self.size;
        Ok(RgbaImage::from_pixel(width, height, Rgba([30, 60, 90, 255])))
    }

    fn release(&self) {
        if self.loaded.swap(false, Ordering::SeqCst) {
            self.stats.active.fetch_sub(1, Ordering::SeqCst);
        }
        self.stats.releases.fetch_add(1, Ordering::SeqCst);
    }
}

struct FakeBackend {
    stats: Arc<MediaStats>,
    fail: AtomicBool,
    size: Mutex<(u32, u32)>,
    default_delay: Mutex<Duration>,
    /// Per-element load delays, consumed in creation order.
    delays: Mutex<VecDeque<Duration>>,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self {
            stats: Arc::new(MediaStats::default()),
            fail: AtomicBool::new(false),
            size: Mutex::new((64, 36)),
            default_delay: Mutex::new(Duration::from_millis(10)),
            delays: Mutex::new(VecDeque::new()),
        }
    }
}

impl FakeBackend {
    fn created(&self) -> usize {
        count(&self.stats.created)
    }
}

impl MediaBackend for FakeBackend {
    fn create_element(&self) -> Arc<dyn MediaElement> {
        self.stats.created.fetch_add(1, Ordering::SeqCst);
        let load_delay = self
            .delays
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(*self.default_delay.lock().unwrap());
        Arc::new(FakeMedia {
            load_delay,
            fail: self.fail.load(Ordering::SeqCst),
            size: *self.size.lock().unwrap(),
            loaded: AtomicBool::new(false),
            stats: Arc::clone(&self.stats),
        })
    }
}

#[derive(Default)]
struct FakeFormats {
    overrides: Mutex<HashMap<VideoId, Option<FormatLookup>>>,
    /// Native size reported for streams without an override.
    reported: Mutex<Option<(u32, u32)>>,
}

#[async_trait]
impl FormatResolver for FakeFormats {
    async fn playback_format(
        &self,
        video_id: &VideoId,
        _width: u32,
        _height: u32,
    ) -> Option<FormatLookup> {
        if let Some(lookup) = self.overrides.lock().unwrap().get(video_id) {
            return lookup.clone();
        }
        let (width, height) = self.reported.lock().unwrap().unwrap_or((64, 36));
        Some(FormatLookup::Stream(PlaybackFormat {
            url: format!("fake://{video_id}"),
            width,
            height,
        }))
    }
}

#[derive(Default)]
struct FakeRemote {
    requests: Mutex<Vec<(VideoId, f64)>>,
    fetching: AtomicBool,
}

impl FakeRemote {
    fn requests(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl RemoteRenderer for FakeRemote {
    fn request_render(&self, video_id: &VideoId, timestamp: f64) {
        self.requests
            .lock()
            .unwrap()
            .push((video_id.clone(), timestamp));
    }

    fn is_fetching(&self, _video_id: &VideoId, _timestamp: f64) -> bool {
        self.fetching.load(Ordering::SeqCst)
    }
}

struct FixedBranding {
    thumbnail: ThumbnailCandidate,
}

#[async_trait]
impl BrandingSource for FixedBranding {
    async fn fetch_branding(
        &self,
        video_id: &VideoId,
        _by_hash: bool,
    ) -> Result<HashMap<VideoId, BrandingResult>, BrandingApiError> {
        Ok(HashMap::from([(
            video_id.clone(),
            BrandingResult {
                thumbnails: vec![self.thumbnail.clone()],
                ..Default::default()
            },
        )]))
    }

    async fn submit_branding(
        &self,
        _submission: &BrandingSubmission,
    ) -> Result<(), BrandingApiError> {
        Ok(())
    }
}

fn candidate(timestamp: Option<f64>) -> ThumbnailCandidate {
    ThumbnailCandidate {
        timestamp,
        original: timestamp.is_none(),
        votes: 3,
        locked: false,
        uuid: BrandingUuid::new("thumb-1"),
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Options {
    max_active: usize,
    render_timeout: Duration,
    fallback_timeout: Duration,
    fallback_enabled: bool,
    thumbnail: ThumbnailCandidate,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            max_active: 6,
            render_timeout: Duration::from_secs(5),
            fallback_timeout: Duration::from_secs(5),
            fallback_enabled: true,
            thumbnail: candidate(Some(5.0)),
        }
    }
}

struct Harness {
    pipeline: Arc<ThumbnailPipeline>,
    backend: Arc<FakeBackend>,
    formats: Arc<FakeFormats>,
    remote: Arc<FakeRemote>,
}

fn harness(options: Options) -> Harness {
    let backend = Arc::new(FakeBackend::default());
    let formats = Arc::new(FakeFormats::default());
    let remote = Arc::new(FakeRemote::default());
    let branding = Arc::new(BrandingService::new(
        Arc::new(FixedBranding {
            thumbnail: options.thumbnail,
        }),
        &PipelineConfig::default(),
        "tester".into(),
    ));
    let settings = RenderSettings {
        render_timeout: options.render_timeout,
        fallback_timeout: options.fallback_timeout,
        fallback_enabled: options.fallback_enabled,
        nudge_zero_timestamp: true,
        ready_poll_interval: Duration::from_millis(5),
    };
    let pipeline = Arc::new(ThumbnailPipeline::with_settings(
        options.max_active,
        settings,
        Duration::from_millis(200),
        branding,
        Arc::clone(&formats) as Arc<dyn FormatResolver>,
        Arc::clone(&backend) as Arc<dyn MediaBackend>,
        Arc::clone(&remote) as Arc<dyn RemoteRenderer>,
    ));
    Harness {
        pipeline,
        backend,
        formats,
        remote,
    }
}

fn request(id: &str, width: u32, height: u32, timestamp: f64) -> RenderRequest {
    RenderRequest::new(VideoId::from(id), width, height, timestamp)
}

fn remote_image() -> Vec<u8> {
    encode_webp(&RgbaImage::from_pixel(32, 18, Rgba([255, 0, 0, 255]))).unwrap()
}

/// Poll `condition` until it holds, failing the test after five seconds.
async fn until(condition: impl Fn() -> bool) {
    let give_up = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < give_up, "condition never became true");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

// ---------------------------------------------------------------------------
// Coalescing and admission
// ---------------------------------------------------------------------------

#[tokio::test]
async fn concurrent_identical_requests_share_one_decode() {
    let h = harness(Options::default());
    *h.backend.size.lock().unwrap() = (1280, 720);
    *h.formats.reported.lock().unwrap() = Some((1280, 720));
    let req = request("abc123", 1280, 720, 5.0);

    let (a, b) = tokio::join!(h.pipeline.render(&req), h.pipeline.render(&req));

    let a = a.unwrap().unwrap();
    let b = b.unwrap().unwrap();
    assert_eq!(a, b);
    assert_eq!((a.width, a.height), (1280, 720));
    assert_eq!(h.backend.created(), 1);
    assert_eq!(count(&h.backend.stats.captures), 1);
}

#[tokio::test]
async fn rendered_frame_is_served_from_cache() {
    let h = harness(Options::default());
    let req = request("abc123", 64, 36, 5.0);

    let first = h.pipeline.render(&req).await.unwrap().unwrap();
    let second = h.pipeline.render(&req).await.unwrap().unwrap();

    assert_eq!(first, second);
    assert_eq!(h.backend.created(), 1);
    assert_eq!(h.pipeline.context().frames.rendered_count(&req.video_id), 1);
}

#[tokio::test]
async fn scheduler_never_exceeds_slot_limit() {
    let h = harness(Options {
        max_active: 2,
        ..Default::default()
    });
    *h.backend.default_delay.lock().unwrap() = Duration::from_millis(30);

    let mut tasks = tokio::task::JoinSet::new();
    for i in 0..6 {
        let pipeline = Arc::clone(&h.pipeline);
        let req = request(&format!("video-{i}"), 64, 36, 1.0);
        tasks.spawn(async move { pipeline.render(&req).await });
    }
    while let Some(outcome) = tasks.join_next().await {
        assert!(outcome.unwrap().unwrap().is_some());
    }

    assert_eq!(h.backend.created(), 6);
    assert!(count(&h.backend.stats.peak) <= 2);
    assert_eq!(h.pipeline.context().scheduler.active(), 0);
}

#[tokio::test]
async fn deadline_while_awaiting_slot_fails_without_leaking() {
    let h = harness(Options {
        max_active: 1,
        render_timeout: Duration::from_millis(100),
        ..Default::default()
    });
    let scheduler = &h.pipeline.context().scheduler;
    let far = Instant::now() + Duration::from_secs(60);
    let held = scheduler.acquire(&VideoId::from("busy"), far).await.unwrap();
    assert_matches!(held, Admission::Granted(_));

    let req = request("abc123", 64, 36, 5.0);
    let outcome = h.pipeline.render(&req).await;

    assert_matches!(outcome, Err(RenderError::TimedOut));
    assert_eq!(scheduler.active(), 1);
    assert_eq!(scheduler.queued(), 0);
    assert_eq!(h.backend.created(), 0);
    assert_eq!(h.remote.requests(), 0);
    assert_eq!(h.pipeline.context().frames.pending_count(&req.video_id), 0);

    drop(held);
    assert_eq!(scheduler.active(), 0);
}

#[tokio::test]
async fn deadline_after_admission_falls_back_once() {
    let h = harness(Options {
        render_timeout: Duration::from_millis(100),
        fallback_timeout: Duration::from_millis(50),
        ..Default::default()
    });
    *h.backend.default_delay.lock().unwrap() = Duration::from_millis(300);
    let req = request("abc123", 64, 36, 5.0);

    let outcome = h.pipeline.render(&req).await;

    assert_matches!(outcome, Ok(None));
    assert_eq!(h.backend.created(), 1);
    assert_eq!(count(&h.backend.stats.captures), 0);
    assert_eq!(count(&h.backend.stats.active), 0);
    assert_eq!(h.remote.requests(), 1);
    assert_eq!(h.pipeline.context().scheduler.active(), 0);
    assert_eq!(h.pipeline.context().frames.pending_count(&req.video_id), 0);
    assert!(h.pipeline.context().frames.is_awaiting_fallback(&req.video_id, 5.0));
}

#[tokio::test]
async fn kept_media_is_reused_for_next_timestamp() {
    let h = harness(Options::default());
    let first = RenderRequest {
        keep_media: true,
        ..request("abc123", 64, 36, 5.0)
    };

    let frame = h.pipeline.render(&first).await.unwrap().unwrap();
    assert_eq!(frame.timestamp, 5.0);
    assert_eq!(count(&h.backend.stats.releases), 0);

    let frame = h
        .pipeline
        .render(&request("abc123", 64, 36, 8.0))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(frame.timestamp, 8.0);
    assert_eq!(h.backend.created(), 1);
    assert_eq!(count(&h.backend.stats.captures), 2);
    assert_eq!(count(&h.backend.stats.releases), 1);
    assert_eq!(count(&h.backend.stats.active), 0);
    assert_eq!(h.pipeline.context().frames.rendered_count(&VideoId::from("abc123")), 2);
}

// ---------------------------------------------------------------------------
// Failure and remote fallback
// ---------------------------------------------------------------------------

#[tokio::test]
async fn repeated_failures_request_one_fallback() {
    let h = harness(Options::default());
    h.backend.fail.store(true, Ordering::SeqCst);
    let id = VideoId::from("abc123");

    let first = {
        let pipeline = Arc::clone(&h.pipeline);
        tokio::spawn(async move { pipeline.render(&request("abc123", 64, 36, 5.0)).await })
    };
    until(|| h.remote.requests() == 1).await;

    let second = {
        let pipeline = Arc::clone(&h.pipeline);
        tokio::spawn(async move { pipeline.render(&request("abc123", 64, 36, 5.0)).await })
    };
    until(|| h.backend.created() == 2 && h.pipeline.context().scheduler.active() == 0).await;
    until(|| h.pipeline.context().frames.pending_count(&id) == 0).await;

    h.pipeline.pre_rendered_arrived(&id, 5.0, remote_image());

    let first = first.await.unwrap().unwrap().unwrap();
    let second = second.await.unwrap().unwrap().unwrap();
    assert!(first.from_remote);
    assert_eq!((second.width, second.height), (32, 18));
    assert_eq!(h.remote.requests(), 1);
    assert!(h.pipeline.is_cached_thumbnail_loaded(&id, 5.0));
}

#[tokio::test]
async fn disabled_fallback_resolves_to_no_thumbnail() {
    let h = harness(Options {
        fallback_enabled: false,
        ..Default::default()
    });
    h.backend.fail.store(true, Ordering::SeqCst);

    let outcome = h.pipeline.render(&request("abc123", 64, 36, 5.0)).await;

    assert_matches!(outcome, Ok(None));
    assert_eq!(h.remote.requests(), 0);
    assert_eq!(h.pipeline.context().scheduler.active(), 0);
}

#[tokio::test]
async fn remote_failure_resolves_waiters_and_is_remembered() {
    let h = harness(Options::default());
    h.backend.fail.store(true, Ordering::SeqCst);
    let id = VideoId::from("abc123");

    let pending = {
        let pipeline = Arc::clone(&h.pipeline);
        tokio::spawn(async move { pipeline.render(&request("abc123", 64, 36, 5.0)).await })
    };
    until(|| h.remote.requests() == 1).await;
    h.pipeline.remote_render_failed(&id, 5.0);

    assert_matches!(pending.await.unwrap(), Ok(None));
    // A later local failure at the same timestamp does not ask again.
    assert_matches!(h.pipeline.render(&request("abc123", 64, 36, 5.0)).await, Ok(None));
    assert_eq!(h.remote.requests(), 1);
}

#[tokio::test]
async fn missing_format_goes_through_fallback() {
    let h = harness(Options {
        fallback_timeout: Duration::from_millis(50),
        ..Default::default()
    });
    let id = VideoId::from("abc123");
    h.formats.overrides.lock().unwrap().insert(id.clone(), None);

    let outcome = h.pipeline.render(&request("abc123", 64, 36, 5.0)).await;

    assert_matches!(outcome, Ok(None));
    assert_eq!(h.remote.requests(), 1);
    assert_eq!(h.backend.created(), 0);
}

#[tokio::test]
async fn served_from_remote_cache_skips_local_decode() {
    let h = harness(Options::default());
    let id = VideoId::from("abc123");
    h.formats
        .overrides
        .lock()
        .unwrap()
        .insert(id.clone(), Some(FormatLookup::ServedFromRemoteCache));

    let outcome = h.pipeline.render(&request("abc123", 64, 36, 5.0)).await;

    assert_matches!(outcome, Ok(None));
    assert_eq!(h.backend.created(), 0);
    assert_eq!(h.pipeline.context().frames.pending_count(&id), 0);
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn release_video_halts_render_and_frees_its_slot() {
    let h = harness(Options {
        max_active: 1,
        ..Default::default()
    });
    *h.backend.default_delay.lock().unwrap() = Duration::from_secs(30);
    let id = VideoId::from("abc123");

    let render = {
        let pipeline = Arc::clone(&h.pipeline);
        tokio::spawn(async move { pipeline.render(&request("abc123", 64, 36, 5.0)).await })
    };
    until(|| h.backend.created() == 1).await;

    h.pipeline.release_video(&id);

    assert_matches!(
        render.await.unwrap(),
        Err(RenderError::Stopped(StopReason::Invalidated))
    );
    assert_eq!(h.pipeline.context().scheduler.active(), 0);
    assert_eq!(count(&h.backend.stats.active), 0);
    assert_eq!(h.remote.requests(), 0);
}

#[tokio::test]
async fn pre_rendered_frame_short_circuits_in_flight_decode() {
    let h = harness(Options::default());
    *h.backend.default_delay.lock().unwrap() = Duration::from_secs(30);
    let id = VideoId::from("abc123");

    let render = {
        let pipeline = Arc::clone(&h.pipeline);
        tokio::spawn(async move {
            pipeline
                .create_thumbnail(&ThumbnailRequest::new(VideoId::from("abc123"), 64, 36).at(5.0))
                .await
        })
    };
    until(|| h.backend.created() == 1).await;

    h.pipeline.pre_rendered_arrived(&id, 5.0, remote_image());

    let frame = render.await.unwrap().unwrap();
    assert!(frame.from_remote);
    assert_eq!(h.pipeline.context().scheduler.active(), 0);
    assert_eq!(count(&h.backend.stats.captures), 0);
}

#[tokio::test]
async fn attached_render_reports_the_owner_stop() {
    let h = harness(Options::default());
    *h.backend.default_delay.lock().unwrap() = Duration::from_secs(30);
    let id = VideoId::from("abc123");

    let owner = {
        let pipeline = Arc::clone(&h.pipeline);
        tokio::spawn(async move { pipeline.render(&request("abc123", 64, 36, 10.0)).await })
    };
    until(|| h.backend.created() == 1).await;
    let attached = {
        let pipeline = Arc::clone(&h.pipeline);
        tokio::spawn(async move { pipeline.render(&request("abc123", 64, 36, 10.0)).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    h.pipeline.pre_rendered_arrived(&id, 5.0, remote_image());

    assert_matches!(
        owner.await.unwrap(),
        Err(RenderError::Stopped(StopReason::PreRendered))
    );
    assert_matches!(
        attached.await.unwrap(),
        Err(RenderError::Stopped(StopReason::PreRendered))
    );
    assert_eq!(h.backend.created(), 1);
    assert_eq!(h.pipeline.context().frames.pending_count(&id), 0);
}

#[tokio::test]
async fn stopped_owner_and_attached_caller_both_retry() {
    let h = harness(Options::default());
    *h.backend.default_delay.lock().unwrap() = Duration::from_millis(300);
    let id = VideoId::from("abc123");
    let spawn_create = || {
        let pipeline = Arc::clone(&h.pipeline);
        tokio::spawn(async move {
            pipeline
                .create_thumbnail(&ThumbnailRequest::new(VideoId::from("abc123"), 64, 36).at(10.0))
                .await
        })
    };

    let owner = spawn_create();
    until(|| h.backend.created() == 1).await;
    let attached = spawn_create();
    tokio::time::sleep(Duration::from_millis(20)).await;

    h.pipeline.pre_rendered_arrived(&id, 5.0, remote_image());

    let owned = owner.await.unwrap().unwrap();
    let shared = attached.await.unwrap().unwrap();
    assert_eq!(owned.timestamp, 10.0);
    assert!(!owned.from_remote);
    assert_eq!(shared, owned);
    // The stopped decode plus one retry at lower resolution.
    assert_eq!(h.backend.created(), 2);
    assert_eq!(count(&h.backend.stats.captures), 1);
}

#[tokio::test]
async fn queued_render_is_woken_by_remote_frame() {
    let h = harness(Options {
        max_active: 1,
        ..Default::default()
    });
    let scheduler = &h.pipeline.context().scheduler;
    let far = Instant::now() + Duration::from_secs(60);
    let held = scheduler.acquire(&VideoId::from("busy"), far).await.unwrap();
    let id = VideoId::from("abc123");

    let render = {
        let pipeline = Arc::clone(&h.pipeline);
        tokio::spawn(async move { pipeline.render(&request("abc123", 64, 36, 5.0)).await })
    };
    until(|| scheduler.queued() == 1).await;

    h.pipeline.pre_rendered_arrived(&id, 5.0, remote_image());

    let frame = render.await.unwrap().unwrap().unwrap();
    assert!(frame.from_remote);
    assert_eq!(scheduler.queued(), 0);
    assert_eq!(scheduler.active(), 1);
    assert_eq!(h.backend.created(), 0);
    drop(held);
}

// ---------------------------------------------------------------------------
// Facade
// ---------------------------------------------------------------------------

#[tokio::test]
async fn create_thumbnail_renders_best_candidate_timestamp() {
    let h = harness(Options {
        thumbnail: candidate(Some(12.5)),
        ..Default::default()
    });

    let frame = h
        .pipeline
        .create_thumbnail(&ThumbnailRequest::new(VideoId::from("abc123"), 64, 36))
        .await
        .unwrap();

    assert_eq!(frame.timestamp, 12.5);
    assert!(!frame.from_remote);
}

#[tokio::test]
async fn original_thumbnail_candidate_renders_nothing() {
    let h = harness(Options {
        thumbnail: candidate(None),
        ..Default::default()
    });

    let frame = h
        .pipeline
        .create_thumbnail(&ThumbnailRequest::new(VideoId::from("abc123"), 64, 36))
        .await;

    assert!(frame.is_none());
    assert_eq!(h.backend.created(), 0);
}

#[tokio::test]
async fn superseded_attempt_retries_at_lower_resolution() {
    let h = harness(Options::default());
    // Streams report 32x18 but decode at 64x36, so the larger request does
    // not coalesce onto the smaller one.
    *h.formats.reported.lock().unwrap() = Some((32, 18));
    h.backend.delays.lock().unwrap().extend([
        Duration::from_millis(300),
        Duration::from_millis(10),
    ]);
    let id = VideoId::from("abc123");

    let small = {
        let pipeline = Arc::clone(&h.pipeline);
        tokio::spawn(async move {
            pipeline
                .create_thumbnail(&ThumbnailRequest::new(VideoId::from("abc123"), 32, 18).at(5.0))
                .await
        })
    };
    until(|| h.backend.created() == 1).await;

    let large = h
        .pipeline
        .render(&request("abc123", 64, 36, 5.0))
        .await
        .unwrap()
        .unwrap();
    let small = small.await.unwrap().unwrap();

    assert_eq!(small, large);
    assert_eq!(count(&h.backend.stats.captures), 1);
    assert_eq!(h.pipeline.context().frames.pending_count(&id), 0);
}

#[tokio::test]
async fn zero_timestamp_frame_is_cached_under_zero() {
    let h = harness(Options::default());
    let frame = h
        .pipeline
        .render(&request("abc123", 64, 36, 0.0))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(frame.timestamp, 0.0);
}

#[tokio::test]
async fn in_flight_remote_fetch_gets_a_head_start() {
    let h = harness(Options::default());
    h.remote.fetching.store(true, Ordering::SeqCst);
    let id = VideoId::from("abc123");

    let render = {
        let pipeline = Arc::clone(&h.pipeline);
        tokio::spawn(async move {
            pipeline
                .create_thumbnail(&ThumbnailRequest::new(VideoId::from("abc123"), 64, 36).at(5.0))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.backend.created(), 0);

    h.remote.fetching.store(false, Ordering::SeqCst);
    h.pipeline.pre_rendered_arrived(&id, 5.0, remote_image());

    let frame = render.await.unwrap().unwrap();
    assert!(frame.from_remote);
    assert_eq!(h.backend.created(), 0);
}
