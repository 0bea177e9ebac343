//! `rebrand` -- render the custom thumbnail for one video.
//!
//! Looks the video's branding up, prints the title it would be shown with,
//! then renders the best thumbnail candidate (or `TIMESTAMP`) from a local
//! stream through ffmpeg, falling back to the remote thumbnail cache when
//! the local render fails.
//!
//! # Environment variables
//!
//! | Variable         | Required | Default        | Description                              |
//! |------------------|----------|----------------|------------------------------------------|
//! | `VIDEO_ID`       | yes      | --             | Video to render                          |
//! | `STREAM_URL`     | yes      | --             | File path or URL ffmpeg can read         |
//! | `TIMESTAMP`      | no       | best candidate | Seconds into the video                   |
//! | `WIDTH`/`HEIGHT` | no       | `1280`/`720`   | Minimum acceptable frame size            |
//! | `OUTPUT_PATH`    | no       | `{id}.webp`    | Where the WebP frame is written          |
//! | `USER_ID`        | no       | random         | Submitter id sent to the branding server |
//! | `ORIGINAL_TITLE` | no       | empty          | Title shown when no custom title exists  |
//!
//! Pipeline settings (`RENDER_TIMEOUT_MS`, `MAX_ACTIVE_RENDERS`, ...) are read
//! by [`PipelineConfig::from_env`].

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rebrand_branding::BrandingService;
use rebrand_core::{BrandingUuid, PipelineConfig, VideoId};
use rebrand_render::ffmpeg::probe_dimensions;
use rebrand_render::{
    FfmpegBackend, NoRemoteRenderer, PlaybackFormat, RemoteRenderer, StaticFormatResolver,
    ThumbnailCacheClient, ThumbnailPipeline, ThumbnailRequest,
};

const DEFAULT_WIDTH: u32 = 1280;
const DEFAULT_HEIGHT: u32 = 720;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rebrand=info,rebrand_render=info,rebrand_branding=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let video_id = VideoId::new(required("VIDEO_ID")?);
    let stream_url = required("STREAM_URL")?;
    let timestamp: Option<f64> = optional("TIMESTAMP")?;
    let width = optional("WIDTH")?.unwrap_or(DEFAULT_WIDTH);
    let height = optional("HEIGHT")?.unwrap_or(DEFAULT_HEIGHT);
    let output_path =
        std::env::var("OUTPUT_PATH").unwrap_or_else(|_| format!("{video_id}.webp"));
    let user_id = std::env::var("USER_ID")
        .unwrap_or_else(|_| BrandingUuid::placeholder().as_str().to_string());
    let original_title = std::env::var("ORIGINAL_TITLE").unwrap_or_default();

    let config = PipelineConfig::from_env();
    tracing::info!(
        video_id = %video_id,
        stream_url = %stream_url,
        max_active_renders = config.max_active_renders,
        remote_fallback = config.remote_fallback_enabled(),
        "Starting rebrand",
    );

    let branding = Arc::new(
        BrandingService::from_config(&config, user_id).context("Failed to build branding client")?,
    );

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let remote: Arc<dyn RemoteRenderer> = if config.remote_fallback_enabled() {
        Arc::new(
            ThumbnailCacheClient::new(
                config.thumbnail_server_url.clone(),
                config.http_timeout,
                events_tx,
            )
            .context("Failed to build thumbnail cache client")?,
        )
    } else {
        Arc::new(NoRemoteRenderer)
    };

    let backend = FfmpegBackend::default();
    let (native_width, native_height) = probe_dimensions(backend.ffprobe(), &stream_url)
        .await
        .with_context(|| format!("Failed to probe {stream_url}"))?;
    let formats = StaticFormatResolver::new();
    formats.insert(
        video_id.clone(),
        PlaybackFormat {
            url: stream_url,
            width: native_width,
            height: native_height,
        },
    );

    let pipeline = Arc::new(ThumbnailPipeline::new(
        &config,
        branding,
        Arc::new(formats),
        Arc::new(backend),
        remote,
    ));
    tokio::spawn(Arc::clone(&pipeline).run_remote_listener(events_rx));

    let title = pipeline
        .display_title(&video_id, true, &original_title)
        .await;
    println!("{title}");

    let mut request = ThumbnailRequest::new(video_id.clone(), width, height);
    if let Some(timestamp) = timestamp {
        request = request.at(timestamp);
    }
    let frame = pipeline
        .create_thumbnail(&request)
        .await
        .with_context(|| format!("No thumbnail available for {video_id}"))?;

    tokio::fs::write(&output_path, &frame.image[..])
        .await
        .with_context(|| format!("Failed to write {output_path}"))?;

    tracing::info!(
        video_id = %video_id,
        timestamp = frame.timestamp,
        width = frame.width,
        height = frame.height,
        from_remote = frame.from_remote,
        output = %output_path,
        "Thumbnail written",
    );
    Ok(())
}

fn required(name: &str) -> anyhow::Result<String> {
    std::env::var(name).with_context(|| format!("{name} environment variable is required"))
}

fn optional<T>(name: &str) -> anyhow::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(value) => value
            .parse()
            .map(Some)
            .with_context(|| format!("{name} must be a valid number, got {value:?}")),
        Err(_) => Ok(None),
    }
}
