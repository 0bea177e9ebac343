//! ffmpeg-backed media element.
//!
//! `ffprobe` reports the stream's dimensions on load; each capture runs
//! `ffmpeg -ss T -i URL -frames:v 1` and reads a PNG back over stdout.
//! Seeking only moves the capture position, so a "seek" completes
//! immediately and the decode cost is paid in [`MediaElement::capture_frame`].

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use image::{ImageFormat, RgbaImage};
use serde::Deserialize;

use rebrand_core::sync::lock;

use crate::media::{MediaBackend, MediaElement, MediaError, ReadyState};

/// Error type for ffmpeg/ffprobe invocations.
#[derive(Debug, thiserror::Error)]
pub enum FfmpegError {
    #[error("ffprobe/ffmpeg binary not found: {0}")]
    NotFound(std::io::Error),

    #[error("ffprobe/ffmpeg execution failed (exit code {exit_code:?}): {stderr}")]
    ExecutionFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("failed to parse ffprobe output: {0}")]
    ParseError(String),

    #[error("no video stream in {0}")]
    NoVideoStream(String),
}

// ---------------------------------------------------------------------------
// ffprobe JSON output
// ---------------------------------------------------------------------------

/// `ffprobe -print_format json -show_streams` output, trimmed to what we read.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

/// Width and height of the first video stream in an ffprobe JSON document.
fn parse_dimensions(json: &str) -> Result<Option<(u32, u32)>, FfmpegError> {
    let probe: FfprobeOutput =
        serde_json::from_str(json).map_err(|e| FfmpegError::ParseError(format!("{e}: {json}")))?;
    Ok(probe
        .streams
        .iter()
        .filter(|s| s.codec_type.as_deref() == Some("video"))
        .find_map(|s| Some((s.width?, s.height?))))
}

fn execution_failed(output: &std::process::Output) -> FfmpegError {
    FfmpegError::ExecutionFailed {
        exit_code: output.status.code(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Run `ffprobe` on `url` and return the native size of its video stream.
pub async fn probe_dimensions(ffprobe: &str, url: &str) -> Result<(u32, u32), FfmpegError> {
    let output = tokio::process::Command::new(ffprobe)
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_streams",
            "-select_streams",
            "v:0",
        ])
        .arg(url)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(FfmpegError::NotFound)?;

    if !output.status.success() {
        return Err(execution_failed(&output));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_dimensions(&stdout)?.ok_or_else(|| FfmpegError::NoVideoStream(url.to_string()))
}

/// Decode the single frame at `timestamp_secs` as RGBA.
pub async fn capture_frame_at(
    ffmpeg: &str,
    url: &str,
    timestamp_secs: f64,
) -> Result<RgbaImage, FfmpegError> {
    let output = tokio::process::Command::new(ffmpeg)
        .args(["-v", "error", "-ss", &format!("{timestamp_secs:.3}"), "-i"])
        .arg(url)
        .args(["-frames:v", "1", "-f", "image2pipe", "-vcodec", "png", "-"])
        .kill_on_drop(true)
        .output()
        .await
        .map_err(FfmpegError::NotFound)?;

    if !output.status.success() {
        return Err(execution_failed(&output));
    }
    if output.stdout.is_empty() {
        return Err(FfmpegError::ExecutionFailed {
            exit_code: output.status.code(),
            stderr: format!("no frame at {timestamp_secs:.3}s"),
        });
    }

    image::load_from_memory_with_format(&output.stdout, ImageFormat::Png)
        .map(|frame| frame.to_rgba8())
        .map_err(|e| FfmpegError::ParseError(e.to_string()))
}

// ---------------------------------------------------------------------------
// Media element
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct LoadedStream {
    url: String,
    width: u32,
    height: u32,
}

#[derive(Debug, Default)]
struct ElementState {
    stream: Option<LoadedStream>,
    position: f64,
}

/// A [`MediaElement`] that shells out to ffmpeg.
#[derive(Debug)]
pub struct FfmpegElement {
    ffmpeg: String,
    ffprobe: String,
    state: Mutex<ElementState>,
}

impl FfmpegElement {
    pub fn new(ffmpeg: impl Into<String>, ffprobe: impl Into<String>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
            state: Mutex::new(ElementState::default()),
        }
    }
}

#[async_trait]
impl MediaElement for FfmpegElement {
    async fn load(&self, url: &str, timestamp: f64) -> Result<(), MediaError> {
        let (width, height) = probe_dimensions(&self.ffprobe, url)
            .await
            .map_err(|e| MediaError::Load(e.to_string()))?;
        let mut state = lock(&self.state);
        state.stream = Some(LoadedStream {
            url: url.to_string(),
            width,
            height,
        });
        state.position = timestamp;
        Ok(())
    }

    async fn seek(&self, timestamp: f64) -> Result<(), MediaError> {
        let mut state = lock(&self.state);
        if state.stream.is_none() {
            return Err(MediaError::NotLoaded);
        }
        state.position = timestamp;
        Ok(())
    }

    async fn seeked(&self) -> Result<(), MediaError> {
        Ok(())
    }

    fn ready_state(&self) -> ReadyState {
        if lock(&self.state).stream.is_some() {
            ReadyState::HaveEnoughData
        } else {
            ReadyState::HaveNothing
        }
    }

    fn is_seeking(&self) -> bool {
        false
    }

    fn video_size(&self) -> (u32, u32) {
        lock(&self.state)
            .stream
            .as_ref()
            .map_or((0, 0), |s| (s.width, s.height))
    }

    async fn capture_frame(&self) -> Result<RgbaImage, MediaError> {
        let (stream, position) = {
            let state = lock(&self.state);
            (state.stream.clone(), state.position)
        };
        let stream = stream.ok_or(MediaError::NotLoaded)?;
        capture_frame_at(&self.ffmpeg, &stream.url, position)
            .await
            .map_err(|e| MediaError::Decode(e.to_string()))
    }

    fn release(&self) {
        *lock(&self.state) = ElementState::default();
    }
}

/// Creates [`FfmpegElement`]s using the given binaries.
#[derive(Debug, Clone)]
pub struct FfmpegBackend {
    ffmpeg: String,
    ffprobe: String,
}

impl FfmpegBackend {
    pub fn new(ffmpeg: impl Into<String>, ffprobe: impl Into<String>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    pub fn ffprobe(&self) -> &str {
        &self.ffprobe
    }
}

impl Default for FfmpegBackend {
    fn default() -> Self {
        Self::new("ffmpeg", "ffprobe")
    }
}

impl MediaBackend for FfmpegBackend {
    fn create_element(&self) -> Arc<dyn MediaElement> {
        Arc::new(FfmpegElement::new(&self.ffmpeg, &self.ffprobe))
    }
}
