//! Thumbnail acquisition and rendering.
//!
//! - [`FrameCache`]: per-video rendered/pending frames with best-match
//!   lookup and the remote-fallback failure protocol.
//! - [`RenderScheduler`]: FIFO admission control for local decodes.
//! - [`CancellationRegistry`]: per-video stop signals.
//! - [`RenderWorker`]: one render attempt as an explicit state machine.
//! - [`ThumbnailCacheClient`]: the remote thumbnail cache used as fallback.
//! - [`ThumbnailPipeline`]: the facade tying these to branding lookups.

pub mod cancel;
pub mod error;
pub mod ffmpeg;
pub mod format;
pub mod frame;
pub mod frame_cache;
pub mod media;
pub mod pipeline;
pub mod remote;
pub mod scheduler;
pub mod worker;

pub use cancel::{CancellationRegistry, StopReason};
pub use error::RenderError;
pub use ffmpeg::FfmpegBackend;
pub use format::{FormatLookup, FormatResolver, PlaybackFormat, StaticFormatResolver};
pub use frame::RenderedFrame;
pub use frame_cache::{BestMatch, FailureOutcome, FrameCache, Settlement};
pub use media::{MediaBackend, MediaElement, MediaError, ReadyState};
pub use pipeline::{ThumbnailPipeline, ThumbnailRequest};
pub use remote::{NoRemoteRenderer, RemoteEvent, RemoteRenderer, ThumbnailCacheClient};
pub use scheduler::RenderScheduler;
pub use worker::{RenderContext, RenderRequest, RenderSettings, RenderWorker};
