use crate::cancel::StopReason;
use crate::frame::EncodeError;
use crate::media::MediaError;

/// Why a render attempt ended without producing a frame of its own.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("render timed out")]
    TimedOut,

    #[error("stopped while waiting: {0}")]
    Stopped(StopReason),

    /// A frame at least as large was rendered for the same timestamp while
    /// this attempt was decoding.
    #[error("already rendered")]
    Superseded,

    #[error("no playback format available")]
    NoFormat,

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error(transparent)]
    Encode(#[from] EncodeError),
}
