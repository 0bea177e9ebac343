//! Shared domain types for the branding and thumbnail-render crates.
//!
//! Holds the video identifier and candidate types returned by the branding
//! server, the runtime configuration, and small helpers (hashing, errors)
//! used on both sides. Has no internal dependencies.

pub mod config;
pub mod error;
pub mod hashing;
pub mod sync;
pub mod types;

pub use config::{PipelineConfig, ThumbnailCacheUse};
pub use error::CoreError;
pub use types::{
    BrandingResult, BrandingUuid, ThumbnailCandidate, Timestamp, TitleCandidate, VideoId,
};
