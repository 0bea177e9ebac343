//! Branding metadata: fetching, caching, and submitting alternate titles and
//! thumbnails for videos.
//!
//! - [`BrandingApi`]: REST client for the branding server.
//! - [`BrandingCache`]: TTL/LRU cache with per-id request coalescing.
//! - [`LocalDrafts`]: unsubmitted overlay that wins over server data.
//! - [`BrandingService`]: the lookups and submission flow the UI calls.

pub mod api;
pub mod cache;
pub mod drafts;
pub mod service;
pub mod title;

pub use api::{
    BrandingApi, BrandingApiError, BrandingSource, BrandingSubmission, ThumbnailSubmission,
    TitleSubmission,
};
pub use cache::{BrandingCache, BrandingRecord};
pub use drafts::LocalDrafts;
pub use service::BrandingService;
pub use title::to_title_case;
