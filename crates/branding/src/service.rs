//! Branding lookups as the UI layer sees them.
//!
//! [`BrandingService`] puts the local draft overlay in front of the
//! metadata cache and owns the submission flow.

use std::sync::Arc;

use rebrand_core::{PipelineConfig, ThumbnailCandidate, TitleCandidate, VideoId};

use crate::api::{
    BrandingApi, BrandingApiError, BrandingSource, BrandingSubmission, ThumbnailSubmission,
    TitleSubmission,
};
use crate::cache::{BrandingCache, BrandingRecord};
use crate::drafts::LocalDrafts;
use crate::title::to_title_case;

pub struct BrandingService {
    source: Arc<dyn BrandingSource>,
    cache: BrandingCache,
    drafts: LocalDrafts,
    user_id: String,
}

impl BrandingService {
    pub fn new(source: Arc<dyn BrandingSource>, config: &PipelineConfig, user_id: String) -> Self {
        let cache = BrandingCache::with_limits(
            Arc::clone(&source),
            config.branding_cache_capacity,
            config.branding_cache_ttl,
        );
        Self::with_cache(source, cache, user_id)
    }

    /// Build a service around an existing cache (which must fetch from the
    /// same `source`).
    pub fn with_cache(source: Arc<dyn BrandingSource>, cache: BrandingCache, user_id: String) -> Self {
        Self {
            source,
            cache,
            drafts: LocalDrafts::new(),
            user_id,
        }
    }

    /// Build a service talking to the configured branding server.
    pub fn from_config(config: &PipelineConfig, user_id: String) -> Result<Self, BrandingApiError> {
        let api = BrandingApi::new(config.branding_server_url.clone(), config.http_timeout)?;
        Ok(Self::new(Arc::new(api), config, user_id))
    }

    pub fn cache(&self) -> &BrandingCache {
        &self.cache
    }

    pub fn drafts(&self) -> &LocalDrafts {
        &self.drafts
    }

    /// Cached-or-fetched record for `video_id`.
    pub async fn get_branding(&self, video_id: &VideoId, by_hash: bool) -> Option<BrandingRecord> {
        self.cache.get(video_id, by_hash).await
    }

    /// Best title: the selected draft if any, else the top server candidate.
    pub async fn get_best_title(&self, video_id: &VideoId, by_hash: bool) -> Option<TitleCandidate> {
        if let Some(draft) = self.drafts.selected_title(video_id) {
            return Some(draft);
        }
        self.get_branding(video_id, by_hash)
            .await?
            .titles
            .into_iter()
            .next()
    }

    /// Best thumbnail: the selected draft if any, else the top server candidate.
    pub async fn get_best_thumbnail(
        &self,
        video_id: &VideoId,
        by_hash: bool,
    ) -> Option<ThumbnailCandidate> {
        if let Some(draft) = self.drafts.selected_thumbnail(video_id) {
            return Some(draft);
        }
        self.get_branding(video_id, by_hash)
            .await?
            .thumbnails
            .into_iter()
            .next()
    }

    /// Title to display: the custom title when one exists, otherwise the
    /// original title in title case.
    pub async fn display_title(
        &self,
        video_id: &VideoId,
        by_hash: bool,
        original_title: &str,
    ) -> String {
        match self.get_best_title(video_id, by_hash).await {
            Some(title) if !title.original && !title.title.is_empty() => title.title,
            _ => to_title_case(original_title.trim()),
        }
    }

    /// Submit branding for `video_id`.
    ///
    /// The cached record is invalidated whatever the outcome, so the next
    /// read reflects server state. Drafts are cleared once the server
    /// accepted the submission.
    pub async fn submit(
        &self,
        video_id: &VideoId,
        title: Option<TitleSubmission>,
        thumbnail: Option<ThumbnailSubmission>,
    ) -> Result<(), BrandingApiError> {
        let submission = BrandingSubmission {
            user_id: self.user_id.clone(),
            video_id: video_id.clone(),
            title,
            thumbnail,
        };

        let result = self.source.submit_branding(&submission).await;
        self.cache.invalidate(video_id);

        match &result {
            Ok(()) => {
                self.drafts.clear(video_id);
                tracing::info!(video_id = %video_id, "Branding submitted");
            }
            Err(e) => {
                tracing::warn!(video_id = %video_id, error = %e, "Branding submission failed");
            }
        }
        result
    }

    /// Drop the cached record for `video_id`.
    pub fn invalidate(&self, video_id: &VideoId) {
        self.cache.invalidate(video_id);
    }
}
