//! Locally drafted, not-yet-submitted branding.
//!
//! A draft marked `selected` overrides whatever the server returned for that
//! video until it is submitted or cleared. This is a pure overlay in front
//! of the [`BrandingCache`](crate::cache::BrandingCache).

use std::collections::HashMap;
use std::sync::Mutex;

use rebrand_core::sync::lock;
use rebrand_core::{BrandingUuid, ThumbnailCandidate, TitleCandidate, VideoId};

/// A drafted title.
#[derive(Debug, Clone, PartialEq)]
pub struct UnsubmittedTitle {
    pub title: String,
    pub selected: bool,
}

/// A drafted thumbnail. `timestamp` is `None` for "keep the original".
#[derive(Debug, Clone, PartialEq)]
pub struct UnsubmittedThumbnail {
    pub timestamp: Option<f64>,
    pub original: bool,
    pub selected: bool,
}

/// All drafts for one video.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnsubmittedBranding {
    pub titles: Vec<UnsubmittedTitle>,
    pub thumbnails: Vec<UnsubmittedThumbnail>,
}

/// Per-video draft store.
#[derive(Debug, Default)]
pub struct LocalDrafts {
    drafts: Mutex<HashMap<VideoId, UnsubmittedBranding>>,
}

impl LocalDrafts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a title draft. Selecting it deselects every other title draft.
    pub fn add_title(&self, video_id: &VideoId, title: impl Into<String>, selected: bool) {
        let mut drafts = lock(&self.drafts);
        let entry = drafts.entry(video_id.clone()).or_default();
        if selected {
            entry.titles.iter_mut().for_each(|t| t.selected = false);
        }
        entry.titles.push(UnsubmittedTitle {
            title: title.into(),
            selected,
        });
    }

    /// Add a thumbnail draft. Selecting it deselects every other thumbnail draft.
    pub fn add_thumbnail(&self, video_id: &VideoId, timestamp: Option<f64>, selected: bool) {
        let mut drafts = lock(&self.drafts);
        let entry = drafts.entry(video_id.clone()).or_default();
        if selected {
            entry.thumbnails.iter_mut().for_each(|t| t.selected = false);
        }
        entry.thumbnails.push(UnsubmittedThumbnail {
            timestamp,
            original: timestamp.is_none(),
            selected,
        });
    }

    /// The selected title draft as a candidate: zero votes, unlocked, with a
    /// fresh placeholder id.
    pub fn selected_title(&self, video_id: &VideoId) -> Option<TitleCandidate> {
        let drafts = lock(&self.drafts);
        let draft = drafts.get(video_id)?.titles.iter().find(|t| t.selected)?;
        Some(TitleCandidate {
            title: draft.title.clone(),
            original: false,
            votes: 0,
            locked: false,
            uuid: BrandingUuid::placeholder(),
        })
    }

    /// The selected thumbnail draft as a candidate.
    pub fn selected_thumbnail(&self, video_id: &VideoId) -> Option<ThumbnailCandidate> {
        let drafts = lock(&self.drafts);
        let draft = drafts.get(video_id)?.thumbnails.iter().find(|t| t.selected)?;
        Some(ThumbnailCandidate {
            timestamp: draft.timestamp,
            original: draft.original,
            votes: 0,
            locked: false,
            uuid: BrandingUuid::placeholder(),
        })
    }

    pub fn get(&self, video_id: &VideoId) -> Option<UnsubmittedBranding> {
        lock(&self.drafts).get(video_id).cloned()
    }

    pub fn clear(&self, video_id: &VideoId) {
        lock(&self.drafts).remove(video_id);
    }
}
