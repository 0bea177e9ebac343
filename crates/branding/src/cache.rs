//! In-memory branding cache with request coalescing.
//!
//! [`BrandingCache`] maps a video id to the title/thumbnail candidates last
//! fetched for it. Records younger than the freshness window are served
//! without a network round-trip. Concurrent misses for the same id share a
//! single in-flight fetch, which is removed from the in-flight table as soon
//! as it settles. After every successful fetch the least-recently-used
//! records are evicted until the cache is back under capacity.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};

use rebrand_core::sync::lock;
use rebrand_core::{BrandingResult, ThumbnailCandidate, Timestamp, TitleCandidate, VideoId};

use crate::api::BrandingSource;

/// Default maximum number of records.
pub const DEFAULT_CAPACITY: usize = 1000;

/// Default freshness window.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);

/// Source of "now" for freshness and eviction ranking.
pub type Clock = Arc<dyn Fn() -> Timestamp + Send + Sync>;

/// Cached candidates for one video.
#[derive(Debug, Clone, PartialEq)]
pub struct BrandingRecord {
    pub titles: Vec<TitleCandidate>,
    pub thumbnails: Vec<ThumbnailCandidate>,
    /// Eviction rank and freshness stamp. Records co-returned by a bucket
    /// query carry the Unix epoch so they are evicted first.
    pub last_used: Timestamp,
}

type InFlight = Shared<BoxFuture<'static, Option<BrandingRecord>>>;

/// Shared branding cache. Cheap to clone.
#[derive(Clone)]
pub struct BrandingCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    source: Arc<dyn BrandingSource>,
    capacity: usize,
    ttl: chrono::Duration,
    clock: Clock,
    records: Mutex<HashMap<VideoId, BrandingRecord>>,
    in_flight: Mutex<HashMap<VideoId, InFlight>>,
}

impl BrandingCache {
    pub fn new(source: Arc<dyn BrandingSource>) -> Self {
        Self::with_limits(source, DEFAULT_CAPACITY, DEFAULT_TTL)
    }

    pub fn with_limits(source: Arc<dyn BrandingSource>, capacity: usize, ttl: Duration) -> Self {
        Self::with_clock(source, capacity, ttl, Arc::new(Utc::now))
    }

    /// Build a cache that reads time from `clock` instead of the system.
    pub fn with_clock(
        source: Arc<dyn BrandingSource>,
        capacity: usize,
        ttl: Duration,
        clock: Clock,
    ) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        Self {
            inner: Arc::new(CacheInner {
                source,
                capacity: capacity.max(1),
                ttl,
                clock,
                records: Mutex::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Return the record for `video_id`, fetching it when missing or stale.
    ///
    /// Returns `None` when the fetch fails or the server has nothing for the
    /// id; the caller then keeps the original title/thumbnail.
    pub async fn get(&self, video_id: &VideoId, by_hash: bool) -> Option<BrandingRecord> {
        if let Some(record) = self.inner.fresh(video_id) {
            return Some(record);
        }

        let fetch = {
            let mut in_flight = lock(&self.inner.in_flight);
            in_flight
                .entry(video_id.clone())
                .or_insert_with(|| Arc::clone(&self.inner).start_fetch(video_id.clone(), by_hash))
                .clone()
        };

        fetch.await
    }

    /// Drop the record for `video_id` so the next read refetches it.
    pub fn invalidate(&self, video_id: &VideoId) {
        lock(&self.inner.records).remove(video_id);
    }

    /// Read a record without touching its freshness stamp.
    pub fn peek(&self, video_id: &VideoId) -> Option<BrandingRecord> {
        lock(&self.inner.records).get(video_id).cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.inner.records).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a fetch for `video_id` is currently in flight.
    pub fn is_fetching(&self, video_id: &VideoId) -> bool {
        lock(&self.inner.in_flight).contains_key(video_id)
    }
}

impl CacheInner {
    /// Return a fresh record, bumping its `last_used` stamp.
    fn fresh(&self, video_id: &VideoId) -> Option<BrandingRecord> {
        let now = (self.clock)();
        let mut records = lock(&self.records);
        let record = records.get_mut(video_id)?;
        if now - record.last_used >= self.ttl {
            return None;
        }
        record.last_used = now;
        Some(record.clone())
    }

    /// Spawn the network fetch and wrap its handle in a shareable future.
    ///
    /// The fetch runs on its own task so it settles (and leaves the
    /// in-flight table) even when every caller awaiting it is dropped.
    fn start_fetch(self: Arc<Self>, video_id: VideoId, by_hash: bool) -> InFlight {
        let handle = tokio::spawn(async move {
            let outcome = self.source.fetch_branding(&video_id, by_hash).await;
            let record = match outcome {
                Ok(results) => {
                    let now = (self.clock)();
                    self.store(&video_id, results, now);
                    lock(&self.records).get(&video_id).cloned()
                }
                Err(e) => {
                    tracing::warn!(
                        video_id = %video_id,
                        by_hash,
                        error = %e,
                        "Getting video branding failed",
                    );
                    None
                }
            };
            lock(&self.in_flight).remove(&video_id);
            record
        });

        async move { handle.await.ok().flatten() }.boxed().shared()
    }

    /// Overwrite every returned record, then evict down to capacity.
    fn store(&self, requested: &VideoId, results: HashMap<VideoId, BrandingResult>, now: Timestamp) {
        let mut records = lock(&self.records);
        for (video_id, result) in results {
            let last_used = if &video_id == requested {
                now
            } else {
                DateTime::<Utc>::UNIX_EPOCH
            };
            records.insert(
                video_id,
                BrandingRecord {
                    titles: result.titles,
                    thumbnails: result.thumbnails,
                    last_used,
                },
            );
        }

        let evicted = evict_least_recently_used(&mut records, self.capacity);
        if evicted > 0 {
            tracing::debug!(evicted, remaining = records.len(), "Evicted branding records");
        }
    }
}

/// Remove the entry with the smallest `last_used` until `records` fits in
/// `capacity`. Returns the number of records removed.
fn evict_least_recently_used(
    records: &mut HashMap<VideoId, BrandingRecord>,
    capacity: usize,
) -> usize {
    let mut evicted = 0;
    while records.len() > capacity {
        let Some(oldest) = records
            .iter()
            .min_by_key(|(_, record)| record.last_used)
            .map(|(video_id, _)| video_id.clone())
        else {
            break;
        };
        records.remove(&oldest);
        evicted += 1;
    }
    evicted
}
