//! Per-video cache of rendered and in-progress frames.
//!
//! Each video keeps a list of frame entries. An entry is either pending (a
//! render attempt is producing it) or rendered. Callers asking for a frame
//! that is already pending attach a waiter to that entry instead of starting
//! a second decode. Entries that fail are removed; their waiters move to a
//! per-timestamp failure record until the remote thumbnail cache answers.
//!
//! All state lives behind one mutex and no lock is held across an await.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;

use rebrand_core::sync::lock;
use rebrand_core::VideoId;

use crate::cancel::StopReason;
use crate::frame::RenderedFrame;
use crate::media::MediaElement;

/// Identifies one frame entry across its lifetime.
pub type EntryId = u64;

/// How a pending entry ended, as seen by the callers waiting on it.
#[derive(Debug, Clone, PartialEq)]
pub enum Settlement {
    Frame(RenderedFrame),
    /// No frame could be produced.
    Missing,
    /// The owning attempt was stopped before it produced a frame.
    Stopped(StopReason),
}

impl Settlement {
    pub fn into_frame(self) -> Option<RenderedFrame> {
        match self {
            Self::Frame(frame) => Some(frame),
            Self::Missing | Self::Stopped(_) => None,
        }
    }
}

impl From<Option<&RenderedFrame>> for Settlement {
    fn from(frame: Option<&RenderedFrame>) -> Self {
        frame.cloned().map_or(Self::Missing, Self::Frame)
    }
}

/// Resolves once the entry settles. A dropped sender means
/// [`Settlement::Missing`].
pub type FrameWaiter = oneshot::Receiver<Settlement>;

type FrameNotifier = oneshot::Sender<Settlement>;

enum EntryState {
    Pending,
    Rendered(RenderedFrame),
}

/// Who owns an entry's media element.
enum MediaHold {
    Vacant,
    /// A render attempt is decoding through it.
    InUse,
    /// Kept after rendering; the next attempt may take it over.
    Idle(Arc<dyn MediaElement>),
}

struct FrameEntry {
    id: EntryId,
    width: u32,
    height: u32,
    timestamp: f64,
    state: EntryState,
    media: MediaHold,
    waiters: Vec<FrameNotifier>,
}

impl FrameEntry {
    fn is_rendered(&self) -> bool {
        matches!(self.state, EntryState::Rendered(_))
    }

    fn rendered(&self) -> Option<&RenderedFrame> {
        match &self.state {
            EntryState::Rendered(frame) => Some(frame),
            EntryState::Pending => None,
        }
    }

    fn is_from_remote(&self) -> bool {
        self.rendered().is_some_and(|frame| frame.from_remote)
    }

    fn from_remote_at(&self, timestamp: f64) -> Option<&RenderedFrame> {
        self.rendered()
            .filter(|frame| frame.from_remote && frame.timestamp == timestamp)
    }

    fn settle(&mut self, frame: RenderedFrame) -> usize {
        let waiters = std::mem::take(&mut self.waiters);
        let resolved = resolve_all(waiters, Settlement::Frame(frame.clone()));
        self.state = EntryState::Rendered(frame);
        resolved
    }
}

struct FailureRecord {
    timestamp: f64,
    waiters: Vec<FrameNotifier>,
}

#[derive(Default)]
struct VideoFrames {
    entries: Vec<FrameEntry>,
    failures: Vec<FailureRecord>,
    /// Timestamps the remote cache reported it could not render.
    remote_failed: Vec<f64>,
}

impl VideoFrames {
    fn best_match(&mut self, width: u32, height: u32, timestamp: f64) -> BestMatch {
        let mut candidates: Vec<usize> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_from_remote() || (e.width >= width && e.height >= height))
            .map(|(i, _)| i)
            .collect();
        // Both sorts are stable: rendered entries first, larger first within each group.
        candidates.sort_by(|&a, &b| self.entries[b].width.cmp(&self.entries[a].width));
        candidates.sort_by_key(|&i| !self.entries[i].is_rendered());

        if let Some(&i) = candidates
            .iter()
            .find(|&&i| self.entries[i].timestamp == timestamp)
        {
            let entry = &mut self.entries[i];
            return match &entry.state {
                EntryState::Rendered(frame) => BestMatch::Rendered(frame.clone()),
                EntryState::Pending => {
                    let (tx, rx) = oneshot::channel();
                    entry.waiters.push(tx);
                    BestMatch::Pending(rx)
                }
            };
        }

        let Some(&i) = candidates.first() else {
            return BestMatch::Nothing;
        };
        let entry = &mut self.entries[i];
        match std::mem::replace(&mut entry.media, MediaHold::Vacant) {
            MediaHold::Idle(media) => BestMatch::ReusableMedia(media),
            other => {
                entry.media = other;
                BestMatch::Nothing
            }
        }
    }

    fn position(&self, entry_id: EntryId) -> Option<usize> {
        self.entries.iter().position(|e| e.id == entry_id)
    }

    /// Remove `entry_id` if it is still pending.
    fn take_pending(&mut self, entry_id: EntryId) -> Option<FrameEntry> {
        let pos = self.position(entry_id)?;
        if self.entries[pos].is_rendered() {
            return None;
        }
        Some(self.entries.remove(pos))
    }

    fn remote_frame(&self, timestamp: f64) -> Option<RenderedFrame> {
        self.entries
            .iter()
            .find_map(|e| e.from_remote_at(timestamp))
            .cloned()
    }

    fn better_rendered(&self, width: u32, height: u32, timestamp: f64) -> Option<RenderedFrame> {
        self.entries
            .iter()
            .filter(|e| e.timestamp == timestamp && e.width >= width && e.height >= height)
            .find_map(FrameEntry::rendered)
            .cloned()
    }
}

fn resolve_all(waiters: Vec<FrameNotifier>, settlement: Settlement) -> usize {
    waiters
        .into_iter()
        .map(|tx| tx.send(settlement.clone()).is_ok())
        .filter(|delivered| *delivered)
        .count()
}

/// Result of [`FrameCache::find_best_match`].
pub enum BestMatch {
    /// A rendered frame at the requested timestamp.
    Rendered(RenderedFrame),
    /// A render for this timestamp is in progress; the waiter resolves with it.
    Pending(FrameWaiter),
    /// No frame at this timestamp, but a large enough video is loaded and
    /// idle. Ownership of the element passes to the caller.
    ReusableMedia(Arc<dyn MediaElement>),
    Nothing,
}

impl fmt::Debug for BestMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rendered(frame) => f.debug_tuple("Rendered").field(frame).finish(),
            Self::Pending(_) => f.write_str("Pending"),
            Self::ReusableMedia(_) => f.write_str("ReusableMedia"),
            Self::Nothing => f.write_str("Nothing"),
        }
    }
}

/// Result of [`FrameCache::find_or_claim`].
pub enum Lookup {
    Rendered(RenderedFrame),
    Pending(FrameWaiter),
    /// The caller now owns a fresh pending entry and must settle it.
    Claimed(Claim),
}

impl fmt::Debug for Lookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rendered(frame) => f.debug_tuple("Rendered").field(frame).finish(),
            Self::Pending(_) => f.write_str("Pending"),
            Self::Claimed(claim) => f.debug_tuple("Claimed").field(claim).finish(),
        }
    }
}

/// A pending entry registered for the caller.
pub struct Claim {
    pub entry_id: EntryId,
    /// Resolves when the entry settles, including when it is promoted by a
    /// remote frame while the caller is still working.
    pub waiter: FrameWaiter,
    /// An idle element taken over from a larger rendered entry.
    pub reusable_media: Option<Arc<dyn MediaElement>>,
}

impl fmt::Debug for Claim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Claim")
            .field("entry_id", &self.entry_id)
            .field("reusable_media", &self.reusable_media.is_some())
            .finish_non_exhaustive()
    }
}

/// What the caller of [`FrameCache::fail`] must do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// First failure at this timestamp: ask the remote cache to render it.
    RequestFallback,
    /// A fallback request is already outstanding; the waiters joined it.
    AwaitingFallback,
    /// Waiters were resolved immediately.
    Resolved,
}

/// The frame cache. Shared behind an [`Arc`].
#[derive(Default)]
pub struct FrameCache {
    videos: Mutex<HashMap<VideoId, VideoFrames>>,
    next_entry: AtomicU64,
}

impl FrameCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the best existing entry for a `width`×`height` frame at
    /// `timestamp`.
    ///
    /// Entries smaller than requested are ignored unless they came from the
    /// remote cache; a 0×0 request accepts any size. Rendered entries rank
    /// before pending ones and larger before smaller. An entry at exactly
    /// `timestamp` is returned (or waited on); otherwise the top-ranked
    /// entry's idle media element is handed over, if it has one.
    pub fn find_best_match(
        &self,
        video_id: &VideoId,
        width: u32,
        height: u32,
        timestamp: f64,
    ) -> BestMatch {
        let mut videos = lock(&self.videos);
        match videos.get_mut(video_id) {
            Some(video) => video.best_match(width, height, timestamp),
            None => BestMatch::Nothing,
        }
    }

    /// Like [`find_best_match`](Self::find_best_match), but when no entry
    /// exists at `timestamp` a pending one is registered for the caller in
    /// the same critical section, so concurrent identical requests coalesce
    /// onto one decode.
    pub fn find_or_claim(
        &self,
        video_id: &VideoId,
        width: u32,
        height: u32,
        timestamp: f64,
    ) -> Lookup {
        let mut videos = lock(&self.videos);
        let video = videos.entry(video_id.clone()).or_default();
        let reusable_media = match video.best_match(width, height, timestamp) {
            BestMatch::Rendered(frame) => return Lookup::Rendered(frame),
            BestMatch::Pending(waiter) => return Lookup::Pending(waiter),
            BestMatch::ReusableMedia(media) => Some(media),
            BestMatch::Nothing => None,
        };

        let entry_id = self.next_entry.fetch_add(1, Ordering::Relaxed);
        let (tx, waiter) = oneshot::channel();
        video.entries.push(FrameEntry {
            id: entry_id,
            width,
            height,
            timestamp,
            state: EntryState::Pending,
            media: MediaHold::Vacant,
            waiters: vec![tx],
        });
        Lookup::Claimed(Claim {
            entry_id,
            waiter,
            reusable_media,
        })
    }

    /// Record the stream dimensions of a decode that is about to start and
    /// mark the entry's media as busy.
    pub fn begin_decode(&self, video_id: &VideoId, entry_id: EntryId, width: u32, height: u32) {
        let mut videos = lock(&self.videos);
        let Some(video) = videos.get_mut(video_id) else {
            return;
        };
        if let Some(pos) = video.position(entry_id) {
            let entry = &mut video.entries[pos];
            if !entry.is_rendered() {
                entry.width = width;
                entry.height = height;
                entry.media = MediaHold::InUse;
            }
        }
    }

    /// Store a finished frame on `entry_id` and resolve its waiters.
    /// `retain` keeps the media element idle on the entry for reuse.
    ///
    /// If the entry disappeared meanwhile a new rendered entry is added.
    /// Returns the number of waiters that received the frame.
    pub fn complete(
        &self,
        video_id: &VideoId,
        entry_id: EntryId,
        frame: RenderedFrame,
        retain: Option<Arc<dyn MediaElement>>,
    ) -> usize {
        let mut videos = lock(&self.videos);
        let video = videos.entry(video_id.clone()).or_default();
        let media = retain.map_or(MediaHold::Vacant, MediaHold::Idle);
        match video.position(entry_id) {
            Some(pos) => {
                let entry = &mut video.entries[pos];
                entry.width = frame.width;
                entry.height = frame.height;
                entry.media = media;
                entry.settle(frame)
            }
            None => {
                video.entries.push(FrameEntry {
                    id: entry_id,
                    width: frame.width,
                    height: frame.height,
                    timestamp: frame.timestamp,
                    state: EntryState::Rendered(frame),
                    media,
                    waiters: Vec::new(),
                });
                0
            }
        }
    }

    /// A rendered frame at `timestamp` at least `width`×`height`, if any.
    pub fn better_rendered(
        &self,
        video_id: &VideoId,
        width: u32,
        height: u32,
        timestamp: f64,
    ) -> Option<RenderedFrame> {
        lock(&self.videos)
            .get(video_id)?
            .better_rendered(width, height, timestamp)
    }

    /// Drop a pending entry made redundant by a better rendered frame and
    /// hand that frame to its waiters.
    pub fn supersede(
        &self,
        video_id: &VideoId,
        entry_id: EntryId,
        width: u32,
        height: u32,
        timestamp: f64,
    ) -> Option<RenderedFrame> {
        let better = self.better_rendered(video_id, width, height, timestamp);
        self.withdraw(video_id, entry_id, better.as_ref());
        better
    }

    /// Remove `entry_id` if still pending. Its waiters observe no frame.
    pub fn abandon(&self, video_id: &VideoId, entry_id: EntryId) -> bool {
        self.settle_pending(video_id, entry_id, Settlement::Missing)
    }

    /// Remove `entry_id` if still pending because its owner was stopped.
    /// Waiters learn the reason so they can retry like the owner does.
    pub fn stop_pending(&self, video_id: &VideoId, entry_id: EntryId, reason: StopReason) -> bool {
        self.settle_pending(video_id, entry_id, Settlement::Stopped(reason))
    }

    /// Remove `entry_id` if still pending and resolve its waiters with
    /// `frame`. Returns whether the entry was removed.
    pub fn withdraw(
        &self,
        video_id: &VideoId,
        entry_id: EntryId,
        frame: Option<&RenderedFrame>,
    ) -> bool {
        self.settle_pending(video_id, entry_id, frame.into())
    }

    fn settle_pending(
        &self,
        video_id: &VideoId,
        entry_id: EntryId,
        settlement: Settlement,
    ) -> bool {
        let mut videos = lock(&self.videos);
        let Some(video) = videos.get_mut(video_id) else {
            return false;
        };
        match video.take_pending(entry_id) {
            Some(entry) => {
                resolve_all(entry.waiters, settlement);
                true
            }
            None => false,
        }
    }

    /// Apply the failure protocol to a pending entry whose local decode
    /// failed.
    ///
    /// The entry is removed. Its waiters are resolved right away when the
    /// remote cache already holds the frame, already failed for this
    /// timestamp, or `fallback_enabled` is false. Otherwise they are parked
    /// on the failure record for `timestamp`, and only the first failure for
    /// that timestamp asks for a remote render.
    pub fn fail(
        &self,
        video_id: &VideoId,
        entry_id: EntryId,
        timestamp: f64,
        fallback_enabled: bool,
    ) -> FailureOutcome {
        let mut videos = lock(&self.videos);
        let Some(video) = videos.get_mut(video_id) else {
            return FailureOutcome::Resolved;
        };
        let Some(entry) = video.take_pending(entry_id) else {
            return FailureOutcome::Resolved;
        };
        let mut waiters = entry.waiters;

        if let Some(frame) = video.remote_frame(timestamp) {
            resolve_all(waiters, Settlement::Frame(frame));
            return FailureOutcome::Resolved;
        }
        if !fallback_enabled || video.remote_failed.contains(&timestamp) {
            resolve_all(waiters, Settlement::Missing);
            return FailureOutcome::Resolved;
        }
        if let Some(record) = video
            .failures
            .iter_mut()
            .find(|r| r.timestamp == timestamp)
        {
            record.waiters.append(&mut waiters);
            return FailureOutcome::AwaitingFallback;
        }
        video.failures.push(FailureRecord { timestamp, waiters });
        FailureOutcome::RequestFallback
    }

    /// Store a frame delivered by the remote cache.
    ///
    /// Pending entries at the same timestamp are promoted to rendered with
    /// it and every failure waiter for that timestamp is resolved. Returns
    /// the number of waiters that received the frame.
    pub fn remote_frame_arrived(&self, video_id: &VideoId, frame: RenderedFrame) -> usize {
        let mut videos = lock(&self.videos);
        let video = videos.entry(video_id.clone()).or_default();
        let timestamp = frame.timestamp;
        let mut resolved = 0;

        for entry in video
            .entries
            .iter_mut()
            .filter(|e| e.timestamp == timestamp && !e.is_rendered())
        {
            entry.media = MediaHold::Vacant;
            resolved += entry.settle(frame.clone());
        }

        let (settled, outstanding): (Vec<_>, Vec<_>) = std::mem::take(&mut video.failures)
            .into_iter()
            .partition(|r| r.timestamp == timestamp);
        video.failures = outstanding;
        for record in settled {
            resolved += resolve_all(record.waiters, Settlement::Frame(frame.clone()));
        }
        video.remote_failed.retain(|t| *t != timestamp);

        let entry_id = self.next_entry.fetch_add(1, Ordering::Relaxed);
        video.entries.push(FrameEntry {
            id: entry_id,
            width: frame.width,
            height: frame.height,
            timestamp,
            state: EntryState::Rendered(frame),
            media: MediaHold::Vacant,
            waiters: Vec::new(),
        });
        resolved
    }

    /// The remote cache could not render `timestamp`: resolve its failure
    /// waiters with no frame and stop asking for it.
    pub fn remote_render_failed(&self, video_id: &VideoId, timestamp: f64) -> usize {
        let mut videos = lock(&self.videos);
        let video = videos.entry(video_id.clone()).or_default();
        let (settled, outstanding): (Vec<_>, Vec<_>) = std::mem::take(&mut video.failures)
            .into_iter()
            .partition(|r| r.timestamp == timestamp);
        video.failures = outstanding;
        if !video.remote_failed.contains(&timestamp) {
            video.remote_failed.push(timestamp);
        }
        settled
            .into_iter()
            .map(|record| resolve_all(record.waiters, Settlement::Missing))
            .sum()
    }

    /// A frame for `timestamp` delivered by the remote cache, if any.
    pub fn remote_frame(&self, video_id: &VideoId, timestamp: f64) -> Option<RenderedFrame> {
        lock(&self.videos).get(video_id)?.remote_frame(timestamp)
    }

    /// Whether the remote cache already delivered `timestamp`.
    pub fn is_cached_thumbnail_loaded(&self, video_id: &VideoId, timestamp: f64) -> bool {
        self.remote_frame(video_id, timestamp).is_some()
    }

    /// Whether a fallback request is outstanding for `timestamp`.
    pub fn is_awaiting_fallback(&self, video_id: &VideoId, timestamp: f64) -> bool {
        lock(&self.videos)
            .get(video_id)
            .is_some_and(|v| v.failures.iter().any(|r| r.timestamp == timestamp))
    }

    /// Forget everything about `video_id`. Returns the idle media elements
    /// that were held so the caller can release them.
    pub fn remove_video(&self, video_id: &VideoId) -> Vec<Arc<dyn MediaElement>> {
        let Some(video) = lock(&self.videos).remove(video_id) else {
            return Vec::new();
        };
        video
            .entries
            .into_iter()
            .filter_map(|e| match e.media {
                MediaHold::Idle(media) => Some(media),
                _ => None,
            })
            .collect()
    }

    pub fn pending_count(&self, video_id: &VideoId) -> usize {
        self.count(video_id, |e| !e.is_rendered())
    }

    pub fn rendered_count(&self, video_id: &VideoId) -> usize {
        self.count(video_id, FrameEntry::is_rendered)
    }

    fn count(&self, video_id: &VideoId, pred: impl Fn(&FrameEntry) -> bool) -> usize {
        lock(&self.videos)
            .get(video_id)
            .map_or(0, |v| v.entries.iter().filter(|e| pred(e)).count())
    }
}
