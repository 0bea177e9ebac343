//! Per-video stop signals.
//!
//! Every render attempt subscribes to the stop signal of its video. When a
//! remote pre-render arrives or the video is released, [`CancellationRegistry::stop`]
//! fires the signal once, removes it, and every attempt subscribed to it
//! observes the stop at its next await point. Attempts started afterwards
//! subscribe to a fresh signal.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock};

use tokio_util::sync::CancellationToken;

use rebrand_core::sync::lock;
use rebrand_core::VideoId;

/// Why a video's renders were stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The remote thumbnail cache delivered the frame.
    PreRendered,
    /// The video was released or its branding invalidated.
    Invalidated,
}

impl StopReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PreRendered => "pre-rendered",
            Self::Invalidated => "invalidated",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A one-shot stop signal shared by every attempt of one video generation.
#[derive(Debug, Clone)]
pub struct StopSignal {
    token: CancellationToken,
    reason: Arc<OnceLock<StopReason>>,
}

impl StopSignal {
    fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            reason: Arc::new(OnceLock::new()),
        }
    }

    fn fire(&self, reason: StopReason) {
        let _ = self.reason.set(reason);
        self.token.cancel();
    }

    fn same_as(&self, other: &StopSignal) -> bool {
        Arc::ptr_eq(&self.reason, &other.reason)
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolve once the signal fires.
    pub async fn stopped(&self) -> StopReason {
        self.token.cancelled().await;
        self.reason()
    }

    fn reason(&self) -> StopReason {
        self.reason.get().copied().unwrap_or(StopReason::Invalidated)
    }
}

struct Entry {
    signal: StopSignal,
    subscribers: usize,
}

/// Video id → current stop signal.
#[derive(Clone, Default)]
pub struct CancellationRegistry {
    signals: Arc<Mutex<HashMap<VideoId, Entry>>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to the current stop signal of `video_id`, creating one when
    /// none is registered. The entry is removed once the last subscription
    /// is dropped.
    pub fn subscribe(&self, video_id: &VideoId) -> StopSubscription {
        let mut signals = lock(&self.signals);
        let entry = signals.entry(video_id.clone()).or_insert_with(|| Entry {
            signal: StopSignal::new(),
            subscribers: 0,
        });
        entry.subscribers += 1;
        StopSubscription {
            video_id: video_id.clone(),
            signal: entry.signal.clone(),
            signals: Arc::clone(&self.signals),
        }
    }

    /// Fire and remove the stop signal of `video_id`. Returns whether any
    /// attempt was subscribed.
    pub fn stop(&self, video_id: &VideoId, reason: StopReason) -> bool {
        let entry = lock(&self.signals).remove(video_id);
        match entry {
            Some(entry) => {
                tracing::debug!(
                    video_id = %video_id,
                    reason = %reason,
                    subscribers = entry.subscribers,
                    "Stopping renders",
                );
                entry.signal.fire(reason);
                true
            }
            None => false,
        }
    }

    pub fn is_registered(&self, video_id: &VideoId) -> bool {
        lock(&self.signals).contains_key(video_id)
    }
}

/// A render attempt's hold on its video's stop signal.
pub struct StopSubscription {
    video_id: VideoId,
    signal: StopSignal,
    signals: Arc<Mutex<HashMap<VideoId, Entry>>>,
}

impl StopSubscription {
    pub fn is_stopped(&self) -> bool {
        self.signal.is_stopped()
    }

    pub async fn stopped(&self) -> StopReason {
        self.signal.stopped().await
    }
}

impl Drop for StopSubscription {
    fn drop(&mut self) {
        let mut signals = lock(&self.signals);
        let Some(entry) = signals.get_mut(&self.video_id) else {
            return;
        };
        // A newer generation may have replaced ours after a stop.
        if !entry.signal.same_as(&self.signal) {
            return;
        }
        entry.subscribers = entry.subscribers.saturating_sub(1);
        if entry.subscribers == 0 {
            signals.remove(&self.video_id);
        }
    }
}
