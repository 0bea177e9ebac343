//! Admission control for local decodes.
//!
//! At most `max_active` render attempts hold a [`RenderSlot`] at a time.
//! Attempts beyond that queue in FIFO order; releasing a slot hands it
//! straight to the oldest waiter, so the active count never dips while
//! anyone is queued. A waiter whose video becomes available from the remote
//! cache can be woken out of order with [`RenderScheduler::notify_available`].

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;
use tokio::time::Instant;

use rebrand_core::sync::lock;
use rebrand_core::VideoId;

/// What a waiter was woken with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wake {
    Slot,
    CacheReady,
}

/// Outcome of [`RenderScheduler::acquire`].
#[derive(Debug)]
pub enum Admission {
    /// Decode may proceed. Dropping the slot releases it.
    Granted(RenderSlot),
    /// The video became available from the remote cache while queued; no
    /// slot is held.
    CacheReady,
}

#[derive(Debug, thiserror::Error)]
pub enum SlotError {
    #[error("Deadline passed while waiting for a render slot")]
    TimedOut,
}

struct Waiter {
    ticket: u64,
    video_id: VideoId,
    tx: oneshot::Sender<Wake>,
}

struct SchedulerState {
    active: usize,
    max_active: usize,
    queue: VecDeque<Waiter>,
    next_ticket: u64,
}

impl SchedulerState {
    /// Hand the slot to the oldest live waiter, or free it.
    fn release(&mut self) {
        while let Some(waiter) = self.queue.pop_front() {
            if waiter.tx.send(Wake::Slot).is_ok() {
                return;
            }
        }
        self.active = self.active.saturating_sub(1);
    }
}

/// FIFO-fair concurrency limiter. Cheap to clone.
#[derive(Clone)]
pub struct RenderScheduler {
    state: Arc<Mutex<SchedulerState>>,
}

impl RenderScheduler {
    pub fn new(max_active: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(SchedulerState {
                active: 0,
                max_active: max_active.max(1),
                queue: VecDeque::new(),
                next_ticket: 0,
            })),
        }
    }

    /// Wait for a slot for `video_id`, giving up at `deadline`.
    ///
    /// On timeout the waiter is removed from the queue; a slot granted in
    /// the same instant is passed on rather than leaked.
    pub async fn acquire(
        &self,
        video_id: &VideoId,
        deadline: Instant,
    ) -> Result<Admission, SlotError> {
        let mut pending = {
            let mut state = lock(&self.state);
            if state.active < state.max_active {
                state.active += 1;
                return Ok(Admission::Granted(self.slot()));
            }
            let ticket = state.next_ticket;
            state.next_ticket += 1;
            let (tx, rx) = oneshot::channel();
            state.queue.push_back(Waiter {
                ticket,
                video_id: video_id.clone(),
                tx,
            });
            tracing::trace!(
                video_id = %video_id,
                queued = state.queue.len(),
                "Waiting for render slot",
            );
            PendingAdmission {
                state: Arc::clone(&self.state),
                ticket,
                rx,
                settled: false,
            }
        };

        match tokio::time::timeout_at(deadline, &mut pending.rx).await {
            Ok(Ok(Wake::Slot)) => {
                pending.settled = true;
                Ok(Admission::Granted(self.slot()))
            }
            Ok(Ok(Wake::CacheReady)) => {
                pending.settled = true;
                Ok(Admission::CacheReady)
            }
            Ok(Err(_)) | Err(_) => Err(SlotError::TimedOut),
        }
    }

    /// Wake every queued waiter for `video_id` without granting a slot.
    /// Returns how many were woken.
    pub fn notify_available(&self, video_id: &VideoId) -> usize {
        let mut state = lock(&self.state);
        let mut woken = 0;
        let mut kept = VecDeque::with_capacity(state.queue.len());
        for waiter in state.queue.drain(..) {
            if &waiter.video_id == video_id {
                let _ = waiter.tx.send(Wake::CacheReady);
                woken += 1;
            } else {
                kept.push_back(waiter);
            }
        }
        state.queue = kept;
        woken
    }

    pub fn active(&self) -> usize {
        lock(&self.state).active
    }

    pub fn queued(&self) -> usize {
        lock(&self.state).queue.len()
    }

    pub fn max_active(&self) -> usize {
        lock(&self.state).max_active
    }

    fn slot(&self) -> RenderSlot {
        RenderSlot {
            state: Arc::clone(&self.state),
        }
    }
}

/// A held render slot, released on drop.
pub struct RenderSlot {
    state: Arc<Mutex<SchedulerState>>,
}

impl std::fmt::Debug for RenderSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderSlot").finish_non_exhaustive()
    }
}

impl Drop for RenderSlot {
    fn drop(&mut self) {
        lock(&self.state).release();
    }
}

/// A queued waiter. Dropping it unsettled withdraws it from the queue.
struct PendingAdmission {
    state: Arc<Mutex<SchedulerState>>,
    ticket: u64,
    rx: oneshot::Receiver<Wake>,
    settled: bool,
}

impl Drop for PendingAdmission {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let mut state = lock(&self.state);
        if let Some(pos) = state.queue.iter().position(|w| w.ticket == self.ticket) {
            state.queue.remove(pos);
            return;
        }
        // Already popped: a slot may have been handed to us after all.
        if let Ok(Wake::Slot) = self.rx.try_recv() {
            state.release();
        }
    }
}
