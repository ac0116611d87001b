use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock};

use frame_relay_common::frame::Frame;
use tokio::sync::Notify;
use tracing::{debug, info};

/// Single-slot, latest-wins holder of the most recently captured frame.
///
/// The slot is only touched while the mutex is held, and the lock is held for
/// exactly one move (publish) or one clone (read). A frame that is replaced
/// before anyone reads it is dropped.
#[derive(Default)]
pub struct FrameStore {
    slot: Mutex<Option<Frame>>,
    published: AtomicU64,
}

impl FrameStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored frame.
    pub fn publish(&self, frame: Frame) {
        let previous = {
            let mut slot = self.lock();
            slot.replace(frame)
        };
        self.published.fetch_add(1, Ordering::Relaxed);
        // Dropped outside the lock.
        drop(previous);
    }

    /// Independent copy of the newest frame, or `None` before the first publish.
    pub fn snapshot_latest(&self) -> Option<Frame> {
        self.lock().clone()
    }

    pub fn latest_seq(&self) -> Option<u64> {
        self.lock().as_ref().map(|f| f.seq)
    }

    /// Number of publishes so far.
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    fn lock(&self) -> MutexGuard<'_, Option<Frame>> {
        // A panicking holder can only have been mid-move of a whole `Frame`,
        // so the slot is still either the old or the new frame.
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Why the pipeline stopped running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    UserQuit,
    EndOfStream,
    CaptureFailed,
    Interrupted,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StopReason::UserQuit => "user quit",
            StopReason::EndOfStream => "end of stream",
            StopReason::CaptureFailed => "capture failed",
            StopReason::Interrupted => "interrupted",
        };
        f.write_str(s)
    }
}

/// One-way running latch shared by every loop.
///
/// Starts true. `stop` flips it to false exactly once; there is no way to set
/// it back. The first caller's reason is kept, and is visible to anyone who
/// has observed the flag as false.
pub struct RunFlag {
    running: AtomicBool,
    reason: OnceLock<StopReason>,
    stopped: Notify,
}

impl Default for RunFlag {
    fn default() -> Self {
        Self {
            running: AtomicBool::new(true),
            reason: OnceLock::new(),
            stopped: Notify::new(),
        }
    }
}

impl RunFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Request shutdown. Returns `true` if this call was the one that stopped
    /// the pipeline.
    pub fn stop(&self, reason: StopReason) -> bool {
        // The reason is recorded before the flag drops. Exactly one caller
        // wins the slot; losers still clear the flag before returning.
        let flipped = self.reason.set(reason).is_ok();
        self.running.store(false, Ordering::Release);
        if flipped {
            self.stopped.notify_waiters();
            info!(%reason, "shutdown requested");
        } else {
            debug!(%reason, "shutdown already in progress");
        }
        flipped
    }

    /// Resolves once the pipeline has been stopped.
    pub async fn stopped(&self) {
        let notified = self.stopped.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if !self.is_running() {
            return;
        }
        notified.await;
    }

    pub fn reason(&self) -> Option<StopReason> {
        self.reason.get().copied()
    }
}

/// State shared between the capture, recorder and display loops and the
/// snapshot tasks. Handed around as `Arc<RelayState>`.
#[derive(Default)]
pub struct RelayState {
    pub frames: FrameStore,
    pub running: RunFlag,
    snapshot_counter: AtomicU64,
}

impl RelayState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next snapshot number. Unique across concurrent callers.
    pub fn next_snapshot_number(&self) -> u64 {
        self.snapshot_counter.fetch_add(1, Ordering::Relaxed)
    }

    pub fn snapshots_allocated(&self) -> u64 {
        self.snapshot_counter.load(Ordering::Relaxed)
    }
}
