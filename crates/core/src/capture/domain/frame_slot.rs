use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::shared::frame::Frame;

/// Capacity-1 hand-off buffer between one producer and one consumer.
///
/// A deposit into an occupied slot replaces the held frame; the consumer
/// only ever sees the most recent frame. Neither side waits on the other
/// beyond the critical section that swaps the `Option`.
#[derive(Debug, Default)]
pub struct FrameSlot {
    frame: Mutex<Option<Frame>>,
    dropped: AtomicU64,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `frame`, discarding any frame the consumer has not taken yet.
    pub fn deposit(&self, frame: Frame) {
        let previous = self.lock().replace(frame);
        if let Some(stale) = previous {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            log::debug!("Overwrote untaken frame {}", stale.index());
        }
    }

    /// Removes and returns the held frame, or `None` if the slot is empty.
    pub fn take(&self) -> Option<Frame> {
        self.lock().take()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_none()
    }

    /// Number of frames overwritten before the consumer took them.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    // The guarded value is a plain Option swap, so a poisoned lock still
    // holds a consistent value.
    fn lock(&self) -> MutexGuard<'_, Option<Frame>> {
        self.frame.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
