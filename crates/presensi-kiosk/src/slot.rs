//! Single-slot, most-recent-wins frame handoff between the capture thread
//! and the interactive loop.
//!
//! The producer overwrites, the consumer copies out. Unconsumed frames are
//! dropped: a live kiosk prefers staleness over backpressure.

use presensi_hw::Frame;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct Held {
    generation: u64,
    frame: Option<Frame>,
}

#[derive(Default)]
pub struct FrameSlot {
    inner: Mutex<Held>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Held> {
        // Whole-value assignment is the only mutation; a poisoned slot still
        // holds a complete frame.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the held frame unconditionally.
    pub fn put(&self, frame: Frame) {
        let mut held = self.lock();
        held.generation += 1;
        held.frame = Some(frame);
    }

    /// Private copy of the most recent frame, if any has arrived.
    pub fn get(&self) -> Option<Frame> {
        self.lock().frame.clone()
    }

    /// Copy of the most recent frame only if it is newer than `seen`,
    /// together with its generation.
    pub fn latest_after(&self, seen: u64) -> Option<(u64, Frame)> {
        let held = self.lock();
        if held.generation <= seen {
            return None;
        }
        held.frame.clone().map(|f| (held.generation, f))
    }
}
