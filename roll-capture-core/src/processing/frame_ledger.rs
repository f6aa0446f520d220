use std::sync::atomic::{AtomicU64, Ordering};

use crate::models::frame::FrameNumber;

const UNSET: u64 = 0;

/// Forward-only frame number counter.
///
/// Stores `frame + 1` so that zero can mean "nothing recorded yet".
#[derive(Debug, Default)]
struct Ratchet(AtomicU64);

impl Ratchet {
    /// Install `frame` if it is strictly greater than the current value.
    fn advance(&self, frame: FrameNumber) -> bool {
        let encoded = frame.saturating_add(1);
        let mut current = self.0.load(Ordering::Acquire);
        while current < encoded {
            match self.0.compare_exchange_weak(
                current,
                encoded,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
        false
    }

    fn get(&self) -> Option<FrameNumber> {
        match self.0.load(Ordering::Acquire) {
            UNSET => None,
            encoded => Some(encoded - 1),
        }
    }

    fn reset(&self) {
        self.0.store(UNSET, Ordering::Release);
    }
}

/// Progress bookkeeping for the current roll.
///
/// - started: last frame the sensor began exposing
/// - completed: last frame whose metadata arrived
/// - imaged: last frame whose buffer was matched and handed to compression
///
/// Only consulted while draining a roll; matching never depends on it.
#[derive(Debug, Default)]
pub struct FrameLedger {
    started: Ratchet,
    completed: Ratchet,
    imaged: Ratchet,
}

impl FrameLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance_started(&self, frame: FrameNumber) -> bool {
        self.started.advance(frame)
    }

    pub fn advance_completed(&self, frame: FrameNumber) -> bool {
        self.completed.advance(frame)
    }

    pub fn advance_imaged(&self, frame: FrameNumber) -> bool {
        self.imaged.advance(frame)
    }

    pub fn started(&self) -> Option<FrameNumber> {
        self.started.get()
    }

    pub fn completed(&self) -> Option<FrameNumber> {
        self.completed.get()
    }

    pub fn imaged(&self) -> Option<FrameNumber> {
        self.imaged.get()
    }

    /// Whether every frame with completed metadata has also been imaged.
    pub fn is_caught_up(&self) -> bool {
        self.imaged() >= self.completed()
    }

    pub fn reset(&self) {
        self.started.reset();
        self.completed.reset();
        self.imaged.reset();
    }
}
