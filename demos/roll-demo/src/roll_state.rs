use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde_json::json;

use roll_capture_core::{CaptureMetadata, RollConsumer, RollInfo};

/// Per-roll totals kept by [`LoggingConsumer`].
#[derive(Debug, Default)]
struct RollTotals {
    roll_id: Option<String>,
    frames: u64,
    errors: u64,
    bytes: u64,
    first_timestamp: Option<u64>,
    last_timestamp: Option<u64>,
    done: bool,
}

/// RollConsumer that logs every frame and keeps running totals.
pub struct LoggingConsumer {
    totals: Mutex<RollTotals>,
    finished: Condvar,
    rolls: AtomicU64,
    started: Mutex<Option<Instant>>,
}

impl LoggingConsumer {
    pub fn new() -> Self {
        Self {
            totals: Mutex::new(RollTotals::default()),
            finished: Condvar::new(),
            rolls: AtomicU64::new(0),
            started: Mutex::new(None),
        }
    }

    /// Totals of the most recent roll as JSON.
    pub fn report(&self) -> serde_json::Value {
        let totals = self.totals.lock();
        let span_ms = match (totals.first_timestamp, totals.last_timestamp) {
            (Some(first), Some(last)) => (last - first) as f64 / 1e6,
            _ => 0.0,
        };
        json!({
            "roll_id": totals.roll_id,
            "frames": totals.frames,
            "errors": totals.errors,
            "bytes": totals.bytes,
            "sensor_span_ms": span_ms,
            "rolls": self.rolls.load(Ordering::SeqCst),
        })
    }
}

impl RollConsumer for LoggingConsumer {
    fn new_roll(&self, roll: &RollInfo) -> bool {
        let mut totals = self.totals.lock();
        *totals = RollTotals {
            roll_id: Some(roll.id.clone()),
            ..Default::default()
        };
        *self.started.lock() = Some(Instant::now());
        self.rolls.fetch_add(1, Ordering::SeqCst);
        log::info!("consumer: roll {} ({:?}, {:?})", roll.id, roll.format, roll.quality);
        true
    }

    fn frame_done(&self, metadata: &CaptureMetadata, output: &[u8], error: bool) {
        let mut totals = self.totals.lock();
        if error {
            totals.errors += 1;
            log::debug!("consumer: frame {} failed", metadata.frame_number);
            return;
        }
        totals.frames += 1;
        totals.bytes += output.len() as u64;
        totals.first_timestamp.get_or_insert(metadata.timestamp);
        totals.last_timestamp = Some(metadata.timestamp);
        log::trace!(
            "consumer: frame {} ts={} iso={} exposure={:.4}s",
            metadata.frame_number,
            metadata.timestamp,
            metadata.sensitivity_iso,
            metadata.exposure_time_secs()
        );
    }

    fn roll_done(&self, roll: &RollInfo) {
        let mut totals = self.totals.lock();
        totals.done = true;
        self.finished.notify_all();
        log::info!(
            "consumer: roll {} done, {} frames, {} errors",
            roll.id,
            totals.frames,
            totals.errors
        );
    }

    fn wait_roll(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut totals = self.totals.lock();
        while !totals.done {
            if self.finished.wait_until(&mut totals, deadline).timed_out() {
                return totals.done;
            }
        }
        true
    }

    fn clean_up(&self) {
        if let Some(started) = self.started.lock().take() {
            log::debug!("consumer: roll lasted {:?}", started.elapsed());
        }
    }

    fn shutdown(&self) {
        log::info!("consumer: shut down after {} rolls", self.rolls.load(Ordering::SeqCst));
    }
}
