use std::time::Duration;

use crate::models::frame::CaptureMetadata;
use crate::models::summary::RollInfo;

/// Receiver of compressed frames and roll lifecycle notifications.
///
/// `frame_done` is called from codec worker threads (or from the thread
/// draining the dispatcher). Implementations should hand heavy work off to
/// their own queue.
pub trait RollConsumer: Send + Sync {
    /// A roll is about to start. Returning `false` refuses it.
    fn new_roll(&self, roll: &RollInfo) -> bool;

    /// A frame finished compression. When `error` is set, `output` is meaningless.
    fn frame_done(&self, metadata: &CaptureMetadata, output: &[u8], error: bool);

    /// Acquisition for the roll has ended; no further frames will be submitted.
    fn roll_done(&self, roll: &RollInfo);

    /// Wait until the consumer finished everything it received for the roll.
    fn wait_roll(&self, _timeout: Duration) -> bool {
        true
    }

    /// Free per-roll resources.
    fn clean_up(&self) {}

    /// The orchestrator is shutting down.
    fn shutdown(&self) {}
}
