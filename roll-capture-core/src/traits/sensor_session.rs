use std::sync::Arc;

use crate::models::error::RollError;
use crate::models::frame::{CaptureMetadata, FrameBuffer, FrameNumber, Timestamp};
use crate::models::request::{BurstRequest, PreviewRequest, PreviewResult, SensorInfo};

/// Receiver of sensor events.
///
/// All methods are called from the sensor's callback thread, serially and in
/// arrival order. Implementations must not block for an unbounded time.
pub trait SensorListener: Send + Sync {
    /// Exposure of a burst frame began.
    fn capture_started(&self, frame_number: FrameNumber, timestamp: Timestamp);

    /// Capture results for a burst frame are available.
    fn metadata_completed(&self, metadata: CaptureMetadata);

    /// A burst frame's pixel buffer is available. The listener now owns it.
    fn buffer_available(&self, buffer: FrameBuffer);

    /// The sensor gave up on a burst frame; no metadata will follow for it.
    fn capture_failed(&self, frame_number: FrameNumber);

    /// A repeating burst stopped and will produce no further frames.
    fn sequence_finished(&self);

    /// A preview frame completed with the given 3A fields.
    fn preview_completed(&self, result: PreviewResult);
}

/// Interface to a configured sensor capture session.
///
/// Implemented by backends such as `SimulatedSensor`.
pub trait SensorSession: Send + Sync {
    /// Static sensor description, including the output pool size.
    fn sensor_info(&self) -> SensorInfo;

    /// Route buffer and preview events to `listener`.
    fn attach(&self, listener: Arc<dyn SensorListener>);

    /// Stop delivering events and drop the attached listener.
    fn detach(&self);

    /// Submit a single-shot request on the preview stream.
    fn issue_preview_request(&self, request: &PreviewRequest) -> Result<(), RollError>;

    /// Replace the repeating request with a preview request.
    fn set_repeating_preview(&self, request: &PreviewRequest) -> Result<(), RollError>;

    /// Start a full-frame request. Capture events go to `listener`.
    fn issue_burst_request(
        &self,
        request: &BurstRequest,
        listener: Arc<dyn SensorListener>,
    ) -> Result<(), RollError>;

    /// Stop whichever repeating request is active.
    fn stop_repeating(&self) -> Result<(), RollError>;
}
