use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::request::{AeState, AfState, CaptureFormat};

/// Sensor-clock time in nanoseconds. The only key used to pair buffers with metadata.
pub type Timestamp = u64;

/// Per-request sequence number assigned by the sensor. Used for progress bookkeeping only.
pub type FrameNumber = u64;

/// Flash unit state at exposure time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlashState {
    #[default]
    Unavailable,
    Charging,
    Ready,
    Fired,
    Partial,
}

/// Per-channel white balance gains.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WhiteBalanceGains {
    pub red: f32,
    pub green_even: f32,
    pub green_odd: f32,
    pub blue: f32,
}

impl Default for WhiteBalanceGains {
    fn default() -> Self {
        Self {
            red: 1.0,
            green_even: 1.0,
            green_odd: 1.0,
            blue: 1.0,
        }
    }
}

/// Capture results reported by the sensor once per frame.
///
/// Immutable once produced. Fields the sensor did not report keep their
/// defaults (zero, unavailable, unity gains).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CaptureMetadata {
    pub timestamp: Timestamp,
    pub frame_number: FrameNumber,
    pub exposure_time_ns: u64,
    pub sensitivity_iso: u32,
    pub aperture: f32,
    pub focal_length_mm: f32,
    pub focus_distance_diopters: f32,
    pub exposure_compensation_steps: i32,
    pub exposure_compensation_step: f32,
    pub flash_state: FlashState,
    pub orientation_degrees: u32,
    pub af_state: Option<AfState>,
    pub ae_state: Option<AeState>,
    pub white_balance: WhiteBalanceGains,
}

impl CaptureMetadata {
    pub fn new(timestamp: Timestamp, frame_number: FrameNumber) -> Self {
        Self {
            timestamp,
            frame_number,
            ..Default::default()
        }
    }

    /// Exposure compensation in EV (steps times step size).
    pub fn exposure_compensation_ev(&self) -> f32 {
        self.exposure_compensation_steps as f32 * self.exposure_compensation_step
    }

    pub fn exposure_time_secs(&self) -> f64 {
        self.exposure_time_ns as f64 / 1e9
    }
}

/// Invoked exactly once when a buffer goes back to the sensor pool.
pub type ReleaseHook = Box<dyn FnOnce(Timestamp) + Send + 'static>;

/// Exclusively owned handle to one raw sensor frame.
///
/// The handle is not clonable and `release` consumes it, so a buffer can only
/// be given back once. A handle that is dropped without `release` is logged as
/// a leak and returned to the pool anyway.
pub struct FrameBuffer {
    timestamp: Timestamp,
    width: u32,
    height: u32,
    format: CaptureFormat,
    data: Bytes,
    on_release: Option<ReleaseHook>,
}

impl FrameBuffer {
    pub fn new(
        timestamp: Timestamp,
        width: u32,
        height: u32,
        format: CaptureFormat,
        data: Bytes,
        on_release: ReleaseHook,
    ) -> Self {
        Self {
            timestamp,
            width,
            height,
            format,
            data,
            on_release: Some(on_release),
        }
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> CaptureFormat {
        self.format
    }

    /// Shared view of the pixel data. Cloning it does not copy.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Hand the buffer back to the sensor pool.
    pub fn release(mut self) {
        if let Some(hook) = self.on_release.take() {
            hook(self.timestamp);
        }
    }
}

impl Drop for FrameBuffer {
    fn drop(&mut self) {
        if let Some(hook) = self.on_release.take() {
            log::error!(
                "frame buffer ts={} dropped without release, returning it to the pool",
                self.timestamp
            );
            hook(self.timestamp);
        }
    }
}

impl fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("timestamp", &self.timestamp)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("len", &self.data.len())
            .finish()
    }
}
