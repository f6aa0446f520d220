use serde::{Deserialize, Serialize};

/// Pixel layout of burst captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureFormat {
    Yuv420,
    RawSensor,
}

/// Compression quality; lower quality means smaller output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    #[default]
    Low,
    Medium,
    High,
}

/// Bayer color filter arrangement of the sensor, relevant for raw captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CfaPattern {
    Rggb,
    Bggr,
    Gbrg,
    Grbg,
    #[default]
    Unknown,
}

/// Static description of the sensor backing a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorInfo {
    pub id: String,
    /// Number of frame buffers the sensor's output pool holds.
    pub buffer_pool_size: usize,
    /// Largest full-frame output size for burst captures.
    pub max_width: u32,
    pub max_height: u32,
    pub cfa_pattern: CfaPattern,
    /// Maximum raw sample value reported by the sensor, if any.
    pub white_level: Option<u32>,
}

/// Raw samples are never handed to the codec deeper than this.
pub const MAX_RAW_BIT_DEPTH: u32 = 14;

impl SensorInfo {
    /// Bits per raw color sample, derived from the white level and capped at 14.
    pub fn raw_bit_depth(&self) -> u32 {
        match self.white_level {
            Some(level) if level > 1 => {
                let bits = u32::BITS - (level - 1).leading_zeros();
                bits.min(MAX_RAW_BIT_DEPTH)
            }
            _ => MAX_RAW_BIT_DEPTH,
        }
    }

    /// Sample layout the codec needs for raw bursts from this sensor.
    pub fn raw_layout(&self) -> RawLayout {
        RawLayout {
            bit_depth: self.raw_bit_depth(),
            cfa_pattern: self.cfa_pattern,
        }
    }

    /// Full-size target for the given format.
    pub fn full_frame_target(&self, format: CaptureFormat) -> CaptureTarget {
        CaptureTarget {
            format,
            width: self.max_width,
            height: self.max_height,
        }
    }
}

/// How raw samples are packed: bits per sample and Bayer arrangement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RawLayout {
    pub bit_depth: u32,
    pub cfa_pattern: CfaPattern,
}

impl Default for RawLayout {
    fn default() -> Self {
        Self {
            bit_depth: MAX_RAW_BIT_DEPTH,
            cfa_pattern: CfaPattern::Unknown,
        }
    }
}

/// Output target a policy configures its burst requests for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureTarget {
    pub format: CaptureFormat,
    pub width: u32,
    pub height: u32,
}

/// Auto-focus state reported in a preview result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AfState {
    Inactive,
    PassiveScan,
    PassiveFocused,
    ActiveScan,
    FocusedLocked,
    NotFocusedLocked,
    PassiveUnfocused,
}

impl AfState {
    /// Whether the lens has finished a triggered scan, successfully or not.
    pub fn is_locked(self) -> bool {
        matches!(self, Self::FocusedLocked | Self::NotFocusedLocked)
    }
}

/// Auto-exposure state reported in a preview result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AeState {
    Inactive,
    Searching,
    Converged,
    Locked,
    FlashRequired,
    Precapture,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfTrigger {
    Idle,
    Start,
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AePrecaptureTrigger {
    Idle,
    Start,
    Cancel,
}

/// A single-shot or repeating request on the preview stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreviewRequest {
    pub af_trigger: AfTrigger,
    pub ae_precapture_trigger: AePrecaptureTrigger,
}

impl PreviewRequest {
    /// Plain repeating preview: continuous AF, auto exposure, no triggers.
    pub fn repeating() -> Self {
        Self {
            af_trigger: AfTrigger::Idle,
            ae_precapture_trigger: AePrecaptureTrigger::Idle,
        }
    }

    pub fn start_focus() -> Self {
        Self {
            af_trigger: AfTrigger::Start,
            ..Self::repeating()
        }
    }

    pub fn start_precapture() -> Self {
        Self {
            ae_precapture_trigger: AePrecaptureTrigger::Start,
            ..Self::repeating()
        }
    }

    pub fn cancel_focus() -> Self {
        Self {
            af_trigger: AfTrigger::Cancel,
            ..Self::repeating()
        }
    }

    pub fn cancel_all() -> Self {
        Self {
            af_trigger: AfTrigger::Cancel,
            ae_precapture_trigger: AePrecaptureTrigger::Cancel,
        }
    }
}

/// Repeating full-frame request issued by an acquisition policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BurstRequest {
    pub target: CaptureTarget,
    pub repeating: bool,
}

/// 3A fields of a completed preview frame. `None` means the sensor did not report the field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PreviewResult {
    pub af_state: Option<AfState>,
    pub ae_state: Option<AeState>,
}
