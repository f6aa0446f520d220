use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::RollError;
use super::frame::FrameNumber;
use super::request::{CaptureFormat, Quality};

/// Identity of one roll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollInfo {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub format: CaptureFormat,
    pub quality: Quality,
}

impl RollInfo {
    pub fn new(format: CaptureFormat, quality: Quality) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            format,
            quality,
        }
    }
}

/// Outcome of a finished roll, returned by `stop_roll`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollSummary {
    #[serde(flatten)]
    pub info: RollInfo,
    pub duration_secs: f64,
    /// Buffers delivered by the sensor while the roll accepted frames.
    pub frames_received: u64,
    /// Buffers shed because the resource gate was exhausted.
    pub frames_dropped: u64,
    /// Buffers whose metadata can no longer arrive.
    pub frames_obsolete: u64,
    /// Matched pairs handed to the compression dispatcher.
    pub frames_submitted: u64,
    pub frames_compressed: u64,
    pub frames_failed: u64,
    /// Metadata records discarded unmatched at the end of the roll.
    pub metadata_discarded: u64,
    pub last_started: Option<FrameNumber>,
    pub last_completed: Option<FrameNumber>,
    pub last_imaged: Option<FrameNumber>,
    /// A bounded wait ran out and outstanding work was released by force.
    pub forced_completion: bool,
}

impl RollSummary {
    pub fn to_json(&self) -> Result<String, RollError> {
        serde_json::to_string_pretty(self).map_err(|e| {
            RollError::Serialization(format!("failed to serialize roll summary: {}", e))
        })
    }

    pub fn from_json(json: &str) -> Result<Self, RollError> {
        serde_json::from_str(json)
            .map_err(|e| RollError::Serialization(format!("failed to parse roll summary: {}", e)))
    }
}
