use crate::models::error::RollError;
use crate::models::request::CaptureFormat;
use crate::models::state::PrecaptureState;
use crate::models::summary::{RollInfo, RollSummary};

/// Control surface of a roll-capable capture driver.
pub trait RollSession: Send + Sync {
    /// Start a roll. Transitions: idle → active.
    fn start_roll(&self) -> Result<RollInfo, RollError>;

    /// Stop the roll and wait (bounded) for its frames.
    /// Transitions: active → draining → idle.
    fn stop_roll(&self) -> Result<RollSummary, RollError>;

    fn is_active(&self) -> bool;

    fn current_format(&self) -> CaptureFormat;

    /// Change the burst format. Rejected while a roll is running.
    fn set_format(&self, format: CaptureFormat) -> Result<(), RollError>;

    /// Start focus/exposure negotiation on the preview stream.
    fn trigger_focus(&self) -> Result<PrecaptureState, RollError>;
}
