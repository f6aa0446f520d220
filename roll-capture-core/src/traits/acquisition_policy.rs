use std::sync::Arc;

use crate::models::error::RollError;
use crate::models::request::{CaptureTarget, SensorInfo};
use crate::traits::sensor_session::{SensorListener, SensorSession};

/// Strategy deciding how full-frame captures are requested during a roll.
pub trait AcquisitionPolicy: Send + Sync {
    /// Prepare requests for `device` producing frames into `target`.
    fn apply(&mut self, device: &SensorInfo, target: CaptureTarget) -> Result<(), RollError>;

    /// Begin issuing captures on `session`, reporting them to `listener`.
    fn activate(
        &self,
        session: &dyn SensorSession,
        listener: Arc<dyn SensorListener>,
    ) -> Result<(), RollError>;
}
