use std::sync::Arc;

use crate::models::error::RollError;
use crate::models::request::{BurstRequest, CaptureTarget, SensorInfo};
use crate::traits::acquisition_policy::AcquisitionPolicy;
use crate::traits::sensor_session::{SensorListener, SensorSession};

/// Issues the same repeating full-frame request for the whole roll.
#[derive(Debug, Default)]
pub struct SerialAcquisitionPolicy {
    request: Option<BurstRequest>,
}

impl SerialAcquisitionPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) -> Option<&BurstRequest> {
        self.request.as_ref()
    }
}

impl AcquisitionPolicy for SerialAcquisitionPolicy {
    fn apply(&mut self, device: &SensorInfo, target: CaptureTarget) -> Result<(), RollError> {
        if target.width == 0 || target.height == 0 {
            return Err(RollError::ConfigurationFailed(format!(
                "empty capture target {}x{} for sensor {}",
                target.width, target.height, device.id
            )));
        }
        if target.width > device.max_width || target.height > device.max_height {
            return Err(RollError::ConfigurationFailed(format!(
                "target {}x{} exceeds sensor {} maximum {}x{}",
                target.width, target.height, device.id, device.max_width, device.max_height
            )));
        }

        log::debug!(
            "serial policy applied: {:?} {}x{} on sensor {}",
            target.format,
            target.width,
            target.height,
            device.id
        );
        self.request = Some(BurstRequest {
            target,
            repeating: true,
        });
        Ok(())
    }

    fn activate(
        &self,
        session: &dyn SensorSession,
        listener: Arc<dyn SensorListener>,
    ) -> Result<(), RollError> {
        let request = self.request.as_ref().ok_or(RollError::PolicyNotSet)?;
        session.issue_burst_request(request, listener)
    }
}
