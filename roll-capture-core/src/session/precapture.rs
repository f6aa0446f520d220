use std::sync::Arc;

use parking_lot::Mutex;

use crate::models::error::RollError;
use crate::models::request::{AeState, PreviewRequest, PreviewResult};
use crate::models::state::PrecaptureState;
use crate::traits::sensor_session::SensorSession;

/// Drives the auto-focus / auto-exposure lock sequence on the preview stream.
///
/// Every transition that needs a new preview request submits it before the
/// state is recorded. If the sensor rejects a request the negotiator gives up
/// and reports `Converged`, so a capture is never blocked on a stuck sequence.
pub struct PrecaptureNegotiator {
    sensor: Arc<dyn SensorSession>,
    state: Mutex<PrecaptureState>,
}

impl PrecaptureNegotiator {
    pub fn new(sensor: Arc<dyn SensorSession>) -> Self {
        Self {
            sensor,
            state: Mutex::new(PrecaptureState::Preview),
        }
    }

    pub fn state(&self) -> PrecaptureState {
        *self.state.lock()
    }

    pub fn is_converged(&self) -> bool {
        self.state().is_converged()
    }

    /// Start a focus scan. Only allowed from preview or converged.
    pub fn trigger(&self) -> Result<PrecaptureState, RollError> {
        let mut state = self.state.lock();
        if !state.can_trigger() {
            return Err(RollError::NegotiationInProgress);
        }

        if *state == PrecaptureState::Converged {
            // Unlock the previous scan before starting a new one.
            if !self.submit(&mut state, &PreviewRequest::cancel_all(), PrecaptureState::Preview) {
                return Ok(*state);
            }
        }

        self.submit(&mut state, &PreviewRequest::start_focus(), PrecaptureState::Focusing);
        log::debug!("focus triggered, negotiation now {:?}", *state);
        Ok(*state)
    }

    /// Feed the 3A fields of a completed preview frame.
    pub fn on_preview_result(&self, result: &PreviewResult) -> PrecaptureState {
        let mut state = self.state.lock();
        match *state {
            PrecaptureState::Focusing => match result.af_state {
                None => {
                    log::debug!("sensor reports no focus state, skipping negotiation");
                    *state = PrecaptureState::Converged;
                }
                Some(af) if af.is_locked() => {
                    if result.ae_state.is_some() {
                        self.submit(
                            &mut state,
                            &PreviewRequest::start_precapture(),
                            PrecaptureState::Precapture,
                        );
                    } else {
                        *state = PrecaptureState::Converged;
                    }
                }
                Some(_) => {}
            },
            PrecaptureState::Precapture => match result.ae_state {
                None => *state = PrecaptureState::Converged,
                Some(AeState::FlashRequired) => *state = PrecaptureState::PrecaptureFlash,
                Some(AeState::Precapture) => {}
                Some(_) => *state = PrecaptureState::Converged,
            },
            PrecaptureState::PrecaptureFlash => match result.ae_state {
                Some(AeState::Precapture) => {}
                _ => *state = PrecaptureState::Converged,
            },
            PrecaptureState::Preview | PrecaptureState::Converged => {}
        }
        *state
    }

    /// Release the focus lock after a burst so the next trigger starts fresh.
    pub fn cancel(&self) -> PrecaptureState {
        let mut state = self.state.lock();
        if *state == PrecaptureState::Converged {
            self.submit(&mut state, &PreviewRequest::cancel_focus(), PrecaptureState::Preview);
        }
        *state
    }

    /// Issue `request`, then record `next`. On failure record `Converged`.
    fn submit(
        &self,
        state: &mut PrecaptureState,
        request: &PreviewRequest,
        next: PrecaptureState,
    ) -> bool {
        match self.sensor.issue_preview_request(request) {
            Ok(()) => {
                *state = next;
                true
            }
            Err(e) => {
                log::warn!(
                    "preview request for {:?} failed, forcing converged: {}",
                    next,
                    e
                );
                *state = PrecaptureState::Converged;
                false
            }
        }
    }
}
