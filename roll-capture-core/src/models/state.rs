/// Lifecycle of an acquisition roll.
///
/// ```text
/// idle → active → draining → idle
/// ```
///
/// Only one roll exists at a time; a new roll may only start from idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RollState {
    #[default]
    Idle,
    Active,
    Draining,
}

impl RollState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// Whether incoming frames still belong to the current roll.
    pub fn accepts_frames(&self) -> bool {
        matches!(self, Self::Active | Self::Draining)
    }
}

/// Focus/exposure negotiation state of the preview stream.
///
/// ```text
/// preview → focusing → precapture → precapture_flash
///    ↑          ↓           ↓              ↓
///    └──────── converged ←──┴──────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrecaptureState {
    #[default]
    Preview,
    Focusing,
    Precapture,
    PrecaptureFlash,
    Converged,
}

impl PrecaptureState {
    /// A new focus trigger is only honored from these states.
    pub fn can_trigger(&self) -> bool {
        matches!(self, Self::Preview | Self::Converged)
    }

    pub fn is_converged(&self) -> bool {
        matches!(self, Self::Converged)
    }
}
