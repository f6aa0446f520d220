use thiserror::Error;

/// Errors that can occur while driving the sensor, a roll, or the codec.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RollError {
    #[error("a roll is already active or draining")]
    RollInProgress,

    #[error("no active roll")]
    NoActiveRoll,

    #[error("configuration failed: {0}")]
    ConfigurationFailed(String),

    #[error("no acquisition policy installed")]
    PolicyNotSet,

    #[error("sensor request failed: {0}")]
    SensorRequestFailed(String),

    #[error("roll consumer is not ready for a new roll")]
    ConsumerNotReady,

    #[error("focus/exposure negotiation has not converged")]
    NotConverged,

    #[error("focus/exposure negotiation already in progress")]
    NegotiationInProgress,

    #[error("token was not issued by this gate")]
    ForeignToken,

    #[error("more tokens released than were acquired")]
    TokenOverRelease,

    #[error("codec initialization failed: {0}")]
    CodecInitFailed(String),

    #[error("orchestrator has been shut down")]
    ShutDown,

    #[error("serialization failed: {0}")]
    Serialization(String),
}
