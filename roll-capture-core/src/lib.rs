//! # roll-capture-core
//!
//! Sensor-agnostic core for continuous burst ("roll") capture.
//!
//! Admits sensor buffers through a counting gate, pairs each buffer with the
//! metadata record carrying the same timestamp, and feeds the pairs to a
//! bounded compression pipeline. Sensor backends implement `SensorSession`;
//! codecs implement `CodecService`; both plug into `CaptureOrchestrator`.
//!
//! ## Architecture
//!
//! ```text
//! roll-capture-core (this crate)
//! ├── traits/       ← SensorSession, SensorListener, AcquisitionPolicy, CodecService, RollConsumer, RollSession
//! ├── models/       ← RollError, RollState, RollConfiguration, CaptureMetadata, FrameBuffer, RollSummary
//! ├── processing/   ← ResourceGate, FrameLedger, MetadataMatcher
//! ├── codec/        ← CompressionDispatcher
//! └── session/      ← CaptureOrchestrator, PrecaptureNegotiator, SerialAcquisitionPolicy
//! ```

pub mod codec;
pub mod models;
pub mod processing;
pub mod session;
pub mod traits;

#[cfg(test)]
mod test_support;

// Re-export key types at crate root for convenience.
pub use codec::dispatcher::{CompressionDispatcher, DispatchCounters, SubmitOutcome};
pub use models::config::RollConfiguration;
pub use models::error::RollError;
pub use models::frame::{
    CaptureMetadata, FlashState, FrameBuffer, FrameNumber, ReleaseHook, Timestamp,
    WhiteBalanceGains,
};
pub use models::request::{
    AeState, AfState, BurstRequest, CaptureFormat, CaptureTarget, CfaPattern, PreviewRequest,
    PreviewResult, Quality, RawLayout, SensorInfo,
};
pub use models::state::{PrecaptureState, RollState};
pub use models::summary::{RollInfo, RollSummary};
pub use processing::frame_ledger::FrameLedger;
pub use processing::metadata_matcher::{MatchOutcome, MatchedPair, MetadataMatcher, PairId};
pub use processing::resource_gate::{AdmittedFrame, GateToken, ResourceGate};
pub use session::orchestrator::CaptureOrchestrator;
pub use session::precapture::PrecaptureNegotiator;
pub use session::serial_policy::SerialAcquisitionPolicy;
pub use traits::acquisition_policy::AcquisitionPolicy;
pub use traits::codec_service::{
    CodecJob, CodecService, CodecStatus, JobCompletion, JobDoneCallback,
};
pub use traits::roll_consumer::RollConsumer;
pub use traits::roll_session::RollSession;
pub use traits::sensor_session::{SensorListener, SensorSession};
