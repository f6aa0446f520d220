//! # roll-capture-sim
//!
//! Software backends for roll-capture.
//!
//! Provides:
//! - `SimulatedSensor`: a sensor session with a fixed buffer pool, a 3A model
//!   on the preview stream, and fault injection on bursts
//! - `ThreadedCodec`: a codec service running jobs on a worker pool
//!
//! ## Usage
//! ```ignore
//! use std::sync::Arc;
//! use roll_capture_core::{CaptureOrchestrator, RollConfiguration, SerialAcquisitionPolicy};
//! use roll_capture_sim::{SimSensorConfig, SimulatedSensor, ThreadedCodec, ThreadedCodecConfig};
//!
//! let sensor = Arc::new(SimulatedSensor::new(SimSensorConfig::default())?);
//! let codec = Arc::new(ThreadedCodec::new(ThreadedCodecConfig::default())?);
//! let orchestrator = CaptureOrchestrator::new(sensor, codec, consumer, RollConfiguration::default())?;
//! orchestrator.set_policy(Box::new(SerialAcquisitionPolicy::new()))?;
//! ```

pub mod simulated_sensor;
pub mod threaded_codec;

pub use simulated_sensor::{DeliveryOrder, SimSensorConfig, SimulatedSensor};
pub use threaded_codec::{ThreadedCodec, ThreadedCodecConfig};
