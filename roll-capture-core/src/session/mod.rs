pub mod orchestrator;
pub mod precapture;
pub mod serial_policy;
