pub mod frame_ledger;
pub mod metadata_matcher;
pub mod resource_gate;
