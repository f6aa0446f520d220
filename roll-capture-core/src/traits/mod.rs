pub mod acquisition_policy;
pub mod codec_service;
pub mod roll_consumer;
pub mod roll_session;
pub mod sensor_session;
