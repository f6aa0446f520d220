pub mod config;
pub mod error;
pub mod frame;
pub mod request;
pub mod state;
pub mod summary;
