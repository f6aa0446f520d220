use std::sync::Arc;

use bytes::Bytes;

use crate::models::error::RollError;
use crate::models::frame::CaptureMetadata;
use crate::models::request::{CaptureFormat, Quality, RawLayout};
use crate::processing::metadata_matcher::PairId;

/// Immediate answer of a codec to a job submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecStatus {
    Queued,
    IllegalParams,
    UnsupportedFormat,
    NoMemory,
    /// Every job slot is taken.
    Busy,
    NotRunning,
}

/// One frame to compress. The pixel data is shared, not copied.
#[derive(Debug, Clone)]
pub struct CodecJob {
    pub pair_id: PairId,
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
    pub format: CaptureFormat,
    pub quality: Quality,
    /// Set for `RawSensor` frames only.
    pub raw: Option<RawLayout>,
    pub metadata: CaptureMetadata,
}

/// Reported by a codec worker when a job finished.
#[derive(Debug, Clone)]
pub struct JobCompletion {
    pub pair_id: PairId,
    pub error: bool,
    /// Compressed stream; undefined when `error` is set.
    pub output: Bytes,
}

/// Invoked from codec worker threads, concurrently with each other.
pub type JobDoneCallback = Arc<dyn Fn(JobCompletion) + Send + Sync + 'static>;

/// Opaque compression service with a fixed number of job slots.
pub trait CodecService: Send + Sync {
    /// Bring up `threads` workers. Completions are reported through `on_done`.
    fn start(&self, threads: usize, on_done: JobDoneCallback) -> Result<(), RollError>;

    /// Number of jobs the service can hold at once.
    fn slots(&self) -> usize;

    /// Queue a job without blocking.
    fn submit(&self, job: CodecJob) -> CodecStatus;

    /// Block until every queued job has reported its completion.
    fn drain_all(&self);

    /// Finish outstanding jobs and stop the workers.
    fn shutdown(&self);
}
