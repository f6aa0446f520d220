//! Shared fakes for unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::models::error::RollError;
use crate::models::frame::{CaptureMetadata, FrameBuffer, Timestamp};
use crate::models::request::{BurstRequest, CaptureFormat, CfaPattern, PreviewRequest, SensorInfo};
use crate::models::summary::RollInfo;
use crate::processing::metadata_matcher::PairId;
use crate::processing::resource_gate::{AdmittedFrame, ResourceGate};
use crate::traits::codec_service::{
    CodecJob, CodecService, CodecStatus, JobCompletion, JobDoneCallback,
};
use crate::traits::roll_consumer::RollConsumer;
use crate::traits::sensor_session::{SensorListener, SensorSession};

/// Hands out frame buffers and counts how often each timestamp is released.
#[derive(Clone, Default)]
pub struct BufferFactory {
    released: Arc<Mutex<HashMap<Timestamp, usize>>>,
    issued: Arc<AtomicUsize>,
    raw: bool,
}

impl BufferFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory for raw sensor buffers.
    pub fn raw() -> Self {
        Self {
            raw: true,
            ..Self::default()
        }
    }

    pub fn buffer(&self, timestamp: Timestamp) -> FrameBuffer {
        self.issued.fetch_add(1, Ordering::SeqCst);
        let released = Arc::clone(&self.released);
        FrameBuffer::new(
            timestamp,
            4,
            2,
            if self.raw {
                CaptureFormat::RawSensor
            } else {
                CaptureFormat::Yuv420
            },
            Bytes::from(vec![timestamp as u8; 12]),
            Box::new(move |ts| {
                *released.lock().entry(ts).or_insert(0) += 1;
            }),
        )
    }

    pub fn admit(&self, gate: &ResourceGate, timestamp: Timestamp) -> AdmittedFrame {
        let token = gate.acquire().expect("gate exhausted in test");
        AdmittedFrame::new(self.buffer(timestamp), token)
    }

    pub fn released(&self, timestamp: Timestamp) -> usize {
        self.released.lock().get(&timestamp).copied().unwrap_or(0)
    }

    pub fn issued(&self) -> usize {
        self.issued.load(Ordering::SeqCst)
    }

    /// True when every issued buffer came back exactly once.
    pub fn all_released_once(&self) -> bool {
        let released = self.released.lock();
        released.values().all(|&n| n == 1) && released.len() == self.issued()
    }
}

/// Sensor session that records requests and lets tests fail them on demand.
pub struct MockSensor {
    pool_size: usize,
    listener: Mutex<Option<Arc<dyn SensorListener>>>,
    burst_listener: Mutex<Option<Arc<dyn SensorListener>>>,
    preview_requests: Mutex<Vec<PreviewRequest>>,
    repeating_previews: Mutex<Vec<PreviewRequest>>,
    bursts: Mutex<Vec<BurstRequest>>,
    stop_calls: AtomicUsize,
    fail_previews: AtomicBool,
    fail_bursts: AtomicBool,
    finish_on_stop: AtomicBool,
}

impl MockSensor {
    pub fn new(pool_size: usize) -> Self {
        Self {
            pool_size,
            listener: Mutex::new(None),
            burst_listener: Mutex::new(None),
            preview_requests: Mutex::new(Vec::new()),
            repeating_previews: Mutex::new(Vec::new()),
            bursts: Mutex::new(Vec::new()),
            stop_calls: AtomicUsize::new(0),
            fail_previews: AtomicBool::new(false),
            fail_bursts: AtomicBool::new(false),
            finish_on_stop: AtomicBool::new(true),
        }
    }

    pub fn preview_requests(&self) -> Vec<PreviewRequest> {
        self.preview_requests.lock().clone()
    }

    pub fn repeating_previews(&self) -> Vec<PreviewRequest> {
        self.repeating_previews.lock().clone()
    }

    pub fn bursts(&self) -> Vec<BurstRequest> {
        self.bursts.lock().clone()
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    pub fn is_attached(&self) -> bool {
        self.listener.lock().is_some()
    }

    pub fn fail_preview_requests(&self, fail: bool) {
        self.fail_previews.store(fail, Ordering::SeqCst);
    }

    pub fn fail_burst_requests(&self, fail: bool) {
        self.fail_bursts.store(fail, Ordering::SeqCst);
    }

    /// When off, stopping a burst never reports the sequence as finished.
    pub fn finish_sequence_on_stop(&self, finish: bool) {
        self.finish_on_stop.store(finish, Ordering::SeqCst);
    }

    /// Listener registered by the latest burst request.
    pub fn burst_listener(&self) -> Arc<dyn SensorListener> {
        self.burst_listener
            .lock()
            .clone()
            .or_else(|| self.listener.lock().clone())
            .expect("no listener attached")
    }
}

impl SensorSession for MockSensor {
    fn sensor_info(&self) -> SensorInfo {
        SensorInfo {
            id: "mock".into(),
            buffer_pool_size: self.pool_size,
            max_width: 4,
            max_height: 2,
            cfa_pattern: CfaPattern::Rggb,
            white_level: Some(1023),
        }
    }

    fn attach(&self, listener: Arc<dyn SensorListener>) {
        *self.listener.lock() = Some(listener);
    }

    fn detach(&self) {
        self.listener.lock().take();
        self.burst_listener.lock().take();
    }

    fn issue_preview_request(&self, request: &PreviewRequest) -> Result<(), RollError> {
        if self.fail_previews.load(Ordering::SeqCst) {
            return Err(RollError::SensorRequestFailed("preview request refused".into()));
        }
        self.preview_requests.lock().push(*request);
        Ok(())
    }

    fn set_repeating_preview(&self, request: &PreviewRequest) -> Result<(), RollError> {
        self.repeating_previews.lock().push(*request);
        Ok(())
    }

    fn issue_burst_request(
        &self,
        request: &BurstRequest,
        listener: Arc<dyn SensorListener>,
    ) -> Result<(), RollError> {
        if self.fail_bursts.load(Ordering::SeqCst) {
            return Err(RollError::SensorRequestFailed("burst request refused".into()));
        }
        self.bursts.lock().push(*request);
        *self.burst_listener.lock() = Some(listener);
        Ok(())
    }

    fn stop_repeating(&self) -> Result<(), RollError> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        let burst = self.burst_listener.lock().take();
        if let Some(listener) = burst {
            if self.finish_on_stop.load(Ordering::SeqCst) {
                listener.sequence_finished();
            }
        }
        Ok(())
    }
}

/// Codec that only completes jobs when a test tells it to.
pub struct ManualCodec {
    slots: usize,
    running: AtomicBool,
    forced_status: Mutex<Option<CodecStatus>>,
    jobs: Mutex<Vec<CodecJob>>,
    on_done: Mutex<Option<JobDoneCallback>>,
    submitted: AtomicUsize,
}

impl ManualCodec {
    pub fn new(slots: usize) -> Self {
        Self {
            slots,
            running: AtomicBool::new(false),
            forced_status: Mutex::new(None),
            jobs: Mutex::new(Vec::new()),
            on_done: Mutex::new(None),
            submitted: AtomicUsize::new(0),
        }
    }

    /// Answer every submission with `status` instead of queueing it.
    pub fn force_status(&self, status: Option<CodecStatus>) {
        *self.forced_status.lock() = status;
    }

    pub fn pending(&self) -> Vec<PairId> {
        self.jobs.lock().iter().map(|job| job.pair_id).collect()
    }

    /// The queued job for `id`, if the codec still holds it.
    pub fn job(&self, id: PairId) -> Option<CodecJob> {
        self.jobs.lock().iter().find(|job| job.pair_id == id).cloned()
    }

    pub fn submitted(&self) -> usize {
        self.submitted.load(Ordering::SeqCst)
    }

    /// Finish the job for `id`. Returns false when no such job is queued.
    pub fn complete(&self, id: PairId, error: bool) -> bool {
        let job = {
            let mut jobs = self.jobs.lock();
            let Some(index) = jobs.iter().position(|job| job.pair_id == id) else {
                return false;
            };
            jobs.remove(index)
        };
        let callback = self.on_done.lock().clone();
        if let Some(callback) = callback {
            callback(JobCompletion {
                pair_id: job.pair_id,
                error,
                output: if error { Bytes::new() } else { job.data },
            });
        }
        true
    }

    /// Finish the oldest queued job.
    pub fn complete_next(&self, error: bool) -> Option<PairId> {
        let id = self.jobs.lock().first().map(|job| job.pair_id)?;
        self.complete(id, error);
        Some(id)
    }

    /// Report a completion for an id the codec never held.
    pub fn complete_unknown(&self, id: PairId) {
        let callback = self.on_done.lock().clone();
        if let Some(callback) = callback {
            callback(JobCompletion {
                pair_id: id,
                error: false,
                output: Bytes::new(),
            });
        }
    }
}

impl CodecService for ManualCodec {
    fn start(&self, _threads: usize, on_done: JobDoneCallback) -> Result<(), RollError> {
        *self.on_done.lock() = Some(on_done);
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn slots(&self) -> usize {
        self.slots
    }

    fn submit(&self, job: CodecJob) -> CodecStatus {
        if let Some(status) = *self.forced_status.lock() {
            return status;
        }
        if !self.running.load(Ordering::SeqCst) {
            return CodecStatus::NotRunning;
        }
        let mut jobs = self.jobs.lock();
        if jobs.len() >= self.slots {
            return CodecStatus::Busy;
        }
        jobs.push(job);
        self.submitted.fetch_add(1, Ordering::SeqCst);
        CodecStatus::Queued
    }

    fn drain_all(&self) {
        while self.complete_next(false).is_some() {}
    }

    fn shutdown(&self) {
        self.drain_all();
        self.running.store(false, Ordering::SeqCst);
        self.on_done.lock().take();
    }
}

/// One `frame_done` notification as seen by [`RecordingConsumer`].
#[derive(Debug, Clone, PartialEq)]
pub struct FrameRecord {
    pub timestamp: Timestamp,
    pub error: bool,
    pub output_len: usize,
}

/// Consumer that records every notification.
#[derive(Default)]
pub struct RecordingConsumer {
    refuse: AtomicBool,
    rolls: Mutex<Vec<RollInfo>>,
    frames: Mutex<Vec<FrameRecord>>,
    rolls_done: AtomicUsize,
    clean_ups: AtomicUsize,
    shutdowns: AtomicUsize,
}

impl RecordingConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refuse_rolls(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    pub fn rolls(&self) -> Vec<RollInfo> {
        self.rolls.lock().clone()
    }

    pub fn frames(&self) -> Vec<FrameRecord> {
        self.frames.lock().clone()
    }

    pub fn rolls_done(&self) -> usize {
        self.rolls_done.load(Ordering::SeqCst)
    }

    pub fn clean_ups(&self) -> usize {
        self.clean_ups.load(Ordering::SeqCst)
    }

    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

impl RollConsumer for RecordingConsumer {
    fn new_roll(&self, roll: &RollInfo) -> bool {
        if self.refuse.load(Ordering::SeqCst) {
            return false;
        }
        self.rolls.lock().push(roll.clone());
        true
    }

    fn frame_done(&self, metadata: &CaptureMetadata, output: &[u8], error: bool) {
        self.frames.lock().push(FrameRecord {
            timestamp: metadata.timestamp,
            error,
            output_len: output.len(),
        });
    }

    fn roll_done(&self, _roll: &RollInfo) {
        self.rolls_done.fetch_add(1, Ordering::SeqCst);
    }

    fn wait_roll(&self, _timeout: Duration) -> bool {
        true
    }

    fn clean_up(&self) {
        self.clean_ups.fetch_add(1, Ordering::SeqCst);
    }

    fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}
