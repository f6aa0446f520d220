//! Simulated sensor session.
//!
//! Emulates a camera sensor with a fixed output buffer pool. A repeating
//! request runs on a dedicated thread: the preview loop reports 3A results,
//! the burst loop produces full frames with their capture metadata.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;

use roll_capture_core::models::error::RollError;
use roll_capture_core::models::frame::{CaptureMetadata, FlashState, FrameBuffer};
use roll_capture_core::models::request::{
    AePrecaptureTrigger, AeState, AfState, AfTrigger, BurstRequest, CaptureFormat, CfaPattern,
    PreviewRequest, PreviewResult, SensorInfo,
};
use roll_capture_core::traits::sensor_session::{SensorListener, SensorSession};

/// Order in which a burst frame's two halves reach the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryOrder {
    #[default]
    MetadataFirst,
    BufferFirst,
    /// Switches order on every frame.
    Alternating,
}

/// Configuration for a [`SimulatedSensor`].
#[derive(Debug, Clone, PartialEq)]
pub struct SimSensorConfig {
    pub id: String,

    /// Output buffers the sensor owns (default: 20).
    pub buffer_pool_size: usize,

    /// Full-frame size (default: 64x48).
    pub width: u32,
    pub height: u32,

    /// Time between frames on either stream (default: 5 ms).
    pub frame_interval: Duration,

    pub delivery_order: DeliveryOrder,

    /// Lose the metadata of every n-th burst frame.
    pub drop_metadata_every: Option<u64>,

    /// Fail every n-th burst capture outright.
    pub fail_capture_every: Option<u64>,

    /// Preview frames a triggered scan takes before it locks (default: 2).
    pub convergence_frames: u32,

    /// Auto exposure asks for flash during precapture.
    pub flash_required: bool,

    /// Whether preview results carry AF / AE fields (default: both).
    pub report_focus_state: bool,
    pub report_exposure_state: bool,

    pub white_level: Option<u32>,
    pub cfa_pattern: CfaPattern,
}

impl Default for SimSensorConfig {
    fn default() -> Self {
        Self {
            id: "sim0".into(),
            buffer_pool_size: 20,
            width: 64,
            height: 48,
            frame_interval: Duration::from_millis(5),
            delivery_order: DeliveryOrder::MetadataFirst,
            drop_metadata_every: None,
            fail_capture_every: None,
            convergence_frames: 2,
            flash_required: false,
            report_focus_state: true,
            report_exposure_state: true,
            white_level: Some(1023),
            cfa_pattern: CfaPattern::Rggb,
        }
    }
}

impl SimSensorConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.buffer_pool_size == 0 {
            return Err("buffer pool must hold at least one buffer".into());
        }
        if self.width == 0 || self.height == 0 {
            return Err(format!("invalid frame size {}x{}", self.width, self.height));
        }
        if self.frame_interval.is_zero() {
            return Err("frame interval must be positive".into());
        }
        if self.drop_metadata_every == Some(0) || self.fail_capture_every == Some(0) {
            return Err("fault injection periods must be positive".into());
        }
        Ok(())
    }
}

/// Auto-focus / auto-exposure model driven by preview triggers.
struct ThreeA {
    af: AfState,
    ae: AeState,
    af_countdown: u32,
    ae_countdown: u32,
}

impl ThreeA {
    fn new() -> Self {
        Self {
            af: AfState::PassiveScan,
            ae: AeState::Searching,
            af_countdown: 0,
            ae_countdown: 0,
        }
    }

    fn apply(&mut self, request: &PreviewRequest, config: &SimSensorConfig) {
        match request.af_trigger {
            AfTrigger::Start => {
                self.af = AfState::ActiveScan;
                self.af_countdown = config.convergence_frames;
            }
            AfTrigger::Cancel => self.af = AfState::Inactive,
            AfTrigger::Idle => {}
        }
        match request.ae_precapture_trigger {
            AePrecaptureTrigger::Start => {
                self.ae = AeState::Precapture;
                self.ae_countdown = config.convergence_frames;
            }
            AePrecaptureTrigger::Cancel => self.ae = AeState::Searching,
            AePrecaptureTrigger::Idle => {}
        }
    }

    fn step(&mut self, config: &SimSensorConfig) -> PreviewResult {
        match self.af {
            AfState::ActiveScan if self.af_countdown == 0 => self.af = AfState::FocusedLocked,
            AfState::ActiveScan => self.af_countdown -= 1,
            AfState::Inactive | AfState::PassiveScan => self.af = AfState::PassiveFocused,
            _ => {}
        }
        match self.ae {
            AeState::Precapture if self.ae_countdown == 0 => {
                self.ae = if config.flash_required {
                    AeState::FlashRequired
                } else {
                    AeState::Converged
                };
            }
            AeState::Precapture => self.ae_countdown -= 1,
            AeState::Searching | AeState::Inactive => self.ae = AeState::Converged,
            _ => {}
        }

        PreviewResult {
            af_state: config.report_focus_state.then_some(self.af),
            ae_state: config.report_exposure_state.then_some(self.ae),
        }
    }
}

/// The repeating request currently running.
struct Repeating {
    running: Arc<AtomicBool>,
    handle: thread::JoinHandle<()>,
    burst: bool,
}

struct Inner {
    config: SimSensorConfig,
    listener: Mutex<Option<Arc<dyn SensorListener>>>,
    three_a: Mutex<ThreeA>,
    /// Buffers handed out and not yet returned.
    outstanding: Arc<AtomicUsize>,
    next_frame: AtomicU64,
    /// Sensor clock in nanoseconds.
    clock: AtomicU64,
    stalls: AtomicU64,
}

/// Sensor session simulating a camera with a fixed output buffer pool.
pub struct SimulatedSensor {
    inner: Arc<Inner>,
    repeating: Mutex<Option<Repeating>>,
}

impl SimulatedSensor {
    pub fn new(config: SimSensorConfig) -> Result<Self, RollError> {
        config.validate().map_err(RollError::ConfigurationFailed)?;
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                listener: Mutex::new(None),
                three_a: Mutex::new(ThreeA::new()),
                outstanding: Arc::new(AtomicUsize::new(0)),
                next_frame: AtomicU64::new(0),
                clock: AtomicU64::new(1_000_000_000),
                stalls: AtomicU64::new(0),
            }),
            repeating: Mutex::new(None),
        })
    }

    /// Buffers currently held outside the sensor.
    pub fn outstanding_buffers(&self) -> usize {
        self.inner.outstanding.load(Ordering::SeqCst)
    }

    /// Burst frames skipped because the pool was empty.
    pub fn stalls(&self) -> u64 {
        self.inner.stalls.load(Ordering::SeqCst)
    }

    /// Frame numbers handed out so far.
    pub fn frames_produced(&self) -> u64 {
        self.inner.next_frame.load(Ordering::SeqCst)
    }

    pub fn is_bursting(&self) -> bool {
        self.repeating
            .lock()
            .as_ref()
            .is_some_and(|r| r.burst && r.running.load(Ordering::SeqCst))
    }

    fn replace_repeating(&self, next: Option<Repeating>) {
        let previous = std::mem::replace(&mut *self.repeating.lock(), next);
        if let Some(previous) = previous {
            previous.running.store(false, Ordering::SeqCst);
            if previous.handle.thread().id() == thread::current().id() {
                // Stopped from its own callback; the loop exits on its next check.
                return;
            }
            if previous.handle.join().is_err() {
                log::error!("sensor {} repeating thread panicked", self.inner.config.id);
            }
        }
    }

    fn spawn(
        &self,
        name: &str,
        body: impl FnOnce(Arc<Inner>, Arc<AtomicBool>) + Send + 'static,
    ) -> Result<Repeating, RollError> {
        let running = Arc::new(AtomicBool::new(true));
        let inner = Arc::clone(&self.inner);
        let flag = Arc::clone(&running);
        let handle = thread::Builder::new()
            .name(format!("{}-{}", self.inner.config.id, name))
            .spawn(move || body(inner, flag))
            .map_err(|e| {
                RollError::SensorRequestFailed(format!("failed to spawn {} thread: {}", name, e))
            })?;
        Ok(Repeating {
            running,
            handle,
            burst: name == "burst",
        })
    }
}

impl SensorSession for SimulatedSensor {
    fn sensor_info(&self) -> SensorInfo {
        let config = &self.inner.config;
        SensorInfo {
            id: config.id.clone(),
            buffer_pool_size: config.buffer_pool_size,
            max_width: config.width,
            max_height: config.height,
            cfa_pattern: config.cfa_pattern,
            white_level: config.white_level,
        }
    }

    fn attach(&self, listener: Arc<dyn SensorListener>) {
        *self.inner.listener.lock() = Some(listener);
    }

    fn detach(&self) {
        self.replace_repeating(None);
        self.inner.listener.lock().take();
    }

    fn issue_preview_request(&self, request: &PreviewRequest) -> Result<(), RollError> {
        self.inner.three_a.lock().apply(request, &self.inner.config);
        Ok(())
    }

    fn set_repeating_preview(&self, request: &PreviewRequest) -> Result<(), RollError> {
        self.replace_repeating(None);
        self.inner.three_a.lock().apply(request, &self.inner.config);
        let repeating = self.spawn("preview", preview_loop)?;
        self.replace_repeating(Some(repeating));
        Ok(())
    }

    fn issue_burst_request(
        &self,
        request: &BurstRequest,
        listener: Arc<dyn SensorListener>,
    ) -> Result<(), RollError> {
        let config = &self.inner.config;
        if request.target.width > config.width || request.target.height > config.height {
            return Err(RollError::SensorRequestFailed(format!(
                "target {}x{} exceeds sensor {}x{}",
                request.target.width, request.target.height, config.width, config.height
            )));
        }

        self.replace_repeating(None);
        let request = *request;
        let repeating = self.spawn("burst", move |inner, running| {
            burst_loop(inner, running, request, listener)
        })?;
        self.replace_repeating(Some(repeating));
        Ok(())
    }

    fn stop_repeating(&self) -> Result<(), RollError> {
        self.replace_repeating(None);
        Ok(())
    }
}

impl Drop for SimulatedSensor {
    fn drop(&mut self) {
        self.replace_repeating(None);
    }
}

fn preview_loop(inner: Arc<Inner>, running: Arc<AtomicBool>) {
    while running.load(Ordering::SeqCst) {
        thread::sleep(inner.config.frame_interval);
        inner
            .clock
            .fetch_add(inner.config.frame_interval.as_nanos() as u64, Ordering::SeqCst);

        let result = inner.three_a.lock().step(&inner.config);
        let listener = inner.listener.lock().clone();
        if let Some(listener) = listener {
            listener.preview_completed(result);
        }
    }
}

fn burst_loop(
    inner: Arc<Inner>,
    running: Arc<AtomicBool>,
    request: BurstRequest,
    listener: Arc<dyn SensorListener>,
) {
    let config = &inner.config;
    let interval_ns = config.frame_interval.as_nanos() as u64;
    let mut produced = 0u64;

    while running.load(Ordering::SeqCst) {
        thread::sleep(config.frame_interval);
        let timestamp = inner.clock.fetch_add(interval_ns, Ordering::SeqCst) + interval_ns;

        if inner.outstanding.load(Ordering::SeqCst) >= config.buffer_pool_size {
            inner.stalls.fetch_add(1, Ordering::SeqCst);
            log::debug!("sensor {} pool exhausted, skipping frame", config.id);
            continue;
        }

        let frame_number = inner.next_frame.fetch_add(1, Ordering::SeqCst);
        let sequence = frame_number + 1;
        listener.capture_started(frame_number, timestamp);

        if config.fail_capture_every.is_some_and(|n| sequence % n == 0) {
            listener.capture_failed(frame_number);
            continue;
        }

        let buffer = make_buffer(&inner, &request, timestamp, frame_number);
        let metadata = make_metadata(&inner, timestamp, frame_number);
        let lose_metadata = config.drop_metadata_every.is_some_and(|n| sequence % n == 0);

        let metadata_first = match config.delivery_order {
            DeliveryOrder::MetadataFirst => true,
            DeliveryOrder::BufferFirst => false,
            DeliveryOrder::Alternating => frame_number % 2 == 0,
        };
        if metadata_first {
            if !lose_metadata {
                listener.metadata_completed(metadata);
            }
            listener.buffer_available(buffer);
        } else {
            listener.buffer_available(buffer);
            if !lose_metadata {
                listener.metadata_completed(metadata);
            }
        }

        produced += 1;
        if !request.repeating {
            break;
        }
    }

    log::debug!("sensor {} burst finished after {} frames", config.id, produced);
    listener.sequence_finished();
}

fn make_buffer(
    inner: &Inner,
    request: &BurstRequest,
    timestamp: u64,
    frame_number: u64,
) -> FrameBuffer {
    let target = request.target;
    let pixels = target.width as usize * target.height as usize;
    let len = match target.format {
        CaptureFormat::Yuv420 => pixels * 3 / 2,
        CaptureFormat::RawSensor => pixels * 2,
    };

    inner.outstanding.fetch_add(1, Ordering::SeqCst);
    let outstanding = Arc::clone(&inner.outstanding);
    FrameBuffer::new(
        timestamp,
        target.width,
        target.height,
        target.format,
        Bytes::from(vec![frame_number as u8; len]),
        Box::new(move |_| {
            outstanding.fetch_sub(1, Ordering::SeqCst);
        }),
    )
}

fn make_metadata(inner: &Inner, timestamp: u64, frame_number: u64) -> CaptureMetadata {
    let three_a = inner.three_a.lock();
    CaptureMetadata {
        exposure_time_ns: 10_000_000,
        sensitivity_iso: 100,
        aperture: 1.8,
        focal_length_mm: 4.2,
        focus_distance_diopters: 0.5,
        exposure_compensation_step: 1.0 / 3.0,
        flash_state: FlashState::Ready,
        af_state: Some(three_a.af),
        ae_state: Some(three_a.ae),
        ..CaptureMetadata::new(timestamp, frame_number)
    }
}
