use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::codec::dispatcher::CompressionDispatcher;
use crate::models::config::RollConfiguration;
use crate::models::error::RollError;
use crate::models::frame::{CaptureMetadata, FrameBuffer, FrameNumber, Timestamp};
use crate::models::request::{CaptureFormat, PreviewRequest, PreviewResult, Quality};
use crate::models::state::{PrecaptureState, RollState};
use crate::models::summary::{RollInfo, RollSummary};
use crate::processing::frame_ledger::FrameLedger;
use crate::processing::metadata_matcher::{MatchOutcome, MetadataMatcher};
use crate::processing::resource_gate::{AdmittedFrame, ResourceGate};
use crate::session::precapture::PrecaptureNegotiator;
use crate::traits::acquisition_policy::AcquisitionPolicy;
use crate::traits::codec_service::CodecService;
use crate::traits::roll_consumer::RollConsumer;
use crate::traits::roll_session::RollSession;
use crate::traits::sensor_session::{SensorListener, SensorSession};

/// Roll bookkeeping, protected by `parking_lot::Mutex`.
#[derive(Default)]
struct RollTracking {
    state: RollState,
    info: Option<RollInfo>,
    started_at: Option<Instant>,
    /// Frames are only taken while this is set.
    intake_open: bool,
    sequence_finished: bool,
}

#[derive(Default)]
struct FrameStats {
    received: AtomicU64,
    dropped: AtomicU64,
    obsolete: AtomicU64,
}

impl FrameStats {
    fn reset(&self) {
        self.received.store(0, Ordering::Relaxed);
        self.dropped.store(0, Ordering::Relaxed);
        self.obsolete.store(0, Ordering::Relaxed);
    }
}

/// State shared between the control thread, the sensor callback thread and
/// the codec workers. The sensor holds it as its listener.
struct Shared {
    config: RollConfiguration,
    sensor: Arc<dyn SensorSession>,
    consumer: Arc<dyn RollConsumer>,
    policy: Mutex<Option<Box<dyn AcquisitionPolicy>>>,
    format: Mutex<CaptureFormat>,

    /// Serializes start, stop and reconfiguration.
    control: Mutex<()>,
    roll: Mutex<RollTracking>,
    /// Signalled on sequence end and on every matching step.
    progress: Condvar,

    gate: Arc<ResourceGate>,
    ledger: FrameLedger,
    matcher: MetadataMatcher,
    /// Buffers still waiting for their metadata. Also serializes frame intake.
    retry: Mutex<VecDeque<AdmittedFrame>>,
    dispatcher: CompressionDispatcher,
    negotiator: PrecaptureNegotiator,

    stats: FrameStats,
    shut_down: AtomicBool,
}

/// Drives rolls: admits sensor buffers, pairs them with their metadata,
/// feeds the pairs to compression and drains everything when a roll stops.
///
/// Data flow:
/// ```text
/// [Sensor] ─ buffer ──→ [ResourceGate] ─→ [MetadataMatcher] ─→ [CompressionDispatcher] ─→ [RollConsumer]
///     │                                        ↑    │ unmatched
///     └─ metadata ─→ [FrameLedger] ────────────┘    └─→ [retry list]
/// ```
///
/// Every admitted buffer ends in exactly one of: released by the dispatcher
/// after compression (or failure), released as obsolete, or released from
/// the retry list when the roll ends.
pub struct CaptureOrchestrator {
    shared: Arc<Shared>,
}

impl CaptureOrchestrator {
    /// Attach to `sensor`, start the codec and begin the repeating preview.
    pub fn new(
        sensor: Arc<dyn SensorSession>,
        codec: Arc<dyn CodecService>,
        consumer: Arc<dyn RollConsumer>,
        config: RollConfiguration,
    ) -> Result<Self, RollError> {
        config.validate().map_err(RollError::ConfigurationFailed)?;

        let info = sensor.sensor_info();
        let capacity = config.gate_capacity(info.buffer_pool_size);
        if capacity == 0 {
            return Err(RollError::ConfigurationFailed(format!(
                "sensor {} pool of {} buffers leaves nothing for bursts",
                info.id, info.buffer_pool_size
            )));
        }
        let gate = Arc::new(ResourceGate::new(capacity));

        let dispatcher = CompressionDispatcher::new(
            codec,
            Arc::clone(&consumer),
            Arc::clone(&gate),
            config.codec_slots,
        );
        dispatcher.set_quality(config.quality);
        dispatcher.set_raw_layout(info.raw_layout());
        dispatcher.start(config.codec_threads)?;

        log::info!(
            "orchestrator on sensor {}: {} of {} buffers gated, {:?} at {:?} quality",
            info.id,
            gate.capacity(),
            info.buffer_pool_size,
            config.format,
            config.quality
        );

        let shared = Arc::new(Shared {
            format: Mutex::new(config.format),
            negotiator: PrecaptureNegotiator::new(Arc::clone(&sensor)),
            config,
            sensor,
            consumer,
            policy: Mutex::new(None),
            control: Mutex::new(()),
            roll: Mutex::new(RollTracking::default()),
            progress: Condvar::new(),
            gate,
            ledger: FrameLedger::new(),
            matcher: MetadataMatcher::new(),
            retry: Mutex::new(VecDeque::new()),
            dispatcher,
            stats: FrameStats::default(),
            shut_down: AtomicBool::new(false),
        });

        let orchestrator = Self { shared };
        let listener: Arc<dyn SensorListener> = orchestrator.shared.clone();
        orchestrator.shared.sensor.attach(listener);
        orchestrator
            .shared
            .sensor
            .set_repeating_preview(&PreviewRequest::repeating())?;
        Ok(orchestrator)
    }

    /// Install the acquisition policy and apply it for the current format.
    pub fn set_policy(&self, mut policy: Box<dyn AcquisitionPolicy>) -> Result<(), RollError> {
        let shared = &self.shared;
        let _control = shared.control.lock();
        shared.ensure_idle()?;

        let info = shared.sensor.sensor_info();
        let target = info.full_frame_target(*shared.format.lock());
        policy.apply(&info, target)?;
        *shared.policy.lock() = Some(policy);
        Ok(())
    }

    /// Start a roll. Transitions: idle → active.
    pub fn start_roll(&self) -> Result<RollInfo, RollError> {
        let shared = &self.shared;
        // Fail fast without waiting for a stop in progress.
        shared.ensure_idle()?;
        let _control = shared.control.lock();
        shared.ensure_idle()?;

        let installed = shared.policy.lock();
        let Some(policy) = installed.as_ref() else {
            return Err(RollError::PolicyNotSet);
        };
        if shared.config.require_converged_focus && !shared.negotiator.is_converged() {
            return Err(RollError::NotConverged);
        }

        shared.discard_leftovers();
        shared.ledger.reset();
        shared.stats.reset();
        shared.dispatcher.reset_counters();

        shared.sensor.stop_repeating()?;

        let info = RollInfo::new(*shared.format.lock(), shared.dispatcher.quality());
        if !shared.consumer.new_roll(&info) {
            log::warn!("consumer refused roll {}", info.id);
            shared.resume_preview();
            return Err(RollError::ConsumerNotReady);
        }

        {
            let mut roll = shared.roll.lock();
            roll.state = RollState::Active;
            roll.info = Some(info.clone());
            roll.started_at = Some(Instant::now());
            roll.intake_open = true;
            roll.sequence_finished = false;
        }

        let listener: Arc<dyn SensorListener> = self.shared.clone();
        if let Err(e) = policy.activate(shared.sensor.as_ref(), listener) {
            log::error!("failed to activate acquisition for roll {}: {}", info.id, e);
            shared.abort_roll(&info);
            return Err(e);
        }

        log::info!("roll {} started ({:?})", info.id, info.format);
        Ok(info)
    }

    /// Stop the roll and wait, bounded, for its frames to be processed.
    /// Transitions: active → draining → idle.
    pub fn stop_roll(&self) -> Result<RollSummary, RollError> {
        let shared = &self.shared;
        let _control = shared.control.lock();
        let timeout = shared.config.drain_timeout;

        let info = {
            let mut roll = shared.roll.lock();
            let info = match (roll.state, roll.info.as_ref()) {
                (RollState::Active, Some(info)) => info.clone(),
                _ => return Err(RollError::NoActiveRoll),
            };
            roll.state = RollState::Draining;
            info
        };
        log::info!("stopping roll {}", info.id);

        let mut forced = false;
        if let Err(e) = shared.sensor.stop_repeating() {
            log::warn!("failed to stop burst for roll {}: {}", info.id, e);
        }

        if !shared.wait_sequence_finished(timeout) {
            log::warn!("burst sequence did not finish within {:?}", timeout);
            forced = true;
        }

        if !shared.wait_caught_up(timeout) {
            log::warn!(
                "frames still unmatched after {:?} (completed {:?}, imaged {:?})",
                timeout,
                shared.ledger.completed(),
                shared.ledger.imaged()
            );
            forced = true;
        }

        shared.close_intake();
        shared.consumer.roll_done(&info);

        if !shared.dispatcher.wait_idle(timeout) {
            log::warn!("codec work outstanding after {:?}, forcing release", timeout);
            shared.dispatcher.force_release_outstanding();
            forced = true;
        }

        if !shared.consumer.wait_roll(timeout) {
            log::warn!("consumer did not finish roll {} within {:?}", info.id, timeout);
            forced = true;
        }
        shared.consumer.clean_up();

        let (discarded, unmatched) = shared.discard_leftovers();
        if discarded > 0 || unmatched > 0 {
            log::debug!(
                "roll {} left {} metadata records and {} buffers unmatched",
                info.id,
                discarded,
                unmatched
            );
        }

        if shared.negotiator.is_converged() {
            shared.negotiator.cancel();
        }
        shared.resume_preview();

        let summary = shared.summarize(info, discarded as u64, forced);
        {
            let mut roll = shared.roll.lock();
            roll.state = RollState::Idle;
            roll.info = None;
            roll.started_at = None;
        }

        log::info!(
            "roll {} stopped: {} compressed, {} failed, {} dropped{}",
            summary.info.id,
            summary.frames_compressed,
            summary.frames_failed,
            summary.frames_dropped,
            if forced { " (forced)" } else { "" }
        );
        Ok(summary)
    }

    /// Whether a roll is active or draining.
    pub fn is_active(&self) -> bool {
        !self.shared.roll.lock().state.is_idle()
    }

    pub fn roll_state(&self) -> RollState {
        self.shared.roll.lock().state
    }

    pub fn current_format(&self) -> CaptureFormat {
        *self.shared.format.lock()
    }

    /// Change the burst format and re-apply the policy for it.
    pub fn set_format(&self, format: CaptureFormat) -> Result<(), RollError> {
        let shared = &self.shared;
        let _control = shared.control.lock();
        shared.ensure_idle()?;

        if let Some(policy) = shared.policy.lock().as_mut() {
            let info = shared.sensor.sensor_info();
            policy.apply(&info, info.full_frame_target(format))?;
        }
        *shared.format.lock() = format;
        log::debug!("burst format set to {:?}", format);
        Ok(())
    }

    /// Applies to jobs submitted from now on.
    pub fn set_quality(&self, quality: Quality) {
        self.shared.dispatcher.set_quality(quality);
    }

    pub fn quality(&self) -> Quality {
        self.shared.dispatcher.quality()
    }

    pub fn trigger_focus(&self) -> Result<PrecaptureState, RollError> {
        let shared = &self.shared;
        let _control = shared.control.lock();
        shared.ensure_idle()?;
        shared.negotiator.trigger()
    }

    pub fn precapture_state(&self) -> PrecaptureState {
        self.shared.negotiator.state()
    }

    /// Sensor buffers currently held by the orchestrator and the codec.
    pub fn outstanding_buffers(&self) -> usize {
        self.shared.gate.outstanding()
    }

    /// Drain unconditionally, release everything and detach from the sensor.
    pub fn shutdown(&self) {
        let shared = &self.shared;
        if shared.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let _control = shared.control.lock();

        if let Err(e) = shared.sensor.stop_repeating() {
            log::warn!("failed to stop sensor on shutdown: {}", e);
        }
        shared.close_intake();
        let interrupted = {
            let mut roll = shared.roll.lock();
            roll.state = RollState::Idle;
            roll.started_at = None;
            roll.info.take()
        };

        shared.dispatcher.shutdown();
        shared.discard_leftovers();

        if let Some(info) = interrupted {
            log::warn!("roll {} interrupted by shutdown", info.id);
            shared.consumer.roll_done(&info);
            shared.consumer.clean_up();
        }
        shared.consumer.shutdown();
        shared.sensor.detach();
        log::info!("capture orchestrator shut down");
    }
}

impl Drop for CaptureOrchestrator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl RollSession for CaptureOrchestrator {
    fn start_roll(&self) -> Result<RollInfo, RollError> {
        CaptureOrchestrator::start_roll(self)
    }

    fn stop_roll(&self) -> Result<RollSummary, RollError> {
        CaptureOrchestrator::stop_roll(self)
    }

    fn is_active(&self) -> bool {
        CaptureOrchestrator::is_active(self)
    }

    fn current_format(&self) -> CaptureFormat {
        CaptureOrchestrator::current_format(self)
    }

    fn set_format(&self, format: CaptureFormat) -> Result<(), RollError> {
        CaptureOrchestrator::set_format(self, format)
    }

    fn trigger_focus(&self) -> Result<PrecaptureState, RollError> {
        CaptureOrchestrator::trigger_focus(self)
    }
}

impl Shared {
    fn ensure_idle(&self) -> Result<(), RollError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(RollError::ShutDown);
        }
        if !self.roll.lock().state.is_idle() {
            return Err(RollError::RollInProgress);
        }
        Ok(())
    }

    fn accepting(&self) -> bool {
        let roll = self.roll.lock();
        roll.intake_open && roll.state.accepts_frames()
    }

    fn close_intake(&self) {
        let _retry = self.retry.lock();
        self.roll.lock().intake_open = false;
    }

    /// Undo a roll whose acquisition never started.
    fn abort_roll(&self, info: &RollInfo) {
        self.close_intake();
        {
            let mut roll = self.roll.lock();
            roll.state = RollState::Idle;
            roll.info = None;
            roll.started_at = None;
        }
        self.consumer.roll_done(info);
        self.consumer.clean_up();
        self.resume_preview();
    }

    fn resume_preview(&self) {
        if let Err(e) = self.sensor.set_repeating_preview(&PreviewRequest::repeating()) {
            log::error!("failed to resume preview: {}", e);
        }
    }

    /// Drop pending metadata and release buffers still waiting for it.
    /// Returns (metadata discarded, buffers released).
    fn discard_leftovers(&self) -> (usize, usize) {
        let mut retry = self.retry.lock();
        let discarded = self.matcher.clear();
        let released = retry.len();
        for frame in retry.drain(..) {
            frame.release(&self.gate);
        }
        (discarded, released)
    }

    fn wait_sequence_finished(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut roll = self.roll.lock();
        while !roll.sequence_finished {
            if self.progress.wait_until(&mut roll, deadline).timed_out() {
                return roll.sequence_finished;
            }
        }
        true
    }

    /// Poll until every completed frame was imaged or no metadata is pending.
    fn wait_caught_up(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.ledger.is_caught_up() || self.matcher.is_empty() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let wait = self.config.drain_poll_interval.min(deadline - now);
            let mut roll = self.roll.lock();
            self.progress.wait_for(&mut roll, wait);
        }
    }

    fn summarize(&self, info: RollInfo, metadata_discarded: u64, forced: bool) -> RollSummary {
        let duration_secs = self
            .roll
            .lock()
            .started_at
            .map(|start| start.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        let counters = self.dispatcher.counters();
        RollSummary {
            info,
            duration_secs,
            frames_received: self.stats.received.load(Ordering::Relaxed),
            frames_dropped: self.stats.dropped.load(Ordering::Relaxed),
            frames_obsolete: self.stats.obsolete.load(Ordering::Relaxed),
            frames_submitted: counters.submitted,
            frames_compressed: counters.compressed,
            frames_failed: counters.failed,
            metadata_discarded,
            last_started: self.ledger.started(),
            last_completed: self.ledger.completed(),
            last_imaged: self.ledger.imaged(),
            forced_completion: forced,
        }
    }

    fn route(&self, outcome: MatchOutcome, retry: &mut VecDeque<AdmittedFrame>) {
        match outcome {
            MatchOutcome::Matched(pair) => {
                let frame_number = pair.metadata().frame_number;
                let id = pair.id();
                let submitted = self.dispatcher.submit(pair);
                if !submitted.is_pending() {
                    log::debug!(
                        "{} for frame {} not compressed: {:?}",
                        id,
                        frame_number,
                        submitted
                    );
                }
                self.ledger.advance_imaged(frame_number);
            }
            MatchOutcome::Obsolete(frame) => {
                self.stats.obsolete.fetch_add(1, Ordering::Relaxed);
                log::warn!(
                    "buffer ts={} is older than pending metadata, releasing it",
                    frame.timestamp()
                );
                frame.release(&self.gate);
            }
            MatchOutcome::Unmatched(frame) => retry.push_back(frame),
        }
    }

    /// Re-attempt every waiting buffer once, keeping arrival order.
    fn retry_waiting(&self, retry: &mut VecDeque<AdmittedFrame>) {
        for _ in 0..retry.len() {
            let Some(frame) = retry.pop_front() else {
                break;
            };
            let outcome = self.matcher.try_match(frame);
            self.route(outcome, retry);
        }
    }
}

impl SensorListener for Shared {
    fn capture_started(&self, frame_number: FrameNumber, _timestamp: Timestamp) {
        if self.accepting() {
            self.ledger.advance_started(frame_number);
        }
    }

    fn metadata_completed(&self, metadata: CaptureMetadata) {
        {
            let mut retry = self.retry.lock();
            if !self.accepting() {
                return;
            }
            self.ledger.advance_completed(metadata.frame_number);
            self.matcher.on_metadata(metadata);
            self.retry_waiting(&mut retry);
        }
        self.progress.notify_all();
    }

    fn buffer_available(&self, buffer: FrameBuffer) {
        {
            let mut retry = self.retry.lock();
            if !self.accepting() {
                log::debug!("buffer ts={} outside a roll, releasing", buffer.timestamp());
                buffer.release();
                return;
            }
            self.stats.received.fetch_add(1, Ordering::Relaxed);

            let Some(token) = self.gate.acquire() else {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                log::debug!("gate exhausted, dropping buffer ts={}", buffer.timestamp());
                buffer.release();
                return;
            };

            let outcome = self.matcher.try_match(AdmittedFrame::new(buffer, token));
            self.route(outcome, &mut retry);
        }
        self.progress.notify_all();
    }

    fn capture_failed(&self, frame_number: FrameNumber) {
        log::warn!("sensor failed to capture frame {}", frame_number);
        self.progress.notify_all();
    }

    fn sequence_finished(&self) {
        self.roll.lock().sequence_finished = true;
        self.progress.notify_all();
    }

    fn preview_completed(&self, result: PreviewResult) {
        self.negotiator.on_preview_result(&result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::request::{AfTrigger, CfaPattern};
    use crate::session::serial_policy::SerialAcquisitionPolicy;
    use crate::test_support::{BufferFactory, ManualCodec, MockSensor, RecordingConsumer};
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::{Rng, SeedableRng};
    use std::thread;

    struct Rig {
        orchestrator: CaptureOrchestrator,
        sensor: Arc<MockSensor>,
        codec: Arc<ManualCodec>,
        consumer: Arc<RecordingConsumer>,
        buffers: BufferFactory,
    }

    impl Rig {
        fn listener(&self) -> Arc<dyn SensorListener> {
            self.sensor.burst_listener()
        }

        fn metadata(&self, ts: u64) {
            let listener = self.listener();
            listener.capture_started(ts / 100, ts);
            listener.metadata_completed(CaptureMetadata::new(ts, ts / 100));
        }

        fn buffer(&self, ts: u64) {
            self.listener().buffer_available(self.buffers.buffer(ts));
        }

        fn frame(&self, ts: u64) {
            self.metadata(ts);
            self.buffer(ts);
        }
    }

    fn test_config() -> RollConfiguration {
        RollConfiguration {
            codec_slots: 2,
            drain_poll_interval: Duration::from_millis(5),
            drain_timeout: Duration::from_millis(200),
            ..Default::default()
        }
    }

    fn rig_with(pool: usize, config: RollConfiguration) -> Rig {
        let sensor = Arc::new(MockSensor::new(pool));
        let codec = Arc::new(ManualCodec::new(config.codec_slots));
        let consumer = Arc::new(RecordingConsumer::new());
        let orchestrator =
            CaptureOrchestrator::new(sensor.clone(), codec.clone(), consumer.clone(), config)
                .unwrap();
        orchestrator
            .set_policy(Box::new(SerialAcquisitionPolicy::new()))
            .unwrap();
        Rig {
            orchestrator,
            sensor,
            codec,
            consumer,
            buffers: BufferFactory::new(),
        }
    }

    fn rig() -> Rig {
        rig_with(20, test_config())
    }

    #[test]
    fn construction_starts_preview_and_attaches() {
        let rig = rig();
        assert!(rig.sensor.is_attached());
        assert_eq!(rig.sensor.repeating_previews(), vec![PreviewRequest::repeating()]);
        assert!(!rig.orchestrator.is_active());
    }

    #[test]
    fn invalid_pool_is_rejected() {
        let sensor = Arc::new(MockSensor::new(1));
        let result = CaptureOrchestrator::new(
            sensor,
            Arc::new(ManualCodec::new(2)),
            Arc::new(RecordingConsumer::new()),
            test_config(),
        );
        assert!(matches!(result, Err(RollError::ConfigurationFailed(_))));
    }

    #[test]
    fn small_sensor_pool_bounds_the_gate() {
        let rig = rig_with(4, test_config());
        rig.orchestrator.start_roll().unwrap();

        // Buffers without metadata keep their gate slot while they wait.
        for ts in [100, 200, 300, 400] {
            rig.buffer(ts);
        }
        assert_eq!(rig.orchestrator.outstanding_buffers(), 3);

        let summary = rig.orchestrator.stop_roll().unwrap();
        assert_eq!(summary.frames_received, 4);
        assert_eq!(summary.frames_dropped, 1);
        assert!(rig.buffers.all_released_once());
    }

    #[test]
    fn raw_rolls_hand_the_sensor_layout_to_the_codec() {
        let rig = rig();
        rig.orchestrator.set_format(CaptureFormat::RawSensor).unwrap();
        rig.orchestrator.start_roll().unwrap();

        rig.metadata(100);
        rig.listener().buffer_available(BufferFactory::raw().buffer(100));

        let id = rig.codec.pending()[0];
        let job = rig.codec.job(id).unwrap();
        let layout = job.raw.unwrap();
        assert_eq!(layout.bit_depth, 10);
        assert_eq!(layout.cfa_pattern, CfaPattern::Rggb);

        rig.codec.complete(id, false);
        rig.orchestrator.stop_roll().unwrap();
    }

    #[test]
    fn start_without_policy_fails() {
        let sensor = Arc::new(MockSensor::new(20));
        let consumer = Arc::new(RecordingConsumer::new());
        let orchestrator = CaptureOrchestrator::new(
            sensor.clone(),
            Arc::new(ManualCodec::new(2)),
            consumer.clone(),
            test_config(),
        )
        .unwrap();

        assert_eq!(orchestrator.start_roll(), Err(RollError::PolicyNotSet));
        assert!(consumer.rolls().is_empty());
        assert_eq!(sensor.stop_calls(), 0);
    }

    #[test]
    fn full_roll_compresses_every_frame() {
        let rig = rig();
        let info = rig.orchestrator.start_roll().unwrap();
        assert!(rig.orchestrator.is_active());
        assert_eq!(rig.sensor.bursts().len(), 1);

        rig.frame(100);
        rig.buffer(200);
        rig.metadata(200);
        rig.frame(300);
        while rig.codec.complete_next(false).is_some() {}

        let summary = rig.orchestrator.stop_roll().unwrap();

        assert_eq!(summary.info.id, info.id);
        assert_eq!(summary.frames_received, 3);
        assert_eq!(summary.frames_compressed, 3);
        assert_eq!(summary.frames_failed, 0);
        assert_eq!(summary.last_completed, Some(3));
        assert_eq!(summary.last_imaged, Some(3));
        assert!(!summary.forced_completion);

        let timestamps: Vec<u64> = rig.consumer.frames().iter().map(|f| f.timestamp).collect();
        assert_eq!(timestamps, vec![100, 200, 300]);
        assert_eq!(rig.consumer.rolls_done(), 1);
        assert_eq!(rig.consumer.clean_ups(), 1);
        assert!(rig.buffers.all_released_once());
        assert_eq!(rig.orchestrator.outstanding_buffers(), 0);
        assert!(!rig.orchestrator.is_active());
        assert_eq!(rig.sensor.repeating_previews().len(), 2);
    }

    #[test]
    fn second_start_is_rejected_without_side_effects() {
        let rig = rig();
        rig.orchestrator.start_roll().unwrap();
        let stops = rig.sensor.stop_calls();

        assert_eq!(rig.orchestrator.start_roll(), Err(RollError::RollInProgress));

        assert_eq!(rig.consumer.rolls().len(), 1);
        assert_eq!(rig.sensor.stop_calls(), stops);
        assert_eq!(rig.sensor.bursts().len(), 1);
        assert_eq!(rig.orchestrator.roll_state(), RollState::Active);
    }

    #[test]
    fn start_while_draining_is_rejected() {
        let config = RollConfiguration {
            drain_timeout: Duration::from_millis(400),
            ..test_config()
        };
        let rig = Arc::new(rig_with(20, config));
        rig.sensor.finish_sequence_on_stop(false);
        rig.orchestrator.start_roll().unwrap();

        let stopper = {
            let rig = Arc::clone(&rig);
            thread::spawn(move || rig.orchestrator.stop_roll())
        };
        while rig.orchestrator.roll_state() != RollState::Draining {
            thread::sleep(Duration::from_millis(1));
        }

        assert_eq!(rig.orchestrator.start_roll(), Err(RollError::RollInProgress));
        assert_eq!(rig.consumer.rolls().len(), 1);

        let summary = stopper.join().unwrap().unwrap();
        assert!(summary.forced_completion);
        assert!(!rig.orchestrator.is_active());
    }

    #[test]
    fn stop_without_roll_fails() {
        let rig = rig();
        assert_eq!(rig.orchestrator.stop_roll(), Err(RollError::NoActiveRoll));
    }

    #[test]
    fn exhausted_gate_drops_buffers() {
        // Pool of 4 with one preview buffer reserved admits 3.
        let rig = rig_with(4, test_config());
        rig.orchestrator.start_roll().unwrap();

        for ts in [100, 200, 300, 400, 500] {
            rig.buffer(ts);
        }
        assert_eq!(rig.orchestrator.outstanding_buffers(), 3);
        assert_eq!(rig.buffers.released(400), 1);
        assert_eq!(rig.buffers.released(500), 1);

        let summary = rig.orchestrator.stop_roll().unwrap();
        assert_eq!(summary.frames_received, 5);
        assert_eq!(summary.frames_dropped, 2);
        assert!(rig.buffers.all_released_once());
        assert_eq!(rig.orchestrator.outstanding_buffers(), 0);
    }

    #[test]
    fn obsolete_buffer_is_released_immediately() {
        let rig = rig();
        rig.orchestrator.start_roll().unwrap();

        rig.metadata(100);
        rig.metadata(200);
        rig.buffer(100);
        rig.buffer(150);

        assert_eq!(rig.buffers.released(150), 1);
        rig.buffer(200);
        while rig.codec.complete_next(false).is_some() {}

        let summary = rig.orchestrator.stop_roll().unwrap();
        assert_eq!(summary.frames_obsolete, 1);
        assert_eq!(summary.frames_compressed, 2);
        assert!(rig.buffers.all_released_once());
    }

    #[test]
    fn buffers_outside_a_roll_are_released() {
        let rig = rig();
        rig.buffer(100);
        rig.metadata(100);

        assert_eq!(rig.buffers.released(100), 1);
        assert_eq!(rig.orchestrator.outstanding_buffers(), 0);
        assert!(rig.consumer.frames().is_empty());
    }

    #[test]
    fn shuffled_arrivals_release_every_buffer_once() {
        for seed in 1..=25u64 {
            let rig = rig();
            let mut rng = StdRng::seed_from_u64(seed);
            rig.orchestrator.start_roll().unwrap();

            // Every fifth frame loses its metadata.
            let frames: Vec<u64> = (1..=16).map(|n| n * 100).collect();
            let mut metadata: VecDeque<u64> =
                frames.iter().copied().filter(|ts| ts % 500 != 0).collect();
            let mut buffers: Vec<u64> = frames.clone();
            // Buffers may arrive out of order among their neighbours.
            for window in buffers.chunks_mut(3) {
                window.shuffle(&mut rng);
            }
            let mut buffers: VecDeque<u64> = buffers.into();

            while !metadata.is_empty() || !buffers.is_empty() {
                let take_metadata = match (metadata.is_empty(), buffers.is_empty()) {
                    (false, true) => true,
                    (true, false) => false,
                    _ => rng.gen_bool(0.5),
                };
                if take_metadata {
                    let ts = metadata.pop_front().unwrap();
                    rig.metadata(ts);
                } else {
                    let ts = buffers.pop_front().unwrap();
                    rig.buffer(ts);
                }
                if rng.gen_range(0..3) == 0 {
                    rig.codec.complete_next(rng.gen_range(0..10) == 0);
                }
            }
            while rig.codec.complete_next(false).is_some() {}

            let summary = rig.orchestrator.stop_roll().unwrap();

            assert!(rig.buffers.all_released_once(), "seed {}", seed);
            assert_eq!(rig.orchestrator.outstanding_buffers(), 0, "seed {}", seed);
            let frames_seen = rig.consumer.frames();
            assert_eq!(
                frames_seen.len() as u64,
                summary.frames_compressed + summary.frames_failed,
                "seed {}",
                seed
            );
            let mut timestamps: Vec<u64> = frames_seen.iter().map(|f| f.timestamp).collect();
            timestamps.sort_unstable();
            timestamps.dedup();
            assert_eq!(timestamps.len(), frames_seen.len(), "seed {}", seed);
        }
    }

    #[test]
    fn stuck_codec_forces_completion() {
        let rig = rig();
        rig.orchestrator.start_roll().unwrap();
        for ts in [100, 200, 300] {
            rig.frame(ts);
        }

        let summary = rig.orchestrator.stop_roll().unwrap();

        assert!(summary.forced_completion);
        assert!(rig.buffers.all_released_once());
        assert_eq!(rig.consumer.frames().len(), 3);
        assert!(rig.consumer.frames().iter().all(|f| f.error));

        // Late completions from the codec are ignored.
        while rig.codec.complete_next(false).is_some() {}
        assert_eq!(rig.consumer.frames().len(), 3);
    }

    #[test]
    fn leftover_metadata_and_buffers_are_discarded() {
        let rig = rig();
        rig.orchestrator.start_roll().unwrap();
        rig.metadata(100);
        rig.buffer(900);

        let summary = rig.orchestrator.stop_roll().unwrap();

        assert_eq!(summary.metadata_discarded, 1);
        assert_eq!(rig.buffers.released(900), 1);
        assert!(summary.forced_completion);
    }

    #[test]
    fn format_change_rejected_during_roll() {
        let rig = rig();
        rig.orchestrator.start_roll().unwrap();

        assert_eq!(
            rig.orchestrator.set_format(CaptureFormat::RawSensor),
            Err(RollError::RollInProgress)
        );
        assert_eq!(rig.orchestrator.current_format(), CaptureFormat::Yuv420);
        rig.orchestrator.stop_roll().unwrap();

        rig.orchestrator.set_format(CaptureFormat::RawSensor).unwrap();
        rig.orchestrator.start_roll().unwrap();
        let bursts = rig.sensor.bursts();
        assert_eq!(bursts.last().unwrap().target.format, CaptureFormat::RawSensor);
        assert_eq!(rig.consumer.rolls()[1].format, CaptureFormat::RawSensor);
    }

    #[test]
    fn refused_roll_resumes_preview() {
        let rig = rig();
        rig.consumer.refuse_rolls(true);

        assert_eq!(rig.orchestrator.start_roll(), Err(RollError::ConsumerNotReady));

        assert!(!rig.orchestrator.is_active());
        assert!(rig.sensor.bursts().is_empty());
        assert_eq!(rig.sensor.repeating_previews().len(), 2);
    }

    #[test]
    fn failed_activation_rolls_back() {
        let rig = rig();
        rig.sensor.fail_burst_requests(true);

        let result = rig.orchestrator.start_roll();

        assert!(matches!(result, Err(RollError::SensorRequestFailed(_))));
        assert!(!rig.orchestrator.is_active());
        assert_eq!(rig.consumer.rolls_done(), 1);
        assert_eq!(rig.sensor.repeating_previews().len(), 2);

        rig.sensor.fail_burst_requests(false);
        assert!(rig.orchestrator.start_roll().is_ok());
    }

    #[test]
    fn failed_capture_does_not_hold_the_stop() {
        let rig = rig();
        rig.orchestrator.start_roll().unwrap();

        rig.frame(100);
        rig.listener().capture_started(2, 200);
        rig.listener().capture_failed(2);
        rig.frame(300);
        while rig.codec.complete_next(false).is_some() {}

        let summary = rig.orchestrator.stop_roll().unwrap();

        assert_eq!(summary.frames_compressed, 2);
        assert_eq!(summary.last_started, Some(3));
        assert!(!summary.forced_completion);
        assert!(rig.buffers.all_released_once());
    }

    #[test]
    fn converged_focus_can_be_required() {
        let config = RollConfiguration {
            require_converged_focus: true,
            ..test_config()
        };
        let rig = rig_with(20, config);

        assert_eq!(rig.orchestrator.start_roll(), Err(RollError::NotConverged));

        assert_eq!(rig.orchestrator.trigger_focus(), Ok(PrecaptureState::Focusing));
        rig.listener().preview_completed(PreviewResult::default());
        assert_eq!(rig.orchestrator.precapture_state(), PrecaptureState::Converged);

        rig.orchestrator.start_roll().unwrap();
        assert_eq!(
            rig.orchestrator.trigger_focus(),
            Err(RollError::RollInProgress)
        );

        rig.orchestrator.stop_roll().unwrap();
        assert_eq!(rig.orchestrator.precapture_state(), PrecaptureState::Preview);
        let last = *rig.sensor.preview_requests().last().unwrap();
        assert_eq!(last.af_trigger, AfTrigger::Cancel);
    }

    #[test]
    fn quality_flows_into_new_rolls() {
        let rig = rig();
        rig.orchestrator.set_quality(Quality::High);

        let info = rig.orchestrator.start_roll().unwrap();

        assert_eq!(info.quality, Quality::High);
        assert_eq!(rig.orchestrator.quality(), Quality::High);
    }

    #[test]
    fn shutdown_releases_everything() {
        let rig = rig();
        rig.orchestrator.start_roll().unwrap();
        rig.frame(100);
        rig.frame(200);
        rig.frame(300);
        rig.buffer(400);

        rig.orchestrator.shutdown();
        rig.orchestrator.shutdown();

        assert!(rig.buffers.all_released_once());
        assert_eq!(rig.orchestrator.outstanding_buffers(), 0);
        assert!(!rig.sensor.is_attached());
        assert_eq!(rig.consumer.shutdowns(), 1);
        assert_eq!(rig.consumer.rolls_done(), 1);
        assert_eq!(rig.orchestrator.start_roll(), Err(RollError::ShutDown));
    }

    #[test]
    fn dropping_shuts_down() {
        let rig = rig();
        let consumer = Arc::clone(&rig.consumer);
        let sensor = Arc::clone(&rig.sensor);
        rig.orchestrator.start_roll().unwrap();
        rig.frame(100);

        drop(rig);

        assert_eq!(consumer.shutdowns(), 1);
        assert!(!sensor.is_attached());
    }
}
