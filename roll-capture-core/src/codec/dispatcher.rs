use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::models::config::{resolve_codec_threads, MAX_CODEC_SLOTS};
use crate::models::error::RollError;
use crate::models::request::{CaptureFormat, Quality, RawLayout};
use crate::processing::metadata_matcher::{MatchedPair, PairId};
use crate::processing::resource_gate::ResourceGate;
use crate::traits::codec_service::{CodecJob, CodecService, CodecStatus, JobCompletion};
use crate::traits::roll_consumer::RollConsumer;

/// Answer to [`CompressionDispatcher::submit`].
///
/// Every outcome other than `Accepted` and `SlotsFull` means the dispatcher
/// already reported the frame as failed and released its buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted,
    IllegalInput,
    UnsupportedFormat,
    OutOfMemory,
    /// All slots are taken; the pair waits in the overflow queue.
    SlotsFull,
    ServiceNotRunning,
}

impl SubmitOutcome {
    pub fn is_pending(self) -> bool {
        matches!(self, Self::Accepted | Self::SlotsFull)
    }
}

/// Snapshot of the dispatcher's frame counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchCounters {
    /// Jobs the codec accepted.
    pub submitted: u64,
    pub compressed: u64,
    /// Frames reported to the consumer as failed, for any reason.
    pub failed: u64,
}

struct DispatchState {
    running: bool,
    quality: Quality,
    raw_layout: RawLayout,
    in_flight: HashMap<PairId, MatchedPair>,
    overflow: VecDeque<MatchedPair>,
    /// Pairs taken out of the collections whose release has not finished.
    settling: usize,
    counters: DispatchCounters,
}

impl DispatchState {
    fn is_idle(&self) -> bool {
        self.in_flight.is_empty() && self.overflow.is_empty() && self.settling == 0
    }
}

enum Admission {
    Dispatch(CodecJob),
    Queued,
    Stopped(MatchedPair),
}

struct Inner {
    codec: Arc<dyn CodecService>,
    consumer: Arc<dyn RollConsumer>,
    gate: Arc<ResourceGate>,
    slots: usize,
    state: Mutex<DispatchState>,
    idle: Condvar,
}

/// Feeds matched pairs to a [`CodecService`] with a bounded number of jobs in
/// flight and an unbounded FIFO overflow queue behind them.
///
/// Data flow:
/// ```text
/// submit ─→ [free slot?] ─yes─→ codec.submit ─→ worker ─→ on_job_done
///               │ no                                          │
///               └─→ [overflow FIFO] ←──── next oldest ←───────┘
/// ```
/// The consumer is notified and the buffer released exactly once per pair,
/// whether the codec completes it, rejects it, or it is flushed.
pub struct CompressionDispatcher {
    inner: Arc<Inner>,
}

impl CompressionDispatcher {
    /// `slots` is clamped to what the codec supports and to [`MAX_CODEC_SLOTS`].
    pub fn new(
        codec: Arc<dyn CodecService>,
        consumer: Arc<dyn RollConsumer>,
        gate: Arc<ResourceGate>,
        slots: usize,
    ) -> Self {
        let slots = slots.min(codec.slots()).clamp(1, MAX_CODEC_SLOTS);
        Self {
            inner: Arc::new(Inner {
                codec,
                consumer,
                gate,
                slots,
                state: Mutex::new(DispatchState {
                    running: false,
                    quality: Quality::default(),
                    raw_layout: RawLayout::default(),
                    in_flight: HashMap::new(),
                    overflow: VecDeque::new(),
                    settling: 0,
                    counters: DispatchCounters::default(),
                }),
                idle: Condvar::new(),
            }),
        }
    }

    /// Bring up the codec with `threads` workers (0 = available parallelism).
    pub fn start(&self, threads: usize) -> Result<(), RollError> {
        if self.inner.state.lock().running {
            return Ok(());
        }

        let threads = resolve_codec_threads(threads);
        let weak = Arc::downgrade(&self.inner);
        self.inner.codec.start(
            threads,
            Arc::new(move |completion: JobCompletion| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_job_done(completion);
                }
            }),
        )?;

        self.inner.state.lock().running = true;
        log::info!(
            "compression dispatcher started: {} slots, {} threads",
            self.inner.slots,
            threads
        );
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.inner.state.lock().running
    }

    pub fn set_quality(&self, quality: Quality) {
        self.inner.state.lock().quality = quality;
    }

    pub fn quality(&self) -> Quality {
        self.inner.state.lock().quality
    }

    /// Sample layout attached to raw jobs submitted from now on.
    pub fn set_raw_layout(&self, layout: RawLayout) {
        self.inner.state.lock().raw_layout = layout;
    }

    pub fn submit(&self, pair: MatchedPair) -> SubmitOutcome {
        let inner = &self.inner;
        let admission = {
            let mut state = inner.state.lock();
            if !state.running {
                state.settling += 1;
                Admission::Stopped(pair)
            } else if !state.overflow.is_empty() || state.in_flight.len() >= inner.slots {
                state.overflow.push_back(pair);
                Admission::Queued
            } else {
                let job = inner.job_for(&pair, &state);
                state.in_flight.insert(pair.id(), pair);
                Admission::Dispatch(job)
            }
        };

        match admission {
            Admission::Dispatch(job) => {
                let outcome = inner.dispatch(job);
                if outcome != SubmitOutcome::Accepted {
                    inner.pump();
                }
                outcome
            }
            Admission::Queued => {
                log::debug!("codec slots full, {} pairs in overflow", self.overflow_len());
                inner.pump();
                SubmitOutcome::SlotsFull
            }
            Admission::Stopped(pair) => {
                log::warn!("{} submitted while the codec is not running", pair.id());
                inner.dispose(pair);
                inner.settled(1);
                SubmitOutcome::ServiceNotRunning
            }
        }
    }

    /// Fail everything in overflow, wait for the codec to finish its jobs, then
    /// release whatever it never reported back.
    pub fn drain(&self) {
        let flushed: Vec<MatchedPair> = {
            let mut state = self.inner.state.lock();
            let flushed: Vec<_> = state.overflow.drain(..).collect();
            state.settling += flushed.len();
            flushed
        };
        if !flushed.is_empty() {
            log::debug!("flushing {} pairs from overflow", flushed.len());
        }
        let count = flushed.len();
        for pair in flushed {
            self.inner.dispose(pair);
        }
        self.inner.settled(count);

        self.inner.codec.drain_all();
        self.force_release_outstanding();
    }

    /// Wait until nothing is queued, in flight or being released.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        while !state.is_idle() {
            if self.inner.idle.wait_until(&mut state, deadline).timed_out() {
                return state.is_idle();
            }
        }
        true
    }

    /// Fail and release every pair still held. Later completions for these
    /// pairs are ignored. Returns the number of pairs released.
    pub fn force_release_outstanding(&self) -> usize {
        let stragglers: Vec<MatchedPair> = {
            let mut state = self.inner.state.lock();
            let mut stragglers: Vec<_> = state.overflow.drain(..).collect();
            let mut in_flight: Vec<_> = state.in_flight.drain().map(|(_, pair)| pair).collect();
            in_flight.sort_by_key(|pair| pair.id());
            stragglers.extend(in_flight);
            state.settling += stragglers.len();
            stragglers
        };

        let count = stragglers.len();
        if count > 0 {
            log::warn!("force releasing {} outstanding pairs", count);
        }
        for pair in stragglers {
            self.inner.dispose(pair);
        }
        self.inner.settled(count);
        count
    }

    /// Stop accepting work, drain, and stop the codec. Idempotent.
    pub fn shutdown(&self) {
        {
            let mut state = self.inner.state.lock();
            if !state.running {
                return;
            }
            state.running = false;
        }
        self.drain();
        self.inner.codec.shutdown();
        log::info!("compression dispatcher stopped");
    }

    pub fn slots(&self) -> usize {
        self.inner.slots
    }

    pub fn in_flight(&self) -> usize {
        self.inner.state.lock().in_flight.len()
    }

    pub fn overflow_len(&self) -> usize {
        self.inner.state.lock().overflow.len()
    }

    pub fn counters(&self) -> DispatchCounters {
        self.inner.state.lock().counters
    }

    pub fn reset_counters(&self) {
        self.inner.state.lock().counters = DispatchCounters::default();
    }
}

impl Inner {
    fn job_for(&self, pair: &MatchedPair, state: &DispatchState) -> CodecJob {
        let buffer = pair.frame().buffer();
        CodecJob {
            pair_id: pair.id(),
            data: buffer.data().clone(),
            width: buffer.width(),
            height: buffer.height(),
            format: buffer.format(),
            quality: state.quality,
            raw: (buffer.format() == CaptureFormat::RawSensor).then_some(state.raw_layout),
            metadata: pair.metadata().clone(),
        }
    }

    /// Hand a job whose pair is already in flight to the codec.
    fn dispatch(&self, job: CodecJob) -> SubmitOutcome {
        let id = job.pair_id;
        let outcome = match self.codec.submit(job) {
            CodecStatus::Queued => {
                self.state.lock().counters.submitted += 1;
                return SubmitOutcome::Accepted;
            }
            CodecStatus::Busy => SubmitOutcome::SlotsFull,
            CodecStatus::IllegalParams => SubmitOutcome::IllegalInput,
            CodecStatus::UnsupportedFormat => SubmitOutcome::UnsupportedFormat,
            CodecStatus::NoMemory => SubmitOutcome::OutOfMemory,
            CodecStatus::NotRunning => SubmitOutcome::ServiceNotRunning,
        };

        let mut state = self.state.lock();
        let Some(pair) = state.in_flight.remove(&id) else {
            // Completed or force released while the codec was answering.
            return outcome;
        };

        if outcome == SubmitOutcome::SlotsFull {
            // Still the oldest pending pair.
            state.overflow.push_front(pair);
            return outcome;
        }

        state.settling += 1;
        drop(state);
        log::warn!("codec rejected {}: {:?}", id, outcome);
        self.dispose(pair);
        self.settled(1);
        outcome
    }

    /// Move overflow into free slots, oldest first.
    fn pump(&self) {
        loop {
            let job = {
                let mut state = self.state.lock();
                if !state.running || state.in_flight.len() >= self.slots {
                    return;
                }
                let Some(pair) = state.overflow.pop_front() else {
                    return;
                };
                let job = self.job_for(&pair, &state);
                state.in_flight.insert(pair.id(), pair);
                job
            };
            if self.dispatch(job) == SubmitOutcome::SlotsFull {
                return;
            }
        }
    }

    fn on_job_done(&self, completion: JobCompletion) {
        let pair = {
            let mut state = self.state.lock();
            let pair = state.in_flight.remove(&completion.pair_id);
            if pair.is_some() {
                state.settling += 1;
                if completion.error {
                    state.counters.failed += 1;
                } else {
                    state.counters.compressed += 1;
                }
            }
            pair
        };

        let Some(pair) = pair else {
            log::debug!("ignoring completion for released {}", completion.pair_id);
            // Its codec slot is free all the same.
            self.pump();
            return;
        };

        // The slot is free again; keep the codec busy before notifying.
        self.pump();

        if completion.error {
            log::debug!("codec failed {}", pair.id());
            self.consumer.frame_done(pair.metadata(), &[], true);
        } else {
            self.consumer.frame_done(pair.metadata(), &completion.output, false);
        }
        pair.release(&self.gate);
        self.settled(1);
    }

    /// Report a pair as failed and release it. The caller accounts for it in `settling`.
    fn dispose(&self, pair: MatchedPair) {
        self.consumer.frame_done(pair.metadata(), &[], true);
        pair.release(&self.gate);
        self.state.lock().counters.failed += 1;
    }

    fn settled(&self, count: usize) {
        if count == 0 {
            return;
        }
        let mut state = self.state.lock();
        state.settling -= count;
        if state.is_idle() {
            self.idle.notify_all();
        }
    }
}
