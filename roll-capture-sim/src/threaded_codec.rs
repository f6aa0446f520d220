//! Worker-pool codec service.
//!
//! Jobs go through a bounded `flume` channel to a fixed set of named worker
//! threads. The "encoded" stream is a SHA-256 digest of the frame, so output
//! is deterministic and cheap to verify.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use sha2::{Digest, Sha256};

use roll_capture_core::models::config::MAX_CODEC_SLOTS;
use roll_capture_core::models::error::RollError;
use roll_capture_core::models::request::{
    CaptureFormat, CfaPattern, Quality, RawLayout, MAX_RAW_BIT_DEPTH,
};
use roll_capture_core::traits::codec_service::{
    CodecJob, CodecService, CodecStatus, JobCompletion, JobDoneCallback,
};

/// Configuration for a [`ThreadedCodec`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadedCodecConfig {
    /// Jobs accepted before `submit` answers busy (default: 4).
    pub slots: usize,

    /// Simulated encode time per job (default: 2 ms).
    pub work_delay: Duration,

    /// Report every n-th job as failed. `None` never fails (default).
    pub fail_every: Option<u64>,
}

impl Default for ThreadedCodecConfig {
    fn default() -> Self {
        Self {
            slots: 4,
            work_delay: Duration::from_millis(2),
            fail_every: None,
        }
    }
}

impl ThreadedCodecConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.slots == 0 || self.slots > MAX_CODEC_SLOTS {
            return Err(format!(
                "codec slots must be between 1 and {}, got {}",
                MAX_CODEC_SLOTS, self.slots
            ));
        }
        if self.fail_every == Some(0) {
            return Err("fail_every must be positive".into());
        }
        Ok(())
    }
}

/// Job accounting shared with the workers.
#[derive(Default)]
struct Load {
    /// Jobs holding a slot: queued or being encoded.
    held: usize,
    /// Jobs whose completion has not been reported yet.
    unreported: usize,
}

struct Workers {
    sender: flume::Sender<CodecJob>,
    handles: Vec<thread::JoinHandle<()>>,
}

/// Codec service backed by a pool of worker threads.
pub struct ThreadedCodec {
    config: ThreadedCodecConfig,
    workers: Mutex<Option<Workers>>,
    load: Arc<Mutex<Load>>,
    reported: Arc<Condvar>,
    processed: Arc<AtomicU64>,
}

impl ThreadedCodec {
    pub fn new(config: ThreadedCodecConfig) -> Result<Self, RollError> {
        config.validate().map_err(RollError::ConfigurationFailed)?;
        Ok(Self {
            config,
            workers: Mutex::new(None),
            load: Arc::new(Mutex::new(Load::default())),
            reported: Arc::new(Condvar::new()),
            processed: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn is_running(&self) -> bool {
        self.workers.lock().is_some()
    }

    /// Jobs finished since the codec was created, failed ones included.
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::SeqCst)
    }

    pub fn worker_count(&self) -> usize {
        self.workers
            .lock()
            .as_ref()
            .map(|w| w.handles.len())
            .unwrap_or(0)
    }
}

impl CodecService for ThreadedCodec {
    fn start(&self, threads: usize, on_done: JobDoneCallback) -> Result<(), RollError> {
        let mut workers = self.workers.lock();
        if workers.is_some() {
            return Err(RollError::CodecInitFailed("codec already running".into()));
        }

        let (sender, receiver) = flume::bounded::<CodecJob>(self.config.slots);
        let mut handles = Vec::with_capacity(threads);
        for index in 0..threads.max(1) {
            let receiver = receiver.clone();
            let on_done = Arc::clone(&on_done);
            let load = Arc::clone(&self.load);
            let reported = Arc::clone(&self.reported);
            let processed = Arc::clone(&self.processed);
            let work_delay = self.config.work_delay;
            let fail_every = self.config.fail_every;

            let handle = thread::Builder::new()
                .name(format!("roll-codec-{}", index))
                .spawn(move || {
                    while let Ok(job) = receiver.recv() {
                        let sequence = processed.fetch_add(1, Ordering::SeqCst) + 1;
                        let error = fail_every.is_some_and(|n| sequence % n == 0);
                        let output = if error {
                            Bytes::new()
                        } else {
                            encode(&job, work_delay)
                        };

                        load.lock().held -= 1;
                        on_done(JobCompletion {
                            pair_id: job.pair_id,
                            error,
                            output,
                        });

                        let mut load = load.lock();
                        load.unreported -= 1;
                        if load.unreported == 0 {
                            reported.notify_all();
                        }
                    }
                    log::debug!("codec worker {} exiting", index);
                })
                .map_err(|e| {
                    RollError::CodecInitFailed(format!("failed to spawn codec worker: {}", e))
                })?;
            handles.push(handle);
        }

        log::info!(
            "threaded codec started: {} workers, {} slots",
            handles.len(),
            self.config.slots
        );
        *workers = Some(Workers { sender, handles });
        Ok(())
    }

    fn slots(&self) -> usize {
        self.config.slots
    }

    fn submit(&self, job: CodecJob) -> CodecStatus {
        if job.width == 0 || job.height == 0 {
            return CodecStatus::IllegalParams;
        }
        if job.data.is_empty() {
            return CodecStatus::IllegalParams;
        }
        if job.format == CaptureFormat::RawSensor && !raw_layout_supported(job.raw) {
            return CodecStatus::UnsupportedFormat;
        }

        let workers = self.workers.lock();
        let Some(workers) = workers.as_ref() else {
            return CodecStatus::NotRunning;
        };

        {
            let mut load = self.load.lock();
            if load.held >= self.config.slots {
                return CodecStatus::Busy;
            }
            load.held += 1;
            load.unreported += 1;
        }

        match workers.sender.try_send(job) {
            Ok(()) => CodecStatus::Queued,
            Err(e) => {
                let mut load = self.load.lock();
                load.held -= 1;
                load.unreported -= 1;
                match e {
                    flume::TrySendError::Full(_) => CodecStatus::Busy,
                    flume::TrySendError::Disconnected(_) => CodecStatus::NotRunning,
                }
            }
        }
    }

    fn drain_all(&self) {
        let mut load = self.load.lock();
        while load.unreported > 0 {
            self.reported.wait(&mut load);
        }
    }

    fn shutdown(&self) {
        let Some(workers) = self.workers.lock().take() else {
            return;
        };
        // Closing the channel lets the workers finish the queue and exit.
        drop(workers.sender);
        for handle in workers.handles {
            if handle.join().is_err() {
                log::error!("codec worker panicked");
            }
        }
        log::info!("threaded codec stopped after {} jobs", self.processed());
    }
}

impl Drop for ThreadedCodec {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn quality_tag(quality: Quality) -> u8 {
    match quality {
        Quality::Low => 1,
        Quality::Medium => 2,
        Quality::High => 3,
    }
}

fn cfa_tag(pattern: CfaPattern) -> u8 {
    match pattern {
        CfaPattern::Rggb => 1,
        CfaPattern::Bggr => 2,
        CfaPattern::Gbrg => 3,
        CfaPattern::Grbg => 4,
        CfaPattern::Unknown => 0,
    }
}

/// Raw frames need a known Bayer layout and at least 8 bits per sample.
fn raw_layout_supported(raw: Option<RawLayout>) -> bool {
    raw.is_some_and(|layout| {
        layout.cfa_pattern != CfaPattern::Unknown
            && (8..=MAX_RAW_BIT_DEPTH).contains(&layout.bit_depth)
    })
}

fn encode(job: &CodecJob, work_delay: Duration) -> Bytes {
    if !work_delay.is_zero() {
        thread::sleep(work_delay);
    }
    let mut hasher = Sha256::new();
    hasher.update([quality_tag(job.quality)]);
    if let Some(raw) = job.raw {
        hasher.update([cfa_tag(raw.cfa_pattern)]);
        hasher.update(raw.bit_depth.to_le_bytes());
    }
    hasher.update(job.metadata.timestamp.to_le_bytes());
    hasher.update(job.width.to_le_bytes());
    hasher.update(job.height.to_le_bytes());
    hasher.update(&job.data);
    Bytes::copy_from_slice(&hasher.finalize())
}
