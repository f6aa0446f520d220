mod roll_state;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::{Parser, ValueEnum};

use roll_capture_core::{
    CaptureFormat, CaptureOrchestrator, PrecaptureState, Quality, RollConfiguration, RollError,
    SerialAcquisitionPolicy,
};
use roll_capture_sim::{
    DeliveryOrder, SimSensorConfig, SimulatedSensor, ThreadedCodec, ThreadedCodecConfig,
};

use roll_state::LoggingConsumer;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FormatArg {
    Yuv,
    Raw,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum QualityArg {
    Low,
    Medium,
    High,
}

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Run capture rolls against a simulated sensor",
    long_about = None
)]
struct Args {
    /// Length of each roll in milliseconds
    #[arg(short, long, default_value_t = 500)]
    duration_ms: u64,

    /// Number of consecutive rolls
    #[arg(short, long, default_value_t = 1)]
    rolls: u32,

    #[arg(short, long, value_enum, default_value_t = FormatArg::Yuv)]
    format: FormatArg,

    #[arg(short, long, value_enum, default_value_t = QualityArg::Low)]
    quality: QualityArg,

    /// Codec worker threads (0 = one per core)
    #[arg(long, default_value_t = 2)]
    threads: usize,

    /// Concurrent codec jobs
    #[arg(long, default_value_t = 4)]
    slots: usize,

    /// Simulated encode time per frame in milliseconds
    #[arg(long, default_value_t = 2)]
    encode_ms: u64,

    /// Lose the metadata of every n-th frame
    #[arg(long)]
    drop_metadata_every: Option<u64>,

    /// Deliver buffers before their metadata
    #[arg(long)]
    buffer_first: bool,

    /// Start rolls without locking focus and exposure first
    #[arg(long)]
    skip_focus: bool,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if let Err(e) = run(&args) {
        log::error!("demo failed: {}", e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), RollError> {
    let sensor = Arc::new(SimulatedSensor::new(SimSensorConfig {
        delivery_order: if args.buffer_first {
            DeliveryOrder::BufferFirst
        } else {
            DeliveryOrder::MetadataFirst
        },
        drop_metadata_every: args.drop_metadata_every,
        ..Default::default()
    })?);
    let codec = Arc::new(ThreadedCodec::new(ThreadedCodecConfig {
        slots: args.slots,
        work_delay: Duration::from_millis(args.encode_ms),
        ..Default::default()
    })?);
    let consumer = Arc::new(LoggingConsumer::new());

    let config = RollConfiguration {
        codec_slots: args.slots,
        codec_threads: args.threads,
        format: match args.format {
            FormatArg::Yuv => CaptureFormat::Yuv420,
            FormatArg::Raw => CaptureFormat::RawSensor,
        },
        quality: match args.quality {
            QualityArg::Low => Quality::Low,
            QualityArg::Medium => Quality::Medium,
            QualityArg::High => Quality::High,
        },
        require_converged_focus: !args.skip_focus,
        ..Default::default()
    };

    let orchestrator = CaptureOrchestrator::new(sensor.clone(), codec, consumer.clone(), config)?;
    orchestrator.set_policy(Box::new(SerialAcquisitionPolicy::new()))?;

    for _ in 0..args.rolls {
        if !args.skip_focus {
            lock_focus(&orchestrator)?;
        }

        orchestrator.start_roll()?;
        thread::sleep(Duration::from_millis(args.duration_ms));
        let summary = orchestrator.stop_roll()?;

        println!("{}", summary.to_json()?);
        println!("{}", consumer.report());
    }

    orchestrator.shutdown();
    log::info!(
        "sensor produced {} frames, {} buffers still out",
        sensor.frames_produced(),
        sensor.outstanding_buffers()
    );
    Ok(())
}

fn lock_focus(orchestrator: &CaptureOrchestrator) -> Result<(), RollError> {
    orchestrator.trigger_focus()?;
    let deadline = Instant::now() + Duration::from_secs(2);
    while orchestrator.precapture_state() != PrecaptureState::Converged {
        if Instant::now() >= deadline {
            return Err(RollError::NotConverged);
        }
        thread::sleep(Duration::from_millis(5));
    }
    log::info!("focus and exposure converged");
    Ok(())
}
