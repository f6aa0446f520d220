use std::time::Duration;

use super::request::{CaptureFormat, Quality};

/// Hard upper bound on concurrent codec job slots.
pub const MAX_CODEC_SLOTS: usize = 32;

/// Hard upper bound on codec worker threads.
pub const MAX_CODEC_THREADS: usize = 8;

/// Configuration for a capture orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub struct RollConfiguration {
    /// Number of frame buffers the sensor pool holds (default: 20).
    pub buffer_pool_size: usize,

    /// Buffers kept back for the preview stream (default: 1).
    pub preview_reserve: usize,

    /// Concurrent codec job slots before pairs spill into overflow (default: 4).
    pub codec_slots: usize,

    /// Codec worker threads; 0 picks the available parallelism (default: 1).
    pub codec_threads: usize,

    /// Interval between drain progress checks (default: 250 ms).
    pub drain_poll_interval: Duration,

    /// Upper bound on every wait performed while stopping a roll (default: 5 s).
    pub drain_timeout: Duration,

    /// Compression quality handed to the codec (default: low).
    pub quality: Quality,

    /// Output format for burst captures (default: YUV 4:2:0).
    pub format: CaptureFormat,

    /// Refuse to start a roll unless focus/exposure negotiation converged.
    pub require_converged_focus: bool,
}

impl RollConfiguration {
    pub fn validate(&self) -> Result<(), String> {
        if self.buffer_pool_size <= self.preview_reserve {
            return Err(format!(
                "buffer pool of {} cannot cover a preview reserve of {}",
                self.buffer_pool_size, self.preview_reserve
            ));
        }
        if self.codec_slots == 0 || self.codec_slots > MAX_CODEC_SLOTS {
            return Err(format!(
                "codec slots must be between 1 and {}, got {}",
                MAX_CODEC_SLOTS, self.codec_slots
            ));
        }
        if self.drain_poll_interval.is_zero() {
            return Err("drain poll interval must be positive".into());
        }
        if self.drain_timeout < self.drain_poll_interval {
            return Err("drain timeout must not be shorter than the poll interval".into());
        }
        Ok(())
    }

    /// Number of buffers the orchestrator may hold at once on a sensor whose
    /// output pool holds `sensor_pool` buffers.
    pub fn gate_capacity(&self, sensor_pool: usize) -> usize {
        self.buffer_pool_size
            .min(sensor_pool)
            .saturating_sub(self.preview_reserve)
    }

    /// Worker thread count after resolving 0 and clamping to the hard maximum.
    pub fn resolved_codec_threads(&self) -> usize {
        resolve_codec_threads(self.codec_threads)
    }
}

/// Resolve a requested worker count: 0 means the available parallelism,
/// and the result always lies in `1..=MAX_CODEC_THREADS`.
pub fn resolve_codec_threads(requested: usize) -> usize {
    let threads = if requested == 0 {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    } else {
        requested
    };
    threads.clamp(1, MAX_CODEC_THREADS)
}

impl Default for RollConfiguration {
    fn default() -> Self {
        Self {
            buffer_pool_size: 20,
            preview_reserve: 1,
            codec_slots: 4,
            codec_threads: 1,
            drain_poll_interval: Duration::from_millis(250),
            drain_timeout: Duration::from_secs(5),
            quality: Quality::Low,
            format: CaptureFormat::Yuv420,
            require_converged_focus: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        let config = RollConfiguration::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.gate_capacity(64), 19);
    }

    #[test]
    fn gate_capacity_follows_the_smaller_pool() {
        let config = RollConfiguration::default();
        assert_eq!(config.gate_capacity(8), 7);
        assert_eq!(config.gate_capacity(1), 0);
        assert_eq!(config.gate_capacity(0), 0);
    }

    #[test]
    fn pool_must_exceed_reserve() {
        let config = RollConfiguration {
            buffer_pool_size: 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn codec_slots_are_bounded() {
        let zero = RollConfiguration {
            codec_slots: 0,
            ..Default::default()
        };
        let huge = RollConfiguration {
            codec_slots: MAX_CODEC_SLOTS + 1,
            ..Default::default()
        };
        assert!(zero.validate().is_err());
        assert!(huge.validate().is_err());
    }

    #[test]
    fn timeout_must_cover_poll_interval() {
        let config = RollConfiguration {
            drain_poll_interval: Duration::from_millis(500),
            drain_timeout: Duration::from_millis(100),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn codec_threads_are_clamped() {
        let config = RollConfiguration {
            codec_threads: 64,
            ..Default::default()
        };
        assert_eq!(config.resolved_codec_threads(), MAX_CODEC_THREADS);

        let auto = RollConfiguration {
            codec_threads: 0,
            ..Default::default()
        };
        let resolved = auto.resolved_codec_threads();
        assert!((1..=MAX_CODEC_THREADS).contains(&resolved));
    }
}
