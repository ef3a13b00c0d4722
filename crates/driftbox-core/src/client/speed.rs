//! Throughput estimation for a running upload.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

const MIB: f64 = 1024.0 * 1024.0;

/// Samples closer together than this are deferred to smooth out bursts.
pub const MIN_SAMPLE_INTERVAL: Duration = Duration::from_millis(500);

/// Speed indicator shown next to a task.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", content = "bytesPerSec", rename_all = "lowercase")]
pub enum Speed {
    /// Nothing measured yet
    Idle,
    /// Bytes per second over the last sample window
    Rate(f64),
    /// Task is paused
    Paused,
    /// All chunks sent
    Done,
}

impl Speed {
    /// Bytes per second, when a rate is being reported.
    #[must_use]
    pub const fn bytes_per_sec(&self) -> Option<f64> {
        match self {
            Self::Rate(bps) => Some(*bps),
            _ => None,
        }
    }
}

impl fmt::Display for Speed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "0 MB/s"),
            Self::Rate(bps) => write!(f, "{:.1} MB/s", bps / MIB),
            Self::Paused => write!(f, "Paused"),
            Self::Done => write!(f, "Done"),
        }
    }
}

/// Accumulates acknowledged bytes and turns them into a rate on demand.
#[derive(Debug, Clone)]
pub struct SpeedMeter {
    last_sample: Instant,
    bytes_since_sample: u64,
}

impl SpeedMeter {
    /// Start measuring from `now`.
    #[must_use]
    pub const fn new(now: Instant) -> Self {
        Self {
            last_sample: now,
            bytes_since_sample: 0,
        }
    }

    /// Forget accumulated bytes and restart the window at `now`.
    pub fn reset(&mut self, now: Instant) {
        self.last_sample = now;
        self.bytes_since_sample = 0;
    }

    /// Restart the window at `now` but keep accumulated bytes.
    pub fn rebase(&mut self, now: Instant) {
        self.last_sample = now;
    }

    /// Account for `bytes` acknowledged by the server.
    pub fn record(&mut self, bytes: u64) {
        self.bytes_since_sample = self.bytes_since_sample.saturating_add(bytes);
    }

    /// Produce a rate for the window ending at `now`.
    ///
    /// Returns `None` when less than [`MIN_SAMPLE_INTERVAL`] has elapsed, in
    /// which case the window keeps growing.
    pub fn sample(&mut self, now: Instant) -> Option<f64> {
        let elapsed = now.saturating_duration_since(self.last_sample);
        if elapsed <= MIN_SAMPLE_INTERVAL {
            return None;
        }

        let rate = self.bytes_since_sample as f64 / elapsed.as_secs_f64();
        self.last_sample = now;
        self.bytes_since_sample = 0;
        Some(rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_speed_display() {
        assert_eq!(Speed::Idle.to_string(), "0 MB/s");
        assert_eq!(Speed::Rate(3.0 * MIB).to_string(), "3.0 MB/s");
        assert_eq!(Speed::Rate(1.5 * MIB).to_string(), "1.5 MB/s");
        assert_eq!(Speed::Paused.to_string(), "Paused");
        assert_eq!(Speed::Done.to_string(), "Done");
    }

    #[test]
    #[allow(clippy::float_cmp)]
    fn test_sample_rate() {
        let start = Instant::now();
        let mut meter = SpeedMeter::new(start);

        meter.record(10 * 1024 * 1024);
        let rate = meter.sample(start + Duration::from_secs(2)).unwrap();
        assert_eq!(rate, 5.0 * MIB);

        let rate = meter.sample(start + Duration::from_secs(3)).unwrap();
        assert_eq!(rate, 0.0);
    }

    #[test]
    #[allow(clippy::float_cmp)]
    fn test_sample_defers_short_windows() {
        let start = Instant::now();
        let mut meter = SpeedMeter::new(start);

        meter.record(1000);
        assert!(meter.sample(start + Duration::from_millis(400)).is_none());
        assert!(meter.sample(start + MIN_SAMPLE_INTERVAL).is_none());

        meter.record(1000);
        let rate = meter.sample(start + Duration::from_secs(1)).unwrap();
        assert_eq!(rate, 2000.0);
    }

    #[test]
    fn test_reset_discards_bytes() {
        let start = Instant::now();
        let mut meter = SpeedMeter::new(start);
        meter.record(5000);

        let later = start + Duration::from_secs(5);
        meter.reset(later);
        assert_eq!(meter.sample(later + Duration::from_secs(1)), Some(0.0));
    }
}
