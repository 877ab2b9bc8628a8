//! Trailing-window upload rate estimate used to throttle the export loop.

use std::collections::VecDeque;
use std::time::Duration;

pub const DEFAULT_WINDOW: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_SAMPLES: usize = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BandwidthSample {
    pub bytes: usize,
    /// Monotonic time since the owner's origin.
    pub at: Duration,
}

/// Ring of recent upload sizes. Eviction on insert is purely by count; the
/// time window is applied when the rate is read.
#[derive(Debug, Clone)]
pub struct BandwidthTracker {
    window: Duration,
    max_samples: usize,
    samples: VecDeque<BandwidthSample>,
}

impl Default for BandwidthTracker {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW, DEFAULT_MAX_SAMPLES)
    }
}

impl BandwidthTracker {
    pub fn new(window: Duration, max_samples: usize) -> Self {
        let max_samples = max_samples.max(1);
        Self {
            window,
            max_samples,
            samples: VecDeque::with_capacity(max_samples),
        }
    }

    pub fn add(&mut self, bytes: usize, now: Duration) {
        if self.samples.len() >= self.max_samples {
            self.samples.pop_front();
        }
        self.samples.push_back(BandwidthSample { bytes, at: now });
    }

    /// Rate in KiB/s over `[now - window, now]`, or 0.0 with no samples in it.
    pub fn bandwidth(&self, now: Duration) -> f64 {
        let mut transferred = 0usize;
        let mut any = false;
        for sample in &self.samples {
            if sample.at <= now && now - sample.at <= self.window {
                transferred += sample.bytes;
                any = true;
            }
        }
        if !any {
            return 0.0;
        }

        let begin = now.saturating_sub(self.window);
        let interval = (now - begin).as_secs_f64();
        if interval <= 0.0 {
            return f64::INFINITY;
        }
        transferred as f64 / 1024.0 / interval
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
