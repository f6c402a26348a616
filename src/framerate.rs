use std::time::Instant;

/// Number of ingestion events between framerate recomputations.
pub const FRAMERATE_WINDOW: u32 = 10;

/// Estimate reported before the first window completes (Hz).
pub const INITIAL_FRAMERATE: f64 = 72.0;

/// Per-channel capture rate estimate derived from point report arrivals.
///
/// Every `FRAMERATE_WINDOW` events the estimate is replaced by
/// `FRAMERATE_WINDOW / elapsed`, where `elapsed` is the wall time since the
/// previous recomputation.
#[derive(Clone, Debug)]
pub struct FramerateEstimator {
    samples: u32,
    last_signal: Instant,
    estimate: f64,
}

impl FramerateEstimator {
    pub fn new(now: Instant) -> Self {
        Self {
            samples: 0,
            last_signal: now,
            estimate: INITIAL_FRAMERATE,
        }
    }

    /// Record one ingestion event.
    ///
    /// Returns the new estimate when this event completed a window.
    pub fn record(&mut self, now: Instant) -> Option<f64> {
        self.samples += 1;
        if self.samples < FRAMERATE_WINDOW {
            return None;
        }

        let elapsed = now.saturating_duration_since(self.last_signal).as_secs_f64();
        self.last_signal = now;
        self.samples = 0;
        if elapsed <= 0.0 {
            return None;
        }
        self.estimate = f64::from(FRAMERATE_WINDOW) / elapsed;
        Some(self.estimate)
    }

    /// Most recent estimate in Hz.
    pub fn estimate(&self) -> f64 {
        self.estimate
    }
}
