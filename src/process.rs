//! Per-channel processing loops.
//!
//! Each channel gets one worker thread that waits for the tracker to finish a
//! batch, copies the results out under the channel's result lock, classifies
//! them and publishes a blinkers report plus a framerate report, then sleeps
//! for the rest of its period.

use anyhow::{anyhow, bail, Context, Result};
use log::Level;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::channel::{Channel, RetrievedBlinker};
use crate::classify::FrequencyClassifier;
use crate::publish::{BlinkersReport, ReportSink};

/// Fixed-rate sleeper. Deadlines advance by whole periods so jitter in one
/// cycle does not shift later ones; a loop that falls behind resynchronises.
#[derive(Debug)]
pub struct Rate {
    period: Duration,
    next: Instant,
}

impl Rate {
    pub fn new(hz: f64) -> Result<Self> {
        Ok(Self::with_period(period_for_rate(hz)?))
    }

    pub fn with_period(period: Duration) -> Self {
        Self {
            period,
            next: Instant::now(),
        }
    }

    /// Sleep until the next deadline.
    pub fn sleep(&mut self) {
        let now = Instant::now();
        match self.next.checked_add(self.period) {
            Some(next) if next > now => {
                self.next = next;
                std::thread::sleep(next - now);
            }
            Some(_) => self.next = now,
            None => std::thread::sleep(self.period),
        }
    }
}

/// Loop period for a rate in Hz. Fails for rates that are not positive or
/// whose period does not fit in a `Duration`.
pub fn period_for_rate(hz: f64) -> Result<Duration> {
    if !(hz.is_finite() && hz > 0.0) {
        bail!("rate must be a positive number of Hz, got {}", hz);
    }
    Duration::try_from_secs_f64(1.0 / hz)
        .map_err(|e| anyhow!("rate of {} Hz has no representable period: {}", hz, e))
}

/// Settings shared by every processing loop.
#[derive(Clone, Debug)]
pub struct ProcessSettings {
    pub rate_hz: f64,
    /// Publish integer frequencies instead of class indices.
    pub return_frequencies: bool,
    /// Warn when no batch completes for this long.
    pub stall_timeout: Duration,
    /// Log per-batch timing at info instead of debug.
    pub debug: bool,
}

/// Detects episodes where the tracker stops producing batches.
#[derive(Debug)]
pub struct StallMonitor {
    channel: usize,
    timeout: Duration,
    last_batch: Instant,
    stalled: bool,
}

impl StallMonitor {
    pub fn new(channel: usize, timeout: Duration, now: Instant) -> Self {
        Self {
            channel,
            timeout,
            last_batch: now,
            stalled: false,
        }
    }

    /// Record a completed batch. Returns true if this ended a stall.
    pub fn batch_arrived(&mut self, now: Instant) -> bool {
        self.last_batch = now;
        if self.stalled {
            self.stalled = false;
            log::info!("channel {}: tracker batches resumed", self.channel);
            return true;
        }
        false
    }

    /// Returns true exactly once per stall episode, when it begins.
    pub fn check(&mut self, now: Instant) -> bool {
        if self.stalled || now.saturating_duration_since(self.last_batch) < self.timeout {
            return false;
        }
        self.stalled = true;
        log::warn!(
            "channel {}: no tracker batch for {:.1}s",
            self.channel,
            self.timeout.as_secs_f64()
        );
        true
    }

    pub fn is_stalled(&self) -> bool {
        self.stalled
    }
}

/// Output value of one blinker: its class index, or its frequency truncated.
pub fn report_value(
    classifier: &FrequencyClassifier,
    frequency: f64,
    return_frequencies: bool,
) -> i32 {
    if return_frequencies {
        frequency as i32
    } else {
        classifier.classify(frequency)
    }
}

/// Processing loop of a single channel.
pub struct ChannelWorker {
    channel: Arc<Channel>,
    classifier: Arc<FrequencyClassifier>,
    sink: Arc<dyn ReportSink>,
    settings: ProcessSettings,
    stop: Arc<AtomicBool>,
}

impl ChannelWorker {
    pub fn new(
        channel: Arc<Channel>,
        classifier: Arc<FrequencyClassifier>,
        sink: Arc<dyn ReportSink>,
        settings: ProcessSettings,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            channel,
            classifier,
            sink,
            settings,
            stop,
        }
    }

    /// Start the loop on its own thread. It begins once `startup` releases.
    pub fn spawn(self, startup: Arc<Barrier>) -> Result<JoinHandle<Result<()>>> {
        let name = format!("blink-channel-{}", self.channel.index());
        std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                startup.wait();
                self.run()
            })
            .with_context(|| format!("failed to spawn {}", name))
    }

    /// Run until the stop flag is raised.
    pub fn run(&self) -> Result<()> {
        let index = self.channel.index();
        log::info!(
            "channel {}: processing at {} Hz with {} tracker",
            index,
            self.settings.rate_hz,
            self.channel.tracker().name()
        );
        let mut rate = Rate::new(self.settings.rate_hz)?;
        let mut stall = StallMonitor::new(index, self.settings.stall_timeout, Instant::now());

        while self.wait_for_batch(&mut stall) {
            let report = self.retrieve()?;
            self.publish(&report)?;
            rate.sleep();
        }
        log::info!("channel {}: processing stopped", index);
        Ok(())
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Spin until the tracker holds a finished batch. False once stopped.
    fn wait_for_batch(&self, stall: &mut StallMonitor) -> bool {
        let tracker = self.channel.tracker();
        loop {
            if self.stopped() {
                return false;
            }
            let now = Instant::now();
            if !tracker.is_current_batch_processed() {
                stall.batch_arrived(now);
                return true;
            }
            stall.check(now);
            std::thread::yield_now();
        }
    }

    /// Copy the finished batch into the result buffer and build its report.
    ///
    /// The result lock is held until the report is built, so the published
    /// triples always come from a single batch.
    pub fn retrieve(&self) -> Result<BlinkersReport> {
        let started = Instant::now();
        let mut results = self.channel.results()?;
        let tracker = self.channel.tracker();

        let found = tracker.get_results();
        let blinkers: Vec<RetrievedBlinker> = found
            .iter()
            .enumerate()
            .map(|(i, b)| RetrievedBlinker {
                x: b.x,
                y: b.y,
                frequency: b.frequency,
                yaw: tracker.yaw(i),
                pitch: tracker.pitch(i),
            })
            .collect();
        let stamp = self.channel.ingest_state()?.latest_stamp;

        results.stamp = stamp;
        results.tracker_count = tracker.tracker_count();
        results.blinkers = blinkers;
        results.sequence += 1;

        let triples = results
            .blinkers
            .iter()
            .map(|b| {
                [
                    b.x,
                    b.y,
                    report_value(&self.classifier, b.frequency, self.settings.return_frequencies),
                ]
            })
            .collect();
        let report = BlinkersReport::new(stamp, triples);

        let level = if self.settings.debug {
            Level::Info
        } else {
            Level::Debug
        };
        log::log!(
            level,
            "channel {}: batch {} with {} blinkers ({} tracks) retrieved in {:?}",
            self.channel.index(),
            results.sequence,
            report.count,
            results.tracker_count,
            started.elapsed()
        );
        Ok(report)
    }

    fn publish(&self, report: &BlinkersReport) -> Result<()> {
        let index = self.channel.index();
        if let Err(err) = self.sink.publish_blinkers(index, report) {
            log::warn!("channel {}: failed to publish blinkers: {:#}", index, err);
        }
        let framerate = self.channel.framerate()? as f32;
        if let Err(err) = self.sink.publish_framerate(index, framerate) {
            log::warn!("channel {}: failed to publish framerate: {:#}", index, err);
        }
        Ok(())
    }
}
