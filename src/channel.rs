//! Per-camera channel state.
//!
//! A channel carries two independently locked records:
//!
//! - `IngestState`: written by the point ingestion path (framerate bookkeeping,
//!   visibility, latest timestamp, frame dimensions).
//! - `ResultBuffer`: the most recent retrieved batch. Every read or write of
//!   the buffer, and every tracker query made on its behalf, happens under this
//!   lock.
//!
//! Ingestion never touches the result lock. A holder of the result lock may
//! briefly take the ingest lock (never the reverse), so the two cannot deadlock.

use anyhow::{anyhow, Result};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use crate::framerate::FramerateEstimator;
use crate::tracker::BlinkTracker;

/// One blinker copied out of a finished tracker batch.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RetrievedBlinker {
    pub x: i32,
    pub y: i32,
    /// Raw frequency estimate in Hz.
    pub frequency: f64,
    /// Viewing direction captured together with the result (radians).
    pub yaw: f64,
    pub pitch: f64,
}

/// Most recent batch of a channel. Overwritten on every retrieval.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResultBuffer {
    /// Timestamp of the latest ingested point report at retrieval time.
    pub stamp: f64,
    pub blinkers: Vec<RetrievedBlinker>,
    pub tracker_count: usize,
    /// Number of retrievals so far.
    pub sequence: u64,
}

/// Ingestion-side bookkeeping for a channel.
#[derive(Clone, Debug)]
pub struct IngestState {
    pub framerate: FramerateEstimator,
    /// True iff the latest report kept at least one point.
    pub visible: bool,
    pub last_seen: Option<Instant>,
    /// Timestamp (seconds) carried by the latest point report.
    pub latest_stamp: f64,
    /// Last known (width, height) of the camera frame.
    pub frame_size: (u32, u32),
}

/// Copy of the ingestion-side fields, taken under the ingest lock.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IngestSnapshot {
    pub framerate: f64,
    pub visible: bool,
    pub last_seen: Option<Instant>,
    pub latest_stamp: f64,
    pub frame_size: (u32, u32),
}

/// One camera's point stream together with its tracker and results.
pub struct Channel {
    index: usize,
    inverted: bool,
    tracker: Arc<dyn BlinkTracker>,
    ingest: Mutex<IngestState>,
    results: Mutex<ResultBuffer>,
}

impl Channel {
    pub fn new(
        index: usize,
        tracker: Arc<dyn BlinkTracker>,
        inverted: bool,
        frame_size: (u32, u32),
    ) -> Self {
        Self {
            index,
            inverted,
            tracker,
            ingest: Mutex::new(IngestState {
                framerate: FramerateEstimator::new(Instant::now()),
                visible: false,
                last_seen: None,
                latest_stamp: 0.0,
                frame_size,
            }),
            results: Mutex::new(ResultBuffer::default()),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Whether incoming points are mirrored against the frame dimensions.
    pub fn inverted(&self) -> bool {
        self.inverted
    }

    pub fn tracker(&self) -> &dyn BlinkTracker {
        self.tracker.as_ref()
    }

    /// Lock the ingestion-side state.
    pub fn ingest_state(&self) -> Result<MutexGuard<'_, IngestState>> {
        self.ingest
            .lock()
            .map_err(|_| anyhow!("channel {} ingest lock poisoned", self.index))
    }

    /// Lock the result buffer.
    pub fn results(&self) -> Result<MutexGuard<'_, ResultBuffer>> {
        self.results
            .lock()
            .map_err(|_| anyhow!("channel {} result lock poisoned", self.index))
    }

    pub fn snapshot(&self) -> Result<IngestSnapshot> {
        let state = self.ingest_state()?;
        Ok(IngestSnapshot {
            framerate: state.framerate.estimate(),
            visible: state.visible,
            last_seen: state.last_seen,
            latest_stamp: state.latest_stamp,
            frame_size: state.frame_size,
        })
    }

    pub fn framerate(&self) -> Result<f64> {
        Ok(self.ingest_state()?.framerate.estimate())
    }

    pub fn is_visible(&self) -> Result<bool> {
        Ok(self.ingest_state()?.visible)
    }

    pub fn set_frame_size(&self, width: u32, height: u32) -> Result<()> {
        self.ingest_state()?.frame_size = (width, height);
        Ok(())
    }
}

/// All channels of the process, indexed by stream position.
#[derive(Clone, Default)]
pub struct ChannelSet {
    channels: Vec<Arc<Channel>>,
}

impl ChannelSet {
    pub fn new(channels: Vec<Arc<Channel>>) -> Self {
        Self { channels }
    }

    /// Channel by index.
    ///
    /// # Panics
    ///
    /// Channel indices come from the configured topic routing, so an index out
    /// of range is a wiring bug and aborts.
    pub fn get(&self, index: usize) -> &Arc<Channel> {
        assert!(
            index < self.channels.len(),
            "channel index {} out of range ({} channels)",
            index,
            self.channels.len()
        );
        &self.channels[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Channel>> {
        self.channels.iter()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
