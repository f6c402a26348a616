//! Blink Processor
//!
//! Multi-camera ingestion, classification and publication of blinking UV
//! marker detections.
//!
//! # Architecture
//!
//! Each camera is a *channel*. Upstream point detectors publish one report per
//! frame; ingestion filters the points and feeds them to the channel's blink
//! tracker. Once the tracker finishes a batch, the channel's processing loop
//! copies the results out under the channel lock, maps every raw frequency to
//! one of the configured frequency classes and publishes a blinkers report
//! together with the channel's framerate estimate. An optional compositor
//! draws all channels side by side with the classified blinkers overlaid.
//!
//! # Module Structure
//!
//! - `tracker`: `BlinkTracker` seam and the baseline `TransitionTracker`
//! - `channel`: per-camera state and result buffer
//! - `ingest`: point report parsing, filtering and tracker feeding
//! - `classify`: hysteresis-banded frequency classes
//! - `process`: per-channel processing loops
//! - `visualize`: montage compositor (feature `visualization`)
//! - `publish`: report and image sinks
//! - `transport`: MQTT endpoint, routing and event loop
//! - `processor`: process-level wiring and lifecycle

pub mod channel;
pub mod classify;
pub mod config;
pub mod frame;
pub mod framerate;
pub mod ingest;
pub mod process;
pub mod processor;
pub mod publish;
pub mod tracker;
pub mod transport;
#[cfg(feature = "visualization")]
pub mod visualize;

pub use channel::{Channel, ChannelSet, ResultBuffer, RetrievedBlinker};
pub use classify::{FrequencyClassifier, UNKNOWN_CLASS};
pub use config::BlinkProcessorConfig;
pub use framerate::FramerateEstimator;
pub use ingest::{IngestOutcome, PointReport, ReportedPoint};
pub use processor::{BlinkProcessor, RunningProcessor};
pub use publish::{BlinkersReport, ImageSink, ReportSink};
pub use tracker::{BlinkTracker, PixelPoint, TrackedBlinker, TrackerParams, TransitionTracker};
