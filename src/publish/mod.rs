//! Output reports and the sinks that carry them.
//!
//! Processing loops publish through `ReportSink`, the compositor through
//! `ImageSink`. `mqtt::MqttSink` is the production implementation of both;
//! `FileImageSink` writes montages to disk for headless debugging.

pub mod mqtt;

use anyhow::{Context, Result};
use image::{ImageFormat, RgbImage};
use serde::Serialize;
use std::io::Cursor;
use std::path::PathBuf;

pub use mqtt::MqttSink;

/// Classified blinkers of one channel for one processing cycle.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct BlinkersReport {
    /// Timestamp of the latest ingested point report (seconds).
    pub stamp: f64,
    pub count: usize,
    /// `[x, y, value]`, where value is a class index or an integer frequency.
    pub blinkers: Vec<[i32; 3]>,
}

impl BlinkersReport {
    pub fn new(stamp: f64, blinkers: Vec<[i32; 3]>) -> Self {
        Self {
            stamp,
            count: blinkers.len(),
            blinkers,
        }
    }
}

/// Destination for per-channel processing output.
pub trait ReportSink: Send + Sync {
    fn publish_blinkers(&self, channel: usize, report: &BlinkersReport) -> Result<()>;

    fn publish_framerate(&self, channel: usize, framerate: f32) -> Result<()>;
}

/// Destination for visualization montages.
pub trait ImageSink: Send + Sync {
    fn publish_image(&self, image: &RgbImage) -> Result<()>;
}

/// Encode an RGB image as PNG bytes.
pub fn encode_png(image: &RgbImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .context("failed to encode PNG")?;
    Ok(bytes)
}

/// Writes every montage to the same file, replacing the previous one.
pub struct FileImageSink {
    path: PathBuf,
}

impl FileImageSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ImageSink for FileImageSink {
    fn publish_image(&self, image: &RgbImage) -> Result<()> {
        let bytes = encode_png(image)?;
        // Write then rename so readers never see a partial file.
        let tmp = self.path.with_extension("png.tmp");
        std::fs::write(&tmp, bytes)
            .with_context(|| format!("failed to write '{}'", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to replace '{}'", self.path.display()))?;
        Ok(())
    }
}
