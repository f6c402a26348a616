//! Latest raw camera frames, used only for visualization.
//!
//! All channels share one lock. Frame copies are cheap and the compositor runs
//! far below the processing rate, so serialising across channels is acceptable.

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use std::sync::{Mutex, MutexGuard};

/// Process-wide store of the most recent frame per channel.
pub struct FrameStore {
    frames: Mutex<Vec<Option<RgbImage>>>,
}

impl FrameStore {
    pub fn new(channel_count: usize) -> Self {
        Self {
            frames: Mutex::new(vec![None; channel_count]),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<Option<RgbImage>>>> {
        self.frames
            .lock()
            .map_err(|_| anyhow!("frame store lock poisoned"))
    }

    /// Replace the latest frame of a channel.
    pub fn store(&self, index: usize, frame: RgbImage) -> Result<()> {
        let mut frames = self.lock()?;
        let slot = frames
            .get_mut(index)
            .ok_or_else(|| anyhow!("no frame slot for channel {}", index))?;
        *slot = Some(frame);
        Ok(())
    }

    /// Run `f` on the latest frame of a channel while holding the store lock.
    pub fn with_frame<R>(&self, index: usize, f: impl FnOnce(Option<&RgbImage>) -> R) -> Result<R> {
        let frames = self.lock()?;
        Ok(f(frames.get(index).and_then(Option::as_ref)))
    }

    /// Dimensions of the latest frame of a channel, if one arrived.
    pub fn frame_size(&self, index: usize) -> Result<Option<(u32, u32)>> {
        self.with_frame(index, |frame| frame.map(|f| f.dimensions()))
    }
}

/// Decode a PNG or JPEG payload into an RGB frame.
pub fn decode_frame(payload: &[u8]) -> Result<RgbImage> {
    let image = image::load_from_memory(payload).context("failed to decode camera frame")?;
    Ok(image.to_rgb8())
}
