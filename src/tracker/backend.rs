use crate::tracker::result::{PixelPoint, TrackedBlinker};

/// Blink tracker trait.
///
/// # Batch Contract
///
/// A tracker accumulates frames until it holds a full batch. While a completed
/// batch has not yet been turned into results, `is_current_batch_processed`
/// returns false; `get_results` processes it and returns the latest results.
/// Per-result angles (`yaw`, `pitch`) refer to the indices of the most recent
/// `get_results` call.
///
/// All methods take `&self`: ingestion and the channel worker call into the same
/// tracker from different threads, so implementations synchronise internally.
pub trait BlinkTracker: Send + Sync {
    /// Tracker identifier.
    fn name(&self) -> &'static str;

    /// Append one frame's filtered points to the accumulation window.
    fn insert_frame(&self, points: &[PixelPoint]);

    /// False when a completed batch is waiting to be processed.
    fn is_current_batch_processed(&self) -> bool;

    /// Process the pending batch (if any) and return the current results.
    fn get_results(&self) -> Vec<TrackedBlinker>;

    /// Feed back the measured capture rate of the channel.
    fn update_framerate(&self, framerate: f64);

    /// Estimated yaw (radians) of result `index`.
    fn yaw(&self, index: usize) -> f64;

    /// Estimated pitch (radians) of result `index`.
    fn pitch(&self, index: usize) -> f64;

    /// Number of live tracks.
    fn tracker_count(&self) -> usize;
}
