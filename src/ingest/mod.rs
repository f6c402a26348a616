//! Point report ingestion.
//!
//! Upstream point detectors publish one report per camera frame listing
//! candidate pixels and a quality magnitude per pixel. Ingestion:
//! - Drops points whose magnitude exceeds `MAX_POINT_MAGNITUDE`
//! - Mirrors points against the frame dimensions for inverted channels
//! - Updates visibility, timestamps and the framerate estimate
//! - Forwards the filtered frame to the channel's tracker
//!
//! Ingestion is the only writer of tracker input and never takes the channel
//! result lock.

pub mod payload;

use anyhow::Result;
use std::time::Instant;

use crate::channel::Channel;
use crate::tracker::PixelPoint;

pub use payload::{parse_point_payload, unix_now_secs, PointReport, ReportedPoint};

/// Points with a larger magnitude are discarded before tracking.
pub const MAX_POINT_MAGNITUDE: i32 = 200;

/// What a single ingestion call did.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IngestOutcome {
    /// Points forwarded to the tracker.
    pub forwarded: usize,
    pub visible: bool,
    /// New framerate estimate pushed into the tracker, if this call completed a window.
    pub framerate_update: Option<f64>,
}

/// Filter a report and optionally mirror it against `(width, height)`.
pub fn filter_points(report: &PointReport, invert_within: Option<(u32, u32)>) -> Vec<PixelPoint> {
    report
        .points
        .iter()
        .filter(|p| p.magnitude <= MAX_POINT_MAGNITUDE)
        .map(|p| match invert_within {
            Some((width, height)) => PixelPoint::new(width as i32 - p.x, height as i32 - p.y),
            None => PixelPoint::new(p.x, p.y),
        })
        .collect()
}

/// Ingest one point report into a channel.
pub fn ingest_points(channel: &Channel, report: &PointReport) -> Result<IngestOutcome> {
    ingest_points_at(channel, report, Instant::now())
}

/// Ingest one point report, using `now` as the arrival time.
pub fn ingest_points_at(
    channel: &Channel,
    report: &PointReport,
    now: Instant,
) -> Result<IngestOutcome> {
    let (points, framerate_update) = {
        let mut state = channel.ingest_state()?;
        let framerate_update = state.framerate.record(now);
        let invert_within = channel.inverted().then_some(state.frame_size);
        let points = filter_points(report, invert_within);

        state.visible = !points.is_empty();
        if state.visible {
            state.last_seen = Some(now);
        }
        state.latest_stamp = report.stamp;
        (points, framerate_update)
    };

    log::debug!(
        "channel {}: {} of {} points forwarded",
        channel.index(),
        points.len(),
        report.points.len()
    );

    let tracker = channel.tracker();
    if let Some(framerate) = framerate_update {
        log::debug!(
            "channel {}: framerate estimate {:.2} Hz",
            channel.index(),
            framerate
        );
        tracker.update_framerate(framerate);
    }
    tracker.insert_frame(&points);

    Ok(IngestOutcome {
        forwarded: points.len(),
        visible: !points.is_empty(),
        framerate_update,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::{BlinkTracker, TrackedBlinker};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingTracker {
        frames: Mutex<Vec<Vec<PixelPoint>>>,
        framerates: Mutex<Vec<f64>>,
    }

    impl BlinkTracker for RecordingTracker {
        fn name(&self) -> &'static str {
            "recording"
        }
        fn insert_frame(&self, points: &[PixelPoint]) {
            self.frames.lock().unwrap().push(points.to_vec());
        }
        fn is_current_batch_processed(&self) -> bool {
            true
        }
        fn get_results(&self) -> Vec<TrackedBlinker> {
            Vec::new()
        }
        fn update_framerate(&self, framerate: f64) {
            self.framerates.lock().unwrap().push(framerate);
        }
        fn yaw(&self, _index: usize) -> f64 {
            0.0
        }
        fn pitch(&self, _index: usize) -> f64 {
            0.0
        }
        fn tracker_count(&self) -> usize {
            0
        }
    }

    fn report(points: &[[i32; 3]]) -> PointReport {
        PointReport {
            stamp: 12.5,
            points: points.iter().map(|p| ReportedPoint::from(*p)).collect(),
        }
    }

    fn setup(inverted: bool) -> (Arc<RecordingTracker>, Channel) {
        let tracker = Arc::new(RecordingTracker::default());
        let channel = Channel::new(0, tracker.clone(), inverted, (752, 480));
        (tracker, channel)
    }

    #[test]
    fn magnitude_cutoff_is_inclusive() {
        let (tracker, channel) = setup(false);
        let outcome = ingest_points(&channel, &report(&[[10, 20, 200], [30, 40, 201]])).unwrap();
        assert_eq!(outcome.forwarded, 1);
        let frames = tracker.frames.lock().unwrap();
        assert_eq!(frames[0], vec![PixelPoint::new(10, 20)]);
    }

    #[test]
    fn inverted_channel_mirrors_against_frame_size() {
        let (tracker, channel) = setup(true);
        channel.set_frame_size(640, 480).unwrap();
        ingest_points(&channel, &report(&[[10, 20, 5]])).unwrap();
        assert_eq!(
            tracker.frames.lock().unwrap()[0],
            vec![PixelPoint::new(630, 460)]
        );
    }

    #[test]
    fn empty_report_clears_visibility_and_still_feeds_tracker() {
        let (tracker, channel) = setup(false);
        ingest_points(&channel, &report(&[[1, 1, 1]])).unwrap();
        assert!(channel.is_visible().unwrap());

        let outcome = ingest_points(&channel, &report(&[])).unwrap();
        assert!(!outcome.visible);
        assert!(!channel.is_visible().unwrap());
        assert_eq!(tracker.frames.lock().unwrap().len(), 2);
    }

    #[test]
    fn visible_report_updates_last_seen_and_stamp() {
        let (_tracker, channel) = setup(false);
        let now = Instant::now();
        ingest_points_at(&channel, &report(&[[1, 2, 3]]), now).unwrap();
        let snapshot = channel.snapshot().unwrap();
        assert!(snapshot.visible);
        assert_eq!(snapshot.last_seen, Some(now));
        assert_eq!(snapshot.latest_stamp, 12.5);
    }

    #[test]
    fn only_filtered_out_points_count_as_invisible() {
        let (_tracker, channel) = setup(false);
        let outcome = ingest_points(&channel, &report(&[[1, 2, 250]])).unwrap();
        assert!(!outcome.visible);
        assert!(channel.snapshot().unwrap().last_seen.is_none());
    }

    #[test]
    fn every_tenth_report_pushes_framerate_to_tracker() {
        let (tracker, channel) = setup(false);
        let base = Instant::now();
        // Re-anchor the estimator so the window starts at `base`.
        channel.ingest_state().unwrap().framerate = crate::framerate::FramerateEstimator::new(base);
        for k in 1..=10u64 {
            ingest_points_at(
                &channel,
                &report(&[[1, 1, 1]]),
                base + Duration::from_millis(100 * k),
            )
            .unwrap();
        }
        let framerates = tracker.framerates.lock().unwrap();
        assert_eq!(framerates.len(), 1);
        assert!((framerates[0] - 10.0).abs() < 1e-6);
        assert!((channel.framerate().unwrap() - 10.0).abs() < 1e-6);
    }
}
