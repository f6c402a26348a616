use std::f64::consts::{FRAC_PI_2, PI};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::framerate::INITIAL_FRAMERATE;
use crate::tracker::backend::BlinkTracker;
use crate::tracker::result::{PixelPoint, TrackedBlinker, TrackerParams};

/// Baseline tracker that counts on/off transitions per track.
///
/// Frames are accumulated into batches of `accumulator_length`. Within a batch,
/// points are associated to tracks by proximity; each track's lit/dark sequence
/// yields a frequency from the spacing of its rising edges and the channel
/// framerate. Drift across the batch gives a coarse viewing direction: yaw is
/// the drift heading, pitch shrinks from π/2 (stationary) toward 0 as the
/// apparent speed approaches `max_pixel_shift` per frame.
pub struct TransitionTracker {
    params: TrackerParams,
    state: Mutex<TrackerState>,
}

struct TrackerState {
    window: Vec<Vec<PixelPoint>>,
    pending: Option<Vec<Vec<PixelPoint>>>,
    framerate: f64,
    results: Vec<TrackedBlinker>,
    angles: Vec<(f64, f64)>,
    track_count: usize,
}

struct Track {
    first: PixelPoint,
    position: PixelPoint,
    first_lit: usize,
    last_lit: usize,
    lit: Vec<bool>,
}

impl TransitionTracker {
    pub fn new(params: TrackerParams) -> Self {
        let capacity = params.accumulator_length;
        Self {
            params,
            state: Mutex::new(TrackerState {
                window: Vec::with_capacity(capacity),
                pending: None,
                framerate: INITIAL_FRAMERATE,
                results: Vec::new(),
                angles: Vec::new(),
                track_count: 0,
            }),
        }
    }

    // State stays structurally valid across a panic; poisoning is ignored.
    fn state(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl BlinkTracker for TransitionTracker {
    fn name(&self) -> &'static str {
        "transition"
    }

    fn insert_frame(&self, points: &[PixelPoint]) {
        let mut state = self.state();
        state.window.push(points.to_vec());
        if state.window.len() >= self.params.accumulator_length.max(1) {
            let batch = std::mem::take(&mut state.window);
            if state.pending.replace(batch).is_some() {
                log::debug!("transition tracker: unprocessed batch replaced by a newer one");
            }
        }
    }

    fn is_current_batch_processed(&self) -> bool {
        self.state().pending.is_none()
    }

    fn get_results(&self) -> Vec<TrackedBlinker> {
        let mut state = self.state();
        if let Some(batch) = state.pending.take() {
            let tracks = associate(&self.params, &batch);
            let framerate = state.framerate;
            let mut results = Vec::new();
            let mut angles = Vec::new();
            for track in tracks
                .iter()
                .filter(|track| track.lit.iter().filter(|lit| **lit).count() >= 2)
            {
                results.push(TrackedBlinker {
                    x: track.position.x,
                    y: track.position.y,
                    frequency: estimate_frequency(&track.lit, framerate),
                });
                angles.push(estimate_angles(&self.params, track));
            }
            state.track_count = tracks.len();
            state.results = results;
            state.angles = angles;
        }
        state.results.clone()
    }

    fn update_framerate(&self, framerate: f64) {
        if framerate.is_finite() && framerate > 0.0 {
            self.state().framerate = framerate;
        }
    }

    fn yaw(&self, index: usize) -> f64 {
        self.state()
            .angles
            .get(index)
            .map(|(yaw, _)| *yaw)
            .unwrap_or(0.0)
    }

    fn pitch(&self, index: usize) -> f64 {
        self.state()
            .angles
            .get(index)
            .map(|(_, pitch)| *pitch)
            .unwrap_or(0.0)
    }

    fn tracker_count(&self) -> usize {
        self.state().track_count
    }
}

fn associate(params: &TrackerParams, frames: &[Vec<PixelPoint>]) -> Vec<Track> {
    let radius = i64::from((params.max_pixel_shift + params.reasonable_radius).max(1));
    let radius_sq = radius * radius;
    let nullify_sq = i64::from(params.nullify_radius.max(0)).pow(2);

    let mut tracks: Vec<Track> = Vec::new();
    for (t, frame) in frames.iter().enumerate() {
        let mut accepted: Vec<PixelPoint> = Vec::with_capacity(frame.len());
        for point in frame {
            if accepted.iter().any(|a| a.distance_sq(point) < nullify_sq) {
                continue;
            }
            accepted.push(*point);

            let nearest = tracks
                .iter_mut()
                .filter(|track| track.last_lit != t)
                .map(|track| (track.position.distance_sq(point), track))
                .filter(|(distance, _)| *distance <= radius_sq)
                .min_by_key(|(distance, _)| *distance);
            match nearest {
                Some((_, track)) => {
                    track.lit[t] = true;
                    track.position = *point;
                    track.last_lit = t;
                }
                None => {
                    let mut lit = vec![false; frames.len()];
                    lit[t] = true;
                    tracks.push(Track {
                        first: *point,
                        position: *point,
                        first_lit: t,
                        last_lit: t,
                        lit,
                    });
                }
            }
        }
    }
    tracks
}

/// Frequency from the mean spacing of rising edges; zero with fewer than two.
fn estimate_frequency(lit: &[bool], framerate: f64) -> f64 {
    let rises: Vec<usize> = (1..lit.len())
        .filter(|&t| lit[t] && !lit[t - 1])
        .collect();
    if rises.len() < 2 {
        return 0.0;
    }
    let span = (rises[rises.len() - 1] - rises[0]) as f64;
    let period_frames = span / (rises.len() - 1) as f64;
    framerate / period_frames
}

fn estimate_angles(params: &TrackerParams, track: &Track) -> (f64, f64) {
    let frames = track.last_lit.saturating_sub(track.first_lit);
    let dx = f64::from(track.position.x - track.first.x);
    let dy = f64::from(track.position.y - track.first.y);
    let drift = dx.hypot(dy);
    if frames == 0 || drift == 0.0 {
        return (0.0, FRAC_PI_2);
    }

    let yaw_step = 2.0 * PI / f64::from(params.yaw_steps.max(1));
    let yaw = (dy.atan2(dx) / yaw_step).round() * yaw_step;

    let speed = drift / frames as f64;
    let max_shift = f64::from(params.max_pixel_shift.max(1));
    let pitch_step = FRAC_PI_2 / f64::from(params.pitch_steps.max(1));
    let pitch = ((speed / max_shift).min(1.0).acos() / pitch_step).round() * pitch_step;
    (yaw, pitch)
}
