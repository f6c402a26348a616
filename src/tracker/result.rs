/// Integer pixel coordinate fed into a tracker.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct PixelPoint {
    pub x: i32,
    pub y: i32,
}

impl PixelPoint {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Squared Euclidean distance in pixels.
    pub fn distance_sq(&self, other: &PixelPoint) -> i64 {
        let dx = i64::from(self.x - other.x);
        let dy = i64::from(self.y - other.y);
        dx * dx + dy * dy
    }
}

/// One blinker reported by a finished tracker batch.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrackedBlinker {
    pub x: i32,
    pub y: i32,
    /// Estimated blink frequency in Hz. Zero or below means not converged.
    pub frequency: f64,
}

/// Parameters shared by tracker implementations.
///
/// These mirror the accumulator and tolerance settings of the Hough blink
/// tracking engine; simpler trackers use the subset they need.
#[derive(Clone, Debug, PartialEq)]
pub struct TrackerParams {
    /// Frames per batch.
    pub accumulator_length: usize,
    /// Angular resolution of the pitch estimate.
    pub pitch_steps: u32,
    /// Angular resolution of the yaw estimate.
    pub yaw_steps: u32,
    /// Largest per-frame displacement of a tracked point (pixels).
    pub max_pixel_shift: i32,
    /// Sensor size as (width, height).
    pub image_size: (u32, u32),
    /// Points closer than this to an already matched point are duplicates.
    pub nullify_radius: i32,
    /// Extra association slack around the expected position (pixels).
    pub reasonable_radius: i32,
}

impl Default for TrackerParams {
    fn default() -> Self {
        Self {
            accumulator_length: 23,
            pitch_steps: 16,
            yaw_steps: 8,
            max_pixel_shift: 1,
            image_size: (752, 480),
            nullify_radius: 5,
            reasonable_radius: 3,
        }
    }
}
