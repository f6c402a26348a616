//! Point report wire formats.
//!
//! Two JSON encodings are accepted on point topics:
//!
//! ```text
//! {"stamp": 1712345678.25, "points": [[x, y, magnitude], ...]}
//! [x0, y0, m0, x1, y1, m1, ...]
//! ```
//!
//! The second is the legacy flat form. It carries no timestamp, so arrival
//! time minus the configured legacy delay is used instead.

use anyhow::{anyhow, bail, Result};
use serde::Deserialize;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// One candidate pixel as reported by an upstream point detector.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(from = "[i32; 3]")]
pub struct ReportedPoint {
    pub x: i32,
    pub y: i32,
    /// Detector quality value. Larger means a worse match.
    pub magnitude: i32,
}

impl From<[i32; 3]> for ReportedPoint {
    fn from([x, y, magnitude]: [i32; 3]) -> Self {
        Self { x, y, magnitude }
    }
}

/// One camera frame's worth of candidate points.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct PointReport {
    /// Capture time in seconds since the Unix epoch.
    pub stamp: f64,
    #[serde(default)]
    pub points: Vec<ReportedPoint>,
}

/// Current wall time in seconds since the Unix epoch.
pub fn unix_now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Parse a point topic payload.
///
/// `legacy_delay` enables the flat encoding; when it is `None` only stamped
/// reports are accepted.
pub fn parse_point_payload(payload: &[u8], legacy_delay: Option<Duration>) -> Result<PointReport> {
    let raw: serde_json::Value =
        serde_json::from_slice(payload).map_err(|e| anyhow!("parse error: {}", e))?;
    if !raw.is_array() {
        let report: PointReport =
            serde_json::from_value(raw).map_err(|e| anyhow!("parse error: {}", e))?;
        if !report.stamp.is_finite() {
            bail!("point report stamp is not finite");
        }
        return Ok(report);
    }

    let Some(delay) = legacy_delay else {
        bail!("flat point payload received but legacy mode is disabled");
    };
    let values: Vec<i32> =
        serde_json::from_value(raw).map_err(|e| anyhow!("parse error: {}", e))?;
    if values.len() % 3 != 0 {
        bail!(
            "flat point payload length {} is not a multiple of 3",
            values.len()
        );
    }
    let points = values
        .chunks_exact(3)
        .map(|c| ReportedPoint::from([c[0], c[1], c[2]]))
        .collect();
    Ok(PointReport {
        stamp: unix_now_secs() - delay.as_secs_f64(),
        points,
    })
}
