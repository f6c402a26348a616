//! Hysteresis-banded frequency classification.
//!
//! Each configured target frequency owns one acceptance window on the period
//! axis. A window is widened toward its lower-frequency neighbour and narrowed
//! toward its higher-frequency neighbour by `BOUNDARY_RATIO`, so a blinker that
//! drifts around a boundary does not flap between adjacent classes.
//!
//! ```text
//! period:  1/MAX ......... p[3] ... p[2] ...... p[1] .......... p[0] ...... 1/MIN
//! class:   |---- 3 ----|------ 2 ------|------- 1 -------|-------- 0 --------|
//! ```

use anyhow::{anyhow, Result};

/// Lowest admissible blink frequency (Hz). Bounds the top of class 0.
pub const MIN_FREQUENCY: f64 = 3.0;

/// Highest admissible blink frequency (Hz). Bounds the bottom of the last class.
pub const MAX_FREQUENCY: f64 = 36.0;

/// Blend between neighbouring periods used to place a class boundary.
pub const BOUNDARY_RATIO: f64 = 0.7;

/// Class index reported when a frequency falls in no acceptance window.
pub const UNKNOWN_CLASS: i32 = -1;

/// Open interval of accepted periods (seconds) for one frequency class.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PeriodBand {
    pub bottom: f64,
    pub top: f64,
}

impl PeriodBand {
    /// Strict containment; a period exactly on a boundary belongs to no band.
    pub fn contains(&self, period: f64) -> bool {
        period > self.bottom && period < self.top
    }
}

/// Maps raw frequency estimates to configured frequency classes.
///
/// Built once at startup and shared read-only between channel workers and the
/// visualization compositor.
#[derive(Clone, Debug)]
pub struct FrequencyClassifier {
    frequencies: Vec<f64>,
    bands: Vec<PeriodBand>,
}

impl FrequencyClassifier {
    /// Build the class table from target frequencies in ascending order.
    ///
    /// Rejects empty sets, non-positive or non-finite values, and any set that
    /// is not strictly ascending.
    pub fn new(frequencies: &[f64]) -> Result<Self> {
        if frequencies.is_empty() {
            return Err(anyhow!("frequency set must not be empty"));
        }
        for (i, f) in frequencies.iter().enumerate() {
            if !f.is_finite() || *f <= 0.0 {
                return Err(anyhow!("frequency #{} must be positive, got {}", i + 1, f));
            }
        }
        if let Some(pair) = frequencies.windows(2).find(|pair| pair[0] >= pair[1]) {
            return Err(anyhow!(
                "frequencies must be strictly ascending ({} Hz is followed by {} Hz)",
                pair[0],
                pair[1]
            ));
        }
        for f in frequencies {
            if *f <= MIN_FREQUENCY || *f >= MAX_FREQUENCY {
                log::warn!(
                    "frequency {} Hz lies outside the admissible range ({} - {} Hz)",
                    f,
                    MIN_FREQUENCY,
                    MAX_FREQUENCY
                );
            }
        }

        let periods: Vec<f64> = frequencies.iter().map(|f| 1.0 / f).collect();
        let last = periods.len() - 1;
        let bands = (0..periods.len())
            .map(|i| {
                let bottom = if i < last {
                    periods[i] * (1.0 - BOUNDARY_RATIO) + periods[i + 1] * BOUNDARY_RATIO
                } else {
                    1.0 / MAX_FREQUENCY
                };
                let top = if i == 0 {
                    1.0 / MIN_FREQUENCY
                } else {
                    periods[i] * BOUNDARY_RATIO + periods[i - 1] * (1.0 - BOUNDARY_RATIO)
                };
                PeriodBand { bottom, top }
            })
            .collect();

        Ok(Self {
            frequencies: frequencies.to_vec(),
            bands,
        })
    }

    /// Class index for a raw frequency estimate, or `UNKNOWN_CLASS`.
    ///
    /// Estimates of zero or below come from trackers that have not converged
    /// and are never matched.
    pub fn classify(&self, frequency: f64) -> i32 {
        if !frequency.is_finite() || frequency <= 0.0 {
            return UNKNOWN_CLASS;
        }
        self.classify_period(1.0 / frequency)
    }

    /// Class index for a period in seconds, or `UNKNOWN_CLASS`.
    pub fn classify_period(&self, period: f64) -> i32 {
        self.bands
            .iter()
            .position(|band| band.contains(period))
            .map(|i| i as i32)
            .unwrap_or(UNKNOWN_CLASS)
    }

    pub fn frequencies(&self) -> &[f64] {
        &self.frequencies
    }

    pub fn bands(&self) -> &[PeriodBand] {
        &self.bands
    }

    /// Number of configured classes.
    pub fn len(&self) -> usize {
        self.frequencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frequencies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_classifier() -> FrequencyClassifier {
        FrequencyClassifier::new(&[6.0, 10.0, 15.0, 30.0]).unwrap()
    }

    #[test]
    fn outer_bounds_follow_min_and_max_frequency() {
        let classifier = default_classifier();
        let bands = classifier.bands();
        assert!((bands[0].top - 1.0 / MIN_FREQUENCY).abs() < 1e-12);
        assert!((bands[3].bottom - 1.0 / MAX_FREQUENCY).abs() < 1e-12);
    }

    #[test]
    fn inner_bounds_blend_neighbouring_periods() {
        let classifier = default_classifier();
        let bands = classifier.bands();
        // 6 Hz / 10 Hz boundary: 0.3 * 1/6 + 0.7 * 1/10
        assert!((bands[0].bottom - 0.12).abs() < 1e-9);
        assert!((bands[1].top - 0.12).abs() < 1e-9);
        assert!((bands[2].bottom - (0.3 / 15.0 + 0.7 / 30.0)).abs() < 1e-9);
    }

    #[test]
    fn adjacent_bands_never_overlap() {
        let classifier = default_classifier();
        for pair in classifier.bands().windows(2) {
            assert!(pair[0].bottom >= pair[1].top, "{:?}", pair);
            assert!(pair[0].bottom < pair[0].top);
        }
    }

    #[test]
    fn sweep_matches_at_most_one_band() {
        let classifier = default_classifier();
        let mut f = MIN_FREQUENCY;
        while f <= MAX_FREQUENCY {
            let period = 1.0 / f;
            let matching = classifier
                .bands()
                .iter()
                .filter(|band| band.contains(period))
                .count();
            assert!(matching <= 1, "{} Hz matched {} bands", f, matching);
            let class = classifier.classify(f);
            assert!((UNKNOWN_CLASS..4).contains(&class));
            if matching == 1 {
                assert_ne!(class, UNKNOWN_CLASS);
            }
            f += 0.01;
        }
    }

    #[test]
    fn target_frequencies_classify_to_their_own_index() {
        let classifier = default_classifier();
        for (i, f) in classifier.frequencies().iter().enumerate() {
            assert_eq!(classifier.classify(*f), i as i32);
        }
    }

    #[test]
    fn classification_is_idempotent() {
        let classifier = default_classifier();
        for f in [4.2, 7.9, 12.5, 22.0, 33.3, 50.0] {
            assert_eq!(classifier.classify(f), classifier.classify(f));
        }
    }

    #[test]
    fn class_index_never_decreases_while_frequency_rises() {
        let classifier = default_classifier();
        let mut highest = UNKNOWN_CLASS;
        let mut f = 1.0;
        while f < 60.0 {
            let class = classifier.classify(f);
            if class != UNKNOWN_CLASS {
                assert!(class >= highest, "{} Hz went back to class {}", f, class);
                highest = class;
            }
            f += 0.05;
        }
        assert_eq!(highest, 3);
    }

    #[test]
    fn unconverged_estimates_are_unknown() {
        let classifier = default_classifier();
        assert_eq!(classifier.classify(0.0), UNKNOWN_CLASS);
        assert_eq!(classifier.classify(-4.0), UNKNOWN_CLASS);
        assert_eq!(classifier.classify(f64::NAN), UNKNOWN_CLASS);
        assert_eq!(classifier.classify(f64::INFINITY), UNKNOWN_CLASS);
    }

    #[test]
    fn two_class_table_matches_expected_classes() {
        let classifier = FrequencyClassifier::new(&[10.0, 20.0]).unwrap();
        assert_eq!(classifier.classify(9.5), 0);
        assert_eq!(classifier.classify(25.0), 1);
        assert_eq!(classifier.classify(2.0), UNKNOWN_CLASS);
        assert_eq!(classifier.classify(40.0), UNKNOWN_CLASS);
    }

    #[test]
    fn single_frequency_spans_whole_admissible_range() {
        let classifier = FrequencyClassifier::new(&[12.0]).unwrap();
        assert_eq!(classifier.classify(3.5), 0);
        assert_eq!(classifier.classify(35.0), 0);
        assert_eq!(classifier.classify(2.5), UNKNOWN_CLASS);
    }

    #[test]
    fn rejects_unsorted_or_invalid_sets() {
        assert!(FrequencyClassifier::new(&[]).is_err());
        assert!(FrequencyClassifier::new(&[10.0, 6.0]).is_err());
        assert!(FrequencyClassifier::new(&[10.0, 10.0]).is_err());
        assert!(FrequencyClassifier::new(&[0.0, 10.0]).is_err());
        let err = FrequencyClassifier::new(&[6.0, 15.0, 10.0]).unwrap_err();
        assert!(err.to_string().contains("ascending"));
    }
}
