use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::process::period_for_rate;
use crate::tracker::TrackerParams;

const DEFAULT_FREQUENCIES: [f64; 4] = [6.0, 10.0, 15.0, 30.0];
const DEFAULT_PROCESS_RATE: f64 = 10.0;
const DEFAULT_VISUALIZATION_RATE: f64 = 5.0;
const DEFAULT_LEGACY_DELAY_SECS: f64 = 0.2;
const DEFAULT_STALL_TIMEOUT_SECS: f64 = 2.0;
const DEFAULT_VISUALIZATION_TOPIC: &str = "blink_processor/visualization";

#[derive(Debug, Deserialize, Default)]
struct BlinkProcessorConfigFile {
    uav_name: Option<String>,
    debug: Option<bool>,
    topics: Option<TopicsConfigFile>,
    frequencies: Option<Vec<f64>>,
    process_rate: Option<f64>,
    return_frequencies: Option<bool>,
    inverted_points: Option<bool>,
    legacy: Option<bool>,
    legacy_delay_secs: Option<f64>,
    stall_timeout_secs: Option<f64>,
    tracker: Option<TrackerConfigFile>,
    visualization: Option<VisualizationConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct TopicsConfigFile {
    points_seen: Option<Vec<String>>,
    blinkers_seen: Option<Vec<String>>,
    estimated_framerate: Option<Vec<String>>,
    camera: Option<Vec<String>>,
    visualization: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct TrackerConfigFile {
    accumulator_length: Option<usize>,
    pitch_steps: Option<u32>,
    yaw_steps: Option<u32>,
    max_pixel_shift: Option<i32>,
    image_width: Option<u32>,
    image_height: Option<u32>,
    nullify_radius: Option<i32>,
    reasonable_radius: Option<i32>,
}

#[derive(Debug, Deserialize, Default)]
struct VisualizationConfigFile {
    enabled: Option<bool>,
    rate: Option<f64>,
    rainbow: Option<bool>,
    use_camera: Option<bool>,
    font_path: Option<PathBuf>,
    output_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct BlinkProcessorConfig {
    pub uav_name: String,
    /// Raises per-batch diagnostics from debug to info.
    pub debug: bool,
    pub topics: TopicSettings,
    /// Target blink frequencies in Hz, strictly ascending.
    pub frequencies: Vec<f64>,
    /// Processing loop rate in Hz.
    pub process_rate: f64,
    /// Publish integer frequencies instead of class indices.
    pub return_frequencies: bool,
    /// Mirror incoming points against the frame dimensions.
    pub inverted_points: bool,
    /// Set when flat, unstamped point payloads are expected.
    pub legacy_delay: Option<Duration>,
    pub stall_timeout: Duration,
    pub tracker: TrackerParams,
    pub visualization: VisualizationSettings,
}

/// Per-channel topic lists. Index `i` of every list belongs to channel `i`.
#[derive(Debug, Clone, Default)]
pub struct TopicSettings {
    pub points_seen: Vec<String>,
    pub blinkers_seen: Vec<String>,
    pub estimated_framerate: Vec<String>,
    /// Raw camera frames for the montage. Empty disables camera input.
    pub camera: Vec<String>,
    pub visualization: String,
}

#[derive(Debug, Clone)]
pub struct VisualizationSettings {
    pub enabled: bool,
    /// Montage rate in Hz.
    pub rate: f64,
    /// Colour classes on a continuous rainbow instead of the fixed palette.
    pub rainbow: bool,
    /// Draw over received camera frames; otherwise over blank frames.
    pub use_camera: bool,
    /// TrueType font for frequency labels. Labels are skipped without one.
    pub font_path: Option<PathBuf>,
    /// Also write every montage to this PNG file.
    pub output_path: Option<PathBuf>,
}

impl BlinkProcessorConfig {
    /// Load from the file named by `BLINK_CONFIG` (if set), then apply env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("BLINK_CONFIG").ok().map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Load from an explicit file path (if any), then apply env overrides.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Build from a JSON document without consulting the environment.
    pub fn from_json(raw: &str) -> Result<Self> {
        let file: BlinkProcessorConfigFile =
            serde_json::from_str(raw).map_err(|e| anyhow!("invalid config: {}", e))?;
        let cfg = Self::from_file(file)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn channel_count(&self) -> usize {
        self.topics.points_seen.len()
    }

    fn from_file(file: BlinkProcessorConfigFile) -> Result<Self> {
        let topics_file = file.topics.unwrap_or_default();
        let topics = TopicSettings {
            points_seen: topics_file.points_seen.unwrap_or_default(),
            blinkers_seen: topics_file.blinkers_seen.unwrap_or_default(),
            estimated_framerate: topics_file.estimated_framerate.unwrap_or_default(),
            camera: topics_file.camera.unwrap_or_default(),
            visualization: topics_file
                .visualization
                .unwrap_or_else(|| DEFAULT_VISUALIZATION_TOPIC.to_string()),
        };

        let defaults = TrackerParams::default();
        let tracker_file = file.tracker.unwrap_or_default();
        let tracker = TrackerParams {
            accumulator_length: tracker_file
                .accumulator_length
                .unwrap_or(defaults.accumulator_length),
            pitch_steps: tracker_file.pitch_steps.unwrap_or(defaults.pitch_steps),
            yaw_steps: tracker_file.yaw_steps.unwrap_or(defaults.yaw_steps),
            max_pixel_shift: tracker_file
                .max_pixel_shift
                .unwrap_or(defaults.max_pixel_shift),
            image_size: (
                tracker_file.image_width.unwrap_or(defaults.image_size.0),
                tracker_file.image_height.unwrap_or(defaults.image_size.1),
            ),
            nullify_radius: tracker_file
                .nullify_radius
                .unwrap_or(defaults.nullify_radius),
            reasonable_radius: tracker_file
                .reasonable_radius
                .unwrap_or(defaults.reasonable_radius),
        };

        let vis_file = file.visualization.unwrap_or_default();
        let visualization = VisualizationSettings {
            enabled: vis_file.enabled.unwrap_or(false),
            rate: vis_file.rate.unwrap_or(DEFAULT_VISUALIZATION_RATE),
            rainbow: vis_file.rainbow.unwrap_or(false),
            use_camera: vis_file.use_camera.unwrap_or(true),
            font_path: vis_file.font_path,
            output_path: vis_file.output_path,
        };

        let legacy_delay = if file.legacy.unwrap_or(false) {
            let secs = file.legacy_delay_secs.unwrap_or(DEFAULT_LEGACY_DELAY_SECS);
            Some(secs_to_duration("legacy_delay_secs", secs)?)
        } else {
            None
        };
        let stall_secs = file.stall_timeout_secs.unwrap_or(DEFAULT_STALL_TIMEOUT_SECS);
        let stall_timeout = secs_to_duration("stall_timeout_secs", stall_secs)?;

        Ok(Self {
            uav_name: file.uav_name.unwrap_or_default(),
            debug: file.debug.unwrap_or(false),
            topics,
            frequencies: file
                .frequencies
                .unwrap_or_else(|| DEFAULT_FREQUENCIES.to_vec()),
            process_rate: file.process_rate.unwrap_or(DEFAULT_PROCESS_RATE),
            return_frequencies: file.return_frequencies.unwrap_or(false),
            inverted_points: file.inverted_points.unwrap_or(false),
            legacy_delay,
            stall_timeout,
            tracker,
            visualization,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(name) = std::env::var("BLINK_UAV_NAME") {
            if !name.trim().is_empty() {
                self.uav_name = name;
            }
        }
        if let Ok(rate) = std::env::var("BLINK_PROCESS_RATE") {
            self.process_rate = rate
                .trim()
                .parse()
                .map_err(|_| anyhow!("BLINK_PROCESS_RATE must be a number in Hz"))?;
        }
        if let Ok(frequencies) = std::env::var("BLINK_FREQUENCIES") {
            let parsed = split_csv(&frequencies)
                .iter()
                .map(|entry| entry.parse::<f64>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|_| anyhow!("BLINK_FREQUENCIES must be a comma-separated list of Hz"))?;
            if !parsed.is_empty() {
                self.frequencies = parsed;
            }
        }
        for (key, topics) in [
            ("BLINK_POINTS_SEEN_TOPICS", &mut self.topics.points_seen),
            ("BLINK_BLINKERS_SEEN_TOPICS", &mut self.topics.blinkers_seen),
            (
                "BLINK_FRAMERATE_TOPICS",
                &mut self.topics.estimated_framerate,
            ),
            ("BLINK_CAMERA_TOPICS", &mut self.topics.camera),
        ] {
            if let Ok(value) = std::env::var(key) {
                let parsed = split_csv(&value);
                if !parsed.is_empty() {
                    *topics = parsed;
                }
            }
        }
        if let Some(flag) = env_flag("BLINK_RETURN_FREQUENCIES")? {
            self.return_frequencies = flag;
        }
        if let Some(flag) = env_flag("BLINK_INVERTED_POINTS")? {
            self.inverted_points = flag;
        }
        if let Some(flag) = env_flag("BLINK_PUBLISH_VISUALIZATION")? {
            self.visualization.enabled = flag;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        let channels = self.topics.points_seen.len();
        if channels == 0 {
            return Err(anyhow!("no points_seen topics configured"));
        }
        if self.topics.blinkers_seen.len() != channels {
            return Err(anyhow!(
                "number of points_seen topics ({}) does not match number of blinkers_seen topics ({})",
                channels,
                self.topics.blinkers_seen.len()
            ));
        }
        if self.topics.estimated_framerate.len() != channels {
            return Err(anyhow!(
                "number of points_seen topics ({}) does not match number of estimated_framerate topics ({})",
                channels,
                self.topics.estimated_framerate.len()
            ));
        }
        if !self.topics.camera.is_empty() && self.topics.camera.len() != channels {
            return Err(anyhow!(
                "number of points_seen topics ({}) does not match number of camera topics ({})",
                channels,
                self.topics.camera.len()
            ));
        }

        // Rejects empty, non-positive and unsorted sets.
        crate::classify::FrequencyClassifier::new(&self.frequencies)?;

        period_for_rate(self.process_rate).context("invalid process_rate")?;
        if self.visualization.enabled {
            period_for_rate(self.visualization.rate).context("invalid visualization rate")?;
        }
        if self.tracker.accumulator_length == 0 {
            return Err(anyhow!("tracker accumulator_length must be greater than zero"));
        }
        if self.tracker.image_size.0 == 0 || self.tracker.image_size.1 == 0 {
            return Err(anyhow!("tracker image size must be non-zero"));
        }
        if self.stall_timeout.is_zero() {
            return Err(anyhow!("stall_timeout_secs must be greater than zero"));
        }
        Ok(())
    }
}

fn secs_to_duration(name: &str, secs: f64) -> Result<Duration> {
    if !secs.is_finite() || secs < 0.0 {
        return Err(anyhow!("{} must be a non-negative number of seconds", name));
    }
    Duration::try_from_secs_f64(secs).map_err(|e| anyhow!("{} is out of range: {}", name, e))
}

fn env_flag(key: &str) -> Result<Option<bool>> {
    let Ok(value) = std::env::var(key) else {
        return Ok(None);
    };
    match value.trim().to_lowercase().as_str() {
        "" => Ok(None),
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(anyhow!("{} must be a boolean", key)),
    }
}

fn read_config_file(path: &Path) -> Result<BlinkProcessorConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        "topics": {
            "points_seen": ["left/points", "right/points"],
            "blinkers_seen": ["left/blinkers", "right/blinkers"],
            "estimated_framerate": ["left/framerate", "right/framerate"]
        }
    }"#;

    #[test]
    fn minimal_config_uses_defaults() {
        let cfg = BlinkProcessorConfig::from_json(MINIMAL).unwrap();
        assert_eq!(cfg.channel_count(), 2);
        assert_eq!(cfg.frequencies, vec![6.0, 10.0, 15.0, 30.0]);
        assert_eq!(cfg.process_rate, 10.0);
        assert!(!cfg.return_frequencies);
        assert!(cfg.legacy_delay.is_none());
        assert_eq!(cfg.stall_timeout, Duration::from_secs(2));
        assert_eq!(cfg.tracker, TrackerParams::default());
        assert!(!cfg.visualization.enabled);
        assert_eq!(cfg.visualization.rate, 5.0);
        assert!(cfg.visualization.use_camera);
    }

    #[test]
    fn legacy_flag_enables_default_delay() {
        let raw = MINIMAL.replacen('{', r#"{ "legacy": true,"#, 1);
        let cfg = BlinkProcessorConfig::from_json(&raw).unwrap();
        assert_eq!(cfg.legacy_delay, Some(Duration::from_millis(200)));
    }

    #[test]
    fn rejects_mismatched_topic_lists() {
        let raw = r#"{
            "topics": {
                "points_seen": ["a", "b"],
                "blinkers_seen": ["a"],
                "estimated_framerate": ["a", "b"]
            }
        }"#;
        let err = BlinkProcessorConfig::from_json(raw).unwrap_err();
        assert!(err.to_string().contains("blinkers_seen"));
    }

    #[test]
    fn rejects_partial_camera_topics() {
        let raw = MINIMAL.replacen(
            r#""points_seen""#,
            r#""camera": ["left/image"], "points_seen""#,
            1,
        );
        assert!(BlinkProcessorConfig::from_json(&raw).is_err());
    }

    #[test]
    fn rejects_missing_channels() {
        assert!(BlinkProcessorConfig::from_json("{}").is_err());
    }

    #[test]
    fn rejects_unsorted_frequencies() {
        let raw = MINIMAL.replacen('{', r#"{ "frequencies": [10.0, 6.0],"#, 1);
        assert!(BlinkProcessorConfig::from_json(&raw).is_err());
    }

    #[test]
    fn rejects_negative_legacy_delay() {
        let raw = MINIMAL.replacen('{', r#"{ "legacy": true, "legacy_delay_secs": -1.0,"#, 1);
        assert!(BlinkProcessorConfig::from_json(&raw).is_err());
    }

    #[test]
    fn rejects_durations_out_of_range() {
        let raw = MINIMAL.replacen('{', r#"{ "stall_timeout_secs": 1e30,"#, 1);
        let err = BlinkProcessorConfig::from_json(&raw).unwrap_err();
        assert!(err.to_string().contains("stall_timeout_secs"));

        let raw = MINIMAL.replacen('{', r#"{ "legacy": true, "legacy_delay_secs": 1e30,"#, 1);
        let err = BlinkProcessorConfig::from_json(&raw).unwrap_err();
        assert!(err.to_string().contains("legacy_delay_secs"));
    }

    #[test]
    fn rejects_rates_without_a_period() {
        let raw = MINIMAL.replacen('{', r#"{ "process_rate": 1e-30,"#, 1);
        let err = BlinkProcessorConfig::from_json(&raw).unwrap_err();
        assert!(err.to_string().contains("process_rate"));

        let raw = MINIMAL.replacen(
            '{',
            r#"{ "visualization": { "enabled": true, "rate": 1e-30 },"#,
            1,
        );
        let err = BlinkProcessorConfig::from_json(&raw).unwrap_err();
        assert!(err.to_string().contains("visualization rate"));

        // Disabled visualization does not need a usable rate.
        let raw = MINIMAL.replacen('{', r#"{ "visualization": { "rate": 0.0 },"#, 1);
        assert!(BlinkProcessorConfig::from_json(&raw).is_ok());
    }

    #[test]
    fn split_csv_skips_blanks() {
        assert_eq!(split_csv(" a, ,b,"), vec!["a", "b"]);
    }
}
