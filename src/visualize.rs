//! Montage of all channels with classified blinkers drawn on top.
//!
//! Frames are laid side by side with a 2 px white gap. Each retrieved blinker
//! gets its frequency as a label and, when it matches a class, a coloured
//! circle plus a short red line pointing along its viewing direction.
//! Unmatched blinkers are marked with a single white pixel.

use ab_glyph::{FontVec, PxScale};
use anyhow::{anyhow, Context, Result};
use image::{imageops, Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_circle_mut, draw_line_segment_mut, draw_text_mut};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread::JoinHandle;

use crate::channel::{ChannelSet, RetrievedBlinker};
use crate::classify::{FrequencyClassifier, UNKNOWN_CLASS};
use crate::frame::FrameStore;
use crate::process::Rate;
use crate::publish::ImageSink;

/// Gap between neighbouring frames in the montage (pixels).
pub const FRAME_GAP: u32 = 2;
const MARKER_RADIUS: i32 = 5;
const DIRECTION_LENGTH: f64 = 20.0;
const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
const RED: Rgb<u8> = Rgb([255, 0, 0]);
const FIXED_COLORS: [Rgb<u8>; 4] = [
    Rgb([0, 100, 255]),
    Rgb([255, 50, 0]),
    Rgb([255, 200, 0]),
    Rgb([100, 0, 255]),
];

/// Colour scheme for frequency classes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Palette {
    /// Four fixed colours, repeating for larger class tables.
    Fixed,
    /// Continuous ramp from red (first class) to blue (last class).
    Rainbow,
}

impl Palette {
    pub fn color(&self, class: usize, class_count: usize) -> Rgb<u8> {
        match self {
            Palette::Fixed => FIXED_COLORS[class % FIXED_COLORS.len()],
            Palette::Rainbow => rainbow(class as f64, class_count.saturating_sub(1) as f64),
        }
    }
}

/// Legend text for a class frequency: whole Hz, truncated.
fn legend_label(frequency: f64) -> String {
    (frequency as i64).to_string()
}

/// Map `value` in `[0, max]` onto a red-yellow-green-cyan-blue ramp.
pub fn rainbow(value: f64, max: f64) -> Rgb<u8> {
    let fraction = if max > 0.0 {
        (value / max).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let r = if fraction < 0.25 {
        1.0
    } else if fraction > 0.5 {
        0.0
    } else {
        2.0 - 4.0 * fraction
    };
    let g = if fraction < 0.25 {
        4.0 * fraction
    } else if fraction < 0.75 {
        1.0
    } else {
        4.0 - 4.0 * fraction
    };
    let b = if fraction < 0.5 {
        0.0
    } else if fraction < 0.75 {
        4.0 * fraction - 2.0
    } else {
        1.0
    };
    let channel = |v: f64| (v * 255.0).round() as u8;
    Rgb([channel(r), channel(g), channel(b)])
}

/// Load a TrueType/OpenType font for labels.
pub fn load_font(path: &Path) -> Result<FontVec> {
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read font '{}'", path.display()))?;
    FontVec::try_from_vec(bytes).map_err(|_| anyhow!("invalid font file '{}'", path.display()))
}

/// Builds montages from the frame store and the channels' result buffers.
pub struct Compositor {
    channels: ChannelSet,
    frames: Arc<FrameStore>,
    classifier: Arc<FrequencyClassifier>,
    palette: Palette,
    font: Option<FontVec>,
    use_camera: bool,
}

impl Compositor {
    pub fn new(
        channels: ChannelSet,
        frames: Arc<FrameStore>,
        classifier: Arc<FrequencyClassifier>,
        palette: Palette,
    ) -> Self {
        Self {
            channels,
            frames,
            classifier,
            palette,
            font: None,
            use_camera: true,
        }
    }

    pub fn with_font(mut self, font: Option<FontVec>) -> Self {
        self.font = font;
        self
    }

    /// When false, blinkers are drawn over black frames.
    pub fn use_camera(mut self, use_camera: bool) -> Self {
        self.use_camera = use_camera;
        self
    }

    fn channel_size(&self, index: usize) -> Result<(u32, u32)> {
        if self.use_camera {
            if let Some(size) = self.frames.frame_size(index)? {
                return Ok(size);
            }
        }
        Ok(self.channels.get(index).snapshot()?.frame_size)
    }

    /// Compose one montage.
    pub fn compose(&self) -> Result<RgbImage> {
        let sizes = (0..self.channels.len())
            .map(|i| self.channel_size(i))
            .collect::<Result<Vec<_>>>()?;
        let width = sizes
            .iter()
            .map(|(w, _)| w + FRAME_GAP)
            .sum::<u32>()
            .saturating_sub(FRAME_GAP);
        let height = sizes.iter().map(|(_, h)| *h).max().unwrap_or(0);
        if width == 0 || height == 0 {
            return Err(anyhow!("no frame dimensions known yet"));
        }
        let mut canvas = RgbImage::from_pixel(width, height, WHITE);

        let mut offset = 0u32;
        for (index, (w, h)) in sizes.iter().enumerate() {
            let copied = self.use_camera
                && self.frames.with_frame(index, |frame| match frame {
                    Some(frame) => {
                        imageops::replace(&mut canvas, frame, i64::from(offset), 0);
                        true
                    }
                    None => false,
                })?;
            if !copied {
                imageops::replace(&mut canvas, &RgbImage::new(*w, *h), i64::from(offset), 0);
            }

            let blinkers = self.channels.get(index).results()?.blinkers.clone();
            self.draw_blinkers(&mut canvas, &blinkers, offset as i32);
            offset += w + FRAME_GAP;
        }

        self.draw_legend(&mut canvas);
        Ok(canvas)
    }

    fn draw_blinkers(&self, canvas: &mut RgbImage, blinkers: &[RetrievedBlinker], offset: i32) {
        for blinker in blinkers {
            let (cx, cy) = (blinker.x + offset, blinker.y);
            let label = (blinker.frequency as i32).max(0).to_string();
            self.draw_label(canvas, cx - 5, cy - 5, 10.0, &label);

            let class = self.classifier.classify(blinker.frequency);
            if class == UNKNOWN_CLASS {
                if let (Ok(x), Ok(y)) = (u32::try_from(cx), u32::try_from(cy)) {
                    if x < canvas.width() && y < canvas.height() {
                        canvas.put_pixel(x, y, WHITE);
                    }
                }
                continue;
            }

            let color = self.palette.color(class as usize, self.classifier.len());
            draw_hollow_circle_mut(canvas, (cx, cy), MARKER_RADIUS, color);

            let len = blinker.pitch.cos() * DIRECTION_LENGTH;
            let tx = cx as f32 - (len * blinker.yaw.cos()) as f32;
            let ty = cy as f32 - (len * blinker.yaw.sin()) as f32;
            let (cx, cy) = (cx as f32, cy as f32);
            draw_line_segment_mut(canvas, (cx, cy), (tx, ty), RED);
            draw_line_segment_mut(canvas, (cx + 1.0, cy), (tx + 1.0, ty), RED);
            draw_line_segment_mut(canvas, (cx, cy + 1.0), (tx, ty + 1.0), RED);
        }
    }

    fn draw_legend(&self, canvas: &mut RgbImage) {
        for (i, frequency) in self.classifier.frequencies().iter().enumerate() {
            let y = 10 + 15 * i as i32;
            let color = self.palette.color(i, self.classifier.len());
            draw_hollow_circle_mut(canvas, (10, y), MARKER_RADIUS, color);
            self.draw_label(canvas, 17, y - 6, 13.0, &legend_label(*frequency));
        }
    }

    fn draw_label(&self, canvas: &mut RgbImage, x: i32, y: i32, size: f32, text: &str) {
        if let Some(font) = &self.font {
            draw_text_mut(canvas, WHITE, x, y, PxScale::from(size), font, text);
        }
    }
}

/// Periodically composes montages and hands them to the image sinks.
pub struct VisualizationWorker {
    compositor: Compositor,
    sinks: Vec<Arc<dyn ImageSink>>,
    rate_hz: f64,
    stop: Arc<AtomicBool>,
}

impl VisualizationWorker {
    pub fn new(
        compositor: Compositor,
        sinks: Vec<Arc<dyn ImageSink>>,
        rate_hz: f64,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            compositor,
            sinks,
            rate_hz,
            stop,
        }
    }

    pub fn spawn(self, startup: Arc<Barrier>) -> Result<JoinHandle<Result<()>>> {
        std::thread::Builder::new()
            .name("blink-visualization".to_string())
            .spawn(move || {
                startup.wait();
                self.run()
            })
            .context("failed to spawn visualization thread")
    }

    pub fn run(&self) -> Result<()> {
        log::info!("visualization running at {} Hz", self.rate_hz);
        let mut rate = Rate::new(self.rate_hz)?;
        while !self.stop.load(Ordering::SeqCst) {
            rate.sleep();
            let montage = match self.compositor.compose() {
                Ok(montage) => montage,
                Err(err) => {
                    log::debug!("visualization skipped: {:#}", err);
                    continue;
                }
            };
            for sink in &self.sinks {
                if let Err(err) = sink.publish_image(&montage) {
                    log::warn!("failed to publish visualization: {:#}", err);
                }
            }
        }
        log::info!("visualization stopped");
        Ok(())
    }
}
