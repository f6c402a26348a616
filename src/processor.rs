//! Process-level wiring: channels, ingestion entry points and worker threads.

use anyhow::{anyhow, Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread::JoinHandle;

use crate::channel::{Channel, ChannelSet};
use crate::classify::FrequencyClassifier;
use crate::config::BlinkProcessorConfig;
use crate::frame::{decode_frame, FrameStore};
use crate::ingest::{ingest_points, parse_point_payload, IngestOutcome, PointReport};
use crate::process::{ChannelWorker, ProcessSettings};
use crate::publish::{ImageSink, ReportSink};
use crate::tracker::{BlinkTracker, TrackerParams, TransitionTracker};

/// Owns every channel and the shared classifier and frame store.
pub struct BlinkProcessor {
    config: BlinkProcessorConfig,
    classifier: Arc<FrequencyClassifier>,
    channels: ChannelSet,
    frames: Arc<FrameStore>,
    stop: Arc<AtomicBool>,
}

impl BlinkProcessor {
    /// Build one channel per configured points topic, each with a tracker
    /// from `make_tracker(channel_index, params)`.
    pub fn new<F>(config: BlinkProcessorConfig, make_tracker: F) -> Result<Self>
    where
        F: Fn(usize, &TrackerParams) -> Arc<dyn BlinkTracker>,
    {
        let classifier = Arc::new(FrequencyClassifier::new(&config.frequencies)?);
        let count = config.channel_count();
        if count == 0 {
            return Err(anyhow!("at least one channel is required"));
        }

        let channels = (0..count)
            .map(|index| {
                Arc::new(Channel::new(
                    index,
                    make_tracker(index, &config.tracker),
                    config.inverted_points,
                    config.tracker.image_size,
                ))
            })
            .collect();

        log::info!(
            "blink processor{}: {} channels, frequencies {:?}",
            if config.uav_name.is_empty() {
                String::new()
            } else {
                format!(" for {}", config.uav_name)
            },
            count,
            config.frequencies
        );
        Ok(Self {
            frames: Arc::new(FrameStore::new(count)),
            channels: ChannelSet::new(channels),
            classifier,
            config,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Build with the in-crate `TransitionTracker` on every channel.
    pub fn with_transition_trackers(config: BlinkProcessorConfig) -> Result<Self> {
        Self::new(config, |_, params| {
            Arc::new(TransitionTracker::new(params.clone())) as Arc<dyn BlinkTracker>
        })
    }

    pub fn config(&self) -> &BlinkProcessorConfig {
        &self.config
    }

    pub fn channels(&self) -> &ChannelSet {
        &self.channels
    }

    pub fn classifier(&self) -> &Arc<FrequencyClassifier> {
        &self.classifier
    }

    pub fn frames(&self) -> &Arc<FrameStore> {
        &self.frames
    }

    /// Shared stop flag observed by every worker.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Parse and ingest a raw points payload for channel `index`.
    ///
    /// # Panics
    ///
    /// If `index` is not a configured channel.
    pub fn handle_points(&self, index: usize, payload: &[u8]) -> Result<IngestOutcome> {
        let report = parse_point_payload(payload, self.config.legacy_delay)?;
        self.ingest(index, &report)
    }

    /// Ingest an already parsed point report.
    pub fn ingest(&self, index: usize, report: &PointReport) -> Result<IngestOutcome> {
        ingest_points(self.channels.get(index), report)
    }

    /// Decode and store the latest camera frame of channel `index`.
    pub fn handle_camera_frame(&self, index: usize, payload: &[u8]) -> Result<()> {
        let channel = self.channels.get(index);
        let frame = decode_frame(payload)
            .with_context(|| format!("channel {}: bad camera frame", index))?;
        let (width, height) = frame.dimensions();
        self.frames.store(index, frame)?;
        channel.set_frame_size(width, height)
    }

    /// Start one processing thread per channel, plus the visualization thread
    /// when enabled. All threads begin together once every one is spawned.
    pub fn start(
        &self,
        sink: Arc<dyn ReportSink>,
        image_sinks: Vec<Arc<dyn ImageSink>>,
    ) -> Result<RunningProcessor> {
        let settings = ProcessSettings {
            rate_hz: self.config.process_rate,
            return_frequencies: self.config.return_frequencies,
            stall_timeout: self.config.stall_timeout,
            debug: self.config.debug,
        };

        let visualization = self.visualization_worker(image_sinks)?;
        let thread_count = self.channels.len() + usize::from(visualization.is_some());
        let startup = Arc::new(Barrier::new(thread_count + 1));

        let mut workers = Vec::with_capacity(thread_count);
        for channel in self.channels.iter() {
            let worker = ChannelWorker::new(
                channel.clone(),
                self.classifier.clone(),
                sink.clone(),
                settings.clone(),
                self.stop.clone(),
            );
            workers.push(worker.spawn(startup.clone())?);
        }
        if let Some(spawn_visualization) = visualization {
            workers.push(spawn_visualization(startup.clone())?);
        }

        startup.wait();
        log::info!("blink processor initialized");
        Ok(RunningProcessor {
            stop: self.stop.clone(),
            workers,
        })
    }

    #[cfg(feature = "visualization")]
    fn visualization_worker(
        &self,
        image_sinks: Vec<Arc<dyn ImageSink>>,
    ) -> Result<Option<SpawnWorker>> {
        use crate::publish::FileImageSink;
        use crate::visualize::{load_font, Compositor, Palette, VisualizationWorker};

        let settings = &self.config.visualization;
        if !settings.enabled {
            return Ok(None);
        }
        let font = settings.font_path.as_deref().map(load_font).transpose()?;
        if font.is_none() {
            log::info!("no visualization font configured; frequency labels disabled");
        }
        let palette = if settings.rainbow {
            Palette::Rainbow
        } else {
            Palette::Fixed
        };
        let compositor = Compositor::new(
            self.channels.clone(),
            self.frames.clone(),
            self.classifier.clone(),
            palette,
        )
        .with_font(font)
        .use_camera(settings.use_camera);

        let mut sinks = image_sinks;
        if let Some(path) = &settings.output_path {
            sinks.push(Arc::new(FileImageSink::new(path)));
        }
        let worker =
            VisualizationWorker::new(compositor, sinks, settings.rate, self.stop.clone());
        Ok(Some(Box::new(move |startup| worker.spawn(startup))))
    }

    #[cfg(not(feature = "visualization"))]
    fn visualization_worker(
        &self,
        _image_sinks: Vec<Arc<dyn ImageSink>>,
    ) -> Result<Option<SpawnWorker>> {
        if self.config.visualization.enabled {
            log::warn!("visualization requested but the 'visualization' feature is not compiled in");
        }
        Ok(None)
    }
}

/// Deferred spawn of an optional worker thread.
type SpawnWorker = Box<dyn FnOnce(Arc<Barrier>) -> Result<JoinHandle<Result<()>>>>;

/// Handle to the running worker threads.
pub struct RunningProcessor {
    stop: Arc<AtomicBool>,
    workers: Vec<JoinHandle<Result<()>>>,
}

impl RunningProcessor {
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// True once any worker has exited, for instance on a poisoned lock.
    pub fn any_finished(&self) -> bool {
        self.workers.iter().any(JoinHandle::is_finished)
    }

    /// Raise the stop flag and join every worker. Returns the first worker error.
    pub fn shutdown(self) -> Result<()> {
        self.stop.store(true, Ordering::SeqCst);
        let mut first_error = None;
        for handle in self.workers {
            let name = handle.thread().name().unwrap_or("worker").to_string();
            let outcome = handle
                .join()
                .map_err(|_| anyhow!("{} thread panicked", name))
                .and_then(|result| result.with_context(|| format!("{} thread failed", name)));
            if let Err(err) = outcome {
                log::error!("{:#}", err);
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
