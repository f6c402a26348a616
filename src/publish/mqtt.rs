use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use rumqttc::v5::{mqttbytes::QoS, Client};

use super::{encode_png, BlinkersReport, ImageSink, ReportSink};
use crate::config::TopicSettings;

/// Publishes reports and montages on the configured MQTT topics.
///
/// Publishing never blocks: when the client's request queue is full the
/// message is dropped and the error is returned to the caller, which logs it.
#[derive(Clone)]
pub struct MqttSink {
    client: Client,
    blinkers_topics: Vec<String>,
    framerate_topics: Vec<String>,
    visualization_topic: String,
}

impl MqttSink {
    pub fn new(client: Client, topics: &TopicSettings) -> Self {
        Self {
            client,
            blinkers_topics: topics.blinkers_seen.clone(),
            framerate_topics: topics.estimated_framerate.clone(),
            visualization_topic: topics.visualization.clone(),
        }
    }

    fn send(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload)
            .with_context(|| format!("failed to publish on {}", topic))
    }
}

fn topic_for(topics: &[String], channel: usize) -> Result<&str> {
    topics
        .get(channel)
        .map(String::as_str)
        .ok_or_else(|| anyhow!("no output topic for channel {}", channel))
}

impl ReportSink for MqttSink {
    fn publish_blinkers(&self, channel: usize, report: &BlinkersReport) -> Result<()> {
        let topic = topic_for(&self.blinkers_topics, channel)?;
        let payload = serde_json::to_vec(report)?;
        self.send(topic, payload)
    }

    fn publish_framerate(&self, channel: usize, framerate: f32) -> Result<()> {
        let topic = topic_for(&self.framerate_topics, channel)?;
        let payload = serde_json::to_vec(&framerate)?;
        self.send(topic, payload)
    }
}

impl ImageSink for MqttSink {
    fn publish_image(&self, image: &RgbImage) -> Result<()> {
        let payload = encode_png(image)?;
        self.send(&self.visualization_topic, payload)
    }
}
