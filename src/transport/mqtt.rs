use anyhow::Result;
use rumqttc::v5::{mqttbytes::QoS, Client, Connection, Event, Incoming};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use super::broker::BrokerSettings;
use crate::config::TopicSettings;
use crate::processor::BlinkProcessor;

const RECONNECT_DELAY: Duration = Duration::from_secs(2);
const REQUEST_CAPACITY: usize = 64;

/// Create an MQTT client. The connection is established lazily by iterating
/// the returned `Connection`.
pub fn connect_mqtt(broker: &BrokerSettings) -> Result<(Client, Connection)> {
    let options = broker.mqtt_options()?;
    let (client, connection) = Client::new(options, REQUEST_CAPACITY);
    log::info!(
        "MQTT client '{}' created for {}:{} (TLS: {}, auth: {})",
        broker.client_id,
        broker.address.host,
        broker.address.port,
        broker.address.tls,
        broker.credentials.is_some()
    );
    Ok((client, connection))
}

/// Where an incoming topic is delivered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TopicRoute {
    Points(usize),
    Camera(usize),
}

/// Maps subscribed topics to channels.
#[derive(Clone, Debug, Default)]
pub struct TopicRouter {
    routes: HashMap<String, TopicRoute>,
}

impl TopicRouter {
    pub fn new(topics: &TopicSettings) -> Self {
        let mut routes = HashMap::new();
        for (index, topic) in topics.points_seen.iter().enumerate() {
            routes.insert(topic.clone(), TopicRoute::Points(index));
        }
        for (index, topic) in topics.camera.iter().enumerate() {
            routes.insert(topic.clone(), TopicRoute::Camera(index));
        }
        Self { routes }
    }

    pub fn route(&self, topic: &str) -> Option<TopicRoute> {
        self.routes.get(topic).copied()
    }

    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }
}

/// Hand one payload to the processor.
pub fn dispatch(processor: &BlinkProcessor, route: TopicRoute, payload: &[u8]) -> Result<()> {
    match route {
        TopicRoute::Points(index) => processor.handle_points(index, payload).map(|_| ()),
        TopicRoute::Camera(index) => processor.handle_camera_frame(index, payload),
    }
}

/// Drive the MQTT connection until `stop` is raised.
///
/// Subscriptions are (re)issued on every ConnAck, so a broker restart does not
/// lose them. Connection errors are logged and the connection retried.
pub fn run_event_loop(
    client: &Client,
    mut connection: Connection,
    router: &TopicRouter,
    processor: &BlinkProcessor,
    stop: &AtomicBool,
) {
    for event in connection.iter() {
        if stop.load(Ordering::SeqCst) {
            break;
        }
        match event {
            Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                log::info!("connected to MQTT broker");
                for topic in router.topics() {
                    match client.try_subscribe(topic, QoS::AtMostOnce) {
                        Ok(()) => log::info!("subscribed to {}", topic),
                        Err(e) => log::warn!("failed to subscribe to {}: {}", topic, e),
                    }
                }
            }
            Ok(Event::Incoming(Incoming::Publish(publish))) => {
                let topic = match std::str::from_utf8(&publish.topic) {
                    Ok(topic) => topic,
                    Err(e) => {
                        log::warn!("skipping publish with invalid topic: {}", e);
                        continue;
                    }
                };
                let Some(route) = router.route(topic) else {
                    log::debug!("ignoring publish on {}", topic);
                    continue;
                };
                if let Err(e) = dispatch(processor, route, &publish.payload) {
                    log::warn!("dropped payload on {}: {:#}", topic, e);
                }
            }
            Ok(_) => {}
            Err(e) => {
                if stop.load(Ordering::SeqCst) {
                    break;
                }
                log::error!("MQTT connection error: {}. Reconnecting...", e);
                std::thread::sleep(RECONNECT_DELAY);
            }
        }
    }
    log::info!("MQTT event loop stopped");
}
