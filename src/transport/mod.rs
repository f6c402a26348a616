//! MQTT transport: broker settings, topic routing and the event loop that
//! feeds incoming payloads to the processor.

mod broker;
mod mqtt;

pub use broker::{BrokerAddress, BrokerSettings, TlsFiles};
pub use mqtt::{connect_mqtt, dispatch, run_event_loop, TopicRoute, TopicRouter};
