//! blink_processor - classify blinking UV markers seen by multiple cameras.
//!
//! This daemon:
//! 1. Subscribes to per-camera point reports (and optionally camera frames)
//! 2. Feeds each camera's points into its blink tracker
//! 3. Classifies finished batches against the configured frequency set
//! 4. Publishes blinkers and framerate estimates per camera
//! 5. Optionally publishes a montage of all cameras with the results drawn on

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::{mpsc, Arc};
use std::time::Duration;

use blink_processor::publish::{ImageSink, MqttSink, ReportSink};
use blink_processor::transport::{
    connect_mqtt, run_event_loop, BrokerAddress, BrokerSettings, TlsFiles, TopicRouter,
};
use blink_processor::{BlinkProcessor, BlinkProcessorConfig};

const CLIENT_NAME: &str = "blink_processor";

#[derive(Parser, Debug)]
#[command(author, version, about = "Classify blinking UV markers across cameras")]
struct Args {
    /// Configuration file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "BLINK_CONFIG")]
    config: Option<PathBuf>,

    /// MQTT broker address, `[scheme://]host[:port]`.
    #[arg(long, env = "MQTT_BROKER_ADDR", default_value = "localhost:1883")]
    mqtt_broker_addr: String,

    /// MQTT username for authentication.
    #[arg(long, env = "MQTT_USERNAME")]
    mqtt_username: Option<String>,

    /// MQTT password for authentication.
    #[arg(long, env = "MQTT_PASSWORD")]
    mqtt_password: Option<String>,

    /// Enable TLS for MQTT (implied by mqtts:// brokers).
    #[arg(long, env = "MQTT_USE_TLS")]
    mqtt_use_tls: bool,

    /// Path to a PEM-encoded CA certificate to trust for MQTT TLS.
    #[arg(long, env = "MQTT_TLS_CA_PATH")]
    mqtt_tls_ca_path: Option<PathBuf>,

    /// Path to a PEM-encoded client certificate for MQTT TLS.
    #[arg(long, env = "MQTT_TLS_CLIENT_CERT_PATH")]
    mqtt_tls_client_cert_path: Option<PathBuf>,

    /// Path to a PEM-encoded client private key for MQTT TLS.
    #[arg(long, env = "MQTT_TLS_CLIENT_KEY_PATH")]
    mqtt_tls_client_key_path: Option<PathBuf>,

    /// MQTT client identifier.
    #[arg(long, env = "MQTT_CLIENT_ID", default_value = CLIENT_NAME)]
    mqtt_client_id: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = BlinkProcessorConfig::load_from(args.config.as_deref())
        .context("failed to load configuration")?;

    let broker = BrokerSettings {
        address: BrokerAddress::parse(&args.mqtt_broker_addr, args.mqtt_use_tls)?,
        tls: TlsFiles {
            ca: args.mqtt_tls_ca_path,
            client_cert: args.mqtt_tls_client_cert_path,
            client_key: args.mqtt_tls_client_key_path,
        },
        client_id: args.mqtt_client_id,
        credentials: args
            .mqtt_username
            .map(|user| (user, args.mqtt_password.unwrap_or_default())),
    };
    let (client, connection) = connect_mqtt(&broker)?;

    let router = TopicRouter::new(&config.topics);
    let mqtt_sink = Arc::new(MqttSink::new(client.clone(), &config.topics));
    let processor = Arc::new(BlinkProcessor::with_transition_trackers(config)?);
    let stop = processor.stop_flag();

    let report_sink: Arc<dyn ReportSink> = mqtt_sink.clone();
    let image_sinks: Vec<Arc<dyn ImageSink>> = vec![mqtt_sink];
    let running = processor.start(report_sink, image_sinks)?;

    let event_loop = {
        let client = client.clone();
        let processor = processor.clone();
        let stop = stop.clone();
        std::thread::Builder::new()
            .name("blink-mqtt".to_string())
            .spawn(move || run_event_loop(&client, connection, &router, &processor, &stop))
            .context("failed to spawn MQTT event loop")?
    };

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    log::info!("blink_processor running. waiting for shutdown signal (Ctrl-C)...");
    loop {
        match rx.recv_timeout(Duration::from_millis(500)) {
            Ok(()) => {
                log::info!("shutdown signal received, stopping workers...");
                break;
            }
            Err(mpsc::RecvTimeoutError::Timeout) if !running.any_finished() => {}
            Err(mpsc::RecvTimeoutError::Timeout) => {
                log::error!("a worker thread exited unexpectedly, shutting down");
                break;
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    stop.store(true, Ordering::SeqCst);
    let result = running.shutdown();
    if let Err(e) = client.try_disconnect() {
        log::warn!("MQTT disconnect failed: {}", e);
    }
    event_loop
        .join()
        .map_err(|_| anyhow!("MQTT event loop panicked"))?;
    result
}
