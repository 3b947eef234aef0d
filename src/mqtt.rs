//! The ingest listener: keeps one broker connection subscribed to the room channels and hands
//! every message to the ingest pipeline.
extern crate paho_mqtt as mqtt;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::ingest;
use crate::record::CHANNELS;
use crate::store::RecordStore;

#[derive(Serialize, Deserialize, Debug, Clone)]
/// Parameters for the mqtt connection.
pub struct MqttParams
{
    /// The host name or ip address of the broker.
    pub address: String,
    /// The port of the broker.
    pub port: u16,
    /// Enable tls encryption.
    #[serde(default)]
    pub tls_enable: bool,
    /// Optional TLS parameters for the mqtt connection.
    #[serde(default)]
    pub tls_params: Option<MqttTlsParams>,
    /// The QoS to use for the subscriptions.
    #[serde(default)]
    pub qos: i32,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
/// TLS parametes required for MQTT with TLS.
pub struct MqttTlsParams {
    /// The path to the CA certificate for TLS encryption.
    pub ca_path: String,
    /// The path to the certificate to use for TLS encryption.
    pub cert_path: String,
    /// The path to the key to use for TLS encryption.
    pub key_path: String,
    /// The password for the ssl private key.
    pub key_pass: Option<String>,
}

#[derive(Debug, thiserror::Error)]
/// Failures that end the listener.
pub enum ListenerError {
    #[error("invalid system time, it is before the UNIX_EPOCH")]
    Clock,
    #[error("TLS enabled but no TLS parameters specified")]
    MissingTlsParams,
    #[error("mqtt client error: {0}")]
    Client(#[from] mqtt::Error),
    #[error("the message queue of the mqtt client was closed")]
    QueueClosed,
}

/// Outcome of one wait on the message queue.
#[derive(Debug)]
enum Polled {
    Message(mqtt::Message),
    ConnectionLost,
    Idle,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Connection state of the listener.
pub enum ListenerState {
    Disconnected,
    Connecting,
    Subscribed,
}

impl std::fmt::Display for ListenerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ListenerState::Disconnected => "disconnected",
            ListenerState::Connecting => "connecting",
            ListenerState::Subscribed => "subscribed",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
struct StateTracker {
    state: ListenerState,
}

impl StateTracker {
    fn new() -> StateTracker {
        StateTracker {
            state: ListenerState::Disconnected,
        }
    }

    fn transition(&mut self, next: ListenerState) {
        if self.state != next {
            log::debug!(target: "roomsafed::mqtt", "Listener state: {} -> {}", self.state, next);
            self.state = next;
        }
    }
}

/// The broker uri for the given parameters.
pub fn server_uri(params: &MqttParams) -> String {
    match params.tls_enable {
        true => format!("ssl://{}:{}", params.address, params.port),
        false => format!("tcp://{}:{}", params.address, params.port),
    }
}

/// The topics the listener subscribes to, with their QoS.
pub fn subscriptions(qos: i32) -> (Vec<&'static str>, Vec<i32>) {
    let topics: Vec<&'static str> = CHANNELS.iter().map(|(topic, _)| *topic).collect();
    let qos = vec![qos; topics.len()];
    (topics, qos)
}

fn ssl_options(tls_params: &MqttTlsParams) -> Result<mqtt::SslOptions, ListenerError> {
    let mut builder = mqtt::SslOptionsBuilder::new();
    builder.trust_store(&tls_params.ca_path)?;
    builder.key_store(&tls_params.cert_path)?;
    builder.private_key(&tls_params.key_path)?;
    if let Some(key_pass) = &tls_params.key_pass {
        builder.private_key_password(key_pass.as_str());
    }
    Ok(builder.finalize())
}

fn connect_options(params: &MqttParams) -> Result<mqtt::ConnectOptions, ListenerError> {
    let mut builder = mqtt::ConnectOptionsBuilder::new();
    builder
        .connect_timeout(time::Duration::from_millis(4000))
        .keep_alive_interval(time::Duration::from_secs(60));

    if params.tls_enable {
        let tls_params = params
            .tls_params
            .as_ref()
            .ok_or(ListenerError::MissingTlsParams)?;
        builder.ssl_options(ssl_options(tls_params)?);
    }

    Ok(builder.finalize())
}

fn subscribe(client: &mqtt::Client, qos: i32) -> Result<(), ListenerError> {
    let (topics, qos) = subscriptions(qos);
    client.subscribe_many(topics.as_slice(), qos.as_slice())?;
    log::info!(target: "roomsafed::mqtt", "Subscribed to topics {:?} with qos {:?}", topics, qos);
    Ok(())
}

fn consume<P, R>(
    store: &dyn RecordStore,
    thread_finish: &AtomicBool,
    tracker: &mut StateTracker,
    mut poll: P,
    mut reconnect: R,
) -> Result<(), ListenerError>
where
    P: FnMut() -> Polled,
    R: FnMut() -> Result<(), ListenerError>,
{
    while !thread_finish.load(Ordering::SeqCst) {
        match poll() {
            Polled::Message(message) => {
                ingest::ingest_and_log(store, message.topic(), message.payload());
            }
            Polled::Idle => continue,
            Polled::Closed => {
                tracker.transition(ListenerState::Disconnected);
                return Err(ListenerError::QueueClosed);
            }
            Polled::ConnectionLost => {
                tracker.transition(ListenerState::Disconnected);
                if thread_finish.load(Ordering::SeqCst) {
                    break;
                }
                log::warn!(target: "roomsafed::mqtt", "Connection to the broker lost, reconnecting");
                tracker.transition(ListenerState::Connecting);
                reconnect()?;
                tracker.transition(ListenerState::Subscribed);
            }
        }
    }
    Ok(())
}

fn run_listener(
    store: &dyn RecordStore,
    thread_finish: &AtomicBool,
    params: &MqttParams,
    tracker: &mut StateTracker,
) -> Result<(), ListenerError> {
    let current_unix_timestamp = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map_err(|_| ListenerError::Clock)?
        .as_secs();

    let create_opts = mqtt::CreateOptionsBuilder::new()
        .server_uri(server_uri(params))
        .client_id(format!("roomsafed-{}", current_unix_timestamp))
        .finalize();

    let mut mqtt_client = mqtt::Client::new(create_opts)?;
    mqtt_client.set_timeout(time::Duration::from_millis(4000));

    tracker.transition(ListenerState::Connecting);
    log::info!(target: "roomsafed::mqtt", "Connecting to {}:{}...", params.address, params.port);
    mqtt_client.connect(connect_options(params)?)?;
    log::info!(target: "roomsafed::mqtt", "Mqtt client connected to \'{}\'", server_uri(params));

    let receiver_queue = mqtt_client.start_consuming();
    subscribe(&mqtt_client, params.qos)?;
    tracker.transition(ListenerState::Subscribed);

    let timeout = time::Duration::from_millis(100);
    let poll = || match receiver_queue.recv_timeout(timeout) {
        Ok(Some(message)) => Polled::Message(message),
        Ok(None) => Polled::ConnectionLost,
        Err(err) if err.is_disconnected() => Polled::Closed,
        Err(_) => Polled::Idle,
    };
    let reconnect = || -> Result<(), ListenerError> {
        mqtt_client.reconnect()?;
        subscribe(&mqtt_client, params.qos)
    };

    consume(store, thread_finish, tracker, poll, reconnect)?;

    match mqtt_client.disconnect(None) {
        Ok(_) => log::info!(target: "roomsafed::mqtt", "Disconnected from mqtt broker!"),
        Err(err) => log::error!(target: "roomsafed::mqtt", "Could not disconnect from mqtt broker: {}", err),
    };
    tracker.transition(ListenerState::Disconnected);
    Ok(())
}

/// Thread function for the ingest listener.
///
/// Connects to the broker, subscribes to the room channels and stores every message until
/// `thread_finish` is set. Message level failures are logged and skipped. A failed connect or
/// reconnect ends the thread, the query api keeps serving what is already stored.
pub fn thread_mqtt(store: Arc<dyn RecordStore>, thread_finish: Arc<AtomicBool>, params: MqttParams)
{
    let mut tracker = StateTracker::new();
    if let Err(err) = run_listener(store.as_ref(), &thread_finish, &params, &mut tracker) {
        log::error!(target: "roomsafed::mqtt", "Listener stopped while {}: \'{}\'", tracker.state, err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryStore;
    use crate::record::Collection;

    fn params(tls_enable: bool) -> MqttParams {
        MqttParams {
            address: String::from("broker.local"),
            port: 8883,
            tls_enable,
            tls_params: None,
            qos: 1,
        }
    }

    #[test]
    fn server_uri_follows_tls_flag() {
        assert_eq!(server_uri(&params(false)), "tcp://broker.local:8883");
        assert_eq!(server_uri(&params(true)), "ssl://broker.local:8883");
    }

    #[test]
    fn subscribes_to_exactly_the_three_channels() {
        let (topics, qos) = subscriptions(1);
        assert_eq!(topics, vec!["room/sensors", "room/status", "room/alert"]);
        assert_eq!(qos, vec![1, 1, 1]);
    }

    #[test]
    fn tls_without_parameters_is_rejected() {
        let result = connect_options(&params(true));
        assert!(matches!(result, Err(ListenerError::MissingTlsParams)));
        assert!(connect_options(&params(false)).is_ok());
    }

    fn polls(items: Vec<Polled>) -> impl FnMut() -> Polled {
        let mut items = items.into_iter();
        move || items.next().unwrap_or(Polled::Closed)
    }

    #[test]
    fn closed_queue_ends_the_loop() {
        let store = MemoryStore::new();
        let finish = AtomicBool::new(false);
        let mut tracker = StateTracker::new();
        tracker.transition(ListenerState::Subscribed);

        let result = consume(&store, &finish, &mut tracker, polls(vec![Polled::Idle]), || Ok(()));

        assert!(matches!(result, Err(ListenerError::QueueClosed)));
        assert_eq!(tracker.state, ListenerState::Disconnected);
    }

    #[test]
    fn messages_are_stored_and_lost_connections_resubscribe() {
        let store = MemoryStore::new();
        let finish = AtomicBool::new(false);
        let mut tracker = StateTracker::new();
        let mut reconnects = 0;

        let result = consume(
            &store,
            &finish,
            &mut tracker,
            polls(vec![
                Polled::Message(mqtt::Message::new("room/sensors", r#"{"temp": 21.0}"#, 0)),
                Polled::ConnectionLost,
                Polled::Message(mqtt::Message::new("room/alert", "not json", 0)),
                Polled::Message(mqtt::Message::new("room/alert", r#"{"type": "fire"}"#, 0)),
            ]),
            || {
                reconnects += 1;
                Ok(())
            },
        );

        assert!(matches!(result, Err(ListenerError::QueueClosed)));
        assert_eq!(reconnects, 1);
        assert_eq!(store.count(Collection::SensorReadings), 1);
        assert_eq!(store.count(Collection::Alerts), 1);
    }

    #[test]
    fn finish_flag_stops_before_polling() {
        let store = MemoryStore::new();
        let finish = AtomicBool::new(true);
        let mut tracker = StateTracker::new();

        let result = consume(&store, &finish, &mut tracker, polls(Vec::new()), || Ok(()));

        assert!(result.is_ok());
    }

    #[test]
    fn state_tracker_records_transitions() {
        let mut tracker = StateTracker::new();
        assert_eq!(tracker.state, ListenerState::Disconnected);
        tracker.transition(ListenerState::Connecting);
        tracker.transition(ListenerState::Subscribed);
        assert_eq!(tracker.state, ListenerState::Subscribed);
        assert_eq!(tracker.state.to_string(), "subscribed");
    }
}
