//! Module that contains the record types and the channel routing for this application.
use chrono::{DateTime, SecondsFormat, Utc};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

/// Key of the receipt timestamp inside a record.
pub const TIMESTAMP_KEY: &str = "timestamp";

/// Topic carrying sensor readings.
pub const TOPIC_SENSORS: &str = "room/sensors";
/// Topic carrying door and occupancy status.
pub const TOPIC_STATUS: &str = "room/status";
/// Topic carrying fire and burglar alerts.
pub const TOPIC_ALERT: &str = "room/alert";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// The append-only collections records are written to.
pub enum Collection {
    /// Temperature, humidity and other sensor values.
    SensorReadings,
    /// Door state and occupant count.
    StatusLogs,
    /// Alert events such as `fire` or `burglar`.
    Alerts,
}

/// Routing table from subscribed topic to destination collection.
pub const CHANNELS: [(&str, Collection); 3] = [
    (TOPIC_SENSORS, Collection::SensorReadings),
    (TOPIC_STATUS, Collection::StatusLogs),
    (TOPIC_ALERT, Collection::Alerts),
];

impl Collection {
    /// All collections, in routing table order.
    pub const ALL: [Collection; 3] = [
        Collection::SensorReadings,
        Collection::StatusLogs,
        Collection::Alerts,
    ];

    /// Looks up the collection a message on `topic` belongs to.
    pub fn for_topic(topic: &str) -> Option<Collection> {
        CHANNELS
            .iter()
            .find(|(channel, _)| *channel == topic)
            .map(|(_, collection)| *collection)
    }

    /// The topic feeding this collection.
    pub fn topic(self) -> &'static str {
        match self {
            Collection::SensorReadings => TOPIC_SENSORS,
            Collection::StatusLogs => TOPIC_STATUS,
            Collection::Alerts => TOPIC_ALERT,
        }
    }

    /// Name of the backing table.
    pub fn table_name(self) -> &'static str {
        match self {
            Collection::SensorReadings => "sensor_readings",
            Collection::StatusLogs => "status_logs",
            Collection::Alerts => "alerts",
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.table_name())
    }
}

#[derive(Debug, Clone, PartialEq)]
/// A single stored document together with the time it was received.
pub struct Record {
    /// Receipt time assigned by the listener.
    pub timestamp: DateTime<Utc>,
    /// The decoded payload, without any `timestamp` key.
    pub fields: Map<String, Value>,
}

impl Record {
    /// Builds a record from a decoded payload, replacing any publisher supplied timestamp with
    /// the receipt time.
    pub fn stamp(mut fields: Map<String, Value>, received_at: DateTime<Utc>) -> Record {
        fields.remove(TIMESTAMP_KEY);
        Record {
            timestamp: received_at,
            fields,
        }
    }

    /// Returns a payload field.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Returns a payload field if it is a JSON number.
    pub fn number(&self, key: &str) -> Option<f64> {
        self.fields.get(key).and_then(Value::as_f64)
    }

    /// Receipt time as ISO-8601 text.
    pub fn iso_timestamp(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len() + 1))?;
        for (key, value) in &self.fields {
            map.serialize_entry(key, value)?;
        }
        map.serialize_entry(TIMESTAMP_KEY, &self.iso_timestamp())?;
        map.end()
    }
}
