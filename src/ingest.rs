//! Turns one broker message into one stored record.
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::record::{Collection, Record};
use crate::store::{RecordStore, StoreError};

#[derive(Debug, thiserror::Error)]
/// Reasons a single message was not stored.
pub enum IngestError {
    /// The message arrived on a topic without a destination collection.
    #[error("no collection for topic \'{0}\'")]
    UnknownTopic(String),
    /// The payload is not a UTF-8 encoded json object.
    #[error("payload cannot be decoded: {0}")]
    Decode(String),
    /// The store rejected the record.
    #[error("record cannot be stored: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq)]
/// A record that was written, with the collection it went to.
pub struct Ingested {
    pub collection: Collection,
    pub record: Record,
}

impl Ingested {
    /// One line describing the stored record, for the log.
    pub fn summary(&self) -> String {
        let show = |key: &str| match self.record.field(key) {
            Some(Value::String(text)) => text.clone(),
            Some(value) => value.to_string(),
            None => String::from("-"),
        };

        match self.collection {
            Collection::SensorReadings => format!("Sensor reading saved: temp={}", show("temp")),
            Collection::StatusLogs => format!(
                "Status saved: door={}, occupants={}",
                show("door"),
                show("occupant_count")
            ),
            Collection::Alerts => format!("Alert saved: {} - {}", show("type"), show("message")),
        }
    }
}

/// Decodes a payload into a json object.
///
/// Trailing whitespace is ignored, anything that is not a json object is rejected.
pub fn decode_payload(payload: &[u8]) -> Result<serde_json::Map<String, Value>, IngestError> {
    let text = std::str::from_utf8(payload)
        .map_err(|err| IngestError::Decode(format!("non UTF-8 data: {}", err)))?;

    match serde_json::from_str::<Value>(text.trim_end()) {
        Ok(Value::Object(fields)) => Ok(fields),
        Ok(other) => Err(IngestError::Decode(format!(
            "expected a json object, got \'{}\'",
            other
        ))),
        Err(err) => Err(IngestError::Decode(err.to_string())),
    }
}

/// Routes, decodes, stamps and stores a single message.
///
/// Exactly one record is written on success and none on failure.
pub fn handle_message(
    store: &dyn RecordStore,
    topic: &str,
    payload: &[u8],
    received_at: DateTime<Utc>,
) -> Result<Ingested, IngestError> {
    let collection =
        Collection::for_topic(topic).ok_or_else(|| IngestError::UnknownTopic(topic.to_string()))?;
    let fields = decode_payload(payload)?;
    let record = Record::stamp(fields, received_at);

    store.insert(collection, &record)?;

    Ok(Ingested { collection, record })
}

/// Handles a message and logs the outcome. Never fails, so the caller can keep consuming.
pub fn ingest_and_log(store: &dyn RecordStore, topic: &str, payload: &[u8]) -> bool {
    match handle_message(store, topic, payload, Utc::now()) {
        Ok(ingested) => {
            log::info!(target: "roomsafed::ingest", "{}", ingested.summary());
            true
        }
        Err(err @ IngestError::Store(_)) => {
            log::error!(target: "roomsafed::ingest", "Failed to process message on \'{}\': {}", topic, err);
            false
        }
        Err(err) => {
            log::warn!(target: "roomsafed::ingest", "Dropped message on \'{}\': {}", topic, err);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryStore;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    struct FailingStore;

    impl RecordStore for FailingStore {
        fn ensure_collections(&self) -> Result<(), StoreError> {
            Ok(())
        }

        fn insert(&self, _: Collection, _: &Record) -> Result<(), StoreError> {
            Err(StoreError::Query(String::from("disk full")))
        }

        fn find_since(&self, _: Collection, _: DateTime<Utc>, _: usize) -> Result<Vec<Record>, StoreError> {
            Ok(Vec::new())
        }

        fn find_latest(&self, _: Collection) -> Result<Option<Record>, StoreError> {
            Ok(None)
        }

        fn summarize(&self, _: DateTime<Utc>) -> Result<crate::store::WindowSummary, StoreError> {
            Ok(Default::default())
        }
    }

    fn received_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 9, 15, 0).unwrap()
    }

    #[test]
    fn stores_sensor_reading_with_receipt_time() {
        let store = MemoryStore::new();
        let published_at = received_at() - Duration::seconds(2);

        let ingested = handle_message(
            &store,
            "room/sensors",
            br#"{"temp": 22.5, "humidity": 55, "timestamp": 12345}"#,
            received_at(),
        )
        .unwrap();

        assert_eq!(ingested.collection, Collection::SensorReadings);
        let latest = store.find_latest(Collection::SensorReadings).unwrap().unwrap();
        assert_eq!(latest.number("temp"), Some(22.5));
        assert_eq!(latest.number("humidity"), Some(55.0));
        assert_eq!(latest.timestamp, received_at());
        assert!(latest.timestamp > published_at);
        assert!(latest.field("timestamp").is_none());
    }

    #[test]
    fn routes_status_and_alerts() {
        let store = MemoryStore::new();

        handle_message(&store, "room/status", br#"{"door": "open", "occupant_count": 2}"#, received_at())
            .unwrap();
        handle_message(&store, "room/alert", br#"{"type": "fire", "message": "smoke detected"}"#, received_at())
            .unwrap();

        assert_eq!(store.count(Collection::SensorReadings), 0);
        assert_eq!(store.count(Collection::StatusLogs), 1);
        assert_eq!(store.count(Collection::Alerts), 1);
    }

    #[test]
    fn malformed_messages_create_nothing() {
        let store = MemoryStore::new();
        let payloads: [&[u8]; 5] = [b"{temp: 21", b"", b"[1, 2, 3]", b"42", &[0xff, 0xfe, 0x7b]];

        for payload in payloads.iter() {
            let result = handle_message(&store, "room/sensors", payload, received_at());
            assert!(matches!(result, Err(IngestError::Decode(_))), "{:?}", result);
        }

        for collection in Collection::ALL.iter() {
            assert_eq!(store.count(*collection), 0);
        }

        handle_message(&store, "room/sensors", b"{\"temp\": 19.0}\r\n", received_at()).unwrap();
        assert_eq!(store.count(Collection::SensorReadings), 1);
    }

    #[test]
    fn unknown_topic_is_rejected() {
        let store = MemoryStore::new();

        let result = handle_message(&store, "room/other", b"{}", received_at());

        assert!(matches!(result, Err(IngestError::UnknownTopic(ref topic)) if topic == "room/other"));
        assert_eq!(store.count(Collection::SensorReadings), 0);
    }

    #[test]
    fn store_failures_are_reported_not_raised() {
        let result = handle_message(&FailingStore, "room/alert", br#"{"type": "burglar"}"#, received_at());
        assert!(matches!(result, Err(IngestError::Store(_))));

        assert!(!ingest_and_log(&FailingStore, "room/alert", br#"{"type": "burglar"}"#));
        assert!(ingest_and_log(&MemoryStore::new(), "room/alert", br#"{"type": "burglar"}"#));
    }

    #[test]
    fn summary_names_the_interesting_fields() {
        let ingested = Ingested {
            collection: Collection::Alerts,
            record: Record::stamp(decode_payload(br#"{"type": "fire", "message": "smoke detected"}"#).unwrap(), received_at()),
        };
        assert_eq!(ingested.summary(), "Alert saved: fire - smoke detected");

        let ingested = Ingested {
            collection: Collection::StatusLogs,
            record: Record::stamp(decode_payload(br#"{"door": false}"#).unwrap(), received_at()),
        };
        assert_eq!(ingested.summary(), "Status saved: door=false, occupants=-");
    }
}
