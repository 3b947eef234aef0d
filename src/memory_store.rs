//! In-process record store, used by the tests and by `--memory-store` runs without a database.
use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::record::{Collection, Record};
use crate::store::{RecordStore, StoreError, WindowSummary, ALERT_TYPE_BURGLAR, ALERT_TYPE_FIRE};

#[derive(Debug, Default)]
/// Record store keeping every collection in a vector.
pub struct MemoryStore {
    collections: Mutex<HashMap<Collection, Vec<Record>>>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }

    /// Number of records in a collection.
    pub fn count(&self, collection: Collection) -> usize {
        match self.collections.lock() {
            Ok(collections) => collections.get(&collection).map_or(0, Vec::len),
            Err(_) => 0,
        }
    }

    fn newest_first(records: &[Record], since: Option<DateTime<Utc>>) -> Vec<Record> {
        let mut selected: Vec<Record> = records
            .iter()
            .rev()
            .filter(|record| since.map_or(true, |since| record.timestamp >= since))
            .cloned()
            .collect();
        // stable, so equal timestamps stay in reverse insertion order
        selected.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        selected
    }
}

#[derive(Default)]
struct Mean {
    sum: f64,
    count: u64,
}

impl Mean {
    fn add(&mut self, value: Option<f64>) {
        if let Some(value) = value {
            self.sum += value;
            self.count += 1;
        }
    }

    fn value(&self) -> Option<f64> {
        if self.count == 0 {
            None
        } else {
            Some(self.sum / self.count as f64)
        }
    }
}

impl RecordStore for MemoryStore {
    fn ensure_collections(&self) -> Result<(), StoreError> {
        let mut collections = self.collections.lock().map_err(|_| StoreError::Poisoned)?;
        for collection in Collection::ALL.iter() {
            collections.entry(*collection).or_default();
        }
        Ok(())
    }

    fn insert(&self, collection: Collection, record: &Record) -> Result<(), StoreError> {
        let mut collections = self.collections.lock().map_err(|_| StoreError::Poisoned)?;
        collections.entry(collection).or_default().push(record.clone());
        Ok(())
    }

    fn find_since(
        &self,
        collection: Collection,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Record>, StoreError> {
        let collections = self.collections.lock().map_err(|_| StoreError::Poisoned)?;
        let mut records = collections
            .get(&collection)
            .map(|records| MemoryStore::newest_first(records, Some(since)))
            .unwrap_or_default();
        records.truncate(limit);
        Ok(records)
    }

    fn find_latest(&self, collection: Collection) -> Result<Option<Record>, StoreError> {
        let collections = self.collections.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(collections
            .get(&collection)
            .and_then(|records| MemoryStore::newest_first(records, None).into_iter().next()))
    }

    fn summarize(&self, since: DateTime<Utc>) -> Result<WindowSummary, StoreError> {
        let collections = self.collections.lock().map_err(|_| StoreError::Poisoned)?;
        let mut summary = WindowSummary::default();

        let mut temp = Mean::default();
        let mut humidity = Mean::default();
        let readings = collections.get(&Collection::SensorReadings).into_iter().flatten();
        for reading in readings.filter(|record| record.timestamp >= since) {
            summary.total_readings += 1;
            let value = reading.number("temp");
            temp.add(value);
            if let Some(value) = value {
                summary.max_temp = Some(summary.max_temp.map_or(value, |max| max.max(value)));
            }
            humidity.add(reading.number("humidity"));
        }
        summary.avg_temp = temp.value();
        summary.avg_humidity = humidity.value();

        let alerts = collections.get(&Collection::Alerts).into_iter().flatten();
        for alert in alerts.filter(|record| record.timestamp >= since) {
            summary.total_alerts += 1;
            match alert.field("type").and_then(|value| value.as_str()) {
                Some(ALERT_TYPE_FIRE) => summary.fire_alerts += 1,
                Some(ALERT_TYPE_BURGLAR) => summary.burglar_alerts += 1,
                _ => {}
            }
        }

        Ok(summary)
    }
}
