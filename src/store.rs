//! The persistence seam shared by the ingest listener and the query api.
use chrono::{DateTime, Utc};

use crate::record::{Collection, Record};

/// Alert type counted as `fire_alerts`.
pub const ALERT_TYPE_FIRE: &str = "fire";
/// Alert type counted as `burglar_alerts`.
pub const ALERT_TYPE_BURGLAR: &str = "burglar";

#[derive(Debug, thiserror::Error)]
/// Failures reported by a record store.
pub enum StoreError {
    /// The store could not be reached.
    #[error("could not connect to the store: {0}")]
    Connect(String),
    /// The TLS setup for the store connection failed.
    #[error("could not set up tls for the store: {0}")]
    Tls(String),
    /// A statement was rejected or the connection broke while running it.
    #[error("store query failed: {0}")]
    Query(String),
    /// A stored row could not be turned back into a record.
    #[error("stored row cannot be decoded: {0}")]
    Decode(String),
    /// Another thread panicked while holding the store connection.
    #[error("store connection lock poisoned")]
    Poisoned,
}

#[derive(Debug, Clone, Default, PartialEq)]
/// Raw aggregates over one window, before rounding.
pub struct WindowSummary {
    /// Number of sensor readings in the window.
    pub total_readings: u64,
    /// Mean of the numeric `temp` values, `None` when there are none.
    pub avg_temp: Option<f64>,
    /// Maximum of the numeric `temp` values.
    pub max_temp: Option<f64>,
    /// Mean of the numeric `humidity` values.
    pub avg_humidity: Option<f64>,
    /// Number of alerts in the window.
    pub total_alerts: u64,
    /// Alerts whose `type` is `fire`.
    pub fire_alerts: u64,
    /// Alerts whose `type` is `burglar`.
    pub burglar_alerts: u64,
}

/// Append-only storage for the three record collections.
///
/// Implementations must be usable from the listener thread and from the api's blocking pool at
/// the same time.
pub trait RecordStore: Send + Sync {
    /// Creates the collections and their timestamp indexes if they do not exist yet.
    fn ensure_collections(&self) -> Result<(), StoreError>;

    /// Appends one record.
    fn insert(&self, collection: Collection, record: &Record) -> Result<(), StoreError>;

    /// Records with `timestamp >= since`, newest first, at most `limit` of them.
    fn find_since(
        &self,
        collection: Collection,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Record>, StoreError>;

    /// The most recent record of a collection, regardless of its age.
    fn find_latest(&self, collection: Collection) -> Result<Option<Record>, StoreError>;

    /// Aggregates readings and alerts with `timestamp >= since` in one pass per collection.
    fn summarize(&self, since: DateTime<Utc>) -> Result<WindowSummary, StoreError>;
}
