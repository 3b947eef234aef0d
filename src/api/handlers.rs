use std::sync::Arc;

use axum::{
    extract::{Query, State},
    Json,
};
use chrono::Utc;
use serde::Serialize;

use super::error::ApiError;
use super::params::{WindowParams, DEFAULT_ALERT_LIMIT, DEFAULT_SENSOR_LIMIT};
use super::AppState;
use crate::record::{Collection, Record};
use crate::statistics::Statistics;
use crate::store::{RecordStore, StoreError};

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Health {
    pub status: &'static str,
    pub mqtt_broker: String,
    /// Key name kept for existing dashboards.
    #[serde(rename = "mongo_db")]
    pub database: String,
}

#[derive(Serialize, Debug)]
#[serde(untagged)]
/// The newest record of a collection, or `{}` when the collection is empty.
pub enum Latest {
    Found(Record),
    Empty {},
}

impl From<Option<Record>> for Latest {
    fn from(record: Option<Record>) -> Self {
        match record {
            Some(record) => Latest::Found(record),
            None => Latest::Empty {},
        }
    }
}

/// Query pairs in request order, so repeated keys never reject the request.
type QueryPairs = Query<Vec<(String, String)>>;

/// Runs a store query on the blocking pool.
async fn query_store<T, F>(state: &AppState, query: F) -> Result<T, ApiError>
where
    F: FnOnce(&dyn RecordStore) -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    let store = Arc::clone(&state.store);
    let result = tokio::task::spawn_blocking(move || query(store.as_ref())).await?;
    Ok(result?)
}

pub async fn health(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "ok",
        mqtt_broker: state.mqtt_broker.clone(),
        database: state.database.clone(),
    })
}

pub async fn list_sensors(
    State(state): State<AppState>,
    Query(pairs): QueryPairs,
) -> Result<Json<Vec<Record>>, ApiError> {
    let params = WindowParams::from_pairs(&pairs);
    let since = params.since(Utc::now());
    let limit = params.limit(DEFAULT_SENSOR_LIMIT);

    let readings = query_store(&state, move |store| {
        store.find_since(Collection::SensorReadings, since, limit)
    })
    .await?;

    Ok(Json(readings))
}

pub async fn latest_sensor(State(state): State<AppState>) -> Result<Json<Latest>, ApiError> {
    let reading = query_store(&state, |store| store.find_latest(Collection::SensorReadings)).await?;
    Ok(Json(reading.into()))
}

pub async fn list_alerts(
    State(state): State<AppState>,
    Query(pairs): QueryPairs,
) -> Result<Json<Vec<Record>>, ApiError> {
    let params = WindowParams::from_pairs(&pairs);
    let since = params.since(Utc::now());
    let limit = params.limit(DEFAULT_ALERT_LIMIT);

    let alerts = query_store(&state, move |store| {
        store.find_since(Collection::Alerts, since, limit)
    })
    .await?;

    Ok(Json(alerts))
}

pub async fn latest_status(State(state): State<AppState>) -> Result<Json<Latest>, ApiError> {
    let status = query_store(&state, |store| store.find_latest(Collection::StatusLogs)).await?;
    Ok(Json(status.into()))
}

pub async fn stats(
    State(state): State<AppState>,
    Query(pairs): QueryPairs,
) -> Result<Json<Statistics>, ApiError> {
    let params = WindowParams::from_pairs(&pairs);
    let since = params.since(Utc::now());

    let summary = query_store(&state, move |store| store.summarize(since)).await?;

    Ok(Json(Statistics::from_summary(&summary)))
}
