//! Module for connecting to a postgres database and storing the records received from the
//! broker in it.
//!
//! Every collection is a table holding the receipt time and the raw json document.
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use openssl::ssl::{SslConnector, SslFiletype, SslMethod, SslVerifyMode};
use postgres::{Client, NoTls, Row};
use postgres_openssl::MakeTlsConnector;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::record::{Collection, Record};
use crate::store::{RecordStore, StoreError, WindowSummary, ALERT_TYPE_BURGLAR, ALERT_TYPE_FIRE};

static SQL_CREATE_COLLECTION: &str = include_str!("sql/create_collection.sql");

static SQL_INSERT_RECORD: &str = include_str!("sql/insert_record.sql");

static SQL_SELECT_SINCE: &str = include_str!("sql/select_since.sql");
static SQL_SELECT_LATEST: &str = include_str!("sql/select_latest.sql");

static SQL_SUMMARIZE_READINGS: &str = include_str!("sql/summarize_readings.sql");
static SQL_SUMMARIZE_ALERTS: &str = include_str!("sql/summarize_alerts.sql");

#[derive(Serialize, Deserialize, Debug, Clone)]
/// Struct modeling the parameters required for a database connection.
///
/// This includes SSL/TLS encryption.
pub struct DatabaseParameters
{
    /// Connection string, either `key=value` pairs or a `postgresql://` url.
    pub url: String,
    /// The database to open on the server. Overrides a name given in `url`.
    pub database: String,
    /// Flag to enable tls for the database server connection.
    #[serde(default)]
    pub tls_enable: bool,
    /// Parameters for the tls connection to the database server.
    #[serde(default)]
    pub tls_params: Option<DatabaseTlsParameters>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
/// Struct for the parameters required for a tls connection to the database.
pub struct DatabaseTlsParameters {
    /// The path to the server certificate for TLS encryption.
    pub server_ca_path: String,
    /// The path to the client certificate for TLS encryption.
    pub client_cert_path: String,
    /// The path to the client key for TLS encryption.
    pub client_key_path: String,
    /// Verify the server certificate against `server_ca_path`.
    #[serde(default = "default_verify_server")]
    pub verify_server: bool,
}

fn default_verify_server() -> bool {
    true
}

/// Record store backed by a single postgres connection.
pub struct PostgresStore {
    client: Mutex<Client>,
}

impl std::fmt::Debug for PostgresStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresStore").finish_non_exhaustive()
    }
}

impl From<postgres::Error> for StoreError {
    fn from(err: postgres::Error) -> Self {
        if err.is_closed() {
            StoreError::Connect(err.to_string())
        } else {
            StoreError::Query(err.to_string())
        }
    }
}

fn make_tls_connector(tls_params: &DatabaseTlsParameters) -> Result<MakeTlsConnector, StoreError> {
    let mut builder = SslConnector::builder(SslMethod::tls())
        .map_err(|err| StoreError::Tls(format!("could not create ssl connection builder: {}", err)))?;

    if !tls_params.verify_server {
        log::warn!(target: "roomsafed::db", "Server certificate verification is disabled!");
        builder.set_verify(SslVerifyMode::NONE);
    }

    builder
        .set_ca_file(&tls_params.server_ca_path)
        .map_err(|err| StoreError::Tls(format!("could not set ssl ca file: {}", err)))?;
    builder
        .set_certificate_file(&tls_params.client_cert_path, SslFiletype::PEM)
        .map_err(|err| StoreError::Tls(format!("could not set ssl client cert file: {}", err)))?;
    builder
        .set_private_key_file(&tls_params.client_key_path, SslFiletype::PEM)
        .map_err(|err| StoreError::Tls(format!("could not set ssl client key file: {}", err)))?;

    Ok(MakeTlsConnector::new(builder.build()))
}

fn with_table(statement: &str, collection: Collection) -> String {
    statement.replace("{table}", collection.table_name())
}

fn record_from_row(row: &Row) -> Result<Record, StoreError> {
    let timestamp: DateTime<Utc> = row
        .try_get("received_at")
        .map_err(|err| StoreError::Decode(err.to_string()))?;
    let document: Value = row
        .try_get("document")
        .map_err(|err| StoreError::Decode(err.to_string()))?;

    match document {
        Value::Object(fields) => Ok(Record::stamp(fields, timestamp)),
        other => Err(StoreError::Decode(format!("document is not an object: {}", other))),
    }
}

fn count_column(row: &Row, column: &str) -> Result<u64, StoreError> {
    let count: i64 = row
        .try_get(column)
        .map_err(|err| StoreError::Decode(err.to_string()))?;
    Ok(count.max(0) as u64)
}

fn optional_column(row: &Row, column: &str) -> Result<Option<f64>, StoreError> {
    row.try_get(column)
        .map_err(|err| StoreError::Decode(err.to_string()))
}

impl PostgresStore {
    /// Opens a connection to the database.
    ///
    /// # Errors
    ///
    /// * The connection string cannot be parsed.
    ///
    /// * The files for the TLS connection cannot be loaded.
    ///
    /// * The connection cannot be established or the user is not authorized for the database.
    pub fn connect(parameters: &DatabaseParameters) -> Result<PostgresStore, StoreError> {
        let mut config: postgres::Config = parameters
            .url
            .parse()
            .map_err(|err: postgres::Error| StoreError::Connect(format!("invalid connection string: {}", err)))?;
        config.dbname(&parameters.database);
        config.application_name("roomsafed");

        let client = if parameters.tls_enable {
            let tls_params = parameters
                .tls_params
                .as_ref()
                .ok_or_else(|| StoreError::Tls(String::from("TLS enabled but no TLS parameters specified")))?;
            config
                .connect(make_tls_connector(tls_params)?)
                .map_err(|err| StoreError::Connect(err.to_string()))?
        } else {
            config
                .connect(NoTls)
                .map_err(|err| StoreError::Connect(err.to_string()))?
        };

        log::info!(target: "roomsafed::db", "Database connection to \'{}\' established!", parameters.database);
        Ok(PostgresStore {
            client: Mutex::new(client),
        })
    }

    fn client(&self) -> Result<MutexGuard<'_, Client>, StoreError> {
        self.client.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl RecordStore for PostgresStore {
    fn ensure_collections(&self) -> Result<(), StoreError> {
        let mut client = self.client()?;
        for collection in Collection::ALL.iter() {
            client.batch_execute(&with_table(SQL_CREATE_COLLECTION, *collection))?;
            log::debug!(target: "roomsafed::db", "Collection \'{}\' is ready", collection);
        }
        Ok(())
    }

    fn insert(&self, collection: Collection, record: &Record) -> Result<(), StoreError> {
        let document = Value::Object(record.fields.clone());
        self.client()?.execute(
            with_table(SQL_INSERT_RECORD, collection).as_str(),
            &[&record.timestamp, &document],
        )?;
        Ok(())
    }

    fn find_since(
        &self,
        collection: Collection,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Record>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = self.client()?.query(
            with_table(SQL_SELECT_SINCE, collection).as_str(),
            &[&since, &limit],
        )?;
        rows.iter().map(record_from_row).collect()
    }

    fn find_latest(&self, collection: Collection) -> Result<Option<Record>, StoreError> {
        let row = self
            .client()?
            .query_opt(with_table(SQL_SELECT_LATEST, collection).as_str(), &[])?;
        row.as_ref().map(record_from_row).transpose()
    }

    fn summarize(&self, since: DateTime<Utc>) -> Result<WindowSummary, StoreError> {
        let mut client = self.client()?;
        let readings = client.query_one(SQL_SUMMARIZE_READINGS, &[&since])?;
        let alerts = client.query_one(
            SQL_SUMMARIZE_ALERTS,
            &[&since, &ALERT_TYPE_FIRE, &ALERT_TYPE_BURGLAR],
        )?;

        Ok(WindowSummary {
            total_readings: count_column(&readings, "total_readings")?,
            avg_temp: optional_column(&readings, "avg_temp")?,
            max_temp: optional_column(&readings, "max_temp")?,
            avg_humidity: optional_column(&readings, "avg_humidity")?,
            total_alerts: count_column(&alerts, "total_alerts")?,
            fire_alerts: count_column(&alerts, "fire_alerts")?,
            burglar_alerts: count_column(&alerts, "burglar_alerts")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statements_target_the_collection_table() {
        let statement = with_table(SQL_SELECT_SINCE, Collection::Alerts);
        assert!(statement.contains("FROM alerts"));
        assert!(!statement.contains("{table}"));

        let schema = with_table(SQL_CREATE_COLLECTION, Collection::StatusLogs);
        assert!(schema.contains("CREATE TABLE IF NOT EXISTS status_logs"));
        assert!(schema.contains("status_logs_received_at_idx"));
    }

    #[test]
    fn tls_parameters_verify_by_default() {
        let parameters: DatabaseParameters = serde_yaml::from_str(
            "url: host=db user=roomsafed\n\
             database: room_safety\n\
             tls_enable: true\n\
             tls_params:\n  \
               server_ca_path: /etc/ssl/ca.pem\n  \
               client_cert_path: /etc/ssl/client.pem\n  \
               client_key_path: /etc/ssl/client.key\n",
        )
        .unwrap();

        let tls_params = parameters.tls_params.unwrap();
        assert!(tls_params.verify_server);
        assert_eq!(tls_params.server_ca_path, "/etc/ssl/ca.pem");
    }
}
