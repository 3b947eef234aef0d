//! Command line, environment and file configuration.
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::database::DatabaseParameters;
use crate::mqtt::MqttParams;

#[derive(Parser, Debug, Clone)]
#[command(name = "roomsafed", version, about = "Stores room sensor, status and alert messages and serves them to the dashboard.")]
/// Command line arguments. Every setting can also be given through its environment variable.
pub struct Cli {
    /// YAML configuration file. When given, it replaces all connection settings below.
    #[arg(short, long, env = "ROOMSAFED_CONFIG")]
    pub config: Option<PathBuf>,

    /// log4rs YAML configuration.
    #[arg(long, env = "LOG_CONFIG", default_value = "resources/log.yml")]
    pub log_config: PathBuf,

    /// Host name of the mqtt broker.
    #[arg(long, env = "MQTT_BROKER", default_value = "localhost")]
    pub mqtt_broker: String,

    /// Port of the mqtt broker.
    #[arg(long, env = "MQTT_PORT", default_value_t = 1883)]
    pub mqtt_port: u16,

    /// QoS of the channel subscriptions.
    #[arg(long, env = "MQTT_QOS", default_value_t = 0, value_parser = clap::value_parser!(i32).range(0..=2))]
    pub mqtt_qos: i32,

    /// Database connection string.
    #[arg(long, env = "DATABASE_URL", default_value = "host=localhost user=postgres")]
    pub database_url: String,

    /// Name of the database holding the collections.
    #[arg(long, env = "DATABASE_NAME", default_value = "room_safety")]
    pub database_name: String,

    /// Port the http api listens on.
    #[arg(long, env = "API_PORT", default_value_t = 5000)]
    pub api_port: u16,

    /// Keep records in memory instead of the database.
    #[arg(long)]
    pub memory_store: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
/// Parameters of the http api.
pub struct ApiParameters {
    /// The port the api listens on, on all interfaces.
    #[serde(default = "default_api_port")]
    pub port: u16,
}

fn default_api_port() -> u16 {
    5000
}

impl Default for ApiParameters {
    fn default() -> Self {
        ApiParameters {
            port: default_api_port(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
/// The complete daemon configuration.
pub struct Configuration {
    pub mqtt_connection_parameters: MqttParams,
    pub database_connection_parameters: DatabaseParameters,
    #[serde(default)]
    pub api_parameters: ApiParameters,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read the configuration file \'{path}\': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot deserialize the configuration: {0}")]
    Parse(#[from] serde_yaml::Error),
}

impl Configuration {
    /// Reads a YAML configuration file.
    pub fn from_file(path: &Path) -> Result<Configuration, ConfigError> {
        let read_error = |source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        };

        let mut configuration_file = File::open(path).map_err(read_error)?;
        let mut configuration_string = String::new();
        configuration_file
            .read_to_string(&mut configuration_string)
            .map_err(read_error)?;

        Ok(serde_yaml::from_str::<Configuration>(configuration_string.as_str())?)
    }

    /// Builds the configuration from flags, environment and defaults.
    pub fn from_cli(cli: &Cli) -> Configuration {
        Configuration {
            mqtt_connection_parameters: MqttParams {
                address: cli.mqtt_broker.clone(),
                port: cli.mqtt_port,
                tls_enable: false,
                tls_params: None,
                qos: cli.mqtt_qos,
            },
            database_connection_parameters: DatabaseParameters {
                url: cli.database_url.clone(),
                database: cli.database_name.clone(),
                tls_enable: false,
                tls_params: None,
            },
            api_parameters: ApiParameters { port: cli.api_port },
        }
    }

    /// The file configuration if one is given, the command line otherwise.
    pub fn load(cli: &Cli) -> Result<Configuration, ConfigError> {
        match &cli.config {
            Some(path) => Configuration::from_file(path),
            None => Ok(Configuration::from_cli(cli)),
        }
    }
}
