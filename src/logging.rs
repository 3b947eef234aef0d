//! Logger setup.
use std::path::Path;

use log::LevelFilter;
use log4rs::append::console::ConsoleAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;

const CONSOLE_PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S)} {h({l:<5})} {t} - {m}{n}";

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("could not create logger from yaml configuration: {0}")]
    File(String),
    #[error("invalid logger configuration: {0}")]
    Config(#[from] log4rs::config::runtime::ConfigErrors),
    #[error("logger already initialized: {0}")]
    Init(#[from] log::SetLoggerError),
}

/// Console only configuration used when no configuration file is present.
pub fn console_config(level: LevelFilter) -> Result<Config, LoggingError> {
    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(CONSOLE_PATTERN)))
        .build();

    Ok(Config::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .build(Root::builder().appender("stdout").build(level))?)
}

/// Initializes log4rs from `path`, or logs to the console at `info` if the file does not exist.
pub fn init(path: &Path) -> Result<(), LoggingError> {
    if path.exists() {
        log4rs::init_file(path, Default::default()).map_err(|err| LoggingError::File(err.to_string()))?;
        log::debug!(target: "roomsafed", "Logger configured from \'{}\'", path.display());
    } else {
        log4rs::init_config(console_config(LevelFilter::Info)?)?;
        log::debug!(target: "roomsafed", "No logger configuration at \'{}\', logging to console", path.display());
    }
    Ok(())
}
