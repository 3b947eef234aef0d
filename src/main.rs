use std::process::exit;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use clap::Parser;
use tokio::sync::Notify;

use roomsafed::api::{self, AppState};
use roomsafed::config::{Cli, Configuration};
use roomsafed::database::{DatabaseParameters, PostgresStore};
use roomsafed::logging;
use roomsafed::memory_store::MemoryStore;
use roomsafed::mqtt;
use roomsafed::store::{RecordStore, StoreError};

/// Opens one store handle for the listener and one for the api.
fn open_stores(
    parameters: &DatabaseParameters,
    in_memory: bool,
) -> Result<(Arc<dyn RecordStore>, Arc<dyn RecordStore>), StoreError> {
    if in_memory {
        log::warn!(target: "roomsafed", "Using the in-memory store, records are lost on exit!");
        let store: Arc<dyn RecordStore> = Arc::new(MemoryStore::new());
        return Ok((Arc::clone(&store), store));
    }

    let listener_store: Arc<dyn RecordStore> = Arc::new(PostgresStore::connect(parameters)?);
    let api_store: Arc<dyn RecordStore> = Arc::new(PostgresStore::connect(parameters)?);
    Ok((listener_store, api_store))
}

fn main() {
    let cli = Cli::parse();

    if let Err(err) = logging::init(&cli.log_config) {
        eprintln!("{}", err);
        exit(-100);
    }

    log::info!(target: "roomsafed", "Room Safety Checker - Backend Service");

    let configuration = match Configuration::load(&cli) {
        Ok(configuration) => configuration,
        Err(err) => {
            log::error!(target: "roomsafed", "{}", err);
            exit(101);
        }
    };

    let (listener_store, api_store) =
        match open_stores(&configuration.database_connection_parameters, cli.memory_store) {
            Ok(stores) => stores,
            Err(err) => {
                log::error!(target: "roomsafed", "Cannot open the record store: \'{}\'", err);
                exit(102);
            }
        };

    if let Err(err) = listener_store.ensure_collections() {
        log::error!(target: "roomsafed", "Cannot create the collections: \'{}\'", err);
        exit(103);
    }

    let terminate_programm = Arc::new(AtomicBool::new(false));
    let terminate_mqtt_thread = Arc::clone(&terminate_programm);
    let terminate_signal = Arc::clone(&terminate_programm);
    let shutdown = Arc::new(Notify::new());
    let shutdown_signal = Arc::clone(&shutdown);

    let mqtt_configuration = configuration.mqtt_connection_parameters.clone();
    let mqtt_thread = match thread::Builder::new()
        .name("mqtt".to_string())
        .spawn(move || {
            mqtt::thread_mqtt(listener_store, terminate_mqtt_thread, mqtt_configuration);
        }) {
        Ok(mqtt_handle) => mqtt_handle,
        Err(err) => {
            log::error!(target: "roomsafed", "Cannot start the mqtt thread: \'{}\'", err);
            exit(201);
        }
    };

    if let Err(err) = ctrlc::set_handler(move || {
        log::info!(target: "roomsafed", "Termination signal received!");
        terminate_signal.store(true, Ordering::SeqCst);
        shutdown_signal.notify_one();
    }) {
        log::error!(target: "roomsafed", "Cannot set the termination handler: \'{}\'", err);
        exit(202);
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            log::error!(target: "roomsafed", "Cannot start the api runtime: \'{}\'", err);
            exit(203);
        }
    };

    let state = AppState::new(
        api_store,
        configuration.mqtt_connection_parameters.address.clone(),
        configuration.database_connection_parameters.database.clone(),
    );
    let served = runtime.block_on(api::serve(state, configuration.api_parameters.port, shutdown));

    terminate_programm.store(true, Ordering::SeqCst);
    match mqtt_thread.join() {
        Ok(_) => log::debug!(target: "roomsafed", "Joined mqtt thread!"),
        Err(_) => {
            log::error!(target: "roomsafed", "Could not join the mqtt thread!");
            exit(301);
        }
    };

    if let Err(err) = served {
        log::error!(target: "roomsafed", "Api server failed: \'{}\'", err);
        exit(302);
    }

    log::info!(target: "roomsafed", "Exiting");
    exit(0);
}
