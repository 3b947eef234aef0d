//! Bridge from the room safety mqtt channels to a database, with a read api for the dashboard.
//!
//! The [`mqtt`] listener stores every message through [`ingest`] into a [`store::RecordStore`],
//! the [`api`] serves the stored records.
pub mod api;
pub mod config;
pub mod database;
pub mod ingest;
pub mod logging;
pub mod memory_store;
pub mod mqtt;
pub mod record;
pub mod statistics;
pub mod store;
