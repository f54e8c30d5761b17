//! miend — The facial-identity service daemon.
//!
//! Wires the matching engine from mien-core to a SQLite-backed similarity
//! store and exposes it over HTTP: `/register_patient`, `/search_patient`
//! and `/health`. The embedding extractor (and the optional liveness stack)
//! run on the mien-vision thread.

pub mod config;
pub mod http;
pub mod store;

pub use config::Config;
pub use store::SqliteStore;
