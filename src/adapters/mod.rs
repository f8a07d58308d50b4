//! Concrete adapter implementations for ports.

pub mod csv_catalog;
pub mod file_config_adapter;
pub mod sources;
pub mod sqlite_store;
