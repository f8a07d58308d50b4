//! Port traits at the engine's seams.

pub mod catalog_port;
pub mod config_port;
pub mod source_port;
pub mod store_port;
