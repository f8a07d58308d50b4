//! Core domain types and logic: cascade resolution, merging, sync and repair.

pub mod calendar;
pub mod cascade;
pub mod catalog;
pub mod error;
pub mod instrument;
pub mod merge;
pub mod ohlcv;
pub mod orchestrator;
pub mod repair;
pub mod report;
pub mod selection;
pub mod settings;
pub mod source;
pub mod status;
pub mod throttle;
