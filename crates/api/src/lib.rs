//! HTTP API: job submission front end, configuration, and runtime wiring.

pub mod app;
pub mod config;
