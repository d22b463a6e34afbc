pub mod config;
pub mod coordination;
pub mod service;
pub mod store;
pub mod telemetry;
