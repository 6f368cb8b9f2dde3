//! Configuration module
//!
//! File and environment configuration for the Web API client

#[allow(clippy::module_inception)]
pub mod config;

pub use config::{Config, ConfigError, RuntimeConfig};
