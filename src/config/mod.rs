//! Configuration module for assetflow
//!
//! Provides types and parsing for the `assetflow.toml` project configuration
//! and the environment-provided credentials.

pub mod env;
pub mod loader;
pub mod schema;

pub use env::*;
pub use loader::{default_config, load_config, ConfigError};
pub use schema::*;
