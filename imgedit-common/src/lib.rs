//! # imgedit common library
//!
//! Shared code for the image edit session engine:
//! - Error type used by the storage layer
//! - TOML configuration and root folder resolution
//! - Database initialization and schema migrations
//! - Timestamp helpers for the SQLite text columns

pub mod config;
pub mod db;
pub mod error;
pub mod time;

pub use config::{EngineConfig, LoggingConfig, TomlConfig};
pub use error::{Error, Result};
