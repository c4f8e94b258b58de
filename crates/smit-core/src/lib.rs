//! # smit-core
//!
//! Core types shared by the Smit notification trigger crates:
//! - Common error type and result alias
//! - Environment-driven configuration (mail relay, web root, gpg)

pub mod config;
pub mod error;

pub use config::{AppConfig, ConfigError};
pub use error::*;
