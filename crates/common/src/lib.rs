//! Layercut Common Utilities
//!
//! Shared infrastructure for all Layercut crates:
//! - Error types, failure classification and result aliases
//! - Tracing/logging initialization
//! - Configuration loading

pub mod config;
pub mod error;
pub mod logging;

pub use config::*;
pub use error::*;
