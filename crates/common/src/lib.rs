//! battbench Common Utilities
//!
//! Shared infrastructure for all battbench crates:
//! - Error types and result aliases
//! - Tracing/logging initialization
//! - Standard directory layout and configuration

pub mod config;
pub mod error;
pub mod logging;

pub use config::*;
pub use error::*;
