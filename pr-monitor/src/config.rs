//! Processor configuration.
//!
//! This module handles parsing the processor's TOML configuration and
//! validating it before any processing starts.

mod error;
mod processor;

pub use error::ConfigError;
pub use processor::ProcessorConfig;
