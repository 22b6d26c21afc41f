//! Application configuration and constants.
//!
//! This module provides:
//! - Configuration constants (timeouts, cache TTLs, filesystem names)
//! - Configuration types (library-only, no CLI dependencies)

mod constants;
mod types;

// Re-export all constants
pub use constants::*;
pub use types::{Config, LogFormat, LogLevel, SamplerKind};
