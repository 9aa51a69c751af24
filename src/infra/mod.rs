//! Infrastructure - configuration and stats
//!
//! This module contains infrastructure concerns:
//! - `config` - Application configuration (TOML loading, defaults)
//! - `stats` - Lock-free poll and dispatch counters

pub mod config;
pub mod stats;

// Re-export commonly used types
pub use config::{Config, PortSelection};
pub use stats::{Stats, StatsSnapshot};
