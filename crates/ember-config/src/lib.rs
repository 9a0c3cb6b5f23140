//! Configuration system for the Ember server.
//!
//! Settings persist to disk as RON files, take CLI overrides via clap, and
//! tolerate missing or extra fields across versions.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{Config, LogConfig, NetConfig, StatsConfig};
pub use error::ConfigError;
