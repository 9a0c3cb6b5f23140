//! Command-line argument parsing for the Ember server.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// Ember server command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug)]
#[command(name = "ember-server", about = "Ember game session server")]
pub struct CliArgs {
    /// Address to bind the listeners on.
    #[arg(long)]
    pub host: Option<String>,

    /// Port of the first service; further services use consecutive ports.
    #[arg(long)]
    pub port: Option<u16>,

    /// Simultaneous client limit per service.
    #[arg(long)]
    pub max_clients: Option<usize>,

    /// Game ticks per second.
    #[arg(long)]
    pub tick_rate: Option<u32>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log file to write alongside console output.
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(ref host) = args.host {
            self.net.listen_host = host.clone();
        }
        if let Some(port) = args.port {
            self.net.base_port = port;
        }
        if let Some(max) = args.max_clients {
            self.net.max_clients = max;
        }
        if let Some(rate) = args.tick_rate {
            self.net.tick_rate = rate;
        }
        if let Some(ref level) = args.log_level {
            self.log.level = level.clone();
        }
        if let Some(ref file) = args.log_file {
            self.log.file = Some(file.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_args() -> CliArgs {
        CliArgs {
            host: None,
            port: None,
            max_clients: None,
            tick_rate: None,
            log_level: None,
            log_file: None,
            config: None,
        }
    }

    #[test]
    fn test_cli_override() {
        let mut config = Config::default();
        let args = CliArgs {
            host: Some("127.0.0.1".to_string()),
            port: Some(7400),
            ..empty_args()
        };
        config.apply_cli_overrides(&args);
        assert_eq!(config.net.listen_host, "127.0.0.1");
        assert_eq!(config.net.base_port, 7400);
        // Non-overridden fields retain defaults
        assert_eq!(config.net.tick_rate, 20);
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn test_cli_no_override() {
        let original = Config::default();
        let mut config = Config::default();
        config.apply_cli_overrides(&empty_args());
        assert_eq!(config, original);
    }
}
