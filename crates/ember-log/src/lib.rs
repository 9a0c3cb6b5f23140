//! Structured logging for the Ember server.
//!
//! Span-based, filterable logging via the `tracing` ecosystem: console
//! output with uptime timestamps and module paths, plus an optional plain
//! file tee when the configuration names a log file.

use ember_config::LogConfig;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber for the server.
///
/// The `RUST_LOG` environment variable takes precedence; otherwise the
/// configured level applies to every target. When `config.file` is set,
/// output is additionally written there without ANSI colors.
///
/// # Examples
///
/// ```no_run
/// use ember_config::LogConfig;
/// use ember_log::init_logging;
///
/// init_logging(&LogConfig::default());
/// ```
pub fn init_logging(config: &LogConfig) {
    let filter_str = if config.level.is_empty() {
        "info".to_string()
    } else {
        config.level.clone()
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_level(true)
        .with_timer(fmt::time::uptime());

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer);

    if let Some(path) = &config.file {
        match std::fs::File::create(path) {
            Ok(log_file) => {
                let file_layer = fmt::layer()
                    .with_writer(log_file)
                    .with_ansi(false)
                    .with_target(true)
                    .with_timer(fmt::time::uptime());
                subscriber.with(file_layer).init();
                return;
            }
            Err(e) => {
                eprintln!("could not open log file {}: {e}", path.display());
            }
        }
    }

    subscriber.init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_from_level() {
        let filter = EnvFilter::new("debug");
        assert!(format!("{filter}").contains("debug"));
    }

    #[test]
    fn test_per_target_filter_parses() {
        let valid_filters = ["info", "debug,ember_net=trace", "warn,ember_server=debug"];
        for filter_str in &valid_filters {
            assert!(
                EnvFilter::try_from(*filter_str).is_ok(),
                "failed to parse filter: {filter_str}"
            );
        }
    }

    #[test]
    fn test_log_file_path_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = LogConfig {
            level: "info".to_string(),
            file: Some(dir.path().join("ember.log")),
        };
        let path = config.file.unwrap();
        assert_eq!(path.file_name().unwrap(), "ember.log");
    }
}
