//! Ember game session server.
//!
//! Binds the lobby service on the configured base port and the chat service
//! on the next port, then drives both from one fixed-rate tick loop until a
//! shutdown signal arrives. Traffic totals are dumped periodically.
//!
//! Run with: `cargo run -p ember-server`

mod handlers;

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use ember_config::{CliArgs, Config};
use ember_net::{SessionServer, TcpConfig, TcpTransport};
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

/// Tick period for a configured rate, clamped to 1ms so the interval timer
/// never sees a zero period.
fn tick_period(tick_rate: u32) -> Duration {
    Duration::from_millis(1000 / u64::from(tick_rate.max(1))).max(Duration::from_millis(1))
}

/// Ports for the lobby and chat services; `None` when the base port is at
/// the top of the range.
fn service_ports(base_port: u16) -> Option<(u16, u16)> {
    Some((base_port, base_port.checked_add(1)?))
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();
    let config_dir = args.config.clone().unwrap_or_else(|| PathBuf::from("."));
    let mut config = match Config::load_or_create(&config_dir) {
        Ok(config) => config,
        Err(e) => {
            // Logging is not up yet.
            eprintln!("config unusable ({e}); continuing with defaults");
            Config::default()
        }
    };
    config.apply_cli_overrides(&args);
    ember_log::init_logging(&config.log);

    let host: IpAddr = match config.net.listen_host.parse() {
        Ok(host) => host,
        Err(e) => {
            error!(host = %config.net.listen_host, error = %e, "invalid listen host");
            return ExitCode::FAILURE;
        }
    };
    let tcp_config = TcpConfig {
        max_connections: config.net.max_clients,
        max_frame_payload: config.net.max_frame_payload,
        ..TcpConfig::default()
    };

    let Some((lobby_port, chat_port)) = service_ports(config.net.base_port) else {
        error!(
            base_port = config.net.base_port,
            "base port leaves no room for the chat service"
        );
        return ExitCode::FAILURE;
    };
    let lobby_addr = SocketAddr::new(host, lobby_port);
    let chat_addr = SocketAddr::new(host, chat_port);
    let lobby_transport = match TcpTransport::bind(lobby_addr, tcp_config.clone()).await {
        Ok(transport) => transport,
        Err(e) => {
            error!(error = %e, "cannot start lobby service");
            return ExitCode::FAILURE;
        }
    };
    let chat_transport = match TcpTransport::bind(chat_addr, tcp_config).await {
        Ok(transport) => transport,
        Err(e) => {
            error!(error = %e, "cannot start chat service");
            return ExitCode::FAILURE;
        }
    };

    let mut lobby = SessionServer::new(lobby_transport);
    handlers::register_lobby(&mut lobby);
    let mut chat = SessionServer::new(chat_transport);
    handlers::register_chat(&mut chat);

    info!(
        lobby = %lobby_addr,
        chat = %chat_addr,
        tick_rate = config.net.tick_rate,
        "server ready"
    );

    let mut ticker = tokio::time::interval(tick_period(config.net.tick_rate));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let stats_enabled = config.stats.dump_interval_secs > 0;
    let stats_period = Duration::from_secs(config.stats.dump_interval_secs.max(1));
    let mut stats_timer =
        tokio::time::interval_at(tokio::time::Instant::now() + stats_period, stats_period);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                lobby.process();
                chat.process();
            }
            _ = stats_timer.tick(), if stats_enabled => {
                lobby.take_stats().log("lobby");
                chat.take_stats().log("chat");
            }
            signal = &mut shutdown => {
                if let Err(e) = signal {
                    error!(error = %e, "shutdown signal listener failed; stopping");
                }
                info!("shutdown requested");
                break;
            }
        }
    }

    lobby.shutdown();
    chat.shutdown();
    info!("goodbye");
    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_period_never_zero() {
        assert_eq!(tick_period(20), Duration::from_millis(50));
        assert_eq!(tick_period(0), Duration::from_millis(1000));
        // Rates above 1000 Hz divide down to zero millis; the clamp keeps
        // the interval timer legal.
        assert_eq!(tick_period(1500), Duration::from_millis(1));
        assert_eq!(tick_period(u32::MAX), Duration::from_millis(1));
    }

    #[test]
    fn test_service_ports_reject_top_of_range() {
        assert_eq!(service_ports(9601), Some((9601, 9602)));
        assert_eq!(service_ports(u16::MAX), None);
    }
}
