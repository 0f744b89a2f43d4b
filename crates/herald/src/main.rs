//! Herald binary entry point.
//!
//! Usage: herald [--config <path>] [--gateway-socket <path>]
//!
//! Reads newline-delimited JSON host events from stdin and forwards them to
//! the notification bridge. Ctrl-C or end of input shuts it down.

use clap::Parser;
use herald::{
    DriverConfig, GatewaySessionFactory, Herald, HeraldConfig, HeraldResult, HostEvent, Paths,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};

/// Herald: chat notifications for 3D-printer jobs.
#[derive(Parser, Debug)]
#[command(name = "herald")]
#[command(about = "Chat notifications for 3D-printer job events")]
struct Args {
    /// Path to the config file (defaults to ~/.herald/config.json).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to the chat gateway socket.
    #[arg(long, env = "HERALD_GATEWAY_SOCKET")]
    gateway_socket: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    /// Overrides the level in the config file.
    #[arg(long, env = "HERALD_LOG_LEVEL")]
    log_level: Option<String>,

    /// JSONL log file (defaults to ~/.herald/logs/herald.jsonl).
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// How long shutdown waits for the background driver, in milliseconds.
    #[arg(long, default_value = "2000")]
    shutdown_timeout_ms: u64,
}

fn load_config(args: &Args, paths: &Paths) -> HeraldResult<(HeraldConfig, PathBuf)> {
    let config_path = args.config.clone().unwrap_or_else(|| paths.config_file());

    let mut config = if args.config.is_some() {
        if config_path.exists() {
            HeraldConfig::load_from_file(&config_path)?
        } else {
            HeraldConfig::default()
        }
    } else {
        HeraldConfig::load(paths)?
    };

    if let Some(ref level) = args.log_level {
        config.log_level = level.clone();
    }

    Ok((config, config_path))
}

#[tokio::main]
async fn main() -> HeraldResult<()> {
    let args = Args::parse();
    let paths = Paths::new()?;
    let (config, config_path) = load_config(&args, &paths)?;

    // Initialize logging via observability crate
    observability::init_with_config(observability::LogConfig {
        service_name: "herald".into(),
        default_level: config.log_level.clone(),
        log_path: Some(args.log_file.clone().unwrap_or_else(|| paths.log_file())),
        also_stderr: true,
    });

    let gateway_socket = args
        .gateway_socket
        .clone()
        .unwrap_or_else(|| paths.gateway_socket_file());

    info!(
        config = %config_path.display(),
        gateway_socket = %gateway_socket.display(),
        shutdown_timeout_ms = args.shutdown_timeout_ms,
        "Herald configuration loaded"
    );

    let factory = Arc::new(GatewaySessionFactory::new(gateway_socket));
    let driver_config = DriverConfig {
        join_timeout: Duration::from_millis(args.shutdown_timeout_ms),
        ..Default::default()
    };
    let herald = Herald::with_driver_config(config, factory, driver_config);

    herald.on_startup().await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        let line = tokio::select! {
            _ = &mut ctrl_c => {
                info!("Received shutdown signal, exiting...");
                break;
            }
            line = lines.next_line() => line,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!("Host event stream closed");
                break;
            }
            Err(e) => {
                error!(error = %e, "Failed to read host events");
                break;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        let event: HostEvent = match serde_json::from_str(&line) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Skipping malformed host event");
                continue;
            }
        };

        match event {
            HostEvent::Shutdown => break,
            HostEvent::SettingsSaved { config } => {
                herald.on_settings_saved(config.clone()).await;
                if let Err(e) = config.save_to_file(&config_path) {
                    warn!(path = %config_path.display(), error = %e, "Failed to persist settings");
                } else {
                    debug!(path = %config_path.display(), "Settings persisted");
                }
            }
            other => herald.dispatch(other).await,
        }
    }

    herald.on_shutdown().await;
    Ok(())
}
