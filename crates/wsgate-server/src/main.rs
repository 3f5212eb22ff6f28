//! wsgate - A realtime publish/subscribe WebSocket gateway.

#[cfg(feature = "jemalloc")]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

mod auth;
mod config;
mod connection;
mod metrics;
mod presence;
mod prometheus;
mod registry;
mod router;
mod server;
mod shutdown;
mod util;
mod websocket;
mod worker;

use std::sync::Arc;

use log::{error, info};

use crate::config::Config;
use crate::server::Server;
use crate::shutdown::ShutdownToken;

struct Args {
    config_path: String,
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    let mut config_path = "wsgate.toml".to_string();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-c" | "--config" => {
                if i + 1 < args.len() {
                    config_path = args[i + 1].clone();
                    i += 2;
                } else {
                    eprintln!("Error: -c requires a file path");
                    std::process::exit(1);
                }
            }
            "-h" | "--help" => {
                println!("wsgate - Realtime publish/subscribe WebSocket gateway");
                println!();
                println!("Usage: wsgate [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --config <FILE>     Config file path (default: wsgate.toml)");
                println!("  -h, --help              Show this help message");
                println!();
                println!("Configuration:");
                println!("  Config file uses TOML format. All settings can be overridden");
                println!("  with environment variables using WSGATE__ prefix:");
                println!();
                println!("  WSGATE__SERVER__BIND=0.0.0.0:9301");
                println!("  WSGATE__SERVER__WORKER_ID=gw-a");
                println!("  WSGATE__PRESENCE__URL=redis://cache:6379");
                println!("  WSGATE__LOG__LEVEL=debug");
                std::process::exit(0);
            }
            arg => {
                eprintln!("Unknown argument: {}", arg);
                eprintln!("Use --help for usage information");
                std::process::exit(1);
            }
        }
    }

    Args { config_path }
}

fn main() {
    // Parse CLI args first (only for config path and help)
    let args = parse_args();

    // Load configuration from file + environment variables
    let config = match Config::load(&args.config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize logger with configured level
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log.level))
        .init();

    info!("Loaded configuration from {}", args.config_path);
    info!(
        "Starting wsgate (max_connections={}, max_frame_size={}KB, presence={})",
        config.limits.max_connections,
        config.limits.max_frame_size / 1024,
        if config.presence.enabled { "on" } else { "off" }
    );

    let shutdown = ShutdownToken::new();
    if let Err(e) = shutdown::install_signal_handler(shutdown.clone()) {
        error!("Failed to install signal handler: {}", e);
        std::process::exit(1);
    }

    let config = Arc::new(config);

    let server = match Server::new(config) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to start server: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = server.run(shutdown) {
        error!("Server error: {}", e);
        std::process::exit(1);
    }
}
