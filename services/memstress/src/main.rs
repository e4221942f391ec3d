//! Memstress Service - Main Entry Point

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use clap::{Arg, ArgAction, Command, value_parser};
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use memstress::server::{AppState, MemStressServer, print_routes};
use memstress::{MemStressConfig, metrics};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    // Parse command line arguments
    let matches = Command::new("memstress")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Diagnostic HTTP service that synthetically grows and releases process memory")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("memstress.toml"),
        )
        .arg(
            Arg::new("batch-size")
                .long("batch-size")
                .value_name("BLOCKS")
                .help("Blocks (1 MiB each) allocated per consume call")
                .value_parser(value_parser!(u32)),
        )
        .arg(
            Arg::new("ceiling-mib")
                .long("ceiling-mib")
                .value_name("MIB")
                .help("Skip allocation once reported usage reaches this many MiB")
                .value_parser(value_parser!(u64)),
        )
        .arg(
            Arg::new("pacing")
                .long("pacing")
                .value_name("MODE")
                .help("Allocation pacing: fast, or paced (one second between blocks)")
                .value_parser(["fast", "paced"]),
        )
        .arg(
            Arg::new("listen")
                .long("listen")
                .value_name("ADDR")
                .help("Listen address as host:port"),
        )
        .arg(
            Arg::new("routes")
                .long("routes")
                .help("Print available routes and exit")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    // Print routes if requested
    if matches.get_flag("routes") {
        print_routes();
        return Ok(());
    }

    // Load configuration
    let default_config = "memstress.toml".to_string();
    let config_path = matches
        .get_one::<String>("config")
        .unwrap_or(&default_config);
    let mut config = match MemStressConfig::from_file(config_path) {
        Ok(config) => {
            info!("Loaded configuration from: {}", config_path);
            config
        }
        Err(e) => {
            info!("No configuration file loaded ({}), using defaults", e);
            MemStressConfig::default()
        }
    };
    apply_overrides(&mut config, &matches)?;

    // Print startup information
    info!("Starting memstress v{}", env!("CARGO_PKG_VERSION"));
    info!("Server will bind to: {}", config.server_address());
    info!(
        "Allocation: {} x 1 MiB blocks per call, ceiling {} MiB, pacing {}",
        config.alloc.batch_size, config.alloc.ceiling_mib, config.alloc.pacing
    );
    info!("Metrics recorder tick: {}s", config.monitoring.tick_seconds);

    let server = MemStressServer::new(config.clone());
    let state = server.state();

    // The recorder and the signal listener share one shutdown channel.
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let recorder = metrics::spawn_recorder(
        Arc::clone(&state.store),
        Arc::clone(&state.usage),
        Duration::from_secs(config.monitoring.tick_seconds),
        shutdown_rx,
    );

    if let Err(e) = server.start(shutdown_signal(state, shutdown_tx)).await {
        error!("server error: {}", e);
        std::process::exit(1);
    }

    // The server only returns cleanly once a termination signal was handled.
    let _ = recorder.await;
    info!("memstress shutdown complete");
    std::process::exit(1);
}

/// Initialize tracing
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "memstress=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Apply command line overrides on top of the loaded configuration
fn apply_overrides(config: &mut MemStressConfig, matches: &clap::ArgMatches) -> Result<()> {
    if let Some(batch) = matches.get_one::<u32>("batch-size") {
        config.alloc.batch_size = *batch;
    }
    if let Some(ceiling) = matches.get_one::<u64>("ceiling-mib") {
        config.alloc.ceiling_mib = *ceiling;
    }
    if let Some(mode) = matches.get_one::<String>("pacing") {
        config.alloc.pacing = mode.parse()?;
    }
    if let Some(listen) = matches.get_one::<String>("listen") {
        let (host, port) = parse_listen(listen)?;
        config.server.host = host;
        config.server.port = port;
    }
    Ok(())
}

fn parse_listen(listen: &str) -> Result<(String, u16)> {
    let (host, port) = listen
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("invalid listen address '{}', expected host:port", listen))?;
    let port: u16 = port
        .parse()
        .map_err(|e| anyhow!("invalid listen port in '{}': {}", listen, e))?;
    let host = if host.is_empty() {
        "0.0.0.0".to_string()
    } else {
        host.to_string()
    };
    Ok((host, port))
}

/// Wait for a termination signal, log the final usage snapshot, and fan
/// the shutdown out to the recorder and the server.
async fn shutdown_signal(state: AppState, shutdown_tx: broadcast::Sender<()>) {
    // Listen for ctrl-c
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", e);
        }
    };

    // Listen for SIGTERM
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let signal_name = tokio::select! {
        () = ctrl_c => "interrupt",
        () = terminate => "terminate",
    };

    info!("-----------------------------------------");
    info!("Signal ({}) detected, shutting down", signal_name);
    match state.usage.snapshot() {
        Ok(snapshot) => info!("Final memory usage: {}", snapshot.render()),
        Err(e) => error!("failed to read final memory usage: {}", e),
    }
    let _ = shutdown_tx.send(());
}
