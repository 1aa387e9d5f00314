//! stationlog - Weather station collector and HTTP API.
//!
//! Run with: `cargo run -p stationlog-service`

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use clap::{Parser, Subcommand};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use stationlog_core::ClientMetrics;
use stationlog_service::{AppState, Collector, Config, api, build_sources};
use stationlog_store::Store;

/// stationlog - Weather station collector and HTTP API.
#[derive(Parser, Debug)]
#[command(name = "stationlog")]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Bind address (overrides config).
    #[arg(short, long, global = true)]
    bind: Option<String>,

    /// Database path (overrides config).
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    /// Run the collector without the HTTP API.
    #[arg(long, global = true)]
    no_api: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the collector and API in the foreground (default behavior).
    Run,

    /// Run a single collection cycle and exit.
    Collect,

    /// Verify credentials: token exchange, device info and one status read.
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("stationlog_service=info".parse()?)
                .add_directive("stationlog_core=info".parse()?)
                .add_directive("tower_http=debug".parse()?),
        )
        .init();

    let config = load_config(&args)?;

    match args.command {
        Some(Command::Check) => check(config).await,
        Some(Command::Collect) => collect(config).await,
        Some(Command::Run) | None => run_server(config, args.no_api).await,
    }
}

/// File (or defaults), then environment, then CLI overrides, then validation.
fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };
    config.apply_env()?;

    if let Some(bind) = &args.bind {
        config.server.bind = bind.clone();
    }
    if let Some(db_path) = &args.database {
        config.storage.path = db_path.clone();
    }

    config.validate()?;
    Ok(config)
}

async fn run_server(config: Config, no_api: bool) -> anyhow::Result<()> {
    let metrics = Arc::new(ClientMetrics::new());
    let sources = build_sources(&config, Arc::clone(&metrics))?;

    info!("Opening database at {:?}", config.storage.path);
    let store = Store::open(&config.storage.path)?;

    let state = AppState::with_metrics(store, config.clone(), metrics);
    let shutdown = state.collector.shutdown_token();

    let collector = Collector::new(Arc::clone(&state), sources.aggregator).start();

    let signal_state = Arc::clone(&state);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown requested"),
            Err(e) => warn!("Failed to listen for shutdown signal: {}", e),
        }
        signal_state.collector.signal_stop();
    });

    if no_api {
        info!("HTTP API disabled");
        shutdown.cancelled().await;
    } else {
        let app = Router::new()
            .merge(api::router())
            .layer(TraceLayer::new_for_http())
            .layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            )
            .with_state(Arc::clone(&state));

        let addr: SocketAddr = config
            .server
            .bind
            .parse()
            .with_context(|| format!("invalid bind address '{}'", config.server.bind))?;

        info!("Starting server on {}", addr);
        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;
    }

    collector.await?;
    Ok(())
}

async fn collect(config: Config) -> anyhow::Result<()> {
    let metrics = Arc::new(ClientMetrics::new());
    let sources = build_sources(&config, Arc::clone(&metrics))?;
    let store = Store::open(&config.storage.path)?;
    let state = AppState::with_metrics(store, config, metrics);

    let collector = Collector::new(Arc::clone(&state), sources.aggregator);
    let result = collector
        .collect_now()
        .await
        .context("collector busy")?;

    if result.succeeded {
        println!(
            "Stored reading from {}{} after {} attempt(s)",
            result.source_used.map(|s| s.as_str()).unwrap_or("unknown"),
            if result.duplicate { " (already stored)" } else { "" },
            result.attempts
        );
        Ok(())
    } else {
        anyhow::bail!(
            "collection failed ({}): {}",
            result.error_kind.map(|k| k.as_str()).unwrap_or("unknown"),
            result.error_message.unwrap_or_default()
        )
    }
}

async fn check(config: Config) -> anyhow::Result<()> {
    let sources = build_sources(&config, Arc::new(ClientMetrics::new()))?;
    let client = sources.primary;

    let token = client
        .tokens()
        .get_valid_token()
        .await
        .context("token exchange failed")?;
    println!(
        "Token:  ok ({} from {}, expires {})",
        token.redacted(),
        token.endpoint,
        token.expires_at
    );

    let device = client
        .fetch_device_info(client.device_id())
        .await
        .context("device info request failed")?;
    println!(
        "Device: {} '{}' ({})",
        device.id,
        device.name,
        if device.online { "online" } else { "offline" }
    );

    let reading = client
        .fetch_reading()
        .await
        .context("status read failed")?;
    println!(
        "Status: {} temperature={:?} humidity={:?} pressure={:?} wind={:?}@{:?} uv={:?}",
        reading.timestamp,
        reading.temperature,
        reading.humidity,
        reading.pressure,
        reading.wind_speed,
        reading.wind_direction,
        reading.uv_index
    );

    Ok(())
}
