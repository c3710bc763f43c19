//! Boilerroom Service - plant control loops and HTTP command surface.
//!
//! Run with: `cargo run -p boilerroom-service`

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use boilerroom_service::{Config, ConfigError, Plant, Scheduler, api, build_notifier};

/// Boilerroom Service - heating plant controller.
#[derive(Parser, Debug)]
#[command(name = "boilerroom-service")]
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

    /// Field bus gateway as host or host:port (overrides config).
    #[arg(long, global = true)]
    bus: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the controller in the foreground (default behavior).
    Run,

    /// Load and validate the configuration, then exit.
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    match args.command {
        Some(Command::CheckConfig) => check_config(&args),
        Some(Command::Run) | None => run(args).await,
    }
}

fn load_config(args: &Args) -> Result<Config, ConfigError> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };

    if let Some(bind) = &args.bind {
        config.server.bind = bind.clone();
    }
    if let Some(bus) = &args.bus {
        config.bus.set_endpoint(bus);
    }

    config.validate()?;
    Ok(config)
}

fn check_config(args: &Args) -> anyhow::Result<()> {
    let path = args
        .config
        .clone()
        .unwrap_or_else(boilerroom_service::default_config_path);

    match load_config(args) {
        Ok(config) => {
            println!("Configuration OK: {}", path.display());
            println!(
                "  bus {} / {} sensors / {} alarm rules / {} webhooks",
                config.bus.endpoint(),
                config.sensors.len(),
                config.alarms.rules.len(),
                config.notify.webhooks.len()
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("{}", e);
            Err(e.into())
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("boilerroom_service=info".parse()?)
                .add_directive("boilerroom_core=info".parse()?),
        )
        .init();

    let config = load_config(&args)?;
    let notifier = build_notifier(&config.notify)?;

    info!("Connecting to field bus at {}", config.bus.endpoint());
    let plant = Plant::connect(config.clone(), Arc::new(notifier));

    let cancel = CancellationToken::new();
    let loops = Scheduler::new(Arc::clone(&plant), cancel.clone()).start();

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown requested, finishing running ticks");
                shutdown.cancel();
            }
            Err(e) => warn!("Cannot listen for Ctrl-C: {}", e),
        }
    });

    let app = Router::new()
        .merge(api::router())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(plant);

    let addr: SocketAddr = config.server.bind.parse()?;
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.clone().cancelled_owned())
        .await?;

    futures::future::join_all(loops).await;
    info!("Plant controller stopped");
    Ok(())
}
