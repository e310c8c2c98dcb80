//! # Streamgate
//!
//! On-demand HLS gateway for live sources. Conversions start when a player
//! asks for a stream and stop once nobody has fetched from it for the idle
//! window.

use anyhow::Context;
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::{path::PathBuf, sync::Arc};
use streamgate_config::{Config, ConfigLoad, ConfigLoader};
use streamgate_core::{FfmpegLauncher, SessionSupervisor};
use streamgate_server::{AppState, create_app};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "streamgate")]
#[command(about = "On-demand RTSP to HLS gateway")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    serve: ServeArgs,
}

#[derive(ClapArgs, Debug, Clone)]
struct ServeArgs {
    /// Path to a streamgate.toml configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Server port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Server host (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Environment file to load instead of ./.env
    #[arg(long)]
    env_file: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Remove output directories left behind by a previous run and exit
    Sweep,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Arc::new(load_runtime_config(&cli.serve)?);

    let supervisor = SessionSupervisor::new(
        config.supervisor_config(),
        Arc::new(FfmpegLauncher::new()),
        Arc::new(config.source_registry()),
    );

    if let Some(Command::Sweep) = cli.command {
        let removed = supervisor
            .sweep_orphans()
            .await
            .context("failed to sweep output directory")?;
        info!(removed, "sweep finished");
        return Ok(());
    }

    run_server(config, supervisor).await
}

fn load_runtime_config(args: &ServeArgs) -> anyhow::Result<Config> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = &args.config {
        loader = loader.with_config_path(path);
    }
    if let Some(path) = &args.env_file {
        loader = loader.with_env_file(path);
    }
    let ConfigLoad {
        mut config,
        warnings,
    } = loader.load().context("failed to load configuration")?;

    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(host) = args.host.clone() {
        config.server.host = host;
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if config.metadata.env_file_loaded {
        info!("loaded .env file");
    }
    if let Some(path) = &config.metadata.config_path {
        info!(path = %path.display(), "using configuration file");
    }

    for warning in &warnings.items {
        match &warning.hint {
            Some(hint) => {
                warn!(message = %warning.message, hint = %hint, "configuration warning")
            }
            None => {
                warn!(message = %warning.message, "configuration warning")
            }
        }
    }

    info!(
        output_root = %config.sessions.output_root.display(),
        idle_timeout = %humantime::format_duration(config.sessions.idle_timeout),
        readiness_timeout = %humantime::format_duration(config.sessions.readiness_timeout),
        ffmpeg = %config.ffmpeg.ffmpeg_path,
        "session configuration in effect"
    );

    Ok(config)
}

async fn run_server(
    config: Arc<Config>,
    supervisor: SessionSupervisor,
) -> anyhow::Result<()> {
    match supervisor.sweep_orphans().await {
        Ok(0) => {}
        Ok(removed) => info!(removed, "removed leftover output directories"),
        Err(e) => warn!("startup sweep failed: {}", e),
    }

    let addr = config
        .server
        .socket_addr()
        .with_context(|| {
            format!(
                "invalid listen address {}:{}",
                config.server.host, config.server.port
            )
        })?;

    let router = create_app(AppState::new(supervisor.clone(), Arc::clone(&config)));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!("Starting streamgate on http://{}", addr);

    let draining = supervisor.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            if !draining.shutdown().await {
                warn!("some sessions were still running at exit");
            }
        })
        .await
        .context("server error")?;

    info!("streamgate stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let term = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let term = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = term => {},
    }

    warn!("shutdown signal received, stopping sessions");
}
