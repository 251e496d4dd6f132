use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tokio::signal;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

use slicelimit::config::SliceLimitConfig;
use slicelimit::http::HttpServer;
use slicelimit::ratelimit::SliceLimiter;

/// Per-client time-slice quota gate.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long, env = "SLICELIMIT_CONFIG")]
    config: Option<PathBuf>,

    /// Address to serve HTTP on
    #[arg(long)]
    http_addr: Option<SocketAddr>,

    /// Length of each time slice in seconds
    #[arg(long)]
    window_secs: Option<u64>,

    /// Operations allowed per client per time slice
    #[arg(long, allow_negative_numbers = true)]
    max_count: Option<i64>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();
    if cli.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init();
    }

    info!("Starting slicelimit");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = SliceLimitConfig::load(cli.config.as_deref())?;
    if let Some(addr) = cli.http_addr {
        config.server.http_addr = addr;
    }
    if let Some(secs) = cli.window_secs {
        config.limiter.window_secs = secs;
        config.limiter.window_ms = None;
    }
    if let Some(max_count) = cli.max_count {
        config.limiter.max_count = max_count;
    }
    config.validate()?;
    info!(http_addr = %config.server.http_addr, "Configuration loaded");

    let limiter = SliceLimiter::from_config(&config.limiter);
    info!(
        window = ?limiter.window_duration(),
        max_count = limiter.max_count(),
        "Limiter initialized"
    );

    let server = HttpServer::new(config.server.http_addr, limiter, config.naming.namer());
    server.serve_with_shutdown(shutdown_signal()).await?;

    info!("slicelimit stopped");
    Ok(())
}

/// Resolve once the process is asked to stop, so in-flight quota checks
/// can drain before the listener closes.
async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Ctrl+C handler unavailable, relying on SIGTERM");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable, relying on Ctrl+C");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let cause = tokio::select! {
        _ = interrupt => "interrupt",
        _ = terminate => "terminate",
    };
    info!(signal = cause, "Draining quota gate before exit");
}
