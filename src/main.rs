//! castwatch - playout watchdog daemon
//!
//! Boots the supervisor, serves the loopback API, and maps shutdown causes
//! to exit codes: 0 for a clean stop, 75 when a launcher wrapper should
//! start us again.

use castwatch::config::Config;
use castwatch::supervisor::Supervisor;
use castwatch::server;
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// 24/7 playout watchdog for a browser-embedded playlist player
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", default_value = "config.json")]
    config: PathBuf,

    /// Port to bind to (overrides the configuration file)
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("castwatch={log_level}").into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("castwatch {} starting", env!("CARGO_PKG_VERSION"));

    // The initial config load is the one fatal path: without a valid
    // config there is nothing to supervise.
    let config = Config::load(&args.config)?;
    let port = args.port.unwrap_or(config.port);

    let supervisor = Supervisor::new(args.config.clone(), config);

    // Graceful shutdown on ctrl-c / SIGTERM.
    {
        let supervisor = supervisor.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            supervisor.shutdown().await;
        });
    }

    server::serve(supervisor.clone(), port).await?;

    let exit_code = supervisor.exit_code();
    if exit_code != 0 {
        info!("Exiting with code {} (restart requested)", exit_code);
        std::process::exit(exit_code);
    }
    info!("Clean shutdown");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let term = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Cannot install SIGTERM handler: {}", e);
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

    warn!("Shutdown signal received");
}
