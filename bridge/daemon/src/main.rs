//! Bridge Daemon - Host Process for the Bridge Protocol
//!
//! Serves the host side of the bridge over framed stdin/stdout. The surface
//! process spawns the daemon and exchanges length-prefixed, checksummed JSON
//! envelopes with it. Logs go to stderr so they never mix with frames.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (scripted backend)
//! bridge-daemon
//!
//! # With config file
//! bridge-daemon --config ~/.config/bridge/bridge.toml
//!
//! # Use a local Ollama server
//! bridge-daemon --backend ollama --model llama3.2
//!
//! # Verbose logging
//! RUST_LOG=debug bridge-daemon
//! ```
//!
//! # Signals
//!
//! - `SIGTERM` / `SIGINT`: Graceful shutdown; running generations are aborted

mod compose;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

use bridge_core::config::{load_config, load_config_from_path, BackendKind, ConfigOverrides};
use bridge_core::streaming::CancelPolicy;
use bridge_core::transport::StreamTransport;

use compose::Host;

/// Bridge Daemon - host side of the host/surface bridge
#[derive(Parser, Debug)]
#[command(name = "bridge-daemon")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "BRIDGE_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Generative backend (scripted, ollama)
    #[arg(short = 'b', long, value_name = "KIND")]
    backend: Option<BackendKind>,

    /// Default model for generation requests
    #[arg(short = 'm', long, value_name = "NAME")]
    model: Option<String>,

    /// Directory documents are saved under
    #[arg(long, value_name = "DIR")]
    documents_root: Option<PathBuf>,

    /// JSON object with initial settings
    #[arg(long, value_name = "FILE")]
    settings: Option<PathBuf>,

    /// Quiet-buffer period in milliseconds
    #[arg(long, value_name = "MS")]
    quiet_buffer_ms: Option<u64>,

    /// Debounce period in milliseconds
    #[arg(long, value_name = "MS")]
    debounce_ms: Option<u64>,

    /// Cancellation policy (keep-paced, flush)
    #[arg(long, value_name = "POLICY")]
    cancel_policy: Option<CancelPolicy>,

    /// Maximum concurrently running handlers
    #[arg(long, value_name = "N")]
    max_in_flight: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "BRIDGE_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            quiet_buffer_ms: self.quiet_buffer_ms,
            debounce_ms: self.debounce_ms,
            cancel_policy: self.cancel_policy,
            backend: self.backend,
            model: self.model.clone(),
            documents_root: self.documents_root.clone(),
            max_in_flight: self.max_in_flight,
        }
    }
}

/// Initialize logging with the specified level
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("bridge_daemon={level},bridge_core={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();
}

/// Resolves on SIGINT, or SIGTERM on unix
async fn shutdown_signal() {
    let interrupt = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, initiating shutdown"),
            Err(e) => {
                warn!(error = %e, "Failed to install SIGINT handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("Received SIGTERM, initiating shutdown");
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = interrupt => {}
        () = terminate => {}
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging first
    init_logging(&args.log_level);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = std::process::id(),
        "Bridge daemon starting"
    );

    let mut config = match args.config {
        Some(ref path) => load_config_from_path(Some(path.clone())),
        None => load_config(),
    }
    .context("Failed to load configuration")?;
    args.overrides()
        .apply(&mut config)
        .context("Invalid command-line override")?;

    info!(
        source = %config.source(),
        backend = %config.generation.backend,
        model = %config.generation.model,
        quiet_buffer = ?config.streaming.quiet_buffer,
        debounce = ?config.streaming.debounce,
        "Configuration resolved"
    );

    let settings = compose::load_settings(args.settings.as_deref())?;
    let Host {
        endpoint,
        generation,
        backend,
    } = compose::compose(&config, settings)?;

    if !backend.health_check().await {
        warn!(
            backend = backend.name(),
            "Backend is not reachable yet; generate requests may fail"
        );
    }

    let result = tokio::select! {
        result = endpoint.run(StreamTransport::stdio()) => Some(result),
        () = shutdown_signal() => None,
    };

    // Cleanup
    info!(running = generation.in_flight(), "Shutting down...");
    generation.abort_all();

    match result {
        Some(Ok(summary)) => {
            info!(
                received = summary.received,
                sent = summary.sent,
                skipped = summary.skipped,
                handled = summary.dispatch.handled,
                failed = summary.dispatch.failed,
                "Bridge daemon stopped cleanly"
            );
            Ok(())
        }
        Some(Err(e)) => {
            error!(error = %e, "Daemon stopped with error");
            Err(e.into())
        }
        None => {
            info!("Bridge daemon stopped by signal");
            Ok(())
        }
    }
}
