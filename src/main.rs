//! dnsgate - Entry point.
//!
//! Loads the configuration, binds the listening socket, and serves until
//! Ctrl-C is received.

use std::borrow::Cow;
use std::process::ExitCode;
use std::sync::atomic::Ordering;

use anyhow::{Context, Result};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use dnsgate::config::Config;
use dnsgate::server::Server;

/// Exit code for a failure, taken from the first dnsgate error in the chain.
fn exit_code(err: &anyhow::Error) -> ExitCode {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<dnsgate::Error>())
        .map_or(ExitCode::FAILURE, |err| ExitCode::from(err.kind().code()))
}

async fn run() -> Result<()> {
    let config_path = std::env::var("CONFIG_PATH")
        .map(Cow::Owned)
        .unwrap_or(Cow::Borrowed("config.toml"));
    let config = Config::load(config_path.as_ref())
        .with_context(|| format!("Failed to load configuration from {config_path}"))?;

    // Initialize metrics (must be done early, before any metrics are recorded)
    dnsgate::metrics::init(&config.metrics).context("Failed to initialize metrics")?;
    if config.metrics.enabled {
        info!("Metrics enabled on {}", config.metrics.listen);
    }

    info!("Starting dnsgate...");
    info!("Upstream resolver: {}", config.upstream);
    info!("Filter rules: {}", config.filters.len());

    let server = Server::bind(&config)
        .await
        .context("Failed to start server")?;
    info!("Listening on {}", server.local_addr()?);

    let running = server.shutdown_handle();
    let mut server_handle = tokio::spawn(server.run());

    let finished = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received, shutting down...");
            running.store(false, Ordering::SeqCst);
            None
        }
        result = &mut server_handle => Some(result),
    };
    let result = match finished {
        Some(result) => result,
        None => server_handle.await,
    };
    let stats = result.context("Server task failed")??;

    info!(
        received = stats.received,
        forwarded = stats.forwarded,
        blocked = stats.blocked,
        refused = stats.refused,
        redirected = stats.redirected,
        malformed = stats.malformed,
        errors = stats.errors,
        "Shutdown complete."
    );
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            exit_code(&err)
        }
    }
}
