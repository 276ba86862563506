//! `agent` — host management agent entry point.
//!
//! Startup sequence:
//! 1. Load and validate [`Config`] from environment variables.
//! 2. Initialise structured logging (JSON by default).
//! 3. Select the platform named in configuration.
//! 4. Load TLS material and construct the HTTPS dispatcher.
//! 5. Register routes, start the dispatcher, and stop it on SIGINT/SIGTERM.

mod config;
mod health;
mod platform;
mod telemetry;

use std::path::Path;

use anyhow::{Context, Result};
use https_dispatcher::{HttpsDispatcher, TlsIdentity};
use tracing::info;

use crate::config::Config;
use crate::platform::Provider;

#[tokio::main]
async fn main() -> Result<()> {
    // -----------------------------------------------------------------------
    // 1. Configuration
    // -----------------------------------------------------------------------
    let cfg = Config::from_env().map_err(|e| {
        // Telemetry is not yet up; write to stderr directly.
        eprintln!("ERROR: configuration invalid: {e:#}");
        e
    })?;

    // -----------------------------------------------------------------------
    // 2. Telemetry
    // -----------------------------------------------------------------------
    telemetry::init(&cfg.log_level, cfg.log_format)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        listen_url = %cfg.listen_url,
        "agent starting"
    );

    // -----------------------------------------------------------------------
    // 3. Platform
    // -----------------------------------------------------------------------
    let platform = Provider::new(&cfg.platform_options()).get(&cfg.platform)?;
    info!(
        platform = platform.name(),
        family = ?platform.family(),
        device_paths = %platform.device_path_resolution(),
        "platform selected"
    );

    // -----------------------------------------------------------------------
    // 4. HTTPS dispatcher
    // -----------------------------------------------------------------------
    let identity =
        TlsIdentity::from_pem_files(Path::new(&cfg.tls_cert_path), Path::new(&cfg.tls_key_path))
            .context("failed to load TLS material")?;
    let dispatcher = HttpsDispatcher::new(&cfg.listen_url, identity)
        .context("failed to construct https dispatcher")?;

    dispatcher.add_route(
        "/health",
        health::handler(platform, dispatcher.routes().clone()),
    )?;

    // -----------------------------------------------------------------------
    // 5. Serve until signalled
    // -----------------------------------------------------------------------
    let mut server = tokio::spawn({
        let dispatcher = dispatcher.clone();
        async move { dispatcher.start().await }
    });

    tokio::select! {
        joined = &mut server => {
            joined
                .context("dispatcher task panicked")?
                .context("https dispatcher failed")?;
            return Ok(());
        }
        signal = shutdown_signal() => signal?,
    }

    info!("shutdown signal received");
    dispatcher.stop().await;
    server
        .await
        .context("dispatcher task panicked")?
        .context("https dispatcher failed")?;

    info!("agent stopped");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
#[cfg(unix)]
async fn shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate =
        signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res.context("failed to listen for SIGINT"),
        _ = terminate.recv() => Ok(()),
    }
}

/// Resolves on Ctrl-C.
#[cfg(not(unix))]
async fn shutdown_signal() -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")
}
