//! Log output for the agent.

use anyhow::Result;
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

/// Shape of the agent's log lines on stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per event, fields flattened to the top level.
    #[default]
    Json,
    /// Single-line human-readable text, for running the agent by hand.
    Text,
}

/// Install the global subscriber at `log_level`. `RUST_LOG` overrides the
/// level when set.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init(log_level: &str, format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let installed = match format {
        LogFormat::Json => builder.json().flatten_event(true).try_init(),
        LogFormat::Text => builder.compact().with_ansi(false).try_init(),
    };
    installed.map_err(|e| anyhow::anyhow!("failed to install log subscriber: {e}"))
}
