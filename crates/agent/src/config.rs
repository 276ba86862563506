//! Configuration loading and validation for the agent.
//!
//! All values are read from `AGENT_`-prefixed environment variables at
//! startup. The process exits with a clear error message if any required
//! variable is missing or invalid.

use anyhow::{Context, Result};
use https_dispatcher::BoundAddress;
use serde::Deserialize;

use crate::platform::Options;
use crate::telemetry::LogFormat;

/// Validated agent configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// URL the control-plane listener binds, e.g. `https://0.0.0.0:6868`.
    /// Only host and port are used; TLS is always terminated.
    #[serde(default = "default_listen_url")]
    pub listen_url: String,

    /// Filesystem path to the PEM-encoded certificate chain. **Required.**
    pub tls_cert_path: String,

    /// Filesystem path to the PEM-encoded private key. **Required.**
    pub tls_key_path: String,

    /// Platform to run on: `ubuntu`, `centos`, or `dummy`.
    #[serde(default = "default_platform")]
    pub platform: String,

    /// Device path resolution strategy: `virtio`, `scsi`, or empty for
    /// identity.
    #[serde(default)]
    pub device_path_resolution_type: String,

    /// Device id prefix used by the virtio strategy.
    #[serde(default = "default_virtio_device_prefix")]
    pub virtio_device_prefix: String,

    /// Tracing log level (e.g. `"info"`, `"debug"`).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log line format: `json` (default) or `text`.
    #[serde(default)]
    pub log_format: LogFormat,
}

fn default_listen_url() -> String {
    "https://0.0.0.0:6868".into()
}
fn default_platform() -> String {
    "ubuntu".into()
}
fn default_virtio_device_prefix() -> String {
    "virtio".into()
}
fn default_log_level() -> String {
    "info".into()
}

impl Config {
    /// Load and validate configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if any required variable is absent or cannot be parsed.
    pub fn from_env() -> Result<Self> {
        Self::load(config::Environment::with_prefix("AGENT"))
    }

    fn load(source: config::Environment) -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(source)
            .build()
            .context("failed to build configuration from environment")?;

        let c: Config = cfg
            .try_deserialize()
            .context("failed to deserialise configuration")?;

        c.validate()?;
        Ok(c)
    }

    /// Platform provider options derived from this configuration.
    pub fn platform_options(&self) -> Options {
        Options {
            device_path_resolution_type: self.device_path_resolution_type.clone(),
            virtio_device_prefix: self.virtio_device_prefix.clone(),
        }
    }

    /// Validate all fields, returning a descriptive error on the first failure.
    fn validate(&self) -> Result<()> {
        ensure_non_empty(&self.tls_cert_path, "AGENT_TLS_CERT_PATH")?;
        ensure_non_empty(&self.tls_key_path, "AGENT_TLS_KEY_PATH")?;
        ensure_non_empty(&self.platform, "AGENT_PLATFORM")?;

        BoundAddress::parse(&self.listen_url).context("AGENT_LISTEN_URL is invalid")?;
        Ok(())
    }
}

fn ensure_non_empty(value: &str, name: &str) -> Result<()> {
    if value.trim().is_empty() {
        anyhow::bail!("{name} is required and must not be empty");
    }
    Ok(())
}
