//! Platform selection.
//!
//! The provider assembles one [`Platform`] per supported OS family up front,
//! all sharing the device path resolution strategy chosen by configuration,
//! and hands out the one named in configuration.

pub mod device_path;

use std::collections::HashMap;

use thiserror::Error;

pub use device_path::DevicePathResolution;

/// Errors from the platform layer.
#[derive(Debug, Error)]
pub enum PlatformError {
    /// No platform is registered under the requested name.
    #[error("platform {0} could not be found")]
    NotFound(String),
}

/// Provider inputs taken from agent configuration.
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// `virtio`, `scsi`, or anything else for identity.
    pub device_path_resolution_type: String,
    /// Device id prefix for the virtio strategy.
    pub virtio_device_prefix: String,
}

/// OS family a platform targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsFamily {
    Ubuntu,
    Centos,
    /// No-op platform for tests and development hosts.
    Dummy,
}

/// The OS-specific services the agent runs against.
#[derive(Debug, Clone)]
pub struct Platform {
    name: &'static str,
    family: OsFamily,
    device_paths: DevicePathResolution,
}

impl Platform {
    fn new(name: &'static str, family: OsFamily, device_paths: DevicePathResolution) -> Self {
        Self {
            name,
            family,
            device_paths,
        }
    }

    /// Name this platform is registered under.
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn family(&self) -> OsFamily {
        self.family
    }

    /// Strategy for resolving disk device paths.
    pub fn device_path_resolution(&self) -> &DevicePathResolution {
        &self.device_paths
    }
}

/// Looks platforms up by name.
#[derive(Debug, Clone)]
pub struct Provider {
    platforms: HashMap<&'static str, Platform>,
}

impl Provider {
    /// Build every known platform from `options`.
    pub fn new(options: &Options) -> Self {
        let device_paths = DevicePathResolution::from_type(
            &options.device_path_resolution_type,
            &options.virtio_device_prefix,
        );

        let platforms = [
            ("ubuntu", OsFamily::Ubuntu),
            ("centos", OsFamily::Centos),
            ("dummy", OsFamily::Dummy),
        ]
        .into_iter()
        .map(|(name, family)| (name, Platform::new(name, family, device_paths.clone())))
        .collect();

        Self { platforms }
    }

    /// The platform registered as `name`.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError::NotFound`] for unknown names.
    pub fn get(&self, name: &str) -> Result<Platform, PlatformError> {
        self.platforms
            .get(name)
            .cloned()
            .ok_or_else(|| PlatformError::NotFound(name.to_owned()))
    }
}
