//! Selection of the strategy that maps a disk's CPI-reported id to a device
//! path on this host.

use std::fmt;
use std::time::Duration;

const ID_RESOLVER_TIMEOUT: Duration = Duration::from_millis(500);
const MAPPED_RESOLVER_TIMEOUT: Duration = Duration::from_millis(500);
const SCSI_VOLUME_ID_TIMEOUT: Duration = Duration::from_millis(500);
const SCSI_ID_TIMEOUT: Duration = Duration::from_millis(50_000);

/// How device paths are resolved, chosen once from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DevicePathResolution {
    /// Look the disk up by id under `/dev/disk/by-id` using `device_prefix`,
    /// falling back to the mapped device path.
    Virtio {
        device_prefix: String,
        id_timeout: Duration,
        mapped_timeout: Duration,
    },
    /// Resolve by SCSI volume id, falling back to the SCSI host/lun id.
    Scsi {
        volume_id_timeout: Duration,
        scsi_id_timeout: Duration,
    },
    /// Use the reported path as-is.
    Identity,
}

impl DevicePathResolution {
    /// Pick the strategy named by `kind`. Unknown or empty names select
    /// [`DevicePathResolution::Identity`].
    pub fn from_type(kind: &str, virtio_device_prefix: &str) -> Self {
        match kind {
            "virtio" => DevicePathResolution::Virtio {
                device_prefix: virtio_device_prefix.to_owned(),
                id_timeout: ID_RESOLVER_TIMEOUT,
                mapped_timeout: MAPPED_RESOLVER_TIMEOUT,
            },
            "scsi" => DevicePathResolution::Scsi {
                volume_id_timeout: SCSI_VOLUME_ID_TIMEOUT,
                scsi_id_timeout: SCSI_ID_TIMEOUT,
            },
            _ => DevicePathResolution::Identity,
        }
    }

    /// Short strategy name, as reported by the health endpoint.
    pub fn name(&self) -> &'static str {
        match self {
            DevicePathResolution::Virtio { .. } => "virtio",
            DevicePathResolution::Scsi { .. } => "scsi",
            DevicePathResolution::Identity => "identity",
        }
    }

    /// Each resolver the strategy runs, in order, with its timeout.
    pub fn timeouts(&self) -> Vec<(&'static str, Duration)> {
        match self {
            DevicePathResolution::Virtio {
                id_timeout,
                mapped_timeout,
                ..
            } => vec![("id", *id_timeout), ("mapped", *mapped_timeout)],
            DevicePathResolution::Scsi {
                volume_id_timeout,
                scsi_id_timeout,
            } => vec![("volume_id", *volume_id_timeout), ("scsi_id", *scsi_id_timeout)],
            DevicePathResolution::Identity => Vec::new(),
        }
    }
}

impl fmt::Display for DevicePathResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())?;
        if let DevicePathResolution::Virtio { device_prefix, .. } = self {
            write!(f, " prefix={device_prefix}")?;
        }
        for (resolver, timeout) in self.timeouts() {
            write!(f, " {resolver}={}ms", timeout.as_millis())?;
        }
        Ok(())
    }
}
