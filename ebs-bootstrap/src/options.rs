//! Configuration for a bootstrap run.
//!
//! Built once by the entrypoint and passed by reference into every stage.

use crate::errors::{BootstrapError, BootstrapResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_REGION: &str = "eu-west-1";
pub const DEFAULT_MOUNT_POINT: &str = "/var/lib/etcd-bootstrap";
pub const DEFAULT_BLOCK_DEVICE: &str = "/dev/xvdf";
pub const DEFAULT_FS_TYPE: &str = "ext4";
pub const DEFAULT_OWNER: &str = "etcd:etcd";

// ============================================================================
// Volume Matching
// ============================================================================

/// What to do when several volumes share the requested name in one zone.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchPolicy {
    /// Fail with `AmbiguousVolume`.
    #[default]
    Strict,
    /// Take the first volume in provider response order.
    ///
    /// Provider order is not guaranteed stable across calls.
    First,
}

// ============================================================================
// Attach Wait
// ============================================================================

/// Bounds and cadence of the wait-for-attachment loop.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachPolicy {
    /// Delay before the second poll. Doubles after every poll.
    #[serde(default = "default_initial_interval")]
    pub initial_interval: Duration,

    /// Upper bound for the poll delay.
    #[serde(default = "default_max_interval")]
    pub max_interval: Duration,

    /// Wall-clock deadline for the whole wait.
    #[serde(default = "default_attach_timeout")]
    pub timeout: Duration,

    /// Optional cap on the number of polls.
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

fn default_initial_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_max_interval() -> Duration {
    Duration::from_secs(100)
}

fn default_attach_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_device_timeout() -> Duration {
    Duration::from_secs(60)
}

impl Default for AttachPolicy {
    fn default() -> Self {
        Self {
            initial_interval: default_initial_interval(),
            max_interval: default_max_interval(),
            timeout: default_attach_timeout(),
            max_attempts: None,
        }
    }
}

// ============================================================================
// Bootstrap Options
// ============================================================================

/// Everything a bootstrap run needs to know up front.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BootstrapOptions {
    /// AWS region of the instance.
    #[serde(default = "default_region")]
    pub region: String,

    /// Value of the `Name` tag of the volume to attach.
    pub volume_name: String,

    /// Where the volume ends up mounted.
    #[serde(default = "default_mount_point")]
    pub mount_point: PathBuf,

    /// Device path requested in the attach call and used for probe/format/mount.
    #[serde(default = "default_block_device")]
    pub block_device: PathBuf,

    /// Filesystem type expected on, or created on, the device.
    #[serde(default = "default_fs_type")]
    pub fs_type: String,

    /// Extra arguments passed to the format utility.
    #[serde(default)]
    pub fs_args: Vec<String>,

    /// `user[:group]` that must own the mount point.
    #[serde(default = "default_owner")]
    pub owner: String,

    #[serde(default)]
    pub volume_match: MatchPolicy,

    #[serde(default)]
    pub attach: AttachPolicy,

    /// How long to wait for the device node once the volume is attached.
    #[serde(default = "default_device_timeout")]
    pub device_timeout: Duration,
}

fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

fn default_mount_point() -> PathBuf {
    PathBuf::from(DEFAULT_MOUNT_POINT)
}

fn default_block_device() -> PathBuf {
    PathBuf::from(DEFAULT_BLOCK_DEVICE)
}

fn default_fs_type() -> String {
    DEFAULT_FS_TYPE.to_string()
}

fn default_owner() -> String {
    DEFAULT_OWNER.to_string()
}

impl BootstrapOptions {
    /// Options with defaults for everything but the volume name.
    pub fn new(volume_name: impl Into<String>) -> Self {
        Self {
            region: default_region(),
            volume_name: volume_name.into(),
            mount_point: default_mount_point(),
            block_device: default_block_device(),
            fs_type: default_fs_type(),
            fs_args: Vec::new(),
            owner: default_owner(),
            volume_match: MatchPolicy::default(),
            attach: AttachPolicy::default(),
            device_timeout: default_device_timeout(),
        }
    }

    /// Reject options no run could succeed with.
    pub fn validate(&self) -> BootstrapResult<()> {
        if self.region.trim().is_empty() {
            return Err(BootstrapError::Config("region must not be empty".into()));
        }
        if self.volume_name.trim().is_empty() {
            return Err(BootstrapError::Config(
                "volume name must not be empty".into(),
            ));
        }
        if self.block_device.as_os_str().is_empty() {
            return Err(BootstrapError::Config(
                "block device must not be empty".into(),
            ));
        }
        if !self.mount_point.is_absolute() {
            return Err(BootstrapError::Config(format!(
                "mount point must be an absolute path: {}",
                self.mount_point.display()
            )));
        }
        if self.fs_type.trim().is_empty() {
            return Err(BootstrapError::Config(
                "filesystem type must not be empty".into(),
            ));
        }
        if self.owner.trim().is_empty() || self.owner.starts_with(':') {
            return Err(BootstrapError::Config(format!(
                "owner must be user[:group], got '{}'",
                self.owner
            )));
        }
        if self.attach.timeout.is_zero() {
            return Err(BootstrapError::Config(
                "attach timeout must be greater than zero".into(),
            ));
        }
        if self.attach.max_attempts == Some(0) {
            return Err(BootstrapError::Config(
                "attach max attempts must be greater than zero".into(),
            ));
        }
        if self.attach.initial_interval.is_zero()
            || self.attach.initial_interval > self.attach.max_interval
        {
            return Err(BootstrapError::Config(format!(
                "attach poll interval must be in (0, {:?}]",
                self.attach.max_interval
            )));
        }
        Ok(())
    }
}
