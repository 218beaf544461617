//! Host side of the bootstrap: device readiness, filesystem, mount, ownership.
//!
//! Every OS interaction goes through one of the runner traits below so the
//! stages can be exercised against fakes. [`SystemCommands`] implements all of
//! them by spawning the usual utilities:
//! - `blkid`: filesystem probe
//! - `mkfs -t <type>`: format
//! - `mount`: mount and mount table
//! - `chown -R`: ownership

mod block_device;
mod command;
mod filesystem;
mod mount;
mod permissions;

pub use block_device::wait_for_device;
pub use command::SystemCommands;
pub use filesystem::{FilesystemInitializer, Initialized};
pub use mount::{MountManager, Mounted, mount_table_contains};
pub use permissions::PermissionFixer;

use crate::errors::CommandError;
use async_trait::async_trait;
use std::path::Path;

/// What a filesystem probe found on a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe {
    /// No recognizable signature.
    Blank,
    /// A filesystem signature of the given type.
    Filesystem(String),
    /// A partition table of the given type, but no filesystem on the device itself.
    PartitionTable(String),
}

/// Filesystem signature detection.
#[async_trait]
pub trait ProbeRunner: Send + Sync {
    /// Whether the device node is present.
    async fn device_exists(&self, device: &Path) -> bool;

    /// Look for a signature on `device`. "Nothing found" is `Ok(Probe::Blank)`.
    async fn probe(&self, device: &Path) -> Result<Probe, CommandError>;
}

/// Filesystem creation.
#[async_trait]
pub trait FormatRunner: Send + Sync {
    async fn format(&self, device: &Path, fs_type: &str, args: &[String])
    -> Result<(), CommandError>;
}

/// Mounting and the live mount table.
#[async_trait]
pub trait MountRunner: Send + Sync {
    async fn mount(&self, device: &Path, mount_point: &Path, fs_type: &str)
    -> Result<(), CommandError>;

    /// Current mount table as text, one mount per line.
    async fn mount_table(&self) -> Result<String, CommandError>;
}

/// Ownership changes.
#[async_trait]
pub trait OwnerRunner: Send + Sync {
    /// Change owner of `path` and everything below it to `owner` (`user[:group]`).
    async fn chown_recursive(&self, path: &Path, owner: &str) -> Result<(), CommandError>;
}
