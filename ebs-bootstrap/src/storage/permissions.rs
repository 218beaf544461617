//! Hand the mounted volume to the service account.

use super::OwnerRunner;
use crate::errors::{BootstrapError, BootstrapResult};
use std::path::Path;

/// Recursive ownership fix for the mount point.
pub struct PermissionFixer<'a> {
    runner: &'a dyn OwnerRunner,
}

impl<'a> PermissionFixer<'a> {
    pub fn new(runner: &'a dyn OwnerRunner) -> Self {
        Self { runner }
    }

    /// Make `owner` own `mount_point` and everything under it.
    pub async fn ensure_writable(&self, mount_point: &Path, owner: &str) -> BootstrapResult<()> {
        let euid = nix::unistd::Uid::effective();
        if !euid.is_root() {
            tracing::warn!(euid = euid.as_raw(), "Not running as root, chown will likely fail");
        }

        self.runner
            .chown_recursive(mount_point, owner)
            .await
            .map_err(|source| BootstrapError::Permission {
                path: mount_point.display().to_string(),
                owner: owner.to_string(),
                source,
            })?;

        tracing::info!("Changed ownership of {} to {}", mount_point.display(), owner);
        Ok(())
    }
}
