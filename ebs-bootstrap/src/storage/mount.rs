//! Mount the device, tolerating "already mounted".

use super::MountRunner;
use crate::errors::{BootstrapError, BootstrapResult};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Outcome of [`MountManager::ensure_mounted`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mounted {
    /// Mounted during this run.
    Mounted,
    /// Mount call failed but the mount table already had the entry.
    AlreadyMounted,
}

/// Idempotent mount of one device at one directory.
pub struct MountManager<'a> {
    runner: &'a dyn MountRunner,
}

impl<'a> MountManager<'a> {
    pub fn new(runner: &'a dyn MountRunner) -> Self {
        Self { runner }
    }

    /// Ensure `device` is mounted at `mount_point`.
    ///
    /// A failed mount is only accepted when the live mount table shows this
    /// exact device on this exact directory.
    pub async fn ensure_mounted(
        &self,
        device: &Path,
        mount_point: &Path,
        fs_type: &str,
    ) -> BootstrapResult<Mounted> {
        tokio::fs::create_dir_all(mount_point)
            .await
            .map_err(|source| BootstrapError::MountPoint {
                mount_point: mount_point.display().to_string(),
                source,
            })?;

        let mount_err = match self.runner.mount(device, mount_point, fs_type).await {
            Ok(()) => {
                tracing::info!(
                    "Mounted block device: {} → {}",
                    device.display(),
                    mount_point.display()
                );
                return Ok(Mounted::Mounted);
            }
            Err(e) => e,
        };

        tracing::warn!(
            device = %device.display(),
            mount_point = %mount_point.display(),
            error = %mount_err,
            "Mount failed, checking whether it is already mounted"
        );

        let table = match self.runner.mount_table().await {
            Ok(table) => table,
            Err(table_err) => {
                tracing::error!(error = %table_err, "Could not read the mount table");
                return Err(BootstrapError::Mount {
                    device: device.display().to_string(),
                    mount_point: mount_point.display().to_string(),
                    reason: "mount table could not be read",
                    source: mount_err,
                });
            }
        };

        let aliases = device_aliases(device).await;
        let found = aliases
            .iter()
            .any(|alias| mount_table_contains(&table, alias, mount_point));

        if !found {
            return Err(BootstrapError::Mount {
                device: device.display().to_string(),
                mount_point: mount_point.display().to_string(),
                reason: "no matching mount table entry",
                source: mount_err,
            });
        }

        tracing::info!(
            "Device {} is already mounted at {}",
            device.display(),
            mount_point.display()
        );
        Ok(Mounted::AlreadyMounted)
    }
}

/// Names the mount table may use for `device`: as given, plus its resolved
/// target when it is a symlink (e.g. `/dev/xvdf` → `/dev/nvme1n1`).
async fn device_aliases(device: &Path) -> Vec<PathBuf> {
    let mut aliases = vec![device.to_path_buf()];
    if let Ok(resolved) = tokio::fs::canonicalize(device).await
        && resolved != device
    {
        aliases.push(resolved);
    }
    aliases
}

/// Whether `table` has an entry for `device` mounted on `mount_point`.
///
/// Understands both `mount` output (`<dev> on <dir> type <fs> (<opts>)`) and
/// `/proc/mounts` lines (`<dev> <dir> <fs> <opts> 0 0`).
pub fn mount_table_contains(table: &str, device: &Path, mount_point: &Path) -> bool {
    let device = device.to_string_lossy();
    let mount_point = mount_point.to_string_lossy();
    let mount_point = normalize(&mount_point);

    table.lines().any(|line| match parse_mount_line(line) {
        Some((source, target)) => source == device && normalize(target) == mount_point,
        None => false,
    })
}

fn parse_mount_line(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    if let Some((source, rest)) = line.split_once(" on ") {
        let target = rest.split_once(" type ").map_or(rest, |(target, _)| target);
        return Some((source.trim(), target.trim()));
    }

    let mut fields = line.split_whitespace();
    Some((fields.next()?, fields.next()?))
}

fn normalize(path: &str) -> &str {
    match path.trim_end_matches('/') {
        "" => "/",
        trimmed => trimmed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MOUNT_OUTPUT: &str = "\
sysfs on /sys type sysfs (rw,nosuid,nodev,noexec,relatime)
/dev/nvme0n1p1 on / type xfs (rw,noatime,attr2,inode64,noquota)
/dev/xvdf on /var/lib/etcd-bootstrap type ext4 (rw,relatime)
";

    const PROC_MOUNTS: &str = "\
sysfs /sys sysfs rw,nosuid,nodev,noexec,relatime 0 0
/dev/nvme1n1 /var/lib/etcd-bootstrap ext4 rw,relatime 0 0
";

    #[test]
    fn test_mount_output_format() {
        assert!(mount_table_contains(
            MOUNT_OUTPUT,
            Path::new("/dev/xvdf"),
            Path::new("/var/lib/etcd-bootstrap")
        ));
        assert!(mount_table_contains(
            MOUNT_OUTPUT,
            Path::new("/dev/xvdf"),
            Path::new("/var/lib/etcd-bootstrap/")
        ));
    }

    #[test]
    fn test_bare_entry_without_type() {
        assert!(mount_table_contains(
            "/dev/xvdf on /var/lib/etcd-bootstrap",
            Path::new("/dev/xvdf"),
            Path::new("/var/lib/etcd-bootstrap")
        ));
    }

    #[test]
    fn test_proc_mounts_format() {
        assert!(mount_table_contains(
            PROC_MOUNTS,
            Path::new("/dev/nvme1n1"),
            Path::new("/var/lib/etcd-bootstrap")
        ));
    }

    #[test]
    fn test_requires_exact_device_and_path() {
        assert!(!mount_table_contains(
            MOUNT_OUTPUT,
            Path::new("/dev/xvdg"),
            Path::new("/var/lib/etcd-bootstrap")
        ));
        assert!(!mount_table_contains(
            MOUNT_OUTPUT,
            Path::new("/dev/xvdf"),
            Path::new("/var/lib/etcd")
        ));
        assert!(!mount_table_contains(
            "/dev/xvdf1 on /var/lib/etcd-bootstrap type ext4 (rw)",
            Path::new("/dev/xvdf"),
            Path::new("/var/lib/etcd-bootstrap")
        ));
    }

    #[test]
    fn test_root_mount_point() {
        assert!(mount_table_contains(
            MOUNT_OUTPUT,
            Path::new("/dev/nvme0n1p1"),
            Path::new("/")
        ));
    }
}
