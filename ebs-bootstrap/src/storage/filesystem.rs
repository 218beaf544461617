//! Format a device only if it carries no filesystem yet.

use super::{FormatRunner, Probe, ProbeRunner};
use crate::errors::{BootstrapError, BootstrapResult};
use serde::Serialize;
use std::path::Path;

/// Outcome of [`FilesystemInitializer::ensure_initialized`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Initialized {
    /// A filesystem of the expected type was already present.
    AlreadyFormatted,
    /// The device was blank and has been formatted.
    Formatted,
}

/// Idempotent filesystem creation.
pub struct FilesystemInitializer<'a> {
    probe: &'a dyn ProbeRunner,
    format: &'a dyn FormatRunner,
}

impl<'a> FilesystemInitializer<'a> {
    pub fn new(probe: &'a dyn ProbeRunner, format: &'a dyn FormatRunner) -> Self {
        Self { probe, format }
    }

    /// Make sure `device` holds an `fs_type` filesystem.
    ///
    /// Never formats a device that carries any signature: a matching
    /// filesystem is a no-op, anything else is `FilesystemMismatch`.
    pub async fn ensure_initialized(
        &self,
        device: &Path,
        fs_type: &str,
        fs_args: &[String],
    ) -> BootstrapResult<Initialized> {
        let probe = self
            .probe
            .probe(device)
            .await
            .map_err(|source| BootstrapError::Probe {
                device: device.display().to_string(),
                source,
            })?;

        match probe {
            Probe::Filesystem(found) if found == fs_type => {
                tracing::info!(
                    "Device {} already has a {} filesystem, skipping format",
                    device.display(),
                    found
                );
                Ok(Initialized::AlreadyFormatted)
            }
            Probe::Filesystem(found) => Err(BootstrapError::FilesystemMismatch {
                device: device.display().to_string(),
                found: format!("a {} filesystem", found),
                expected: fs_type.to_string(),
            }),
            Probe::PartitionTable(table) => Err(BootstrapError::FilesystemMismatch {
                device: device.display().to_string(),
                found: format!("a {} partition table", table),
                expected: fs_type.to_string(),
            }),
            Probe::Blank => {
                tracing::info!(
                    device = %device.display(),
                    args = ?fs_args,
                    "No filesystem found, formatting with {}",
                    fs_type
                );
                self.format
                    .format(device, fs_type, fs_args)
                    .await
                    .map_err(|source| BootstrapError::Format {
                        device: device.display().to_string(),
                        fs_type: fs_type.to_string(),
                        source,
                    })?;
                tracing::info!("Formatted {} successfully", device.display());
                Ok(Initialized::Formatted)
            }
        }
    }
}
