//! Wait for an attached block device to show up on the host.

use super::ProbeRunner;
use crate::errors::{BootstrapError, BootstrapResult, Stage};
use std::path::Path;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const DEVICE_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Block until `device` exists or `timeout` elapses.
///
/// The provider reports `attached` before udev has created the node (or the
/// NVMe alias symlink), so the first probe could otherwise race it.
pub async fn wait_for_device(
    runner: &dyn ProbeRunner,
    device: &Path,
    timeout: Duration,
    cancel: &CancellationToken,
) -> BootstrapResult<()> {
    let deadline = Instant::now() + timeout;
    let mut logged = false;

    loop {
        if runner.device_exists(device).await {
            tracing::debug!(device = %device.display(), "Block device present");
            return Ok(());
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(BootstrapError::DeviceNotReady {
                device: device.display().to_string(),
                timeout,
            });
        }

        if !logged {
            tracing::info!("Waiting for block device {} to appear", device.display());
            logged = true;
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(BootstrapError::Cancelled { stage: Stage::Attach });
            }
            _ = tokio::time::sleep(DEVICE_POLL_INTERVAL.min(deadline - now)) => {}
        }
    }
}
