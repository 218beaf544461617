//! Bootstrap orchestration.
//!
//! ## Architecture
//!
//! A strict linear pipeline; each stage must succeed before the next starts:
//!
//! ```text
//! Metadata ──→ Locate ──→ Attach ──→ Filesystem ──→ Mount ──→ Permissions
//! ```
//!
//! Any error aborts the run. The two idempotent shortcuts (volume already
//! attached, device already mounted) are success paths, not suppressed
//! errors. Cancelling the token aborts the current stage, including any
//! running subprocess.

mod types;

pub use types::{BootstrapReport, Collaborators};

use crate::errors::{BootstrapError, BootstrapResult, Stage};
use crate::options::BootstrapOptions;
use crate::storage::{FilesystemInitializer, MountManager, PermissionFixer, wait_for_device};
use crate::volume::{VolumeAttacher, VolumeLocator};
use std::future::Future;
use std::path::Path;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Runs every bootstrap stage in order.
///
/// # Example
///
/// ```ignore
/// let collaborators = Collaborators::aws(&options.region).await;
/// let report = BootstrapPipeline::new(options, collaborators)
///     .with_cancellation(token)
///     .run()
///     .await?;
/// ```
pub struct BootstrapPipeline {
    options: BootstrapOptions,
    collaborators: Collaborators,
    cancel: CancellationToken,
}

impl BootstrapPipeline {
    pub fn new(options: BootstrapOptions, collaborators: Collaborators) -> Self {
        Self {
            options,
            collaborators,
            cancel: CancellationToken::new(),
        }
    }

    /// Abort the run when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn options(&self) -> &BootstrapOptions {
        &self.options
    }

    /// Execute all stages.
    pub async fn run(&self) -> BootstrapResult<BootstrapReport> {
        let started = Instant::now();
        let opts = &self.options;
        let c = &self.collaborators;

        opts.validate()?;
        let device = opts.block_device.as_path();
        let device_name = device.to_string_lossy();

        let instance = self
            .stage(Stage::Metadata, c.metadata.instance_context())
            .await?;

        let volume = self
            .stage(
                Stage::Locate,
                VolumeLocator::new(c.volumes.as_ref(), opts.volume_match)
                    .locate(&opts.volume_name, &instance.availability_zone),
            )
            .await?;

        let attached = VolumeAttacher::new(c.volumes.as_ref(), &opts.attach, &self.cancel)
            .attach(&instance.instance_id, &volume, &device_name)
            .await?;
        if Path::new(&attached.device) != device {
            tracing::warn!(
                recorded = %attached.device,
                configured = %device.display(),
                "Attachment device differs from the configured block device"
            );
        }
        wait_for_device(c.probe.as_ref(), device, opts.device_timeout, &self.cancel).await?;

        let filesystem = self
            .stage(
                Stage::Filesystem,
                FilesystemInitializer::new(c.probe.as_ref(), c.format.as_ref()).ensure_initialized(
                    device,
                    &opts.fs_type,
                    &opts.fs_args,
                ),
            )
            .await?;

        let mount = self
            .stage(
                Stage::Mount,
                MountManager::new(c.mount.as_ref()).ensure_mounted(
                    device,
                    &opts.mount_point,
                    &opts.fs_type,
                ),
            )
            .await?;

        self.stage(
            Stage::Permissions,
            PermissionFixer::new(c.owner.as_ref()).ensure_writable(&opts.mount_point, &opts.owner),
        )
        .await?;

        let elapsed = started.elapsed();
        tracing::info!(
            volume_id = %volume.volume_id,
            mount_point = %opts.mount_point.display(),
            "Bootstrap complete in {:?}",
            elapsed
        );

        Ok(BootstrapReport {
            instance,
            volume_id: volume.volume_id,
            volume_name: volume.name,
            device: opts.block_device.clone(),
            mount_point: opts.mount_point.clone(),
            owner: opts.owner.clone(),
            attach: attached.outcome,
            filesystem,
            mount,
            elapsed,
        })
    }

    /// Run one stage, aborting it if the token is cancelled first.
    async fn stage<T>(
        &self,
        stage: Stage,
        fut: impl Future<Output = BootstrapResult<T>>,
    ) -> BootstrapResult<T> {
        tracing::debug!(%stage, "Starting stage");
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(BootstrapError::Cancelled { stage }),
            result = fut => result,
        }
    }
}
