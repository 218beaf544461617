//! Type definitions for the bootstrap pipeline.

use crate::storage::{
    FormatRunner, Initialized, MountRunner, Mounted, OwnerRunner, ProbeRunner, SystemCommands,
};
use crate::volume::ec2::{self, Ec2VolumeApi};
use crate::volume::metadata::ImdsMetadata;
use crate::volume::{AttachOutcome, InstanceContext, InstanceMetadata, VolumeApi};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// External collaborators the pipeline talks to.
///
/// Production wiring comes from [`Collaborators::aws`]; tests plug in fakes.
#[derive(Clone)]
pub struct Collaborators {
    pub metadata: Arc<dyn InstanceMetadata>,
    pub volumes: Arc<dyn VolumeApi>,
    pub probe: Arc<dyn ProbeRunner>,
    pub format: Arc<dyn FormatRunner>,
    pub mount: Arc<dyn MountRunner>,
    pub owner: Arc<dyn OwnerRunner>,
}

impl Collaborators {
    /// EC2 + IMDS for the cloud side, stock utilities for the host side.
    pub async fn aws(region: &str) -> Self {
        let config = ec2::load_config(region).await;
        let system = Arc::new(SystemCommands::new());

        Self {
            metadata: Arc::new(ImdsMetadata::new()),
            volumes: Arc::new(Ec2VolumeApi::new(&config)),
            probe: system.clone(),
            format: system.clone(),
            mount: system.clone(),
            owner: system,
        }
    }
}

/// Summary of a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct BootstrapReport {
    pub instance: InstanceContext,
    pub volume_id: String,
    pub volume_name: String,
    pub device: PathBuf,
    pub mount_point: PathBuf,
    pub owner: String,
    pub attach: AttachOutcome,
    pub filesystem: Initialized,
    pub mount: Mounted,
    pub elapsed: Duration,
}

impl BootstrapReport {
    /// Whether this run changed anything on the volume or the host.
    pub fn changed(&self) -> bool {
        self.attach == AttachOutcome::Attached
            || self.filesystem == Initialized::Formatted
            || self.mount == Mounted::Mounted
    }
}

impl fmt::Display for BootstrapReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "volume:      {} ({})", self.volume_id, self.volume_name)?;
        writeln!(
            f,
            "instance:    {} ({})",
            self.instance.instance_id, self.instance.availability_zone
        )?;
        writeln!(f, "device:      {}", self.device.display())?;
        writeln!(f, "mount point: {}", self.mount_point.display())?;
        writeln!(f, "owner:       {}", self.owner)?;
        writeln!(f, "attach:      {:?}", self.attach)?;
        writeln!(f, "filesystem:  {:?}", self.filesystem)?;
        write!(f, "mount:       {:?}", self.mount)
    }
}
