//! Cloud side of the bootstrap: volume lookup and attachment.
//!
//! - [`VolumeLocator`]: resolves a tag name to a volume in the instance's zone
//! - [`VolumeAttacher`]: attaches the volume and waits for `attached`
//!
//! Both talk to the provider through the [`VolumeApi`] trait; the instance's
//! own identity comes from [`InstanceMetadata`].

mod api;
mod attacher;
pub mod ec2;
mod locator;
pub mod metadata;

pub use api::VolumeApi;
pub use attacher::{AttachOutcome, AttachedVolume, Backoff, VolumeAttacher};
pub use locator::VolumeLocator;
pub use metadata::InstanceMetadata;

use serde::Serialize;
use std::fmt;

/// Snapshot of a volume as described by the cloud API.
///
/// Never cached: every poll fetches a fresh one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VolumeIdentity {
    pub volume_id: String,
    pub name: String,
    pub availability_zone: String,
    pub attachments: Vec<AttachmentRecord>,
}

impl VolumeIdentity {
    /// The attachment record that is consulted for state decisions.
    pub fn attachment(&self) -> Option<&AttachmentRecord> {
        self.attachments.first()
    }
}

/// Association between a volume and an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttachmentRecord {
    pub instance_id: String,
    pub device: String,
    pub state: AttachmentState,
}

/// Attachment state reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentState {
    Attaching,
    Attached,
    Detaching,
    Detached,
    Busy,
    /// State string this build does not know about.
    Other(String),
}

impl AttachmentState {
    pub fn parse(state: &str) -> Self {
        match state {
            "attaching" => Self::Attaching,
            "attached" => Self::Attached,
            "detaching" => Self::Detaching,
            "detached" => Self::Detached,
            "busy" => Self::Busy,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Attaching => "attaching",
            Self::Attached => "attached",
            Self::Detaching => "detaching",
            Self::Detached => "detached",
            Self::Busy => "busy",
            Self::Other(state) => state,
        }
    }
}

impl fmt::Display for AttachmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of the instance running the bootstrap. Read once per run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceContext {
    pub instance_id: String,
    pub availability_zone: String,
}
