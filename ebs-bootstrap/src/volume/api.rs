//! Cloud volume API seam.

use super::VolumeIdentity;
use crate::errors::ApiError;
use async_trait::async_trait;

/// Block-storage operations consumed by the bootstrap.
///
/// Production uses [`super::ec2::Ec2VolumeApi`]; tests use scripted fakes.
#[async_trait]
pub trait VolumeApi: Send + Sync {
    /// Describe volumes tagged `Name=<name>` in `zone`, in provider order.
    async fn describe_by_name(&self, name: &str, zone: &str)
    -> Result<Vec<VolumeIdentity>, ApiError>;

    /// Describe a single volume. `None` if the provider no longer knows it.
    async fn describe_by_id(&self, volume_id: &str) -> Result<Option<VolumeIdentity>, ApiError>;

    /// Request attachment of `volume_id` to `instance_id` as `device`.
    async fn attach(&self, volume_id: &str, instance_id: &str, device: &str)
    -> Result<(), ApiError>;
}
