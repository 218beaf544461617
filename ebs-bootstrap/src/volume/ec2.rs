//! EC2 implementation of [`VolumeApi`].

use super::{AttachmentRecord, AttachmentState, VolumeApi, VolumeIdentity};
use crate::errors::ApiError;
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_ec2::Client;
use aws_sdk_ec2::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_ec2::types::{Filter, Volume};
use std::fmt::Debug;

/// Error code EC2 returns when describing an unknown volume id.
const VOLUME_NOT_FOUND_CODE: &str = "InvalidVolume.NotFound";

/// Load the shared AWS configuration pinned to `region`.
///
/// Credentials come from the default provider chain (instance profile on EC2).
pub async fn load_config(region: &str) -> SdkConfig {
    aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(region.to_string()))
        .load()
        .await
}

/// Volume operations backed by the EC2 API.
#[derive(Clone, Debug)]
pub struct Ec2VolumeApi {
    client: Client,
}

impl Ec2VolumeApi {
    pub fn new(config: &SdkConfig) -> Self {
        Self {
            client: Client::new(config),
        }
    }
}

#[async_trait]
impl VolumeApi for Ec2VolumeApi {
    async fn describe_by_name(
        &self,
        name: &str,
        zone: &str,
    ) -> Result<Vec<VolumeIdentity>, ApiError> {
        let output = self
            .client
            .describe_volumes()
            .filters(Filter::builder().name("tag:Name").values(name).build())
            .filters(
                Filter::builder()
                    .name("availability-zone")
                    .values(zone)
                    .build(),
            )
            .send()
            .await
            .map_err(|e| api_error("DescribeVolumes", e))?;

        Ok(output.volumes().iter().map(volume_identity).collect())
    }

    async fn describe_by_id(&self, volume_id: &str) -> Result<Option<VolumeIdentity>, ApiError> {
        let result = self
            .client
            .describe_volumes()
            .volume_ids(volume_id)
            .send()
            .await;

        match result {
            Ok(output) => Ok(output.volumes().first().map(volume_identity)),
            Err(e) if e.code() == Some(VOLUME_NOT_FOUND_CODE) => Ok(None),
            Err(e) => Err(api_error("DescribeVolumes", e)),
        }
    }

    async fn attach(
        &self,
        volume_id: &str,
        instance_id: &str,
        device: &str,
    ) -> Result<(), ApiError> {
        let output = self
            .client
            .attach_volume()
            .device(device)
            .instance_id(instance_id)
            .volume_id(volume_id)
            .send()
            .await
            .map_err(|e| api_error("AttachVolume", e))?;

        tracing::debug!(
            volume_id,
            state = ?output.state(),
            "AttachVolume accepted"
        );
        Ok(())
    }
}

/// Convert an SDK failure, keeping the provider error code.
fn api_error<E, R>(operation: &'static str, err: SdkError<E, R>) -> ApiError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: Debug + Send + Sync + 'static,
{
    let code = err.code().map(str::to_owned);
    let message = err
        .message()
        .map(str::to_owned)
        .unwrap_or_else(|| DisplayErrorContext(&err).to_string());

    ApiError {
        operation,
        code,
        message,
        source: Some(Box::new(err)),
    }
}

fn volume_identity(volume: &Volume) -> VolumeIdentity {
    let name = volume
        .tags()
        .iter()
        .find(|tag| tag.key() == Some("Name"))
        .and_then(|tag| tag.value())
        .unwrap_or_default()
        .to_string();

    let attachments = volume
        .attachments()
        .iter()
        .map(|attachment| AttachmentRecord {
            instance_id: attachment.instance_id().unwrap_or_default().to_string(),
            device: attachment.device().unwrap_or_default().to_string(),
            state: attachment
                .state()
                .map(|state| AttachmentState::parse(state.as_str()))
                .unwrap_or_else(|| AttachmentState::Other(String::new())),
        })
        .collect();

    VolumeIdentity {
        volume_id: volume.volume_id().unwrap_or_default().to_string(),
        name,
        availability_zone: volume.availability_zone().unwrap_or_default().to_string(),
        attachments,
    }
}
