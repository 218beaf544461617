//! Instance metadata lookup.

use super::InstanceContext;
use crate::errors::{BootstrapError, BootstrapResult};
use async_trait::async_trait;

const AVAILABILITY_ZONE_PATH: &str = "/latest/meta-data/placement/availability-zone";
const INSTANCE_ID_PATH: &str = "/latest/meta-data/instance-id";

/// Source of the running instance's identity.
#[async_trait]
pub trait InstanceMetadata: Send + Sync {
    async fn instance_context(&self) -> BootstrapResult<InstanceContext>;
}

/// Reads identity from the EC2 instance metadata service (IMDSv2).
#[derive(Clone, Debug)]
pub struct ImdsMetadata {
    client: aws_config::imds::Client,
}

impl ImdsMetadata {
    pub fn new() -> Self {
        Self {
            client: aws_config::imds::Client::builder().build(),
        }
    }

    async fn get(&self, key: &'static str, path: &str) -> BootstrapResult<String> {
        let value = self
            .client
            .get(path)
            .await
            .map_err(|e| BootstrapError::Metadata {
                key,
                source: Box::new(e),
            })?;
        Ok(String::from(value).trim().to_string())
    }
}

impl Default for ImdsMetadata {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InstanceMetadata for ImdsMetadata {
    async fn instance_context(&self) -> BootstrapResult<InstanceContext> {
        let availability_zone = self
            .get("placement/availability-zone", AVAILABILITY_ZONE_PATH)
            .await?;
        let instance_id = self.get("instance-id", INSTANCE_ID_PATH).await?;

        tracing::info!(
            instance_id = %instance_id,
            availability_zone = %availability_zone,
            "Read instance metadata"
        );

        Ok(InstanceContext {
            instance_id,
            availability_zone,
        })
    }
}
