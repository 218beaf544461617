//! Resolve a volume by its `Name` tag.

use super::{VolumeApi, VolumeIdentity};
use crate::errors::{BootstrapError, BootstrapResult, Stage};
use crate::options::MatchPolicy;

/// Resolves a named volume to a concrete volume within one zone.
pub struct VolumeLocator<'a> {
    api: &'a dyn VolumeApi,
    policy: MatchPolicy,
}

impl<'a> VolumeLocator<'a> {
    pub fn new(api: &'a dyn VolumeApi, policy: MatchPolicy) -> Self {
        Self { api, policy }
    }

    /// Find the volume tagged `name` in `zone`.
    ///
    /// Zero matches is `VolumeNotFound`, never an empty success. API failures
    /// surface as `Transport` with the provider's classification intact.
    pub async fn locate(&self, name: &str, zone: &str) -> BootstrapResult<VolumeIdentity> {
        if name.is_empty() {
            return Err(BootstrapError::Config("volume name must not be empty".into()));
        }
        if zone.is_empty() {
            return Err(BootstrapError::Config(
                "availability zone must not be empty".into(),
            ));
        }

        let mut volumes = self
            .api
            .describe_by_name(name, zone)
            .await
            .map_err(|source| BootstrapError::transport(Stage::Locate, source))?;

        if volumes.len() > 1 {
            let volume_ids: Vec<String> = volumes.iter().map(|v| v.volume_id.clone()).collect();
            match self.policy {
                MatchPolicy::Strict => {
                    return Err(BootstrapError::AmbiguousVolume {
                        name: name.to_string(),
                        zone: zone.to_string(),
                        volume_ids,
                    });
                }
                MatchPolicy::First => {
                    tracing::warn!(
                        volume_name = %name,
                        zone = %zone,
                        candidates = ?volume_ids,
                        "Several volumes share this name, using the first one"
                    );
                }
            }
        }

        if volumes.is_empty() {
            return Err(BootstrapError::VolumeNotFound {
                name: name.to_string(),
                zone: zone.to_string(),
            });
        }
        let volume = volumes.swap_remove(0);

        tracing::info!("Resolved volume {} to {}", name, volume.volume_id);

        Ok(volume)
    }
}
