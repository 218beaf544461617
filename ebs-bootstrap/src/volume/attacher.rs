//! Attach a volume and wait for the attachment to converge.
//!
//! ```text
//!             attach request
//!   (start) ─────────────────→ poll ──→ no attachment yet ──┐
//!      │                        ↑  └──→ attaching ──────────┤ sleep (backoff)
//!      │ already ours           └───────────────────────────┘
//!      ↓                        └──→ attached ──→ (done)
//!   (done)
//! ```
//!
//! A record of ours left `detaching` by a previous boot is polled until it
//! clears, then a fresh request is issued.
//!
//! The loop is bounded by [`AttachPolicy::timeout`] and optionally
//! [`AttachPolicy::max_attempts`]; running out yields `WaitTimeout`.

use super::{AttachmentRecord, AttachmentState, VolumeApi, VolumeIdentity};
use crate::errors::{BootstrapError, BootstrapResult, Stage};
use crate::options::AttachPolicy;
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// How the volume ended up attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachOutcome {
    /// Already attached to this instance (e.g. after a reboot). No request issued.
    AlreadyAttached,
    /// Attach request issued during this run.
    Attached,
}

/// Result of a successful attach.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttachedVolume {
    pub volume_id: String,
    pub instance_id: String,
    /// Device name recorded by the provider for the attachment.
    pub device: String,
    pub outcome: AttachOutcome,
    /// Number of state polls performed.
    pub polls: u32,
}

/// Exponential poll delay: doubles every step, capped at a maximum.
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            next: initial.min(max),
            max,
        }
    }

    /// Delay to wait now; advances the sequence.
    pub fn next_delay(&mut self) -> Duration {
        let current = self.next;
        self.next = current.saturating_mul(2).min(self.max);
        current
    }
}

impl From<&AttachPolicy> for Backoff {
    fn from(policy: &AttachPolicy) -> Self {
        Self::new(policy.initial_interval, policy.max_interval)
    }
}

/// Drives a volume to the `attached` state for one instance.
pub struct VolumeAttacher<'a> {
    api: &'a dyn VolumeApi,
    policy: &'a AttachPolicy,
    cancel: &'a CancellationToken,
}

impl<'a> VolumeAttacher<'a> {
    pub fn new(
        api: &'a dyn VolumeApi,
        policy: &'a AttachPolicy,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            api,
            policy,
            cancel,
        }
    }

    /// Attach `volume` to `instance_id` as `device` and wait until it is usable.
    ///
    /// Idempotent: a volume already attached to `instance_id` succeeds
    /// without a second attach request. Only the first attachment record is
    /// consulted. A record of ours that is still detaching from a previous
    /// boot is waited out before a fresh request is sent.
    pub async fn attach(
        &self,
        instance_id: &str,
        volume: &VolumeIdentity,
        device: &str,
    ) -> BootstrapResult<AttachedVolume> {
        tracing::info!(
            "Will attach volume {} to instance id {}",
            volume.volume_id,
            instance_id
        );

        let mut budget = WaitBudget::new(self.policy);

        if let Some(record) = volume
            .attachment()
            .filter(|record| record.instance_id == instance_id)
        {
            match record.state {
                AttachmentState::Attached => {
                    tracing::info!(
                        "Volume {} is already attached to instance {} as device {}",
                        volume.volume_id,
                        instance_id,
                        record.device
                    );
                    return Ok(AttachedVolume {
                        volume_id: volume.volume_id.clone(),
                        instance_id: instance_id.to_string(),
                        device: record.device.clone(),
                        outcome: AttachOutcome::AlreadyAttached,
                        polls: 0,
                    });
                }
                AttachmentState::Detaching => {
                    tracing::info!(
                        volume_id = %volume.volume_id,
                        "Previous attachment to this instance is detaching, waiting for release"
                    );
                    self.wait_released(&volume.volume_id, instance_id, &mut budget)
                        .await?;
                }
                AttachmentState::Detached => {
                    tracing::info!(
                        volume_id = %volume.volume_id,
                        "Previous attachment to this instance is detached, attaching again"
                    );
                }
                _ => {
                    // Attachment from a previous boot still settling; no new request.
                    tracing::info!(
                        volume_id = %volume.volume_id,
                        state = %record.state,
                        "Volume already being attached to this instance, waiting"
                    );
                    let device = self
                        .wait_attached(&volume.volume_id, instance_id, &mut budget)
                        .await?;
                    return Ok(AttachedVolume {
                        volume_id: volume.volume_id.clone(),
                        instance_id: instance_id.to_string(),
                        device,
                        outcome: AttachOutcome::AlreadyAttached,
                        polls: budget.attempts,
                    });
                }
            }
        }

        let request = self.api.attach(&volume.volume_id, instance_id, device);
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                return Err(BootstrapError::Cancelled { stage: Stage::Attach });
            }
            result = request => result.map_err(|source| BootstrapError::AttachRequest {
                volume_id: volume.volume_id.clone(),
                instance_id: instance_id.to_string(),
                device: device.to_string(),
                source,
            })?,
        }

        tracing::info!(
            "Requested attachment of volume {} to instance {} as device {}",
            volume.volume_id,
            instance_id,
            device
        );

        budget.backoff = Backoff::from(self.policy);
        let device = self
            .wait_attached(&volume.volume_id, instance_id, &mut budget)
            .await?;

        tracing::info!(
            "Attached volume {} to instance {} as device {}",
            volume.volume_id,
            instance_id,
            device
        );

        Ok(AttachedVolume {
            volume_id: volume.volume_id.clone(),
            instance_id: instance_id.to_string(),
            device,
            outcome: AttachOutcome::Attached,
            polls: budget.attempts,
        })
    }

    /// Poll until the first attachment record is `attached` to `instance_id`.
    ///
    /// Returns the recorded device. Poll failures are not retried here.
    async fn wait_attached(
        &self,
        volume_id: &str,
        instance_id: &str,
        budget: &mut WaitBudget,
    ) -> BootstrapResult<String> {
        self.poll_until(volume_id, budget, |attachment, attempt| match attachment {
            None => {
                tracing::debug!(volume_id, attempt, "No attachment yet");
                Poll::Pending("none".to_string())
            }
            Some(record) if record.instance_id != instance_id => {
                tracing::warn!(
                    volume_id,
                    other_instance = %record.instance_id,
                    state = %record.state,
                    "Volume attachment belongs to another instance"
                );
                Poll::Pending(format!("{} to {}", record.state, record.instance_id))
            }
            Some(record) if record.state == AttachmentState::Attached => {
                tracing::debug!(volume_id, attempt, "Attachment reached attached");
                Poll::Done(record.device.clone())
            }
            Some(record) => {
                tracing::info!(
                    volume_id,
                    attempt,
                    "Waiting for volume attachment, state: {}",
                    record.state
                );
                Poll::Pending(record.state.to_string())
            }
        })
        .await
    }

    /// Poll until our `detaching` record from a previous boot is gone.
    async fn wait_released(
        &self,
        volume_id: &str,
        instance_id: &str,
        budget: &mut WaitBudget,
    ) -> BootstrapResult<()> {
        self.poll_until(volume_id, budget, |attachment, attempt| match attachment {
            Some(record)
                if record.instance_id == instance_id
                    && record.state == AttachmentState::Detaching =>
            {
                tracing::info!(volume_id, attempt, "Waiting for volume to detach");
                Poll::Pending(record.state.to_string())
            }
            _ => Poll::Done(String::new()),
        })
        .await
        .map(|_| ())
    }

    /// Describe the volume until `check` reports done, sleeping with backoff
    /// in between. Attempts and deadline are charged to `budget`.
    async fn poll_until<F>(
        &self,
        volume_id: &str,
        budget: &mut WaitBudget,
        mut check: F,
    ) -> BootstrapResult<String>
    where
        F: FnMut(Option<&AttachmentRecord>, u32) -> Poll,
    {
        loop {
            budget.attempts += 1;

            let described = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return Err(BootstrapError::Cancelled { stage: Stage::Attach });
                }
                result = self.api.describe_by_id(volume_id) => {
                    result.map_err(|source| BootstrapError::transport(Stage::Attach, source))?
                }
            };
            let volume = described.ok_or_else(|| BootstrapError::VolumeVanished {
                volume_id: volume_id.to_string(),
            })?;

            let last_state = match check(volume.attachment(), budget.attempts) {
                Poll::Done(device) => return Ok(device),
                Poll::Pending(state) => state,
            };

            let now = Instant::now();
            let out_of_attempts = self
                .policy
                .max_attempts
                .is_some_and(|max| budget.attempts >= max);
            if out_of_attempts || now >= budget.deadline {
                return Err(BootstrapError::WaitTimeout {
                    volume_id: volume_id.to_string(),
                    attempts: budget.attempts,
                    elapsed: now.duration_since(budget.started),
                    last_state,
                });
            }

            let delay = budget.backoff.next_delay().min(budget.deadline - now);
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return Err(BootstrapError::Cancelled { stage: Stage::Attach });
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

/// Result of inspecting one poll.
enum Poll {
    /// Done, with the recorded device.
    Done(String),
    /// Keep polling; carries the state seen for the timeout report.
    Pending(String),
}

/// Deadline and attempt count shared by every wait of one attach.
struct WaitBudget {
    started: Instant,
    deadline: Instant,
    backoff: Backoff,
    attempts: u32,
}

impl WaitBudget {
    fn new(policy: &AttachPolicy) -> Self {
        let started = Instant::now();
        Self {
            started,
            deadline: started + policy.timeout,
            backoff: Backoff::from(policy),
            attempts: 0,
        }
    }
}
