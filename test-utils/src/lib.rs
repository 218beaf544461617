//! In-memory fakes for every bootstrap collaborator.
//!
//! The fakes are stateful where the real system is: formatting makes later
//! probes see the filesystem, mounting adds a mount table entry, and a second
//! mount of the same entry fails the way `mount` does.

use async_trait::async_trait;
use ebs_bootstrap::storage::{FormatRunner, MountRunner, OwnerRunner, Probe, ProbeRunner};
use ebs_bootstrap::volume::{InstanceMetadata, VolumeApi};
use ebs_bootstrap::{
    ApiError, AttachmentRecord, AttachmentState, BootstrapError, BootstrapOptions,
    BootstrapResult, Collaborators, CommandError, InstanceContext, VolumeIdentity,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const INSTANCE_ID: &str = "i-0123456789abcdef0";
pub const ZONE: &str = "eu-west-1a";
pub const VOLUME_ID: &str = "vol-0a1b2c3d4e5f60718";
pub const VOLUME_NAME: &str = "data-1";
pub const DEVICE: &str = "/dev/xvdf";

/// Exit status `mount` uses for "already mounted" and most other failures.
pub const MOUNT_FAILURE: i32 = 32;

// ============================================================================
// Builders
// ============================================================================

/// A detached volume in [`ZONE`].
pub fn volume(volume_id: &str, name: &str) -> VolumeIdentity {
    VolumeIdentity {
        volume_id: volume_id.to_string(),
        name: name.to_string(),
        availability_zone: ZONE.to_string(),
        attachments: Vec::new(),
    }
}

/// `volume` with a single attachment record.
pub fn attached(
    mut volume: VolumeIdentity,
    instance_id: &str,
    state: AttachmentState,
) -> VolumeIdentity {
    volume.attachments = vec![AttachmentRecord {
        instance_id: instance_id.to_string(),
        device: DEVICE.to_string(),
        state,
    }];
    volume
}

pub fn throttled(operation: &'static str) -> ApiError {
    ApiError::new(operation, Some("RequestLimitExceeded"), "Request limit exceeded.")
}

pub fn unauthorized(operation: &'static str) -> ApiError {
    ApiError::new(
        operation,
        Some("UnauthorizedOperation"),
        "You are not authorized to perform this operation.",
    )
}

/// Options pointing at a fresh temporary mount point, with fast polling.
pub fn options(mount_root: &TempDir) -> BootstrapOptions {
    let mut opts = BootstrapOptions::new(VOLUME_NAME);
    opts.mount_point = mount_root.path().join("var/lib/etcd-bootstrap");
    opts.attach.initial_interval = Duration::from_millis(10);
    opts.attach.max_interval = Duration::from_millis(100);
    opts.attach.timeout = Duration::from_secs(5);
    opts.device_timeout = Duration::from_secs(1);
    opts
}

pub fn mount_root() -> TempDir {
    tempfile::tempdir().expect("failed to create temp dir")
}

// ============================================================================
// Instance Metadata
// ============================================================================

pub struct FakeMetadata {
    context: Option<InstanceContext>,
}

impl FakeMetadata {
    pub fn new() -> Self {
        Self {
            context: Some(InstanceContext {
                instance_id: INSTANCE_ID.to_string(),
                availability_zone: ZONE.to_string(),
            }),
        }
    }

    /// Metadata service that never answers successfully.
    pub fn unreachable() -> Self {
        Self { context: None }
    }
}

impl Default for FakeMetadata {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InstanceMetadata for FakeMetadata {
    async fn instance_context(&self) -> BootstrapResult<InstanceContext> {
        self.context.clone().ok_or_else(|| BootstrapError::Metadata {
            key: "placement/availability-zone",
            source: "connection refused".into(),
        })
    }
}

// ============================================================================
// Volume API
// ============================================================================

/// One scripted answer to `describe_by_id`.
#[derive(Debug, Clone)]
pub enum PollStep {
    /// Volume no longer exists.
    Vanished,
    /// Volume exists with no attachment record.
    NoAttachment,
    /// First attachment record belongs to the caller, in this state.
    State(AttachmentState),
    /// First attachment record belongs to another instance.
    OtherInstance(String, AttachmentState),
    /// The describe call fails with this provider code.
    Error(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachCall {
    pub volume_id: String,
    pub instance_id: String,
    pub device: String,
}

#[derive(Default)]
struct VolumeState {
    by_name: Vec<VolumeIdentity>,
    describe_error: Option<ApiError>,
    attach_error: Option<ApiError>,
    polls: VecDeque<PollStep>,
    last_poll: Option<PollStep>,
    attach_calls: Vec<AttachCall>,
    describe_by_name_calls: u32,
    describe_by_id_calls: u32,
}

/// Scripted [`VolumeApi`].
///
/// `describe_by_id` pops one [`PollStep`] per call and keeps repeating the
/// last one when the script runs out.
#[derive(Default)]
pub struct FakeVolumeApi {
    state: Mutex<VolumeState>,
}

impl FakeVolumeApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Volumes returned by name lookup, in provider order.
    pub fn with_volumes(self, volumes: Vec<VolumeIdentity>) -> Self {
        self.state.lock().by_name = volumes;
        self
    }

    pub fn with_describe_error(self, error: ApiError) -> Self {
        self.state.lock().describe_error = Some(error);
        self
    }

    pub fn with_attach_error(self, error: ApiError) -> Self {
        self.state.lock().attach_error = Some(error);
        self
    }

    pub fn with_polls(self, polls: Vec<PollStep>) -> Self {
        self.state.lock().polls = polls.into();
        self
    }

    pub fn attach_calls(&self) -> Vec<AttachCall> {
        self.state.lock().attach_calls.clone()
    }

    pub fn describe_by_name_calls(&self) -> u32 {
        self.state.lock().describe_by_name_calls
    }

    pub fn describe_by_id_calls(&self) -> u32 {
        self.state.lock().describe_by_id_calls
    }
}

#[async_trait]
impl VolumeApi for FakeVolumeApi {
    async fn describe_by_name(
        &self,
        name: &str,
        zone: &str,
    ) -> Result<Vec<VolumeIdentity>, ApiError> {
        let mut state = self.state.lock();
        state.describe_by_name_calls += 1;
        if let Some(error) = state.describe_error.take() {
            return Err(error);
        }
        Ok(state
            .by_name
            .iter()
            .filter(|v| v.name == name && v.availability_zone == zone)
            .cloned()
            .collect())
    }

    async fn describe_by_id(&self, volume_id: &str) -> Result<Option<VolumeIdentity>, ApiError> {
        let mut state = self.state.lock();
        state.describe_by_id_calls += 1;

        let step = match state.polls.pop_front() {
            Some(step) => {
                state.last_poll = Some(step.clone());
                step
            }
            None => state.last_poll.clone().unwrap_or(PollStep::NoAttachment),
        };

        let base = state
            .by_name
            .iter()
            .find(|v| v.volume_id == volume_id)
            .cloned()
            .unwrap_or_else(|| volume(volume_id, VOLUME_NAME));
        let instance_id = state
            .attach_calls
            .last()
            .map(|call| call.instance_id.clone())
            .unwrap_or_else(|| INSTANCE_ID.to_string());

        match step {
            PollStep::Vanished => Ok(None),
            PollStep::NoAttachment => Ok(Some(VolumeIdentity {
                attachments: Vec::new(),
                ..base
            })),
            PollStep::State(s) => Ok(Some(attached(base, &instance_id, s))),
            PollStep::OtherInstance(other, s) => Ok(Some(attached(base, &other, s))),
            PollStep::Error(code) => Err(ApiError::new("DescribeVolumes", Some(code), code)),
        }
    }

    async fn attach(
        &self,
        volume_id: &str,
        instance_id: &str,
        device: &str,
    ) -> Result<(), ApiError> {
        let mut state = self.state.lock();
        state.attach_calls.push(AttachCall {
            volume_id: volume_id.to_string(),
            instance_id: instance_id.to_string(),
            device: device.to_string(),
        });
        match state.attach_error.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

// ============================================================================
// OS Commands
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatCall {
    pub device: PathBuf,
    pub fs_type: String,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChownCall {
    pub path: PathBuf,
    pub owner: String,
}

struct SystemState {
    device_present: bool,
    filesystem: Option<String>,
    partition_table: Option<String>,
    probe_exit: Option<i32>,
    format_exit: Option<i32>,
    mount_exit: Option<i32>,
    mount_table: String,
    mount_table_exit: Option<i32>,
    chown_exit: Option<i32>,
    format_calls: Vec<FormatCall>,
    mount_calls: Vec<(PathBuf, PathBuf)>,
    chown_calls: Vec<ChownCall>,
}

/// Stateful fake of the host's block device and utilities.
pub struct FakeSystem {
    state: Mutex<SystemState>,
}

impl Default for FakeSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeSystem {
    /// A present, blank device and an empty mount table.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SystemState {
                device_present: true,
                filesystem: None,
                partition_table: None,
                probe_exit: None,
                format_exit: None,
                mount_exit: None,
                mount_table: String::new(),
                mount_table_exit: None,
                chown_exit: None,
                format_calls: Vec::new(),
                mount_calls: Vec::new(),
                chown_calls: Vec::new(),
            }),
        }
    }

    pub fn with_device_present(self, present: bool) -> Self {
        self.state.lock().device_present = present;
        self
    }

    pub fn with_filesystem(self, fs_type: &str) -> Self {
        self.state.lock().filesystem = Some(fs_type.to_string());
        self
    }

    pub fn with_partition_table(self, pt_type: &str) -> Self {
        self.state.lock().partition_table = Some(pt_type.to_string());
        self
    }

    /// `blkid` fails with this exit status (other than "nothing found").
    pub fn with_probe_exit(self, code: i32) -> Self {
        self.state.lock().probe_exit = Some(code);
        self
    }

    pub fn with_format_exit(self, code: i32) -> Self {
        self.state.lock().format_exit = Some(code);
        self
    }

    /// Every `mount` call fails with this exit status.
    pub fn with_mount_exit(self, code: i32) -> Self {
        self.state.lock().mount_exit = Some(code);
        self
    }

    pub fn with_mount_table(self, table: &str) -> Self {
        self.state.lock().mount_table = table.to_string();
        self
    }

    pub fn with_mount_table_exit(self, code: i32) -> Self {
        self.state.lock().mount_table_exit = Some(code);
        self
    }

    pub fn with_chown_exit(self, code: i32) -> Self {
        self.state.lock().chown_exit = Some(code);
        self
    }

    pub fn set_device_present(&self, present: bool) {
        self.state.lock().device_present = present;
    }

    pub fn format_calls(&self) -> Vec<FormatCall> {
        self.state.lock().format_calls.clone()
    }

    pub fn mount_calls(&self) -> Vec<(PathBuf, PathBuf)> {
        self.state.lock().mount_calls.clone()
    }

    pub fn chown_calls(&self) -> Vec<ChownCall> {
        self.state.lock().chown_calls.clone()
    }

    pub fn mount_table_snapshot(&self) -> String {
        self.state.lock().mount_table.clone()
    }
}

#[async_trait]
impl ProbeRunner for FakeSystem {
    async fn device_exists(&self, _device: &Path) -> bool {
        self.state.lock().device_present
    }

    async fn probe(&self, _device: &Path) -> Result<Probe, CommandError> {
        let state = self.state.lock();
        if let Some(code) = state.probe_exit {
            return Err(CommandError::exit("blkid", Some(code)));
        }
        Ok(match (&state.filesystem, &state.partition_table) {
            (Some(fs), _) => Probe::Filesystem(fs.clone()),
            (None, Some(pt)) => Probe::PartitionTable(pt.clone()),
            (None, None) => Probe::Blank,
        })
    }
}

#[async_trait]
impl FormatRunner for FakeSystem {
    async fn format(
        &self,
        device: &Path,
        fs_type: &str,
        args: &[String],
    ) -> Result<(), CommandError> {
        let mut state = self.state.lock();
        state.format_calls.push(FormatCall {
            device: device.to_path_buf(),
            fs_type: fs_type.to_string(),
            args: args.to_vec(),
        });
        if let Some(code) = state.format_exit {
            return Err(CommandError::exit("mkfs", Some(code)));
        }
        state.filesystem = Some(fs_type.to_string());
        Ok(())
    }
}

#[async_trait]
impl MountRunner for FakeSystem {
    async fn mount(
        &self,
        device: &Path,
        mount_point: &Path,
        fs_type: &str,
    ) -> Result<(), CommandError> {
        let mut state = self.state.lock();
        state
            .mount_calls
            .push((device.to_path_buf(), mount_point.to_path_buf()));

        let entry = format!("{} on {}", device.display(), mount_point.display());
        let already = state.mount_table.lines().any(|line| line.starts_with(&entry));
        if already {
            return Err(CommandError::exit("mount", Some(MOUNT_FAILURE)));
        }
        if let Some(code) = state.mount_exit {
            return Err(CommandError::exit("mount", Some(code)));
        }
        state
            .mount_table
            .push_str(&format!("{} type {} (rw,relatime)\n", entry, fs_type));
        Ok(())
    }

    async fn mount_table(&self) -> Result<String, CommandError> {
        let state = self.state.lock();
        match state.mount_table_exit {
            Some(code) => Err(CommandError::exit("mount", Some(code))),
            None => Ok(state.mount_table.clone()),
        }
    }
}

#[async_trait]
impl OwnerRunner for FakeSystem {
    async fn chown_recursive(&self, path: &Path, owner: &str) -> Result<(), CommandError> {
        let mut state = self.state.lock();
        state.chown_calls.push(ChownCall {
            path: path.to_path_buf(),
            owner: owner.to_string(),
        });
        match state.chown_exit {
            Some(code) => Err(CommandError::exit("chown", Some(code))),
            None => Ok(()),
        }
    }
}

// ============================================================================
// Wiring
// ============================================================================

/// Collaborators backed by the given fakes.
pub fn collaborators(
    metadata: FakeMetadata,
    volumes: Arc<FakeVolumeApi>,
    system: Arc<FakeSystem>,
) -> Collaborators {
    Collaborators {
        metadata: Arc::new(metadata),
        volumes,
        probe: system.clone(),
        format: system.clone(),
        mount: system.clone(),
        owner: system,
    }
}
