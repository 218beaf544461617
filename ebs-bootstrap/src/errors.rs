//! Error types for the bootstrap pipeline.
//!
//! Every pipeline stage fails with one [`BootstrapError`] variant. Causes are
//! kept as `#[source]` so the entrypoint can log the full chain:
//! - [`ApiError`]: cloud API call failures, with the provider's error code
//! - [`CommandError`]: OS command failures (spawn or non-zero exit)

use std::fmt;
use std::io;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Boxed error used to carry provider-specific causes.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for bootstrap operations.
pub type BootstrapResult<T> = Result<T, BootstrapError>;

// ============================================================================
// Top-Level Error
// ============================================================================

/// Errors that abort a bootstrap run.
///
/// No variant is recoverable inside the pipeline. A failed run is expected to
/// be retried from the beginning by whatever supervises the instance.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Invalid options or arguments.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Instance metadata could not be read.
    #[error("instance metadata {key}: {source}")]
    Metadata {
        key: &'static str,
        #[source]
        source: BoxError,
    },

    /// No volume carries the requested name in the zone.
    #[error("cannot find volume with name '{name}' in {zone}")]
    VolumeNotFound { name: String, zone: String },

    /// Several volumes carry the requested name in the zone.
    #[error("volume name '{name}' is ambiguous in {zone}: {}", .volume_ids.join(", "))]
    AmbiguousVolume {
        name: String,
        zone: String,
        volume_ids: Vec<String>,
    },

    /// Volume disappeared from the API while waiting for it.
    #[error("volume {volume_id} is no longer described by the API")]
    VolumeVanished { volume_id: String },

    /// A describe call failed.
    #[error("cloud api: {source}")]
    Transport {
        stage: Stage,
        #[source]
        source: ApiError,
    },

    /// The attach request itself was rejected.
    #[error("attach {volume_id} to {instance_id} as {device}: {source}")]
    AttachRequest {
        volume_id: String,
        instance_id: String,
        device: String,
        #[source]
        source: ApiError,
    },

    /// Attachment did not converge before the deadline.
    #[error(
        "volume {volume_id} not attached after {elapsed:?} ({attempts} polls, last state: {last_state})"
    )]
    WaitTimeout {
        volume_id: String,
        attempts: u32,
        elapsed: Duration,
        last_state: String,
    },

    /// Device node never showed up after attachment.
    #[error("block device {device} did not appear within {timeout:?}")]
    DeviceNotReady { device: String, timeout: Duration },

    /// Filesystem probe failed for a reason other than "blank device".
    #[error("probe {device}: {source}")]
    Probe {
        device: String,
        #[source]
        source: CommandError,
    },

    /// Device carries data that is not the expected filesystem.
    #[error("{device} already carries {found}, expected {expected} filesystem; refusing to format")]
    FilesystemMismatch {
        device: String,
        found: String,
        expected: String,
    },

    /// Formatting failed.
    #[error("format {device} as {fs_type}: {source}")]
    Format {
        device: String,
        fs_type: String,
        #[source]
        source: CommandError,
    },

    /// Mount point creation failed.
    #[error("create mount point {mount_point}: {source}")]
    MountPoint {
        mount_point: String,
        #[source]
        source: io::Error,
    },

    /// Mount failed and the mount table does not show the expected entry.
    #[error("mount {device} at {mount_point}: {reason}: {source}")]
    Mount {
        device: String,
        mount_point: String,
        reason: &'static str,
        #[source]
        source: CommandError,
    },

    /// Recursive ownership change failed.
    #[error("chown {owner} {path}: {source}")]
    Permission {
        path: String,
        owner: String,
        #[source]
        source: CommandError,
    },

    /// Run aborted by an external signal.
    #[error("bootstrap cancelled during {stage}")]
    Cancelled { stage: Stage },
}

impl BootstrapError {
    /// Pipeline stage this error belongs to.
    pub fn stage(&self) -> Stage {
        match self {
            Self::Config(_) => Stage::Config,
            Self::Metadata { .. } => Stage::Metadata,
            Self::VolumeNotFound { .. } | Self::AmbiguousVolume { .. } => Stage::Locate,
            Self::VolumeVanished { .. }
            | Self::AttachRequest { .. }
            | Self::WaitTimeout { .. }
            | Self::DeviceNotReady { .. } => Stage::Attach,
            Self::Probe { .. } | Self::FilesystemMismatch { .. } | Self::Format { .. } => {
                Stage::Filesystem
            }
            Self::MountPoint { .. } | Self::Mount { .. } => Stage::Mount,
            Self::Permission { .. } => Stage::Permissions,
            Self::Transport { stage, .. } | Self::Cancelled { stage } => *stage,
        }
    }

    /// Cloud API failure raised while running `stage`.
    pub fn transport(stage: Stage, source: ApiError) -> Self {
        Self::Transport { stage, source }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Config,
    Metadata,
    Locate,
    Attach,
    Filesystem,
    Mount,
    Permissions,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Config => "config",
            Stage::Metadata => "metadata",
            Stage::Locate => "locate",
            Stage::Attach => "attach",
            Stage::Filesystem => "filesystem",
            Stage::Mount => "mount",
            Stage::Permissions => "permissions",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Cloud API Errors
// ============================================================================

/// Provider error codes that mean the request was throttled.
const THROTTLING_CODES: &[&str] = &[
    "RequestLimitExceeded",
    "Throttling",
    "ThrottlingException",
    "TooManyRequestsException",
];

/// Provider error codes that mean the caller lacks permission.
const UNAUTHORIZED_CODES: &[&str] = &["UnauthorizedOperation", "AuthFailure", "AccessDenied"];

/// Failure of a single cloud API call.
///
/// Keeps the provider's error code so callers can tell throttling apart from
/// permission problems without parsing messages.
#[derive(Debug, Error)]
#[error("{operation}: {message}")]
pub struct ApiError {
    pub operation: &'static str,
    pub code: Option<String>,
    pub message: String,
    #[source]
    pub source: Option<BoxError>,
}

impl ApiError {
    pub fn new(operation: &'static str, code: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            operation,
            code: code.map(str::to_owned),
            message: message.into(),
            source: None,
        }
    }

    /// Attach the underlying provider error.
    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn is_throttling(&self) -> bool {
        self.code
            .as_deref()
            .is_some_and(|code| THROTTLING_CODES.contains(&code))
    }

    pub fn is_unauthorized(&self) -> bool {
        self.code
            .as_deref()
            .is_some_and(|code| UNAUTHORIZED_CODES.contains(&code))
    }
}

// ============================================================================
// Command Errors
// ============================================================================

/// Failure of an external OS command.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The program could not be started.
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// The target could not be opened before running the program.
    #[error("cannot open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: io::Error,
    },

    /// The program ran and exited unsuccessfully.
    #[error("{program} exited with {}", exit_code_display(.code))]
    Exit { program: String, code: Option<i32> },
}

impl CommandError {
    pub fn spawn(program: impl Into<String>, source: io::Error) -> Self {
        Self::Spawn {
            program: program.into(),
            source,
        }
    }

    pub fn open(path: &Path, source: io::Error) -> Self {
        Self::Open {
            path: path.display().to_string(),
            source,
        }
    }

    pub fn exit(program: impl Into<String>, code: Option<i32>) -> Self {
        Self::Exit {
            program: program.into(),
            code,
        }
    }

    /// Exit code, when the program ran to completion.
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::Exit { code, .. } => *code,
            Self::Spawn { .. } | Self::Open { .. } => None,
        }
    }
}

fn exit_code_display(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {}", code),
        None => "signal".to_string(),
    }
}
