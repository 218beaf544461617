//! EBS volume bootstrap for etcd nodes.
//!
//! Resolves the node's data volume by name, attaches it to the running
//! instance, formats it if it is blank, mounts it and hands it to the etcd
//! service account. Every step is safe to re-run after a reboot or a failed
//! attempt.
//!
//! Entry point is [`BootstrapPipeline`].

pub mod errors;
pub mod init;
pub mod options;
pub mod storage;
pub mod volume;

pub use errors::{ApiError, BootstrapError, BootstrapResult, CommandError, Stage};
pub use init::{BootstrapPipeline, BootstrapReport, Collaborators};
pub use options::{AttachPolicy, BootstrapOptions, MatchPolicy};
pub use volume::{AttachmentRecord, AttachmentState, InstanceContext, VolumeIdentity};
