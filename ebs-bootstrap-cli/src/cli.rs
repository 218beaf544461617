//! Command-line flags.

use clap::{Parser, ValueEnum};
use ebs_bootstrap::options::{
    DEFAULT_BLOCK_DEVICE, DEFAULT_FS_TYPE, DEFAULT_MOUNT_POINT, DEFAULT_OWNER, DEFAULT_REGION,
};
use ebs_bootstrap::{BootstrapOptions, MatchPolicy};
use std::path::PathBuf;
use std::time::Duration;

/// Attach, format and mount the EBS data volume of an etcd node
#[derive(Parser, Debug)]
#[command(name = "ebs-bootstrap", author, version)]
pub struct Cli {
    /// AWS region this instance is on
    #[arg(long, env = "EBS_BOOTSTRAP_AWS_REGION", default_value = DEFAULT_REGION)]
    pub aws_region: String,

    /// EBS volume to attach to this node (value of its Name tag)
    #[arg(long, env = "EBS_BOOTSTRAP_VOLUME_NAME", default_value = "")]
    pub ebs_volume_name: String,

    /// EBS volume mount point
    #[arg(long, env = "EBS_BOOTSTRAP_MOUNT_POINT", default_value = DEFAULT_MOUNT_POINT)]
    pub mount_point: PathBuf,

    /// Block device to attach as
    #[arg(long, env = "EBS_BOOTSTRAP_BLOCK_DEVICE", default_value = DEFAULT_BLOCK_DEVICE)]
    pub block_device: PathBuf,

    /// Filesystem type to expect, or to create on a blank volume
    #[arg(long, env = "EBS_BOOTSTRAP_FS_TYPE", default_value = DEFAULT_FS_TYPE)]
    pub fs_type: String,

    /// Extra argument for the format utility (repeatable; the env var is
    /// split on spaces)
    ///
    /// Examples:
    ///   --fs-arg=-L --fs-arg=etcd
    #[arg(
        long = "fs-arg",
        env = "EBS_BOOTSTRAP_FS_ARGS",
        value_delimiter = ' ',
        allow_hyphen_values = true
    )]
    pub fs_args: Vec<String>,

    /// Owner of the mounted volume, as user[:group]
    #[arg(long, env = "EBS_BOOTSTRAP_OWNER", default_value = DEFAULT_OWNER)]
    pub owner: String,

    /// How to handle several volumes sharing the name in one zone
    #[arg(
        long,
        env = "EBS_BOOTSTRAP_VOLUME_MATCH",
        value_enum,
        default_value_t = VolumeMatch::Strict
    )]
    pub volume_match: VolumeMatch,

    /// Seconds to wait for the volume to reach the attached state
    #[arg(long, env = "EBS_BOOTSTRAP_ATTACH_TIMEOUT", default_value_t = 300)]
    pub attach_timeout: u64,

    /// Give up after this many attachment state polls
    #[arg(long, env = "EBS_BOOTSTRAP_ATTACH_MAX_ATTEMPTS")]
    pub attach_max_attempts: Option<u32>,

    /// Seconds to wait for the block device node after attachment
    #[arg(long, env = "EBS_BOOTSTRAP_DEVICE_TIMEOUT", default_value_t = 60)]
    pub device_timeout: u64,

    /// Format of the summary printed on success
    #[arg(
        long,
        env = "EBS_BOOTSTRAP_OUTPUT",
        value_enum,
        default_value_t = OutputFormat::Text
    )]
    pub output: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum VolumeMatch {
    /// Fail when the name matches several volumes
    Strict,
    /// Use the first volume the API returns
    First,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

impl Cli {
    pub fn to_options(&self) -> BootstrapOptions {
        let mut opts = BootstrapOptions::new(self.ebs_volume_name.clone());
        opts.region = self.aws_region.clone();
        opts.mount_point = self.mount_point.clone();
        opts.block_device = self.block_device.clone();
        opts.fs_type = self.fs_type.clone();
        opts.fs_args = self.fs_args.clone();
        opts.owner = self.owner.clone();
        opts.volume_match = match self.volume_match {
            VolumeMatch::Strict => MatchPolicy::Strict,
            VolumeMatch::First => MatchPolicy::First,
        };
        opts.attach.timeout = Duration::from_secs(self.attach_timeout);
        opts.attach.max_attempts = self.attach_max_attempts;
        opts.device_timeout = Duration::from_secs(self.device_timeout);
        opts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_options() {
        let cli = Cli::try_parse_from(["ebs-bootstrap", "--ebs-volume-name", "data-1"]).unwrap();
        let opts = cli.to_options();
        assert_eq!(opts.volume_name, "data-1");
        assert_eq!(opts.region, "eu-west-1");
        assert_eq!(opts.mount_point, PathBuf::from("/var/lib/etcd-bootstrap"));
        assert_eq!(opts.block_device, PathBuf::from("/dev/xvdf"));
        assert_eq!(opts.attach.timeout, Duration::from_secs(300));
        assert_eq!(opts.volume_match, MatchPolicy::Strict);
        assert_eq!(cli.output, OutputFormat::Text);
    }

    #[test]
    fn test_fs_args_accept_hyphens() {
        let cli = Cli::try_parse_from([
            "ebs-bootstrap",
            "--ebs-volume-name",
            "data-1",
            "--fs-arg",
            "-L",
            "--fs-arg",
            "etcd",
            "--volume-match",
            "first",
            "--attach-max-attempts",
            "20",
        ])
        .unwrap();
        let opts = cli.to_options();
        assert_eq!(opts.fs_args, vec!["-L".to_string(), "etcd".to_string()]);
        assert_eq!(opts.volume_match, MatchPolicy::First);
        assert_eq!(opts.attach.max_attempts, Some(20));
    }
}
