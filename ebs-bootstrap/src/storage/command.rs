//! Runner implementations backed by real subprocesses.
//!
//! Children inherit stderr so the operator sees the utilities' own messages;
//! the exit status is the only success signal. Children are killed when the
//! future driving them is dropped, which is how cancellation reaches them.

use super::{FormatRunner, MountRunner, OwnerRunner, Probe, ProbeRunner};
use crate::errors::CommandError;
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

/// `blkid` exit status when no signature was detected.
const BLKID_NOTHING_FOUND: i32 = 2;

/// Runs the stock Linux utilities.
#[derive(Clone, Debug, Default)]
pub struct SystemCommands;

impl SystemCommands {
    pub fn new() -> Self {
        Self
    }
}

fn command(program: &str) -> Command {
    let mut cmd = Command::new(program);
    cmd.stdin(Stdio::null()).kill_on_drop(true);
    cmd
}

/// Run `cmd` with inherited stdout/stderr and check its exit status.
async fn run_inherited(program: &str, cmd: &mut Command) -> Result<(), CommandError> {
    tracing::debug!(command = ?cmd.as_std(), "Running command");

    let status = cmd
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .await
        .map_err(|e| CommandError::spawn(program, e))?;

    if !status.success() {
        return Err(CommandError::exit(program, status.code()));
    }
    Ok(())
}

#[async_trait]
impl ProbeRunner for SystemCommands {
    async fn device_exists(&self, device: &Path) -> bool {
        tokio::fs::try_exists(device).await.unwrap_or(false)
    }

    async fn probe(&self, device: &Path) -> Result<Probe, CommandError> {
        // blkid also exits 2 for a device it cannot read, so only an
        // openable device may be reported blank.
        tokio::fs::File::open(device)
            .await
            .map_err(|e| CommandError::open(device, e))?;

        // -p bypasses the cache so a freshly attached device is read from disk.
        let output = command("blkid")
            .args(["-p", "-o", "export"])
            .arg(device)
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .output()
            .await
            .map_err(|e| CommandError::spawn("blkid", e))?;

        match output.status.code() {
            Some(0) => Ok(parse_blkid_export(&String::from_utf8_lossy(&output.stdout))),
            Some(BLKID_NOTHING_FOUND) => Ok(Probe::Blank),
            code => Err(CommandError::exit("blkid", code)),
        }
    }
}

#[async_trait]
impl FormatRunner for SystemCommands {
    async fn format(
        &self,
        device: &Path,
        fs_type: &str,
        args: &[String],
    ) -> Result<(), CommandError> {
        let mut cmd = command("mkfs");
        cmd.arg("-t").arg(fs_type).args(args).arg(device);
        run_inherited("mkfs", &mut cmd).await
    }
}

#[async_trait]
impl MountRunner for SystemCommands {
    async fn mount(
        &self,
        device: &Path,
        mount_point: &Path,
        fs_type: &str,
    ) -> Result<(), CommandError> {
        let mut cmd = command("mount");
        cmd.arg("-t").arg(fs_type).arg(device).arg(mount_point);
        run_inherited("mount", &mut cmd).await
    }

    async fn mount_table(&self) -> Result<String, CommandError> {
        let output = command("mount")
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .output()
            .await
            .map_err(|e| CommandError::spawn("mount", e))?;

        if !output.status.success() {
            return Err(CommandError::exit("mount", output.status.code()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl OwnerRunner for SystemCommands {
    async fn chown_recursive(&self, path: &Path, owner: &str) -> Result<(), CommandError> {
        let mut cmd = command("chown");
        cmd.arg("-R").arg(owner).arg(path);
        run_inherited("chown", &mut cmd).await
    }
}

/// Interpret `blkid -o export` output (`KEY=value` lines).
pub(crate) fn parse_blkid_export(output: &str) -> Probe {
    let mut fs_type = None;
    let mut pt_type = None;

    for line in output.lines() {
        match line.trim().split_once('=') {
            Some(("TYPE", value)) if !value.is_empty() => fs_type = Some(value.to_string()),
            Some(("PTTYPE", value)) if !value.is_empty() => pt_type = Some(value.to_string()),
            _ => {}
        }
    }

    match (fs_type, pt_type) {
        (Some(fs), _) => Probe::Filesystem(fs),
        (None, Some(pt)) => Probe::PartitionTable(pt),
        (None, None) => Probe::Blank,
    }
}
