use ebs_bootstrap::BootstrapError;
use ebs_bootstrap::storage::{
    FilesystemInitializer, Initialized, MountManager, Mounted, PermissionFixer, wait_for_device,
};
use ebs_bootstrap_test_utils::{DEVICE, FakeSystem, MOUNT_FAILURE, mount_root};
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Filesystem
// ============================================================================

#[tokio::test]
async fn test_blank_device_is_formatted() {
    let system = FakeSystem::new();
    let init = FilesystemInitializer::new(&system, &system);
    let args = vec!["-L".to_string(), "etcd".to_string()];

    let result = init
        .ensure_initialized(Path::new("/dev/xvdf"), "ext4", &args)
        .await
        .unwrap();

    assert_eq!(result, Initialized::Formatted);
    let calls = system.format_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].fs_type, "ext4");
    assert_eq!(calls[0].device, Path::new("/dev/xvdf"));
    assert_eq!(calls[0].args, args);
}

#[tokio::test]
async fn test_format_runs_once_across_reruns() {
    let system = FakeSystem::new();
    let init = FilesystemInitializer::new(&system, &system);
    let device = Path::new(DEVICE);

    let first = init.ensure_initialized(device, "ext4", &[]).await.unwrap();
    let second = init.ensure_initialized(device, "ext4", &[]).await.unwrap();

    assert_eq!(first, Initialized::Formatted);
    assert_eq!(second, Initialized::AlreadyFormatted);
    assert_eq!(system.format_calls().len(), 1);
}

#[tokio::test]
async fn test_existing_filesystem_is_kept() {
    let system = FakeSystem::new().with_filesystem("ext4");
    let init = FilesystemInitializer::new(&system, &system);

    let result = init
        .ensure_initialized(Path::new(DEVICE), "ext4", &[])
        .await
        .unwrap();

    assert_eq!(result, Initialized::AlreadyFormatted);
    assert!(system.format_calls().is_empty());
}

#[tokio::test]
async fn test_other_filesystem_is_never_formatted() {
    let system = FakeSystem::new().with_filesystem("xfs");
    let init = FilesystemInitializer::new(&system, &system);

    let err = init
        .ensure_initialized(Path::new(DEVICE), "ext4", &[])
        .await
        .unwrap_err();

    assert!(matches!(err, BootstrapError::FilesystemMismatch { .. }));
    assert!(err.to_string().contains("xfs"));
    assert!(system.format_calls().is_empty());
}

#[tokio::test]
async fn test_partition_table_is_never_formatted() {
    let system = FakeSystem::new().with_partition_table("gpt");
    let init = FilesystemInitializer::new(&system, &system);

    let err = init
        .ensure_initialized(Path::new(DEVICE), "ext4", &[])
        .await
        .unwrap_err();

    assert!(matches!(err, BootstrapError::FilesystemMismatch { .. }));
    assert!(system.format_calls().is_empty());
}

#[tokio::test]
async fn test_probe_failure_is_not_treated_as_blank() {
    let system = FakeSystem::new().with_probe_exit(4);
    let init = FilesystemInitializer::new(&system, &system);

    let err = init
        .ensure_initialized(Path::new(DEVICE), "ext4", &[])
        .await
        .unwrap_err();

    assert!(matches!(err, BootstrapError::Probe { .. }));
    assert!(system.format_calls().is_empty());
}

#[tokio::test]
async fn test_format_failure_is_fatal() {
    let system = FakeSystem::new().with_format_exit(1);
    let init = FilesystemInitializer::new(&system, &system);

    let err = init
        .ensure_initialized(Path::new(DEVICE), "ext4", &[])
        .await
        .unwrap_err();

    match err {
        BootstrapError::Format { fs_type, source, .. } => {
            assert_eq!(fs_type, "ext4");
            assert_eq!(source.code(), Some(1));
        }
        other => panic!("expected format error, got {other}"),
    }
    assert_eq!(system.format_calls().len(), 1);
}

// ============================================================================
// Mount
// ============================================================================

#[tokio::test]
async fn test_mount_creates_directory() {
    let root = mount_root();
    let mount_point = root.path().join("var/lib/etcd-bootstrap");
    let system = FakeSystem::new();

    let result = MountManager::new(&system)
        .ensure_mounted(Path::new(DEVICE), &mount_point, "ext4")
        .await
        .unwrap();

    assert_eq!(result, Mounted::Mounted);
    assert!(mount_point.is_dir());
    assert_eq!(system.mount_calls().len(), 1);
}

#[tokio::test]
async fn test_mount_is_idempotent() {
    let root = mount_root();
    let mount_point = root.path().join("data");
    let system = FakeSystem::new();
    let manager = MountManager::new(&system);

    let first = manager
        .ensure_mounted(Path::new(DEVICE), &mount_point, "ext4")
        .await
        .unwrap();
    let second = manager
        .ensure_mounted(Path::new(DEVICE), &mount_point, "ext4")
        .await
        .unwrap();

    assert_eq!(first, Mounted::Mounted);
    assert_eq!(second, Mounted::AlreadyMounted);
    assert_eq!(system.mount_calls().len(), 2);
}

#[tokio::test]
async fn test_failed_mount_accepted_when_table_matches() {
    let root = mount_root();
    let mount_point = root.path().join("var/lib/etcd-bootstrap");
    let table = format!("/dev/xvdf on {}\n", mount_point.display());
    let system = FakeSystem::new()
        .with_mount_exit(MOUNT_FAILURE)
        .with_mount_table(&table);

    let result = MountManager::new(&system)
        .ensure_mounted(Path::new("/dev/xvdf"), &mount_point, "ext4")
        .await
        .unwrap();

    assert_eq!(result, Mounted::AlreadyMounted);
}

#[tokio::test]
async fn test_failed_mount_without_table_entry_is_error() {
    let root = mount_root();
    let mount_point = root.path().join("data");
    let table = format!("/dev/xvdg on {} type ext4 (rw)\n", mount_point.display());
    let system = FakeSystem::new()
        .with_mount_exit(MOUNT_FAILURE)
        .with_mount_table(&table);

    let err = MountManager::new(&system)
        .ensure_mounted(Path::new(DEVICE), &mount_point, "ext4")
        .await
        .unwrap_err();

    match err {
        BootstrapError::Mount { reason, source, .. } => {
            assert_eq!(reason, "no matching mount table entry");
            assert_eq!(source.code(), Some(MOUNT_FAILURE));
        }
        other => panic!("expected mount error, got {other}"),
    }
}

#[tokio::test]
async fn test_unreadable_mount_table_is_error() {
    let root = mount_root();
    let system = FakeSystem::new()
        .with_mount_exit(MOUNT_FAILURE)
        .with_mount_table_exit(1);

    let err = MountManager::new(&system)
        .ensure_mounted(Path::new(DEVICE), &root.path().join("data"), "ext4")
        .await
        .unwrap_err();

    assert!(matches!(err, BootstrapError::Mount { .. }));
}

// ============================================================================
// Permissions
// ============================================================================

#[tokio::test]
async fn test_chown_recursive() {
    let system = FakeSystem::new();
    PermissionFixer::new(&system)
        .ensure_writable(Path::new("/var/lib/etcd-bootstrap"), "etcd:etcd")
        .await
        .unwrap();

    let calls = system.chown_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].owner, "etcd:etcd");
    assert_eq!(calls[0].path, Path::new("/var/lib/etcd-bootstrap"));
}

#[tokio::test]
async fn test_chown_failure_is_permission_error() {
    let system = FakeSystem::new().with_chown_exit(1);
    let err = PermissionFixer::new(&system)
        .ensure_writable(Path::new("/var/lib/etcd-bootstrap"), "etcd:etcd")
        .await
        .unwrap_err();

    assert!(matches!(err, BootstrapError::Permission { .. }));
}

// ============================================================================
// Device readiness
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_device_wait_times_out() {
    let system = FakeSystem::new().with_device_present(false);
    let cancel = CancellationToken::new();

    let err = wait_for_device(&system, Path::new(DEVICE), Duration::from_secs(2), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, BootstrapError::DeviceNotReady { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_device_present_returns_immediately() {
    let system = FakeSystem::new();
    let cancel = CancellationToken::new();

    wait_for_device(&system, Path::new(DEVICE), Duration::from_secs(2), &cancel)
        .await
        .unwrap();
}
