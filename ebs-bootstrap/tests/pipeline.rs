use ebs_bootstrap::storage::{Initialized, Mounted};
use ebs_bootstrap::volume::AttachOutcome;
use ebs_bootstrap::{AttachmentState, BootstrapError, BootstrapPipeline, Stage};
use ebs_bootstrap_test_utils::{
    FakeMetadata, FakeSystem, FakeVolumeApi, INSTANCE_ID, MOUNT_FAILURE, PollStep, VOLUME_ID,
    VOLUME_NAME, attached, collaborators, mount_root, options, throttled, volume,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::test(start_paused = true)]
async fn test_fresh_volume_runs_every_stage() {
    let root = mount_root();
    let opts = options(&root);
    let api = Arc::new(
        FakeVolumeApi::new()
            .with_volumes(vec![volume(VOLUME_ID, VOLUME_NAME)])
            .with_polls(vec![
                PollStep::State(AttachmentState::Attaching),
                PollStep::State(AttachmentState::Attached),
            ]),
    );
    let system = Arc::new(FakeSystem::new());

    let pipeline = BootstrapPipeline::new(
        opts.clone(),
        collaborators(FakeMetadata::new(), api.clone(), system.clone()),
    );
    let report = pipeline.run().await.unwrap();

    assert_eq!(report.volume_id, VOLUME_ID);
    assert_eq!(report.instance.instance_id, INSTANCE_ID);
    assert_eq!(report.attach, AttachOutcome::Attached);
    assert_eq!(report.filesystem, Initialized::Formatted);
    assert_eq!(report.mount, Mounted::Mounted);
    assert!(report.changed());

    assert_eq!(api.attach_calls().len(), 1);
    assert_eq!(system.format_calls().len(), 1);
    assert_eq!(system.chown_calls()[0].path, opts.mount_point);
    assert_eq!(system.chown_calls()[0].owner, "etcd:etcd");
    assert!(opts.mount_point.is_dir());
}

#[tokio::test(start_paused = true)]
async fn test_rerun_after_reboot_changes_nothing() {
    let root = mount_root();
    let opts = options(&root);
    let api = Arc::new(FakeVolumeApi::new().with_volumes(vec![attached(
        volume(VOLUME_ID, VOLUME_NAME),
        INSTANCE_ID,
        AttachmentState::Attached,
    )]));
    let system = Arc::new(
        FakeSystem::new()
            .with_filesystem("ext4")
            .with_mount_table(&format!(
                "/dev/xvdf on {} type ext4 (rw)\n",
                opts.mount_point.display()
            )),
    );

    let pipeline = BootstrapPipeline::new(
        opts,
        collaborators(FakeMetadata::new(), api.clone(), system.clone()),
    );
    let report = pipeline.run().await.unwrap();

    assert_eq!(report.attach, AttachOutcome::AlreadyAttached);
    assert_eq!(report.filesystem, Initialized::AlreadyFormatted);
    assert_eq!(report.mount, Mounted::AlreadyMounted);
    assert!(!report.changed());
    assert!(api.attach_calls().is_empty());
    assert!(system.format_calls().is_empty());
    assert_eq!(system.chown_calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_missing_volume_stops_before_attach() {
    let root = mount_root();
    let api = Arc::new(FakeVolumeApi::new());
    let system = Arc::new(FakeSystem::new());

    let pipeline = BootstrapPipeline::new(
        options(&root),
        collaborators(FakeMetadata::new(), api.clone(), system.clone()),
    );
    let err = pipeline.run().await.unwrap_err();

    assert!(matches!(err, BootstrapError::VolumeNotFound { .. }));
    assert_eq!(err.stage(), Stage::Locate);
    assert!(api.attach_calls().is_empty());
    assert!(system.format_calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_metadata_failure_stops_pipeline() {
    let root = mount_root();
    let api = Arc::new(FakeVolumeApi::new().with_volumes(vec![volume(VOLUME_ID, VOLUME_NAME)]));
    let system = Arc::new(FakeSystem::new());

    let pipeline = BootstrapPipeline::new(
        options(&root),
        collaborators(FakeMetadata::unreachable(), api.clone(), system),
    );
    let err = pipeline.run().await.unwrap_err();

    assert_eq!(err.stage(), Stage::Metadata);
    assert_eq!(api.describe_by_name_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_lookup_throttle_reports_locate_stage() {
    let root = mount_root();
    let api = Arc::new(
        FakeVolumeApi::new()
            .with_volumes(vec![volume(VOLUME_ID, VOLUME_NAME)])
            .with_describe_error(throttled("DescribeVolumes")),
    );
    let system = Arc::new(FakeSystem::new());

    let pipeline = BootstrapPipeline::new(
        options(&root),
        collaborators(FakeMetadata::new(), api.clone(), system),
    );
    let err = pipeline.run().await.unwrap_err();

    assert!(matches!(err, BootstrapError::Transport { .. }));
    assert_eq!(err.stage(), Stage::Locate);
    assert!(api.attach_calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_mount_failure_skips_permissions() {
    let root = mount_root();
    let api = Arc::new(FakeVolumeApi::new().with_volumes(vec![attached(
        volume(VOLUME_ID, VOLUME_NAME),
        INSTANCE_ID,
        AttachmentState::Attached,
    )]));
    let system = Arc::new(
        FakeSystem::new()
            .with_filesystem("ext4")
            .with_mount_exit(MOUNT_FAILURE),
    );

    let pipeline = BootstrapPipeline::new(
        options(&root),
        collaborators(FakeMetadata::new(), api, system.clone()),
    );
    let err = pipeline.run().await.unwrap_err();

    assert_eq!(err.stage(), Stage::Mount);
    assert!(system.chown_calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_device_never_appears() {
    let root = mount_root();
    let api = Arc::new(FakeVolumeApi::new().with_volumes(vec![attached(
        volume(VOLUME_ID, VOLUME_NAME),
        INSTANCE_ID,
        AttachmentState::Attached,
    )]));
    let system = Arc::new(FakeSystem::new().with_device_present(false));

    let pipeline = BootstrapPipeline::new(
        options(&root),
        collaborators(FakeMetadata::new(), api, system.clone()),
    );
    let err = pipeline.run().await.unwrap_err();

    assert!(matches!(err, BootstrapError::DeviceNotReady { .. }));
    assert!(system.format_calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_invalid_options_rejected_before_any_call() {
    let root = mount_root();
    let mut opts = options(&root);
    opts.volume_name = String::new();
    let api = Arc::new(FakeVolumeApi::new());

    let pipeline = BootstrapPipeline::new(
        opts,
        collaborators(FakeMetadata::new(), api.clone(), Arc::new(FakeSystem::new())),
    );
    let err = pipeline.run().await.unwrap_err();

    assert_eq!(err.stage(), Stage::Config);
    assert_eq!(api.describe_by_name_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_during_attach_wait() {
    let root = mount_root();
    let mut opts = options(&root);
    opts.attach.timeout = Duration::from_secs(3600);
    let api = Arc::new(
        FakeVolumeApi::new()
            .with_volumes(vec![volume(VOLUME_ID, VOLUME_NAME)])
            .with_polls(vec![PollStep::State(AttachmentState::Attaching)]),
    );
    let system = Arc::new(FakeSystem::new());
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(2)).await;
        trigger.cancel();
    });

    let pipeline = BootstrapPipeline::new(
        opts,
        collaborators(FakeMetadata::new(), api, system.clone()),
    )
    .with_cancellation(cancel);
    let err = pipeline.run().await.unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(err.stage(), Stage::Attach);
    assert!(system.format_calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_report_serializes() {
    let root = mount_root();
    let api = Arc::new(FakeVolumeApi::new().with_volumes(vec![attached(
        volume(VOLUME_ID, VOLUME_NAME),
        INSTANCE_ID,
        AttachmentState::Attached,
    )]));

    let pipeline = BootstrapPipeline::new(
        options(&root),
        collaborators(FakeMetadata::new(), api, Arc::new(FakeSystem::new())),
    );
    let report = pipeline.run().await.unwrap();

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["volume_id"], VOLUME_ID);
    assert_eq!(json["attach"], "already_attached");
    assert_eq!(json["filesystem"], "formatted");
    assert_eq!(json["mount"], "mounted");
}
