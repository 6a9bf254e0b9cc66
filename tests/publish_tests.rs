//! Publish routing, folder handling, partial-upload cleanup, notification

mod fixtures;

use std::fs;
use std::sync::Arc;

use stormguard_build::mock::{FakeFtp, MemoryObjectStore, RecordingNotifier, ScriptedRunner};
use stormguard_build::publish::{
    sha256_file, BackendKind, CurlFtp, PublishError, PublishPipeline,
};
use stormguard_build::resolve::{BuildConfig, DerivedLayout, RawFlags};

use fixtures::{config, raw, touch, Workspace};

struct Setup {
    ws: Workspace,
    config: BuildConfig,
    layout: DerivedLayout,
}

fn setup(flags: RawFlags) -> Setup {
    let ws = Workspace::new();
    let config = config(&flags);
    let layout = ws.layout(&config);
    touch(&layout.archive_path);
    fs::write(&layout.archive_path, b"PK\x05\x06 archive bytes").unwrap();
    Setup { ws, config, layout }
}

fn flags(device: &str, release: bool, notify: bool) -> RawFlags {
    RawFlags {
        release,
        upload: true,
        notify,
        ..raw(device, "miui")
    }
}

#[test]
fn test_cpuquiet_goes_to_object_storage_only() {
    let s = setup(flags("mido", true, true));
    let folders = s.ws.settings().storage.folders;
    let store = MemoryObjectStore::new();
    let ftp = FakeFtp::new();
    let notifier = RecordingNotifier::new();

    let report = PublishPipeline::new(Arc::new(store.clone()), folders.clone())
        .with_ftp(Arc::new(ftp.clone()))
        .with_notifier(Arc::new(notifier.clone()))
        .publish(&s.config, &s.layout)
        .unwrap();

    assert_eq!(ftp.store_calls(), 0);
    let uploads = store.uploads();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].name, s.layout.archive_name);

    // Version folder created under the cpuquiet parent
    let created = store.folders();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].0, "r12");
    assert_eq!(created[0].1.parents, vec![folders.cpuquiet.clone()]);
    assert_eq!(uploads[0].folder, created[0].1.id);

    assert_eq!(report.targets.len(), 1);
    assert_eq!(report.targets[0].kind, BackendKind::ObjectStorage);

    let sha = sha256_file(&s.layout.archive_path).unwrap();
    assert_eq!(report.sha256.as_deref(), Some(sha.as_str()));
    assert!(report.notified);
    let messages = notifier.messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains(&sha));
    assert!(messages[0].contains(&s.layout.archive_name));
    assert!(messages[0].contains(report.targets[0].link.as_deref().unwrap()));
}

#[test]
fn test_release_uploads_ftp_then_mirror() {
    let s = setup(flags("whyred", true, false));
    let folders = s.ws.settings().storage.folders;
    let store = MemoryObjectStore::new();
    let ftp = FakeFtp::new();

    let report = PublishPipeline::new(Arc::new(store.clone()), folders.clone())
        .with_ftp(Arc::new(ftp.clone()))
        .publish(&s.config, &s.layout)
        .unwrap();

    assert_eq!(ftp.stored(), vec![s.layout.archive_name.clone()]);
    assert!(ftp.deleted().is_empty());
    assert_eq!(store.uploads().len(), 1);
    assert_eq!(store.folders()[0].1.parents, vec![folders.devices["whyred"].clone()]);

    let kinds: Vec<_> = report.targets.iter().map(|t| t.kind).collect();
    assert_eq!(kinds, vec![BackendKind::FtpMirror, BackendKind::ObjectStorage]);
    assert_eq!(report.targets[0].destination, format!("ftp://fake/{}", s.layout.archive_name));
    assert!(!report.notified);
}

#[test]
fn test_ftp_failure_deletes_partial_once_and_skips_mirror() {
    let s = setup(flags("whyred", true, true));
    let store = MemoryObjectStore::new();
    let ftp = FakeFtp::new().failing();
    let notifier = RecordingNotifier::new();

    let err = PublishPipeline::new(Arc::new(store.clone()), s.ws.settings().storage.folders)
        .with_ftp(Arc::new(ftp.clone()))
        .with_notifier(Arc::new(notifier.clone()))
        .publish(&s.config, &s.layout)
        .unwrap_err();

    assert!(matches!(err, PublishError::Ftp(_)), "{err:?}");
    assert_eq!(err.command_error().map(|e| e.exit_code()), Some(55));
    assert_eq!(ftp.store_calls(), 1);
    assert_eq!(ftp.deleted(), vec![s.layout.archive_name.clone()]);
    assert!(store.uploads().is_empty());
    assert!(store.folders().is_empty());
    assert!(notifier.messages().is_empty());
}

#[test]
fn test_curl_ftp_failure_cleanup_commands() {
    let s = setup(flags("whyred", true, false));
    let runner = Arc::new(ScriptedRunner::new().fail("-T", 55));
    let ftp = CurlFtp::new(
        runner.clone(),
        "uploads.example.org",
        "stormguard",
        "ftp-password".to_string(),
        "/kernels",
    );
    let store = MemoryObjectStore::new();

    let err = PublishPipeline::new(Arc::new(store.clone()), s.ws.settings().storage.folders)
        .with_ftp(Arc::new(ftp))
        .publish(&s.config, &s.layout)
        .unwrap_err();

    assert_eq!(err.command_error().map(|e| e.exit_code()), Some(55));
    assert_eq!(runner.count("-T"), 1);
    assert_eq!(runner.count("DELE"), 1);
    assert!(runner.commands()[1].contains(&format!("DELE {}", s.layout.archive_name)));
    assert!(runner.commands().iter().all(|c| !c.contains("ftp-password")));
    assert!(store.uploads().is_empty());
}

#[test]
fn test_release_without_ftp_mirror_fails() {
    let s = setup(flags("whyred", true, false));
    let store = MemoryObjectStore::new();

    let err = PublishPipeline::new(Arc::new(store.clone()), s.ws.settings().storage.folders)
        .publish(&s.config, &s.layout)
        .unwrap_err();

    assert!(matches!(err, PublishError::FtpUnavailable));
    assert!(store.uploads().is_empty());
}

#[test]
fn test_existing_folder_reused() {
    let s = setup(flags("whyred", false, false));
    let folders = s.ws.settings().storage.folders;
    let store = MemoryObjectStore::new().with_folder("r12", "existing-r12", &[folders.devices["whyred"].as_str()]);

    PublishPipeline::new(Arc::new(store.clone()), folders)
        .publish(&s.config, &s.layout)
        .unwrap();

    assert_eq!(store.folders().len(), 1);
    assert_eq!(store.uploads()[0].folder, "existing-r12");
}

#[test]
fn test_same_label_under_several_parents() {
    let s = setup(flags("whyred", false, false));
    let folders = s.ws.settings().storage.folders;
    let store = MemoryObjectStore::new()
        .with_folder("r12", "cpuquiet-r12", &[folders.cpuquiet.as_str()])
        .with_folder("r12", "whyred-r12", &[folders.devices["whyred"].as_str()]);

    PublishPipeline::new(Arc::new(store.clone()), folders)
        .publish(&s.config, &s.layout)
        .unwrap();

    assert_eq!(store.folders().len(), 2);
    assert_eq!(store.uploads()[0].folder, "whyred-r12");
}

#[test]
fn test_folder_under_wrong_parent_rejected() {
    let s = setup(flags("whyred", false, false));
    let folders = s.ws.settings().storage.folders;
    let store = MemoryObjectStore::new().with_folder("r12", "elsewhere", &[folders.devices["mido"].as_str()]);

    let err = PublishPipeline::new(Arc::new(store.clone()), folders.clone())
        .publish(&s.config, &s.layout)
        .unwrap_err();

    match err {
        PublishError::FolderParentMismatch { id, expected, found, .. } => {
            assert_eq!(id, "elsewhere");
            assert_eq!(expected, folders.devices["whyred"]);
            assert_eq!(found, vec![folders.devices["mido"].clone()]);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(store.uploads().is_empty());
}

#[test]
fn test_notification_failure_is_not_fatal() {
    let s = setup(flags("whyred", false, true));
    let store = MemoryObjectStore::new();
    let notifier = RecordingNotifier::new().failing();

    let report = PublishPipeline::new(Arc::new(store.clone()), s.ws.settings().storage.folders)
        .with_notifier(Arc::new(notifier.clone()))
        .publish(&s.config, &s.layout)
        .unwrap();

    assert_eq!(notifier.messages().len(), 1);
    assert!(!report.notified);
    assert!(report.sha256.is_some());
    assert_eq!(store.uploads().len(), 1);
}

#[test]
fn test_mirror_failure_keeps_ftp_copy() {
    let s = setup(flags("whyred", true, false));
    let store = MemoryObjectStore::new().failing_uploads();
    let ftp = FakeFtp::new();

    let err = PublishPipeline::new(Arc::new(store.clone()), s.ws.settings().storage.folders)
        .with_ftp(Arc::new(ftp.clone()))
        .publish(&s.config, &s.layout)
        .unwrap_err();

    assert!(matches!(err, PublishError::Storage(_)));
    assert_eq!(ftp.stored(), vec![s.layout.archive_name.clone()]);
    assert!(ftp.deleted().is_empty());
}

#[test]
fn test_missing_archive() {
    let s = setup(flags("whyred", false, true));
    fs::remove_file(&s.layout.archive_path).unwrap();
    let store = MemoryObjectStore::new();
    let notifier = RecordingNotifier::new();

    let err = PublishPipeline::new(Arc::new(store.clone()), s.ws.settings().storage.folders)
        .with_notifier(Arc::new(notifier.clone()))
        .publish(&s.config, &s.layout)
        .unwrap_err();

    assert!(matches!(err, PublishError::NotFound(path) if path == s.layout.archive_path));
    assert!(store.folders().is_empty());
    assert!(notifier.messages().is_empty());
}

#[test]
fn test_no_notify_sends_nothing() {
    let s = setup(flags("mido", false, false));
    let notifier = RecordingNotifier::new();

    let report = PublishPipeline::new(Arc::new(MemoryObjectStore::new()), s.ws.settings().storage.folders)
        .with_notifier(Arc::new(notifier.clone()))
        .publish(&s.config, &s.layout)
        .unwrap();

    assert!(notifier.messages().is_empty());
    assert!(report.sha256.is_none());
}
