//! Create, status, merge and discard against a recording device.
//!
//! The overlay itself is never mounted here, so changes are simulated by
//! writing straight into the diff directory.

mod common;

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use common::{Call, FakeDevice, sample_tree, sorted_lines, whiteout};
use ramlayer::snapshot::SnapshotState;
use ramlayer::{CreateOptions, DiscardOptions, ErrorKind, Layout, Placement, Quota, Ramdisk};
use tempfile::TempDir;

fn create(device: &Arc<FakeDevice>, source: &PathBuf) -> Result<Ramdisk> {
    Ok(Ramdisk::create(device.clone(), source, &CreateOptions::default())?)
}

fn mode(path: &std::path::Path) -> u32 {
    fs::metadata(path).unwrap().permissions().mode() & 0o7777
}

#[test]
fn test_create_builds_layout_and_mounts() -> Result<()> {
    let tmp = TempDir::new()?;
    let source = sample_tree(tmp.path());
    let device = FakeDevice::new();

    let ramdisk = create(&device, &source)?;
    let layout = ramdisk.layout().clone();

    assert_eq!(layout.root(), tmp.path().join(".ramlayer.data"));
    assert_eq!(fs::read(layout.orig().join("a.txt"))?, b"alpha");
    assert!(source.is_dir());
    assert_eq!(fs::read_dir(&source)?.count(), 0);
    assert_eq!(mode(&source), 0o750);
    for dir in layout.staging_dirs() {
        assert!(dir.is_dir(), "{} missing", dir.display());
    }

    let state = SnapshotState::load(&layout.snapshot_state())?;
    assert_eq!(state, SnapshotState::default());

    assert_eq!(
        device.calls(),
        vec![
            Call::MountTmpfs(layout.ramdisk(), "100M".to_string()),
            Call::Bind { from: layout.orig(), to: layout.head(), read_only: true },
            Call::Overlay {
                into: source.clone(),
                upper: layout.diff(),
                work: layout.workdir(),
                lower: layout.head(),
            },
        ]
    );
    Ok(())
}

#[test]
fn test_create_twice_is_rejected() -> Result<()> {
    let tmp = TempDir::new()?;
    let source = sample_tree(tmp.path());
    let device = FakeDevice::new();
    create(&device, &source)?;

    let err = Ramdisk::create(device.clone(), &source, &CreateOptions::default()).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    Ok(())
}

#[test]
fn test_create_failure_restores_source() -> Result<()> {
    let tmp = TempDir::new()?;
    let source = sample_tree(tmp.path());
    let device = FakeDevice::new();
    device.fail_on("mount_overlay");

    let err = Ramdisk::create(device.clone(), &source, &CreateOptions::default()).err().unwrap();

    assert!(err.to_string().contains("failed to mount overlay"));
    assert_eq!(fs::read(source.join("b/c.txt"))?, b"charlie");
    assert_eq!(mode(&source), 0o750);
    assert!(!tmp.path().join(".ramlayer.data").exists());

    let layout = Layout::resolve(&source, None);
    let calls = device.calls();
    assert!(calls.contains(&Call::Unmount(layout.head())));
    assert!(calls.contains(&Call::Unmount(layout.ramdisk())));
    Ok(())
}

#[test]
fn test_discard_restores_original() -> Result<()> {
    let tmp = TempDir::new()?;
    let source = sample_tree(tmp.path());
    let device = FakeDevice::new();
    let ramdisk = create(&device, &source)?;
    let layout = ramdisk.layout().clone();

    fs::write(layout.diff().join("scratch.txt"), b"temporary")?;
    device.take_calls();

    ramdisk.discard(DiscardOptions::default())?;

    assert_eq!(fs::read(source.join("a.txt"))?, b"alpha");
    assert_eq!(fs::read(source.join("b/c.txt"))?, b"charlie");
    assert!(!source.join("scratch.txt").exists());
    assert_eq!(mode(&source), 0o750);
    assert!(!layout.root().exists());

    let calls = device.calls();
    assert_eq!(calls.first(), Some(&Call::Unmount(source.clone())));
    assert!(calls.contains(&Call::Unmount(layout.head())));
    assert_eq!(calls.last(), Some(&Call::Unmount(layout.ramdisk())));
    Ok(())
}

#[test]
fn test_discard_without_unmount_after_reboot() -> Result<()> {
    let tmp = TempDir::new()?;
    let source = sample_tree(tmp.path());
    let device = FakeDevice::new();
    let ramdisk = create(&device, &source)?;

    // a reboot drops the tmpfs and every mount
    ramlayer::util::remove_all_in(&ramdisk.layout().ramdisk())?;
    device.take_calls();

    ramdisk.discard(DiscardOptions { skip_unmount: true })?;

    assert!(device.calls().is_empty());
    assert_eq!(fs::read(source.join("a.txt"))?, b"alpha");
    assert!(!ramdisk.layout().root().exists());
    Ok(())
}

#[test]
fn test_failed_discard_names_original_data() -> Result<()> {
    let tmp = TempDir::new()?;
    let source = sample_tree(tmp.path());
    let device = FakeDevice::new();
    let ramdisk = create(&device, &source)?;
    device.fail_on("unmount");

    let err = ramdisk.discard(DiscardOptions::default()).unwrap_err();

    assert_eq!(err.recovery().len(), 1);
    assert_eq!(err.recovery()[0].path, ramdisk.layout().orig());
    assert!(err.to_string().contains("original data:"));
    Ok(())
}

#[test]
fn test_status_lists_changes() -> Result<()> {
    let tmp = TempDir::new()?;
    let source = sample_tree(tmp.path());
    let device = FakeDevice::new();
    let ramdisk = create(&device, &source)?;
    let diff = ramdisk.layout().diff();

    fs::write(diff.join("new.txt"), b"new")?;
    fs::create_dir(diff.join("b"))?;
    fs::set_permissions(diff.join("b"), fs::Permissions::from_mode(0o755))?;
    fs::write(diff.join("b/c.txt"), b"changed")?;
    fs::create_dir_all(diff.join("fresh/nested"))?;
    fs::write(diff.join("fresh/nested/file"), b"x")?;

    let mut expected = vec!["A new.txt", "M b/c.txt", "a fresh"];
    if whiteout(&diff.join("a.txt")) {
        expected.push("D a.txt");
    }
    expected.sort();

    let report = ramdisk.status()?;
    assert_eq!(sorted_lines(report.changes()), expected);
    Ok(())
}

#[test]
fn test_status_after_removing_and_adding_a_file() -> Result<()> {
    let tmp = TempDir::new()?;
    let source = sample_tree(tmp.path());
    let device = FakeDevice::new();
    let options = CreateOptions { quota: "100M".parse()?, ..Default::default() };
    let ramdisk = Ramdisk::create(device.clone(), &source, &options)?;
    let diff = ramdisk.layout().diff();

    if !whiteout(&diff.join("a.txt")) {
        // removing a.txt through the overlay leaves a device node in the diff
        return Ok(());
    }
    fs::write(diff.join("new.txt"), b"new")?;

    let report = ramdisk.status()?;
    assert_eq!(sorted_lines(report.changes()), vec!["A new.txt", "D a.txt"]);
    Ok(())
}

#[test]
fn test_status_of_untouched_ramdisk_is_empty() -> Result<()> {
    let tmp = TempDir::new()?;
    let source = sample_tree(tmp.path());
    let device = FakeDevice::new();
    let ramdisk = create(&device, &source)?;

    assert!(ramdisk.status()?.is_empty());
    Ok(())
}

#[test]
fn test_merge_writes_changes_back() -> Result<()> {
    let tmp = TempDir::new()?;
    let source = sample_tree(tmp.path());
    let device = FakeDevice::new();
    let ramdisk = create(&device, &source)?;
    let diff = ramdisk.layout().diff();

    fs::write(diff.join("new.txt"), b"new")?;
    fs::create_dir(diff.join("b"))?;
    fs::set_permissions(diff.join("b"), fs::Permissions::from_mode(0o755))?;
    fs::write(diff.join("b/c.txt"), b"changed")?;
    let deleted = whiteout(&diff.join("a.txt"));

    let changes = ramdisk.merge()?;

    assert!(changes.iter().any(|c| c.to_string() == "A new.txt"));
    assert_eq!(fs::read(source.join("new.txt"))?, b"new");
    assert_eq!(fs::read(source.join("b/c.txt"))?, b"changed");
    assert_eq!(source.join("a.txt").exists(), !deleted);
    assert_eq!(mode(&source), 0o750);
    assert!(!ramdisk.layout().root().exists());
    Ok(())
}

#[test]
fn test_failed_merge_reports_recovery_paths() -> Result<()> {
    let tmp = TempDir::new()?;
    let source = sample_tree(tmp.path());
    let device = FakeDevice::new();
    let ramdisk = create(&device, &source)?;
    fs::write(ramdisk.layout().diff().join("new.txt"), b"new")?;
    device.fail_on("copy_tree");

    let err = ramdisk.merge().unwrap_err();

    let text = err.to_string();
    assert!(text.starts_with("merge failed, the original data may have been modified"));
    assert!(text.contains(&ramdisk.layout().orig().display().to_string()));
    assert!(text.contains(&ramdisk.layout().diff().display().to_string()));
    assert!(ramdisk.layout().diff().join("new.txt").exists());
    Ok(())
}

#[test]
fn test_mount_at_leaves_source_in_place() -> Result<()> {
    let tmp = TempDir::new()?;
    let source = sample_tree(tmp.path());
    let view = tmp.path().join("view");
    let device = FakeDevice::new();

    let options =
        CreateOptions { placement: Placement::MountAt(view.clone()), ..Default::default() };
    let ramdisk = Ramdisk::create(device.clone(), &source, &options)?;
    let layout = ramdisk.layout().clone();

    assert_eq!(layout.root(), tmp.path().join(".ramlayer.view"));
    assert_eq!(fs::read_link(layout.orig())?, source);
    assert_eq!(fs::read(source.join("a.txt"))?, b"alpha");
    assert!(view.is_dir());
    assert_eq!(mode(&view), 0o750);

    fs::write(layout.diff().join("new.txt"), b"new")?;
    ramdisk.merge()?;

    assert_eq!(fs::read(source.join("new.txt"))?, b"new");
    assert!(!view.exists());
    assert!(!layout.root().exists());
    Ok(())
}

#[test]
fn test_mount_at_requires_free_mount_point() -> Result<()> {
    let tmp = TempDir::new()?;
    let source = sample_tree(tmp.path());
    let view = tmp.path().join("view");
    fs::create_dir(&view)?;

    let options = CreateOptions { placement: Placement::MountAt(view), ..Default::default() };
    let err = Ramdisk::create(FakeDevice::new(), &source, &options).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    Ok(())
}

#[test]
fn test_blank_ramdisk() -> Result<()> {
    let tmp = TempDir::new()?;
    let target = tmp.path().join("scratch");
    let device = FakeDevice::new();

    let options = CreateOptions { placement: Placement::Blank, ..Default::default() };
    let ramdisk = Ramdisk::create(device.clone(), &target, &options)?;

    assert!(target.is_dir());
    assert!(ramdisk.layout().orig().is_dir());
    assert_eq!(fs::read_dir(ramdisk.layout().orig())?.count(), 0);

    ramdisk.discard(DiscardOptions::default())?;
    assert!(target.is_dir());
    assert_eq!(fs::read_dir(&target)?.count(), 0);
    Ok(())
}

#[test]
fn test_staging_root_override() -> Result<()> {
    let tmp = TempDir::new()?;
    let source = sample_tree(tmp.path());
    let staging = tmp.path().join("staging");
    let device = FakeDevice::new();

    let options = CreateOptions { staging_root: Some(staging.clone()), ..Default::default() };
    let ramdisk = Ramdisk::create(device.clone(), &source, &options)?;
    assert_eq!(ramdisk.layout().root(), staging);
    assert!(staging.join("orig/a.txt").exists());
    assert!(!tmp.path().join(".ramlayer.data").exists());

    // a handle resolved without the override does not find the ramdisk
    let lost = Ramdisk::open(device.clone(), &source, None);
    assert_eq!(lost.status().unwrap_err().kind(), ErrorKind::NotFound);

    let found = Ramdisk::open(device.clone(), &source, Some(&staging));
    found.discard(DiscardOptions::default())?;
    assert_eq!(fs::read(source.join("a.txt"))?, b"alpha");
    Ok(())
}

#[test]
fn test_set_quota_resizes_tmpfs() -> Result<()> {
    let tmp = TempDir::new()?;
    let source = sample_tree(tmp.path());
    let device = FakeDevice::new();
    let options = CreateOptions { quota: "64M".parse()?, ..Default::default() };
    let ramdisk = Ramdisk::create(device.clone(), &source, &options)?;

    let quota: Quota = "1G".parse()?;
    ramdisk.set_quota(&quota)?;

    let calls = device.calls();
    assert_eq!(calls[0], Call::MountTmpfs(ramdisk.layout().ramdisk(), "64M".to_string()));
    assert_eq!(
        calls.last(),
        Some(&Call::ResizeTmpfs(ramdisk.layout().ramdisk(), "1G".to_string()))
    );
    Ok(())
}
