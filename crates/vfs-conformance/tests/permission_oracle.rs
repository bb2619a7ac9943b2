//! Record/replay behavior of the permission oracle on the memory backend.

mod common;

use std::fs;
use std::path::Path;

use tempfile::TempDir;
use vfs_conformance::cases::{permission_cases, run_permission_cases};
use vfs_conformance::{
    perm_values, Baseline, BaselinePolicy, PermOptions, PermOutcome, PermissionCase, SuiteConfig,
};
use vfs_memfs::MemFsConfig;

use common::{memfs_suite, recording_config};

fn mkdir_case() -> PermissionCase<'static> {
    PermissionCase::new("mkdir", |vfs, dir| vfs.mkdir(&dir.join("new"), 0o755))
}

#[test]
fn test_record_then_replay_leaves_baseline_untouched() -> anyhow::Result<()> {
    let baselines = TempDir::new()?;

    let (_fs, report, suite) = memfs_suite(MemFsConfig::default(), recording_config(baselines.path()))?;
    assert!(suite.can_test_permissions());
    let recorded = run_permission_cases(&suite);
    report.assert_ok();

    let combinations = perm_values(suite.test_vfs().os_type()).len() * suite.users().len();
    let mut snapshots = Vec::new();
    for (name, outcome) in &recorded {
        match outcome {
            Some(PermOutcome::Recorded { records, path }) => {
                assert_eq!(*records, combinations, "case {name}");
                snapshots.push((path.clone(), fs::read(path)?));
            }
            other => panic!("case {name}: expected a recording, got {other:?}"),
        }
    }
    assert_eq!(snapshots.len(), permission_cases(suite.test_vfs().features()).len());
    drop(suite);

    let (_fs, report, suite) = memfs_suite(MemFsConfig::default(), recording_config(baselines.path()))?;
    for (name, outcome) in run_permission_cases(&suite) {
        assert_eq!(
            outcome,
            Some(PermOutcome::Verified {
                checked: combinations,
                mismatches: 0
            }),
            "case {name}"
        );
    }
    report.assert_ok();

    for (path, before) in snapshots {
        assert_eq!(fs::read(&path)?, before, "{} was rewritten", path.display());
    }
    Ok(())
}

#[test]
fn test_tampered_record_is_reported() -> anyhow::Result<()> {
    let baselines = TempDir::new()?;
    let config = recording_config(baselines.path());

    let (_fs, _report, suite) = memfs_suite(MemFsConfig::default(), config.clone())?;
    suite.perm(&mkdir_case());
    let store = suite.baseline_store().clone();
    drop(suite);

    // usrOther only has the "other" bits of a 0o700 directory, so mkdir inside
    // it is denied; pretend the reference run saw a success.
    let original = store.load("mkdir")?.expect("baseline recorded");
    let denied = original.get("usrOther", 0o700).expect("record present");
    assert_eq!(denied.err_err.as_deref(), Some("permission denied"));

    let mut tampered = Baseline::new();
    for record in original.records() {
        let mut record = record.clone();
        if record.user == "usrOther" && record.perm == 0o700 {
            record.err_type = None;
            record.err_op = None;
            record.err_path = None;
            record.err_err = None;
        }
        tampered.insert(record);
    }
    store.save("mkdir", &tampered)?;

    let (_fs, report, suite) = memfs_suite(MemFsConfig::default(), config)?;
    let outcome = suite.perm(&mkdir_case());

    match outcome {
        Some(PermOutcome::Verified { mismatches, .. }) => assert_eq!(mismatches, 1),
        other => panic!("expected a replay, got {other:?}"),
    }
    let failures = report.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].case, "perm/mkdir/usrOther/700");
    assert!(failures[0].message.contains("want no error"));
    assert!(failures[0].message.contains("permission denied"));
    Ok(())
}

#[test]
fn test_missing_record_is_a_failure() -> anyhow::Result<()> {
    let baselines = TempDir::new()?;
    let config = recording_config(baselines.path());

    let (_fs, _report, suite) = memfs_suite(MemFsConfig::default(), config.clone())?;
    suite.perm(&mkdir_case());
    let store = suite.baseline_store().clone();
    drop(suite);

    let original = store.load("mkdir")?.expect("baseline recorded");
    let mut partial = Baseline::new();
    for record in original.records().filter(|r| r.perm != 0o123) {
        partial.insert(record.clone());
    }
    store.save("mkdir", &partial)?;

    let (_fs, report, suite) = memfs_suite(MemFsConfig::default(), config)?;
    let outcome = suite.perm(&mkdir_case());

    assert_eq!(
        outcome,
        Some(PermOutcome::Verified {
            checked: 0o777 * 3,
            mismatches: 3
        })
    );
    let failures = report.failures();
    assert_eq!(failures.len(), 3);
    assert!(failures
        .iter()
        .all(|f| f.case.ends_with("/123") && f.message.contains("no record")));
    Ok(())
}

#[test]
fn test_ignored_fields_tolerate_differences() -> anyhow::Result<()> {
    let baselines = TempDir::new()?;
    let config = recording_config(baselines.path());

    // Record with mkdir, replay an operation that fails the same way but under
    // another operation name and path.
    let (_fs, _report, suite) = memfs_suite(MemFsConfig::default(), config.clone())?;
    suite.perm(&PermissionCase::new("denied", |vfs, dir| {
        vfs.mkdir(&dir.join("new"), 0o755)
    }));
    drop(suite);

    let (_fs, report, suite) = memfs_suite(MemFsConfig::default(), config)?;
    let lenient = PermissionCase::new("denied", |vfs, dir| {
        vfs.create_file(&dir.join("other.txt"), 0o644, true)
    })
    .options(PermOptions {
        ignore_op: true,
        ignore_path: true,
        use_files: false,
    });
    let outcome = suite.perm(&lenient);

    assert!(matches!(outcome, Some(PermOutcome::Verified { mismatches: 0, .. })));
    report.assert_ok();
    Ok(())
}

#[test]
fn test_windows_matrix_uses_write_bit_only() -> anyhow::Result<()> {
    let baselines = TempDir::new()?;
    let (_fs, report, suite) = memfs_suite(MemFsConfig::windows(), recording_config(baselines.path()))?;

    let outcome = suite.perm(&mkdir_case());
    match outcome {
        Some(PermOutcome::Recorded { records, path }) => {
            assert_eq!(records, 2 * 3);
            assert!(path.ends_with(Path::new("windows").join("mkdir.json")));
            let text = fs::read_to_string(path)?;
            assert!(text.contains("Access is denied."));
        }
        other => panic!("expected a recording, got {other:?}"),
    }
    report.assert_ok();
    Ok(())
}

#[test]
fn test_replay_only_without_baseline_skips() -> anyhow::Result<()> {
    let baselines = TempDir::new()?;
    let config = SuiteConfig {
        baseline_policy: BaselinePolicy::ReplayOnly,
        ..recording_config(baselines.path())
    };
    let (_fs, report, suite) = memfs_suite(MemFsConfig::default(), config)?;

    let outcome = suite.perm(&mkdir_case());
    assert!(outcome.is_some_and(|o| o.is_skipped()));
    assert!(!report.has_failures());
    let skipped = report.skipped();
    assert_eq!(skipped.len(), 1);
    assert!(skipped[0].message.contains("no baseline"));
    assert!(!suite.baseline_store().exists("mkdir"));
    Ok(())
}

#[test]
fn test_default_policy_does_not_record_from_memory_backend() -> anyhow::Result<()> {
    let baselines = TempDir::new()?;
    let config = SuiteConfig {
        baseline_policy: BaselinePolicy::RecordWhenPrivileged,
        ..recording_config(baselines.path())
    };
    let (_fs, report, suite) = memfs_suite(MemFsConfig::default(), config)?;

    assert!(suite.perm(&mkdir_case()).is_some_and(|o| o.is_skipped()));
    assert_eq!(report.summary().skipped, 1);
    assert!(!suite.baseline_store().exists("mkdir"));
    Ok(())
}
