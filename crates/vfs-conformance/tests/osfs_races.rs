//! The host filesystem, which is the ground truth the memory backend is
//! measured against: race distributions and baseline recording.

#![cfg(unix)]

mod common;

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;

use tempfile::TempDir;
use vfs_conformance::cases::run_permission_cases;
use vfs_conformance::{
    race_op, BaselinePolicy, ConformanceSuite, PermOutcome, RaceResult, Report, SuiteConfig,
};
use vfs_osfs::OsFs;

use common::init_tracing;

fn osfs_suite(scratch: &TempDir, baselines: &TempDir) -> anyhow::Result<(Arc<Report>, ConformanceSuite)> {
    init_tracing();
    let report = Arc::new(Report::new());
    let suite = ConformanceSuite::builder(Arc::new(OsFs::with_temp_dir(scratch.path())))
        .config(SuiteConfig {
            max_race: 32,
            baseline_dir: baselines.path().to_path_buf(),
            ..SuiteConfig::default()
        })
        .reporter(report.clone())
        .build()?;
    Ok((report, suite))
}

#[test]
fn test_exclusive_operations_have_one_winner() -> anyhow::Result<()> {
    let (scratch, baselines) = (TempDir::new()?, TempDir::new()?);
    let (report, suite) = osfs_suite(&scratch, &baselines)?;

    let mkdir = suite.race("mkdir", RaceResult::OneOk, |ctx| {
        let (vfs, path) = (ctx.test.clone(), ctx.path("dir"));
        Ok(vec![race_op(move || vfs.mkdir(&path, 0o755))])
    });
    let create = suite.race("create_exclusive", RaceResult::OneOk, |ctx| {
        let (vfs, path) = (ctx.test.clone(), ctx.path("file.txt"));
        Ok(vec![race_op(move || vfs.create_file(&path, 0o644, true))])
    });
    let remove = suite.race("remove", RaceResult::OneOk, |ctx| {
        let (vfs, path) = (ctx.test.clone(), ctx.path("file.txt"));
        ctx.setup.write_file(&path, b"x", 0o644)?;
        Ok(vec![race_op(move || vfs.remove(&path))])
    });

    report.assert_ok();
    for outcome in [mkdir, create, remove] {
        let outcome = outcome.expect("race ran");
        assert_eq!(outcome.successes, 1);
        assert_eq!(outcome.failures, 31);
    }
    Ok(())
}

#[test]
fn test_recursive_create_is_idempotent() -> anyhow::Result<()> {
    let (scratch, baselines) = (TempDir::new()?, TempDir::new()?);
    let (report, suite) = osfs_suite(&scratch, &baselines)?;

    let outcome = suite
        .race("mkdir_all", RaceResult::AllOk, |ctx| {
            let (vfs, path) = (ctx.test.clone(), ctx.path("a/b/c"));
            Ok(vec![race_op(move || vfs.mkdir_all(&path, 0o755))])
        })
        .expect("race ran");

    assert_eq!(outcome.successes, 32);
    report.assert_ok();
    Ok(())
}

#[test]
fn test_unprivileged_run_skips_permission_cases() -> anyhow::Result<()> {
    let (scratch, baselines) = (TempDir::new()?, TempDir::new()?);
    let (report, suite) = osfs_suite(&scratch, &baselines)?;
    let root = suite.root().to_path_buf();

    if !suite.can_test_permissions() {
        run_permission_cases(&suite);
        assert!(!report.has_failures());
        assert!(report.skipped()[0].message.contains("cannot act as other users"));
    }

    assert!(root.starts_with(scratch.path()));
    drop(suite);
    assert!(!root.exists());
    Ok(())
}

#[test]
fn test_privileged_run_records_then_replays() -> anyhow::Result<()> {
    let (scratch, baselines) = (TempDir::new()?, TempDir::new()?);
    fs::set_permissions(scratch.path(), fs::Permissions::from_mode(0o755))?;

    let (report, suite) = osfs_suite(&scratch, &baselines)?;
    if !suite.can_test_permissions() {
        return Ok(());
    }
    assert_eq!(suite.config().baseline_policy, BaselinePolicy::RecordWhenPrivileged);

    let outcomes = run_permission_cases(&suite);
    report.assert_ok();
    assert!(!outcomes.is_empty());
    for (name, outcome) in &outcomes {
        match outcome {
            Some(PermOutcome::Recorded { records, path }) => {
                assert_eq!(*records, 3 * 0o777, "{name}");
                assert!(path.starts_with(baselines.path()), "{name}");
            }
            other => panic!("{name}: want a recorded baseline, got {other:?}"),
        }
    }
    drop(suite);

    let (report, suite) = osfs_suite(&scratch, &baselines)?;
    for (name, outcome) in run_permission_cases(&suite) {
        match outcome {
            Some(PermOutcome::Verified { checked, mismatches }) => {
                assert_eq!(checked, 3 * 0o777, "{name}");
                assert_eq!(mismatches, 0, "{name}");
            }
            other => panic!("{name}: want a replay, got {other:?}"),
        }
    }
    report.assert_ok();
    Ok(())
}
