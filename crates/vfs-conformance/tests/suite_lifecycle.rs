//! Fixtures, scratch directories and environment skips.

mod common;

use std::path::Path;
use std::sync::Arc;

use tempfile::TempDir;
use vfs_conformance::cases::run_permission_cases;
use vfs_conformance::traits::{ErrorCode, IdentityMgr, Vfs};
use vfs_conformance::{ConformanceSuite, Report, SuiteConfig, Verdict, FIXTURE_GROUPS};
use vfs_memfs::{MemFs, MemFsConfig};
use vfs_rofs::RoFs;

use common::{init_tracing, memfs_suite, recording_config};

#[test]
fn test_fixtures_are_created_once() -> anyhow::Result<()> {
    init_tracing();
    let baselines = TempDir::new()?;
    let fs = MemFs::default();
    let idm = fs.mem_idm();
    idm.group_add("grpTest")?;
    let existing = idm.user_add("usrTest", "grpTest")?;

    let suite = ConformanceSuite::builder(Arc::new(fs.clone()))
        .config(recording_config(baselines.path()))
        .build()?;

    let names: Vec<&str> = suite.users().iter().map(|u| u.name.as_str()).collect();
    assert_eq!(names, ["usrTest", "usrGrp", "usrOther"]);
    assert_eq!(suite.users()[0], existing);
    assert_eq!(suite.users()[1].gid, existing.gid);
    assert_ne!(suite.users()[2].gid, existing.gid);

    let groups: Vec<&str> = suite.groups().iter().map(|g| g.name.as_str()).collect();
    assert_eq!(groups, FIXTURE_GROUPS);
    assert!(suite.initial_user().is_admin());
    Ok(())
}

#[test]
fn test_scratch_root_removed_on_drop() -> anyhow::Result<()> {
    let baselines = TempDir::new()?;
    let (fs, _report, suite) = memfs_suite(MemFsConfig::default(), recording_config(baselines.path()))?;
    let root = suite.root().to_path_buf();

    assert!(root.starts_with("/tmp"));
    assert!(fs.stat(&root)?.is_dir);
    assert_eq!(fs.stat(&root)?.mode, 0o777);
    drop(suite);

    assert_eq!(fs.stat(&root).unwrap_err().code(), Some(&ErrorCode::ENOENT));
    Ok(())
}

#[test]
fn test_keep_scratch_leaves_case_directories() -> anyhow::Result<()> {
    let baselines = TempDir::new()?;
    let config = SuiteConfig {
        keep_scratch: true,
        ..recording_config(baselines.path())
    };
    let (fs, _report, suite) = memfs_suite(MemFsConfig::default(), config)?;
    let root = suite.root().to_path_buf();

    let dir = suite.run_case("race/kept", |ctx| {
        ctx.setup.write_file(&ctx.path("marker"), b"kept", 0o644)?;
        Ok(ctx.dir.clone())
    });
    drop(suite);

    let dir = dir.expect("case ran");
    assert_eq!(dir, root.join("race+kept"));
    assert_eq!(fs.read_file(&dir.join("marker"))?, b"kept");
    Ok(())
}

#[test]
fn test_similar_case_names_get_separate_directories() -> anyhow::Result<()> {
    let baselines = TempDir::new()?;
    let config = SuiteConfig {
        keep_scratch: true,
        ..recording_config(baselines.path())
    };
    let (fs, _report, suite) = memfs_suite(MemFsConfig::default(), config)?;

    let mut dirs = Vec::new();
    for name in ["perm/a-b", "perm/a/b", "perm/a_b"] {
        let dir = suite.run_case(name, |ctx| {
            ctx.setup.write_file(&ctx.path("owner"), ctx.name.as_bytes(), 0o644)?;
            Ok(ctx.dir.clone())
        });
        dirs.push((name, dir.expect("case ran")));
    }
    drop(suite);

    for (name, dir) in &dirs {
        assert_eq!(fs.read_file(&dir.join("owner"))?, name.as_bytes());
    }
    Ok(())
}

#[test]
fn test_zero_race_population_is_rejected() {
    let baselines = TempDir::new().unwrap();
    let config = SuiteConfig {
        max_race: 0,
        ..recording_config(baselines.path())
    };
    let err = ConformanceSuite::builder(Arc::new(MemFs::default()))
        .config(config)
        .build()
        .err()
        .expect("build must reject max_race 0");
    assert_eq!(err.to_string(), "Configuration error: max_race must be at least 1");
}

#[test]
fn test_case_setup_failure_only_fails_that_case() -> anyhow::Result<()> {
    let baselines = TempDir::new()?;
    let (_fs, report, suite) = memfs_suite(MemFsConfig::default(), recording_config(baselines.path()))?;

    let broken = suite.run_case("race/broken", |ctx| {
        ctx.setup.mkdir(Path::new("/missing/parent/dir"), 0o755)?;
        Ok(())
    });
    let fine = suite.run_case("race/fine", |_ctx| Ok(42));

    assert_eq!(broken, None);
    assert_eq!(fine, Some(42));
    let failures = report.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].case, "race/broken");
    assert!(failures[0].message.starts_with("setup failed"));
    Ok(())
}

#[test]
fn test_read_only_idm_skips_permission_cases() -> anyhow::Result<()> {
    let baselines = TempDir::new()?;
    let fs_config = MemFsConfig {
        read_only_idm: true,
        ..MemFsConfig::default()
    };
    let (_fs, report, suite) = memfs_suite(fs_config, recording_config(baselines.path()))?;

    assert!(!suite.can_test_permissions());
    assert!(suite.users().is_empty());
    let outcomes = run_permission_cases(&suite);
    assert!(outcomes.iter().all(|(_, o)| o.as_ref().is_some_and(|o| o.is_skipped())));

    assert!(!report.has_failures());
    let skipped = report.skipped();
    assert_eq!(skipped.len(), outcomes.len());
    assert!(skipped[0].message.contains("read only"));
    Ok(())
}

#[test]
fn test_unprivileged_setup_skips_permission_cases() -> anyhow::Result<()> {
    init_tracing();
    let baselines = TempDir::new()?;
    let fs = MemFs::default();
    let idm = fs.mem_idm();
    idm.group_add("grpRunner")?;
    let runner = idm.user_add("usrRunner", "grpRunner")?;
    let as_runner = fs.with_user(&runner)?;

    let report = Arc::new(Report::new());
    let suite = ConformanceSuite::builder(as_runner)
        .config(recording_config(baselines.path()))
        .reporter(report.clone())
        .build()?;

    assert!(!suite.can_test_permissions());
    run_permission_cases(&suite);
    assert!(report.events().iter().all(|e| e.verdict == Verdict::Skip));
    assert!(report.skipped()[0].message.contains("not an administrator"));
    Ok(())
}

#[test]
fn test_read_only_backend_runs_catalog() -> anyhow::Result<()> {
    init_tracing();
    let baselines = TempDir::new()?;
    let base = MemFs::default();
    let base: Arc<dyn Vfs> = Arc::new(base);
    let report = Arc::new(Report::new());

    let suite = ConformanceSuite::builder(Arc::new(RoFs::new(base.clone())))
        .setup_vfs(base)
        .config(recording_config(baselines.path()))
        .reporter(report.clone())
        .build()?;

    assert!(suite.test_vfs().features().read_only);
    assert!(suite.idm().is_some());
    suite.run_all();

    report.assert_ok();
    let summary = report.summary();
    assert!(summary.skipped >= 9, "{summary}");
    assert_eq!(summary.passed, 6, "every race expects no success: {summary}");
    Ok(())
}
