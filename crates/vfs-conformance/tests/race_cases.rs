//! Race distributions of the built-in catalog on the memory backend.

mod common;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use tempfile::TempDir;
use vfs_conformance::cases::run_race_cases;
use vfs_conformance::traits::{Vfs, VfsError};
use vfs_conformance::{race_op, RaceResult, RaceSpec, SuiteConfig};
use vfs_memfs::MemFsConfig;

use common::{memfs_suite, recording_config};

#[test]
fn test_catalog_distributions() -> anyhow::Result<()> {
    let baselines = TempDir::new()?;
    let config = SuiteConfig {
        max_race: 50,
        ..recording_config(baselines.path())
    };
    let (_fs, report, suite) = memfs_suite(MemFsConfig::default(), config)?;

    let outcomes: HashMap<String, _> = run_race_cases(&suite)
        .into_iter()
        .map(|(name, outcome)| (name, outcome.expect("race case ran")))
        .collect();
    report.assert_ok();

    assert_eq!(outcomes["mkdir"].successes, 1);
    assert_eq!(outcomes["mkdir"].failures, 49);
    assert_eq!(outcomes["create_exclusive"].successes, 1);
    assert_eq!(outcomes["remove"].successes, 1);
    assert_eq!(outcomes["mkdir_all"].successes, 50);
    assert_eq!(outcomes["remove_all"].successes, 50);

    let mixed = &outcomes["mkdir_all_remove_all"];
    assert_eq!(mixed.population, 100);
    assert_eq!(mixed.successes + mixed.failures, 100);
    assert_eq!(report.logs_for("race/mkdir_all_remove_all").len(), 1);
    Ok(())
}

#[test]
fn test_losers_see_exists() -> anyhow::Result<()> {
    let baselines = TempDir::new()?;
    let (_fs, report, suite) = memfs_suite(MemFsConfig::default(), recording_config(baselines.path()))?;

    let outcome = suite
        .race("mkdir_exists", RaceResult::OneOk, |ctx| {
            let (vfs, path) = (ctx.test.clone(), ctx.path("dir"));
            Ok(vec![race_op(move || vfs.mkdir(&path, 0o755))])
        })
        .expect("race ran");

    assert_eq!(outcome.successes, 1);
    let first_error = outcome.first_error.expect("losers recorded");
    assert!(first_error.ends_with("file exists"), "{first_error}");
    report.assert_ok();
    Ok(())
}

#[test]
fn test_wrong_expectation_is_reported_not_fatal() -> anyhow::Result<()> {
    let baselines = TempDir::new()?;
    let (_fs, report, suite) = memfs_suite(MemFsConfig::default(), recording_config(baselines.path()))?;

    suite.race("mkdir_all_claimed_exclusive", RaceResult::OneOk, |ctx| {
        let (vfs, path) = (ctx.test.clone(), ctx.path("x/y"));
        Ok(vec![race_op(move || vfs.mkdir_all(&path, 0o755))])
    });
    let after = suite.race("still_running", RaceResult::AllOk, |_ctx| {
        Ok(vec![race_op(|| Ok::<(), VfsError>(()))])
    });

    assert!(after.is_some_and(|o| o.successes == 20));
    let failures = report.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].case, "race/mkdir_all_claimed_exclusive");
    assert!(failures[0].message.contains("got 20 success(es)"));
    Ok(())
}

#[test]
fn test_spec_borrowing_local_state() -> anyhow::Result<()> {
    let baselines = TempDir::new()?;
    let (fs, report, suite) = memfs_suite(MemFsConfig::default(), recording_config(baselines.path()))?;
    let dir = suite.root().join("shared");
    fs.mkdir(&dir, 0o755)?;
    let calls = AtomicUsize::new(0);

    let spec = RaceSpec::new("borrowed", RaceResult::AllOk).op(|| {
        calls.fetch_add(1, Ordering::SeqCst);
        fs.stat(&dir).map(drop)
    });
    let outcome = suite.verifier().run(&spec);

    assert_eq!(outcome.successes, suite.max_race());
    assert_eq!(calls.load(Ordering::SeqCst), suite.max_race());
    report.assert_ok();
    Ok(())
}
