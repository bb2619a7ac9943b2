//! Shared helpers for conformance integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;
use vfs_conformance::{BaselinePolicy, ConformanceSuite, Report, SuiteConfig};
use vfs_memfs::{MemFs, MemFsConfig};

/// Install a test-friendly subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Configuration recording into `baseline_dir` whenever a baseline is missing.
pub fn recording_config(baseline_dir: &Path) -> SuiteConfig {
    SuiteConfig {
        max_race: 20,
        baseline_dir: baseline_dir.to_path_buf(),
        baseline_policy: BaselinePolicy::RecordWhenAbsent,
        ..SuiteConfig::default()
    }
}

/// Suite over a fresh memory filesystem, with its collecting report.
pub fn memfs_suite(
    fs_config: MemFsConfig,
    config: SuiteConfig,
) -> anyhow::Result<(MemFs, Arc<Report>, ConformanceSuite)> {
    init_tracing();
    let fs = MemFs::new(fs_config);
    let report = Arc::new(Report::new());
    let suite = ConformanceSuite::builder(Arc::new(fs.clone()))
        .config(config)
        .reporter(report.clone())
        .build()?;
    Ok((fs, report, suite))
}
