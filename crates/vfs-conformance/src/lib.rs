//! Conformance verification for virtual filesystem backends.
//!
//! Two verifiers certify that a backend behaves like a real filesystem:
//!
//! - the [`PermissionOracle`] drives an operation against every
//!   (fixture user, permission bits) pair and compares the observed error with
//!   a baseline recorded once from a trusted reference run;
//! - the [`ConcurrencyVerifier`] releases many invocations of an operation at
//!   once and checks how many may succeed.
//!
//! [`ConformanceSuite`] owns the handles, fixtures and scratch directories and
//! dispatches cases; failures go to a [`Reporter`] instead of aborting the run.

pub mod assert;
pub mod baseline;
pub mod cases;
pub mod config;
pub mod error;
pub mod permission;
pub mod race;
pub mod report;
pub mod suite;

pub use assert::{ErrorAssert, ALL_OS, POSIX};
pub use baseline::{Baseline, BaselineStore, ExpectedErrorRecord};
pub use config::{BaselinePolicy, SuiteConfig};
pub use error::{Result, SuiteError};
pub use permission::{perm_values, PermOptions, PermOutcome, PermissionCase, PermissionOracle};
pub use race::{race_op, ConcurrencyVerifier, RaceOp, RaceOutcome, RaceResult, RaceSpec};
pub use report::{Event, Report, Reporter, Summary, Verdict};
pub use suite::{CaseContext, ConformanceSuite, SuiteBuilder, FIXTURE_GROUPS, FIXTURE_USERS};

pub use vfs_conformance_traits as traits;
