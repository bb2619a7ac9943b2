//! Permission oracle: one operation against every (user, permission) pair.
//!
//! A run either records a fresh baseline for the case or replays an existing
//! one; it never does both. Targets are rebuilt through the privileged setup
//! handle before each combination so earlier modes cannot leak into later ones.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};
use vfs_conformance_traits::{OsType, User, Vfs, VfsError, VfsResult};

use crate::assert::ErrorAssert;
use crate::baseline::{resolve_from, Baseline, BaselineStore, ExpectedErrorRecord};
use crate::error::Result;
use crate::report::{sub_case, Reporter};

/// Entry placed inside directory targets so removal and rename have something to act on.
pub const TARGET_CHILD: &str = "child.txt";

const TARGET_CONTENT: &[u8] = b"conformance\n";

/// Operation under test, run as a fixture user against a prepared target.
pub type PermOp<'a> = Box<dyn Fn(&dyn Vfs, &Path) -> VfsResult<()> + Send + Sync + 'a>;

/// Comparison and target options of a [`PermissionCase`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PermOptions {
    /// Do not compare operation names.
    pub ignore_op: bool,
    /// Do not compare path fields.
    pub ignore_path: bool,
    /// Targets are regular files instead of directories.
    pub use_files: bool,
}

/// One verification unit of the permission matrix.
pub struct PermissionCase<'a> {
    pub name: String,
    pub options: PermOptions,
    op: PermOp<'a>,
}

impl<'a> PermissionCase<'a> {
    pub fn new<S, F>(name: S, op: F) -> Self
    where
        S: Into<String>,
        F: Fn(&dyn Vfs, &Path) -> VfsResult<()> + Send + Sync + 'a,
    {
        Self {
            name: name.into(),
            options: PermOptions::default(),
            op: Box::new(op),
        }
    }

    pub fn options(mut self, options: PermOptions) -> Self {
        self.options = options;
        self
    }

    pub fn run_op(&self, vfs: &dyn Vfs, target: &Path) -> VfsResult<()> {
        (self.op)(vfs, target)
    }
}

impl std::fmt::Debug for PermissionCase<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionCase")
            .field("name", &self.name)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// What a permission run did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PermOutcome {
    /// A new baseline was written.
    Recorded { records: usize, path: PathBuf },
    /// An existing baseline was replayed.
    Verified { checked: usize, mismatches: usize },
    /// Not applicable in this environment.
    Skipped { reason: String },
}

impl PermOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped { .. })
    }
}

/// Permission values with meaning on `os`.
///
/// Windows only honours the read-only attribute, so the write bit is the
/// single dimension worth walking there.
pub fn perm_values(os: OsType) -> Vec<u32> {
    match os {
        OsType::Windows => vec![0o444, 0o666],
        OsType::Linux | OsType::Darwin => (1..=0o777).collect(),
    }
}

enum Mode {
    Record(Baseline),
    Replay(Baseline),
}

/// Drives permission cases for one pair of setup/test handles.
pub struct PermissionOracle<'s> {
    setup: &'s dyn Vfs,
    test: &'s dyn Vfs,
    users: &'s [User],
    store: &'s BaselineStore,
    reporter: &'s dyn Reporter,
    owner: Option<(u32, u32)>,
    may_record: bool,
    disabled: Option<String>,
}

impl<'s> PermissionOracle<'s> {
    pub fn new(
        setup: &'s dyn Vfs,
        test: &'s dyn Vfs,
        users: &'s [User],
        store: &'s BaselineStore,
        reporter: &'s dyn Reporter,
    ) -> Self {
        Self {
            setup,
            test,
            users,
            store,
            reporter,
            owner: None,
            may_record: false,
            disabled: None,
        }
    }

    /// Chown every target to `uid:gid` before applying the mode.
    pub fn owner(mut self, uid: u32, gid: u32) -> Self {
        self.owner = Some((uid, gid));
        self
    }

    /// Allow a missing baseline to be established by this run.
    pub fn may_record(mut self, may_record: bool) -> Self {
        self.may_record = may_record;
        self
    }

    /// Skip every case with `reason`.
    pub fn disabled<S: Into<String>>(mut self, reason: S) -> Self {
        self.disabled = Some(reason.into());
        self
    }

    /// Walk the full matrix of `case` below `dir`.
    ///
    /// Mismatches are reported, not returned; `Err` means the environment
    /// could not be prepared.
    pub fn run(&self, case: &PermissionCase<'_>, dir: &Path) -> Result<PermOutcome> {
        let case_name = sub_case("perm", &case.name);

        if let Some(reason) = &self.disabled {
            self.reporter.skip(&case_name, reason);
            return Ok(PermOutcome::Skipped {
                reason: reason.clone(),
            });
        }

        let mut mode = match self.store.load(&case.name)? {
            Some(baseline) => Mode::Replay(baseline),
            None if self.may_record => Mode::Record(Baseline::new()),
            None => {
                let reason = format!(
                    "no baseline at {} and this run may not record one; \
                     record it from a privileged run against the real filesystem",
                    self.store.path_for(&case.name).display()
                );
                self.reporter.skip(&case_name, &reason);
                return Ok(PermOutcome::Skipped { reason });
            }
        };

        let handles = self
            .users
            .iter()
            .map(|user| -> Result<(&'s User, Arc<dyn Vfs>)> { Ok((user, self.test.with_user(user)?)) })
            .collect::<Result<Vec<_>>>()?;

        info!(
            case = %case_name,
            backend = self.test.name(),
            recording = matches!(mode, Mode::Record(_)),
            "running permission case"
        );

        let mut checked = 0;
        let mut mismatches = 0;
        for perm in perm_values(self.test.os_type()) {
            for (user, vfs) in &handles {
                let target = dir.join(format!("{}-{perm:03o}", user.name));
                self.prepare(&target, perm, case.options.use_files)?;

                let observed = case.run_op(vfs.as_ref(), &target).err();
                debug!(case = %case_name, user = %user.name, perm = %format_args!("{perm:03o}"), ?observed);

                match &mut mode {
                    Mode::Record(baseline) => {
                        baseline.insert(ExpectedErrorRecord::capture(
                            &user.name,
                            perm,
                            observed.as_ref(),
                            dir,
                        ));
                    }
                    Mode::Replay(baseline) => {
                        checked += 1;
                        let sub =
                            sub_case(&case_name, &format!("{}/{perm:03o}", user.name));
                        let matched = match baseline.get(&user.name, perm) {
                            Some(expected) => {
                                self.verify(&sub, expected, observed.as_ref(), dir, case.options)
                            }
                            None => {
                                self.reporter.fail(&sub, "baseline has no record for this combination");
                                false
                            }
                        };
                        if !matched {
                            mismatches += 1;
                        }
                    }
                }

                self.setup.remove_all(&target)?;
            }
        }

        match mode {
            Mode::Record(baseline) => {
                let path = self.store.save(&case.name, &baseline)?;
                self.reporter.log(
                    &case_name,
                    &format!("recorded {} records to {}", baseline.len(), path.display()),
                );
                self.reporter.pass(&case_name);
                Ok(PermOutcome::Recorded {
                    records: baseline.len(),
                    path,
                })
            }
            Mode::Replay(_) => {
                if mismatches == 0 {
                    self.reporter.pass(&case_name);
                } else {
                    self.reporter.log(
                        &case_name,
                        &format!("{mismatches} of {checked} combinations differ from the baseline"),
                    );
                }
                Ok(PermOutcome::Verified {
                    checked,
                    mismatches,
                })
            }
        }
    }

    /// Rebuild `target` owned by the fixture owner with mode `perm`.
    fn prepare(&self, target: &Path, perm: u32, use_files: bool) -> Result<()> {
        self.setup.remove_all(target)?;
        if use_files {
            self.setup.write_file(target, TARGET_CONTENT, 0o644)?;
        } else {
            self.setup.mkdir(target, 0o755)?;
            let child = target.join(TARGET_CHILD);
            self.setup.write_file(&child, TARGET_CONTENT, 0o644)?;
            if let Some((uid, gid)) = self.owner {
                self.setup.chown(&child, uid, gid)?;
            }
        }
        if let Some((uid, gid)) = self.owner {
            self.setup.chown(target, uid, gid)?;
        }
        self.setup.chmod(target, perm)?;
        Ok(())
    }

    fn verify(
        &self,
        sub: &str,
        expected: &ExpectedErrorRecord,
        observed: Option<&VfsError>,
        dir: &Path,
        options: PermOptions,
    ) -> bool {
        let check = ErrorAssert::new(self.reporter, sub, self.test.os_type(), observed)
            .ignore_op(options.ignore_op)
            .ignore_path(options.ignore_path);

        let Some(shape) = expected.err_type else {
            return !check.no_error().failed();
        };

        let mut check = check.shape(shape);
        if let Some(op) = &expected.err_op {
            check = check.op(op);
        }
        if let Some(path) = &expected.err_path {
            check = check.path(resolve_from(dir, path));
        }
        if let Some(old) = &expected.err_old {
            check = check.old_path(resolve_from(dir, old));
        }
        if let Some(new) = &expected.err_new {
            check = check.new_path(resolve_from(dir, new));
        }
        if let Some(text) = &expected.err_err {
            check = check.cause(text);
        }
        !check.failed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perm_values_cover_os() {
        let posix = perm_values(OsType::Linux);
        assert_eq!(posix.len(), 0o777);
        assert_eq!(posix.first(), Some(&1));
        assert_eq!(posix.last(), Some(&0o777));
        assert_eq!(perm_values(OsType::Darwin), posix);
        assert_eq!(perm_values(OsType::Windows), vec![0o444, 0o666]);
    }

    #[test]
    fn test_case_options() {
        let case = PermissionCase::new("read_file", |vfs, path| vfs.read_file(path).map(drop))
            .options(PermOptions {
                use_files: true,
                ..PermOptions::default()
            });
        assert!(case.options.use_files);
        assert!(!case.options.ignore_op);
        assert!(format!("{case:?}").contains("read_file"));
    }
}
