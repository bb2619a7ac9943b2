//! The conformance suite: handles, fixtures and per-case scratch directories.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};
use vfs_conformance_traits::{
    generate_unique_id, Group, IdentityMgr, IdmError, User, Vfs, VfsResult,
};

use crate::baseline::BaselineStore;
use crate::config::{BaselinePolicy, SuiteConfig};
use crate::error::{Result, SuiteError};
use crate::permission::{PermOutcome, PermissionCase, PermissionOracle};
use crate::race::{ConcurrencyVerifier, RaceOp, RaceOutcome, RaceResult, RaceSpec};
use crate::report::{escape_name, sub_case, Report, Reporter};

/// Groups created (or looked up) before any case runs.
pub const FIXTURE_GROUPS: [&str; 3] = ["grpTest", "grpOther", "grpEmpty"];

/// Fixture users and their primary groups. The first one owns permission targets.
pub const FIXTURE_USERS: [(&str, &str); 3] = [
    ("usrTest", "grpTest"),
    ("usrGrp", "grpTest"),
    ("usrOther", "grpOther"),
];

/// Working state handed to one case.
pub struct CaseContext {
    pub name: String,
    /// Fresh directory owned by this case alone.
    pub dir: PathBuf,
    pub setup: Arc<dyn Vfs>,
    pub test: Arc<dyn Vfs>,
}

impl CaseContext {
    pub fn path<P: AsRef<Path>>(&self, rel: P) -> PathBuf {
        self.dir.join(rel)
    }
}

/// Builder for [`ConformanceSuite`].
pub struct SuiteBuilder {
    test: Arc<dyn Vfs>,
    setup: Option<Arc<dyn Vfs>>,
    config: SuiteConfig,
    reporter: Option<Arc<dyn Reporter>>,
}

impl SuiteBuilder {
    /// Privileged handle used to build fixtures; defaults to the handle under test.
    pub fn setup_vfs(mut self, setup: Arc<dyn Vfs>) -> Self {
        self.setup = Some(setup);
        self
    }

    pub fn config(mut self, config: SuiteConfig) -> Self {
        self.config = config;
        self
    }

    pub fn reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Create fixtures and the scratch root.
    pub fn build(self) -> Result<ConformanceSuite> {
        let test = self.test;
        let setup = self.setup.unwrap_or_else(|| test.clone());
        let reporter = self
            .reporter
            .unwrap_or_else(|| Arc::new(Report::new()) as Arc<dyn Reporter>);
        let config = self.config;
        config.validate()?;

        let features = test.features();
        let idm = test.idm();
        let initial_user = test.user().clone();
        let privileged = setup.user().is_admin();

        let permission_skip = match &idm {
            _ if !features.identity_mgr => Some(format!(
                "backend {} cannot act as other users",
                test.name()
            )),
            None => Some(format!("backend {} has no identity manager", test.name())),
            Some(idm) if features.read_only_idm || idm.is_read_only() => Some(format!(
                "identity manager of {} is read only",
                test.name()
            )),
            Some(_) if !privileged => Some(format!(
                "setup handle acts as {}, not an administrator",
                setup.user().name
            )),
            Some(_) => None,
        };

        let (groups, users) = match (&idm, &permission_skip) {
            (Some(idm), None) => create_fixtures(idm.as_ref())?,
            _ => (Vec::new(), Vec::new()),
        };

        let may_record = match config.baseline_policy {
            BaselinePolicy::RecordWhenPrivileged => privileged && features.real_fs,
            BaselinePolicy::RecordWhenAbsent => true,
            BaselinePolicy::ReplayOnly => false,
        };

        let root = setup
            .temp_dir()
            .join(format!("{}-{}", config.scratch_prefix, generate_unique_id()));
        setup.mkdir_all(&root, 0o777)?;
        setup.chmod(&root, 0o777)?;

        let store = BaselineStore::new(&config.baseline_dir, test.os_type());

        info!(
            backend = test.name(),
            os = %test.os_type(),
            root = %root.display(),
            can_test_permissions = permission_skip.is_none(),
            may_record,
            "conformance suite ready"
        );
        if let Some(reason) = &permission_skip {
            info!(reason = %reason, "permission cases disabled");
        }

        Ok(ConformanceSuite {
            setup_vfs: setup,
            test_vfs: test,
            idm,
            initial_user,
            users,
            groups,
            permission_skip,
            may_record,
            config,
            store,
            reporter,
            root,
        })
    }
}

fn create_fixtures(idm: &dyn IdentityMgr) -> Result<(Vec<Group>, Vec<User>)> {
    let mut groups = Vec::with_capacity(FIXTURE_GROUPS.len());
    for name in FIXTURE_GROUPS {
        let group = match idm.group_add(name) {
            Err(IdmError::GroupExists(_)) => idm.lookup_group(name),
            other => other,
        }
        .map_err(|e| SuiteError::setup(format!("fixture group {name}: {e}")))?;
        groups.push(group);
    }

    let mut users = Vec::with_capacity(FIXTURE_USERS.len());
    for (name, group) in FIXTURE_USERS {
        let user = match idm.user_add(name, group) {
            Err(IdmError::UserExists(_)) => idm.lookup_user(name),
            other => other,
        }
        .map_err(|e| SuiteError::setup(format!("fixture user {name}: {e}")))?;
        users.push(user);
    }
    Ok((groups, users))
}

/// Root of a conformance run over one backend.
///
/// Dropping the suite removes its scratch root unless `keep_scratch` is set.
pub struct ConformanceSuite {
    setup_vfs: Arc<dyn Vfs>,
    test_vfs: Arc<dyn Vfs>,
    idm: Option<Arc<dyn IdentityMgr>>,
    initial_user: User,
    users: Vec<User>,
    groups: Vec<Group>,
    permission_skip: Option<String>,
    may_record: bool,
    config: SuiteConfig,
    store: BaselineStore,
    reporter: Arc<dyn Reporter>,
    root: PathBuf,
}

impl ConformanceSuite {
    pub fn builder(test: Arc<dyn Vfs>) -> SuiteBuilder {
        SuiteBuilder {
            test,
            setup: None,
            config: SuiteConfig::default(),
            reporter: None,
        }
    }

    pub fn setup_vfs(&self) -> &Arc<dyn Vfs> {
        &self.setup_vfs
    }

    pub fn test_vfs(&self) -> &Arc<dyn Vfs> {
        &self.test_vfs
    }

    pub fn idm(&self) -> Option<&Arc<dyn IdentityMgr>> {
        self.idm.as_ref()
    }

    pub fn initial_user(&self) -> &User {
        &self.initial_user
    }

    pub fn users(&self) -> &[User] {
        &self.users
    }

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    /// True when the permission matrix can run in this environment.
    pub fn can_test_permissions(&self) -> bool {
        self.permission_skip.is_none()
    }

    pub fn max_race(&self) -> usize {
        self.config.max_race
    }

    pub fn config(&self) -> &SuiteConfig {
        &self.config
    }

    pub fn baseline_store(&self) -> &BaselineStore {
        &self.store
    }

    pub fn reporter(&self) -> &dyn Reporter {
        self.reporter.as_ref()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Run `f` in a fresh case directory, reporting setup failures under `name`.
    ///
    /// Returns `None` when the case could not be prepared; the rest of the
    /// suite is unaffected.
    pub fn run_case<T, F>(&self, name: &str, f: F) -> Option<T>
    where
        F: FnOnce(&CaseContext) -> Result<T>,
    {
        let ctx = match self.case_context(name) {
            Ok(ctx) => ctx,
            Err(e) => {
                self.reporter.fail(name, &format!("setup failed: {e}"));
                return None;
            }
        };

        let result = f(&ctx);
        self.teardown(&ctx);

        match result {
            Ok(value) => Some(value),
            Err(e) => {
                self.reporter.fail(name, &format!("setup failed: {e}"));
                None
            }
        }
    }

    fn case_context(&self, name: &str) -> Result<CaseContext> {
        let dir = self.root.join(escape_name(name));

        self.setup_vfs.remove_all(&dir)?;
        self.setup_vfs.mkdir(&dir, 0o755)?;
        self.setup_vfs.chmod(&dir, self.config.dir_mode)?;

        Ok(CaseContext {
            name: name.to_string(),
            dir,
            setup: self.setup_vfs.clone(),
            test: self.test_vfs.clone(),
        })
    }

    fn teardown(&self, ctx: &CaseContext) {
        if self.config.keep_scratch {
            return;
        }
        if let Err(e) = self.setup_vfs.remove_all(&ctx.dir) {
            warn!(case = %ctx.name, error = %e, "failed to remove case directory");
        }
    }

    /// Oracle wired to this suite's handles, fixtures and baseline policy.
    pub fn permission_oracle(&self) -> PermissionOracle<'_> {
        let mut oracle = PermissionOracle::new(
            self.setup_vfs.as_ref(),
            self.test_vfs.as_ref(),
            &self.users,
            &self.store,
            self.reporter.as_ref(),
        )
        .may_record(self.may_record);

        if let Some(owner) = self.users.first() {
            if self.setup_vfs.features().chown {
                oracle = oracle.owner(owner.uid, owner.gid);
            }
        }
        if let Some(reason) = &self.permission_skip {
            oracle = oracle.disabled(reason.clone());
        }
        oracle
    }

    /// Run one permission case in its own directory.
    pub fn perm(&self, case: &PermissionCase<'_>) -> Option<PermOutcome> {
        let name = sub_case("perm", &case.name);
        self.run_case(&name, |ctx| self.permission_oracle().run(case, &ctx.dir))
    }

    pub fn verifier(&self) -> ConcurrencyVerifier<'_> {
        ConcurrencyVerifier::new(self.config.max_race, self.reporter.as_ref())
    }

    /// Race the operations built by `build` in a fresh case directory.
    pub fn race<F>(&self, name: &str, expected: RaceResult, build: F) -> Option<RaceOutcome>
    where
        F: FnOnce(&CaseContext) -> VfsResult<Vec<RaceOp<'static>>>,
    {
        let case = sub_case("race", name);
        self.run_case(&case, |ctx| {
            let spec = RaceSpec {
                name: name.to_string(),
                expected,
                ops: build(ctx)?,
            };
            Ok(self.verifier().run(&spec))
        })
    }

    /// Run the built-in catalog of permission and race cases.
    pub fn run_all(&self) {
        crate::cases::run_all(self);
    }
}

impl Drop for ConformanceSuite {
    fn drop(&mut self) {
        if self.config.keep_scratch {
            info!(root = %self.root.display(), "keeping scratch directory");
            return;
        }
        if let Err(e) = self.setup_vfs.remove_all(&self.root) {
            warn!(root = %self.root.display(), error = %e, "failed to remove scratch directory");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vfs_conformance_traits::IdmResult;

    /// Identity manager that refuses every change.
    struct LockedIdm;

    impl IdentityMgr for LockedIdm {
        fn admin_user(&self) -> User {
            User::new("root", 0, 0)
        }

        fn group_add(&self, _name: &str) -> IdmResult<Group> {
            Err(IdmError::PermissionDenied)
        }

        fn group_del(&self, _name: &str) -> IdmResult<()> {
            Err(IdmError::PermissionDenied)
        }

        fn lookup_group(&self, name: &str) -> IdmResult<Group> {
            Err(IdmError::UnknownGroup(name.to_string()))
        }

        fn user_add(&self, _name: &str, _group_name: &str) -> IdmResult<User> {
            Err(IdmError::PermissionDenied)
        }

        fn user_del(&self, _name: &str) -> IdmResult<()> {
            Err(IdmError::PermissionDenied)
        }

        fn lookup_user(&self, name: &str) -> IdmResult<User> {
            Err(IdmError::UnknownUser(name.to_string()))
        }
    }

    #[test]
    fn test_fixture_failure_names_the_identity() {
        let err = create_fixtures(&LockedIdm).unwrap_err();
        match err {
            SuiteError::Setup { message } => {
                assert_eq!(message, "fixture group grpTest: permission denied");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
