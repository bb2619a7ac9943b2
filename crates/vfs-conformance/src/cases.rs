//! Built-in catalog of permission and race cases.

use vfs_conformance_traits::Features;

use crate::permission::{PermOptions, PermOutcome, PermissionCase, TARGET_CHILD};
use crate::race::{race_op, RaceOutcome, RaceResult};
use crate::suite::ConformanceSuite;

const FILES: PermOptions = PermOptions {
    ignore_op: false,
    ignore_path: false,
    use_files: true,
};

/// Permission cases applicable to a backend with `features`.
pub fn permission_cases(features: Features) -> Vec<PermissionCase<'static>> {
    let mut cases = vec![
        PermissionCase::new("mkdir", |vfs, dir| vfs.mkdir(&dir.join("new"), 0o755)),
        PermissionCase::new("create", |vfs, dir| {
            vfs.create_file(&dir.join("new.txt"), 0o644, true)
        }),
        PermissionCase::new("remove", |vfs, dir| vfs.remove(&dir.join(TARGET_CHILD))),
        PermissionCase::new("read_dir", |vfs, dir| vfs.read_dir(dir).map(drop)),
        PermissionCase::new("chmod", |vfs, dir| vfs.chmod(dir, 0o777)),
        PermissionCase::new("chown", |vfs, dir| {
            let user = vfs.user();
            vfs.chown(dir, user.uid, user.gid)
        }),
        PermissionCase::new("rename", |vfs, dir| {
            vfs.rename(&dir.join(TARGET_CHILD), &dir.join("renamed.txt"))
        }),
        PermissionCase::new("read_file", |vfs, file| vfs.read_file(file).map(drop))
            .options(FILES),
        PermissionCase::new("write_file", |vfs, file| {
            vfs.write_file(file, b"overwritten\n", 0o644)
        })
        .options(FILES),
    ];

    if features.symlink {
        cases.push(PermissionCase::new("symlink", |vfs, dir| {
            vfs.symlink(&dir.join(TARGET_CHILD), &dir.join("link"))
        }));
    }
    cases
}

/// Run every built-in permission case.
pub fn run_permission_cases(suite: &ConformanceSuite) -> Vec<(String, Option<PermOutcome>)> {
    permission_cases(suite.test_vfs().features())
        .iter()
        .map(|case| (case.name.clone(), suite.perm(case)))
        .collect()
}

/// Run every built-in race case.
///
/// On a read-only backend every mutating race is expected to fail outright.
pub fn run_race_cases(suite: &ConformanceSuite) -> Vec<(String, Option<RaceOutcome>)> {
    let read_only = suite.test_vfs().features().read_only;
    let writes = |expected| if read_only { RaceResult::NoneOk } else { expected };
    let mut outcomes = Vec::new();

    let outcome = suite.race("mkdir", writes(RaceResult::OneOk), |ctx| {
        let (vfs, path) = (ctx.test.clone(), ctx.path("dir"));
        Ok(vec![race_op(move || vfs.mkdir(&path, 0o755))])
    });
    outcomes.push(("mkdir".to_string(), outcome));

    let outcome = suite.race("create_exclusive", writes(RaceResult::OneOk), |ctx| {
        let (vfs, path) = (ctx.test.clone(), ctx.path("file.txt"));
        Ok(vec![race_op(move || vfs.create_file(&path, 0o644, true))])
    });
    outcomes.push(("create_exclusive".to_string(), outcome));

    let outcome = suite.race("remove", writes(RaceResult::OneOk), |ctx| {
        let (vfs, path) = (ctx.test.clone(), ctx.path("file.txt"));
        ctx.setup.write_file(&path, b"remove me\n", 0o644)?;
        Ok(vec![race_op(move || vfs.remove(&path))])
    });
    outcomes.push(("remove".to_string(), outcome));

    let outcome = suite.race("mkdir_all", writes(RaceResult::AllOk), |ctx| {
        let (vfs, path) = (ctx.test.clone(), ctx.path("a/b/c"));
        Ok(vec![race_op(move || vfs.mkdir_all(&path, 0o755))])
    });
    outcomes.push(("mkdir_all".to_string(), outcome));

    let outcome = suite.race("remove_all", writes(RaceResult::AllOk), |ctx| {
        let (vfs, top) = (ctx.test.clone(), ctx.path("a"));
        ctx.setup.mkdir_all(&ctx.path("a/b/c"), 0o755)?;
        ctx.setup.write_file(&ctx.path("a/b/c/file.txt"), b"x", 0o644)?;
        Ok(vec![race_op(move || vfs.remove_all(&top))])
    });
    outcomes.push(("remove_all".to_string(), outcome));

    let outcome = suite.race("mkdir_all_remove_all", RaceResult::Undefined, |ctx| {
        let (creator, deep) = (ctx.test.clone(), ctx.path("a/b/c"));
        let (remover, top) = (ctx.test.clone(), ctx.path("a"));
        Ok(vec![
            race_op(move || creator.mkdir_all(&deep, 0o755)),
            race_op(move || remover.remove_all(&top)),
        ])
    });
    outcomes.push(("mkdir_all_remove_all".to_string(), outcome));

    outcomes
}

/// Run the whole catalog against `suite`.
pub fn run_all(suite: &ConformanceSuite) {
    let perms = run_permission_cases(suite);
    let races = run_race_cases(suite);
    tracing::info!(
        backend = suite.test_vfs().name(),
        permission_cases = perms.len(),
        race_cases = races.len(),
        "catalog finished"
    );
}
