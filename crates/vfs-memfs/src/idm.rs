//! In-memory identity manager

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;
use vfs_conformance_traits::{Group, IdentityMgr, IdmError, IdmResult, User};

const ADMIN_NAME: &str = "root";
const FIRST_ID: u32 = 1000;

#[derive(Debug)]
struct IdmState {
    users: BTreeMap<String, User>,
    groups: BTreeMap<String, Group>,
    next_uid: u32,
    next_gid: u32,
}

/// Identity manager keeping users and groups in process memory.
///
/// Ids are allocated sequentially from 1000 and never reused, so a name maps
/// to the same id for the manager's whole life.
#[derive(Debug)]
pub struct MemIdm {
    state: Mutex<IdmState>,
    read_only: bool,
}

impl MemIdm {
    pub fn new(read_only: bool) -> Self {
        let mut users = BTreeMap::new();
        let mut groups = BTreeMap::new();
        users.insert(ADMIN_NAME.to_string(), User::new(ADMIN_NAME, 0, 0));
        groups.insert(ADMIN_NAME.to_string(), Group::new(ADMIN_NAME, 0));

        Self {
            state: Mutex::new(IdmState {
                users,
                groups,
                next_uid: FIRST_ID,
                next_gid: FIRST_ID,
            }),
            read_only,
        }
    }

    fn state(&self) -> MutexGuard<'_, IdmState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_writable(&self) -> IdmResult<()> {
        if self.read_only {
            return Err(IdmError::ReadOnly);
        }
        Ok(())
    }
}

impl Default for MemIdm {
    fn default() -> Self {
        Self::new(false)
    }
}

impl IdentityMgr for MemIdm {
    fn admin_user(&self) -> User {
        User::new(ADMIN_NAME, 0, 0)
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn group_add(&self, name: &str) -> IdmResult<Group> {
        self.ensure_writable()?;
        let mut state = self.state();
        if state.groups.contains_key(name) {
            return Err(IdmError::GroupExists(name.to_string()));
        }

        let group = Group::new(name, state.next_gid);
        state.next_gid += 1;
        state.groups.insert(name.to_string(), group.clone());
        debug!(group = name, gid = group.gid, "group added");
        Ok(group)
    }

    fn group_del(&self, name: &str) -> IdmResult<()> {
        self.ensure_writable()?;
        let mut state = self.state();
        state
            .groups
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| IdmError::UnknownGroup(name.to_string()))
    }

    fn lookup_group(&self, name: &str) -> IdmResult<Group> {
        self.state()
            .groups
            .get(name)
            .cloned()
            .ok_or_else(|| IdmError::UnknownGroup(name.to_string()))
    }

    fn user_add(&self, name: &str, group_name: &str) -> IdmResult<User> {
        self.ensure_writable()?;
        let mut state = self.state();
        if state.users.contains_key(name) {
            return Err(IdmError::UserExists(name.to_string()));
        }
        let gid = state
            .groups
            .get(group_name)
            .map(|g| g.gid)
            .ok_or_else(|| IdmError::UnknownGroup(group_name.to_string()))?;

        let user = User::new(name, state.next_uid, gid);
        state.next_uid += 1;
        state.users.insert(name.to_string(), user.clone());
        debug!(user = name, uid = user.uid, gid, "user added");
        Ok(user)
    }

    fn user_del(&self, name: &str) -> IdmResult<()> {
        self.ensure_writable()?;
        if name == ADMIN_NAME {
            return Err(IdmError::PermissionDenied);
        }
        let mut state = self.state();
        state
            .users
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| IdmError::UnknownUser(name.to_string()))
    }

    fn lookup_user(&self, name: &str) -> IdmResult<User> {
        self.state()
            .users
            .get(name)
            .cloned()
            .ok_or_else(|| IdmError::UnknownUser(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_stable() {
        let idm = MemIdm::default();
        let group = idm.group_add("grpTest").unwrap();
        let user = idm.user_add("usrTest", "grpTest").unwrap();

        assert_eq!(user.gid, group.gid);
        assert_eq!(idm.lookup_user("usrTest").unwrap(), user);
        assert_eq!(idm.lookup_group("grpTest").unwrap(), group);
    }

    #[test]
    fn test_duplicates_rejected() {
        let idm = MemIdm::default();
        idm.group_add("grpTest").unwrap();
        assert_eq!(
            idm.group_add("grpTest"),
            Err(IdmError::GroupExists("grpTest".to_string()))
        );
        assert_eq!(
            idm.user_add("usrTest", "missing"),
            Err(IdmError::UnknownGroup("missing".to_string()))
        );
    }

    #[test]
    fn test_read_only_rejects_changes() {
        let idm = MemIdm::new(true);
        assert_eq!(idm.group_add("grpTest"), Err(IdmError::ReadOnly));
        assert!(idm.lookup_user("root").unwrap().is_admin());
    }
}
