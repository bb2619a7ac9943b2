//! Identity manager over host accounts.
//!
//! Lookups fall through to the host user and group databases. Created
//! identities live only in this process: the kernel does not need an account
//! to check permissions for an id, so they get ids that no host account uses.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use nix::unistd::{self, Gid, Uid};
use tracing::debug;
use vfs_conformance_traits::{Group, IdentityMgr, IdmError, IdmResult, User};

/// First id handed out to process-local identities.
const FIRST_ID: u32 = 200_000;

#[derive(Debug)]
struct IdmState {
    users: BTreeMap<String, User>,
    groups: BTreeMap<String, Group>,
    next_id: u32,
}

/// Identity manager backing [`crate::OsFs`].
///
/// Writable only when the process can switch its filesystem identity, since
/// identities it cannot act as are of no use.
#[derive(Debug)]
pub struct OsIdm {
    state: Mutex<IdmState>,
    read_only: bool,
}

impl OsIdm {
    pub fn new(read_only: bool) -> Self {
        Self {
            state: Mutex::new(IdmState {
                users: BTreeMap::new(),
                groups: BTreeMap::new(),
                next_id: FIRST_ID,
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

    fn host_user(name: &str) -> Option<User> {
        unistd::User::from_name(name)
            .ok()
            .flatten()
            .map(|u| User::new(name, u.uid.as_raw(), u.gid.as_raw()))
    }

    fn host_group(name: &str) -> Option<Group> {
        unistd::Group::from_name(name)
            .ok()
            .flatten()
            .map(|g| Group::new(name, g.gid.as_raw()))
    }

    /// Next id free as both a host uid and a host gid.
    fn allocate_id(state: &mut IdmState) -> u32 {
        loop {
            let id = state.next_id;
            state.next_id += 1;
            let uid_taken = matches!(unistd::User::from_uid(Uid::from_raw(id)), Ok(Some(_)));
            let gid_taken = matches!(unistd::Group::from_gid(Gid::from_raw(id)), Ok(Some(_)));
            if !uid_taken && !gid_taken {
                return id;
            }
        }
    }
}

impl IdentityMgr for OsIdm {
    fn admin_user(&self) -> User {
        User::new("root", 0, 0)
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn group_add(&self, name: &str) -> IdmResult<Group> {
        self.ensure_writable()?;
        let mut state = self.state();
        if state.groups.contains_key(name) || Self::host_group(name).is_some() {
            return Err(IdmError::GroupExists(name.to_string()));
        }

        let group = Group::new(name, Self::allocate_id(&mut state));
        state.groups.insert(name.to_string(), group.clone());
        debug!(group = name, gid = group.gid, "group added");
        Ok(group)
    }

    fn group_del(&self, name: &str) -> IdmResult<()> {
        self.ensure_writable()?;
        match self.state().groups.remove(name) {
            Some(_) => Ok(()),
            None if Self::host_group(name).is_some() => Err(IdmError::PermissionDenied),
            None => Err(IdmError::UnknownGroup(name.to_string())),
        }
    }

    fn lookup_group(&self, name: &str) -> IdmResult<Group> {
        self.state()
            .groups
            .get(name)
            .cloned()
            .or_else(|| Self::host_group(name))
            .ok_or_else(|| IdmError::UnknownGroup(name.to_string()))
    }

    fn user_add(&self, name: &str, group_name: &str) -> IdmResult<User> {
        self.ensure_writable()?;
        let mut state = self.state();
        if state.users.contains_key(name) || Self::host_user(name).is_some() {
            return Err(IdmError::UserExists(name.to_string()));
        }
        let gid = state
            .groups
            .get(group_name)
            .cloned()
            .or_else(|| Self::host_group(group_name))
            .map(|g| g.gid)
            .ok_or_else(|| IdmError::UnknownGroup(group_name.to_string()))?;

        let user = User::new(name, Self::allocate_id(&mut state), gid);
        state.users.insert(name.to_string(), user.clone());
        debug!(user = name, uid = user.uid, gid, "user added");
        Ok(user)
    }

    fn user_del(&self, name: &str) -> IdmResult<()> {
        self.ensure_writable()?;
        match self.state().users.remove(name) {
            Some(_) => Ok(()),
            None if Self::host_user(name).is_some() => Err(IdmError::PermissionDenied),
            None => Err(IdmError::UnknownUser(name.to_string())),
        }
    }

    fn lookup_user(&self, name: &str) -> IdmResult<User> {
        self.state()
            .users
            .get(name)
            .cloned()
            .or_else(|| Self::host_user(name))
            .ok_or_else(|| IdmError::UnknownUser(name.to_string()))
    }
}
