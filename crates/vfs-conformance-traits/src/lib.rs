//! Common traits and types for filesystem backends checked by the conformance suite.
//!
//! This crate contains the shared abstractions consumed by the suite and
//! implemented by every backend, so backends never depend on the suite itself.

use std::path::{Path, PathBuf};
use std::sync::Arc;

pub mod error;

pub use error::{ErrorCode, ErrorShape, IdmError, IdmResult, VfsError, VfsResult};

/// Operating system whose semantics a backend reproduces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsType {
    Linux,
    Darwin,
    Windows,
}

impl OsType {
    /// The operating system this binary was built for.
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            Self::Windows
        } else if cfg!(target_os = "macos") {
            Self::Darwin
        } else {
            Self::Linux
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Linux => "linux",
            Self::Darwin => "darwin",
            Self::Windows => "windows",
        }
    }
}

impl std::fmt::Display for OsType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capabilities advertised by a backend.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Features {
    /// Symbolic links are supported.
    pub symlink: bool,
    /// Handles can be bound to arbitrary users through an identity manager.
    pub identity_mgr: bool,
    /// The identity manager cannot create users or groups.
    pub read_only_idm: bool,
    /// Every mutating operation fails.
    pub read_only: bool,
    /// Operations reach a real, OS-backed filesystem.
    pub real_fs: bool,
    /// File ownership can be changed.
    pub chown: bool,
}

/// A user known to an identity manager.
#[derive(Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct User {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
}

impl User {
    pub fn new<S: Into<String>>(name: S, uid: u32, gid: u32) -> Self {
        Self {
            name: name.into(),
            uid,
            gid,
        }
    }

    /// The superuser bypasses permission checks.
    pub fn is_admin(&self) -> bool {
        self.uid == 0
    }
}

/// A group known to an identity manager.
#[derive(Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Group {
    pub name: String,
    pub gid: u32,
}

impl Group {
    pub fn new<S: Into<String>>(name: S, gid: u32) -> Self {
        Self {
            name: name.into(),
            gid,
        }
    }
}

/// Metadata returned by `stat`/`lstat`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileInfo {
    pub name: String,
    pub size: u64,
    /// Permission bits only (`0o777` mask).
    pub mode: u32,
    pub is_dir: bool,
    pub is_symlink: bool,
    pub uid: u32,
    pub gid: u32,
}

/// User and group management backing a filesystem's identities.
pub trait IdentityMgr: Send + Sync {
    /// The superuser.
    fn admin_user(&self) -> User;

    /// True when users and groups cannot be created or removed.
    fn is_read_only(&self) -> bool {
        false
    }

    fn group_add(&self, name: &str) -> IdmResult<Group>;

    fn group_del(&self, name: &str) -> IdmResult<()>;

    fn lookup_group(&self, name: &str) -> IdmResult<Group>;

    /// Create a user whose primary group is `group_name`.
    fn user_add(&self, name: &str, group_name: &str) -> IdmResult<User>;

    fn user_del(&self, name: &str) -> IdmResult<()>;

    fn lookup_user(&self, name: &str) -> IdmResult<User>;
}

/// The filesystem surface the conformance suite drives.
///
/// A handle is bound to one identity for its whole life; [`Vfs::with_user`]
/// derives a sibling handle acting as another user over the same tree.
pub trait Vfs: Send + Sync {
    /// Short backend name used in diagnostics.
    fn name(&self) -> &str;

    /// Operating system whose semantics this backend reproduces.
    fn os_type(&self) -> OsType;

    fn features(&self) -> Features;

    /// Identity every operation on this handle runs as.
    fn user(&self) -> &User;

    /// A handle over the same tree acting as `user`.
    fn with_user(&self, user: &User) -> VfsResult<Arc<dyn Vfs>>;

    /// Identity manager, when the backend has one.
    fn idm(&self) -> Option<Arc<dyn IdentityMgr>>;

    /// Directory under which scratch trees may be created.
    fn temp_dir(&self) -> PathBuf;

    fn mkdir(&self, path: &Path, mode: u32) -> VfsResult<()>;

    /// Create `path` and any missing parents; existing directories are not an error.
    fn mkdir_all(&self, path: &Path, mode: u32) -> VfsResult<()>;

    /// Create (or truncate) a regular file. With `exclusive`, fail if it exists.
    fn create_file(&self, path: &Path, mode: u32, exclusive: bool) -> VfsResult<()>;

    fn write_file(&self, path: &Path, data: &[u8], mode: u32) -> VfsResult<()>;

    fn read_file(&self, path: &Path) -> VfsResult<Vec<u8>>;

    /// Sorted entry names of a directory.
    fn read_dir(&self, path: &Path) -> VfsResult<Vec<String>>;

    fn stat(&self, path: &Path) -> VfsResult<FileInfo>;

    fn lstat(&self, path: &Path) -> VfsResult<FileInfo>;

    /// Remove a file or an empty directory.
    fn remove(&self, path: &Path) -> VfsResult<()>;

    /// Remove `path` and everything below it; a missing path is not an error.
    fn remove_all(&self, path: &Path) -> VfsResult<()>;

    fn rename(&self, old: &Path, new: &Path) -> VfsResult<()>;

    fn symlink(&self, old: &Path, new: &Path) -> VfsResult<()>;

    fn chmod(&self, path: &Path, mode: u32) -> VfsResult<()>;

    fn chown(&self, path: &Path, uid: u32, gid: u32) -> VfsResult<()>;
}

/// Generate a unique name for scratch resources.
/// Unique across threads and processes sharing a temp directory.
pub fn generate_unique_id() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::{SystemTime, UNIX_EPOCH};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let counter = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{}_{}_{}", std::process::id(), timestamp, counter)
}
