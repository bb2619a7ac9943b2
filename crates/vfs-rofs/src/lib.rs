//! Read-only view over another backend.
//!
//! Reads pass through; every mutating call fails with "operation not
//! permitted" (or "Access is denied." on Windows) without reaching the base.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use vfs_conformance_traits::{
    ErrorCode, Features, FileInfo, IdentityMgr, OsType, User, Vfs, VfsError, VfsResult,
};

/// Read-only wrapper.
#[derive(Clone)]
pub struct RoFs {
    base: Arc<dyn Vfs>,
}

impl RoFs {
    pub fn new(base: Arc<dyn Vfs>) -> Self {
        Self { base }
    }

    fn denied_code(&self) -> ErrorCode {
        match self.base.os_type() {
            OsType::Windows => ErrorCode::ERROR_ACCESS_DENIED,
            _ => ErrorCode::EPERM,
        }
    }

    fn denied(&self, op: &str, path: &Path) -> VfsError {
        VfsError::path(op, path, self.denied_code())
    }

    fn denied_link(&self, op: &str, old: &Path, new: &Path) -> VfsError {
        VfsError::link(op, old, new, self.denied_code())
    }
}

impl Vfs for RoFs {
    fn name(&self) -> &str {
        "rofs"
    }

    fn os_type(&self) -> OsType {
        self.base.os_type()
    }

    fn features(&self) -> Features {
        Features {
            read_only: true,
            read_only_idm: true,
            chown: false,
            ..self.base.features()
        }
    }

    fn user(&self) -> &User {
        self.base.user()
    }

    fn with_user(&self, user: &User) -> VfsResult<Arc<dyn Vfs>> {
        let base = self.base.with_user(user)?;
        Ok(Arc::new(Self::new(base)))
    }

    fn idm(&self) -> Option<Arc<dyn IdentityMgr>> {
        self.base.idm()
    }

    fn temp_dir(&self) -> PathBuf {
        self.base.temp_dir()
    }

    fn mkdir(&self, path: &Path, _mode: u32) -> VfsResult<()> {
        Err(self.denied("mkdir", path))
    }

    fn mkdir_all(&self, path: &Path, _mode: u32) -> VfsResult<()> {
        Err(self.denied("mkdir", path))
    }

    fn create_file(&self, path: &Path, _mode: u32, _exclusive: bool) -> VfsResult<()> {
        Err(self.denied("open", path))
    }

    fn write_file(&self, path: &Path, _data: &[u8], _mode: u32) -> VfsResult<()> {
        Err(self.denied("open", path))
    }

    fn read_file(&self, path: &Path) -> VfsResult<Vec<u8>> {
        self.base.read_file(path)
    }

    fn read_dir(&self, path: &Path) -> VfsResult<Vec<String>> {
        self.base.read_dir(path)
    }

    fn stat(&self, path: &Path) -> VfsResult<FileInfo> {
        self.base.stat(path)
    }

    fn lstat(&self, path: &Path) -> VfsResult<FileInfo> {
        self.base.lstat(path)
    }

    fn remove(&self, path: &Path) -> VfsResult<()> {
        Err(self.denied("remove", path))
    }

    fn remove_all(&self, path: &Path) -> VfsResult<()> {
        Err(self.denied("unlinkat", path))
    }

    fn rename(&self, old: &Path, new: &Path) -> VfsResult<()> {
        Err(self.denied_link("rename", old, new))
    }

    fn symlink(&self, old: &Path, new: &Path) -> VfsResult<()> {
        Err(self.denied_link("symlink", old, new))
    }

    fn chmod(&self, path: &Path, _mode: u32) -> VfsResult<()> {
        Err(self.denied("chmod", path))
    }

    fn chown(&self, path: &Path, _uid: u32, _gid: u32) -> VfsResult<()> {
        Err(self.denied("chown", path))
    }
}
