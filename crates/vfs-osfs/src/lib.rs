//! Host filesystem backend: every operation goes straight to `std::fs`.
//!
//! A handle acts as the process's effective user. On Linux a root process can
//! also derive handles acting as other users: each of their operations runs
//! under that user's filesystem uid and gid on the calling thread. That makes
//! a root run on Linux the reference run that records permission baselines.

#![cfg(unix)]

pub mod identity;
pub mod idm;

use std::fs::{self, DirBuilder, OpenOptions, Permissions};
use std::io::{self, Write};
use std::os::unix::fs::{DirBuilderExt, MetadataExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use nix::unistd::{self, Gid, Uid};
use tracing::debug;
use vfs_conformance_traits::{
    Features, FileInfo, IdentityMgr, OsType, User, Vfs, VfsError, VfsResult,
};

pub use identity::FsIdentity;
pub use idm::OsIdm;

/// Filesystem backed by the host operating system.
#[derive(Clone, Debug)]
pub struct OsFs {
    user: User,
    process: User,
    temp_dir: PathBuf,
    idm: Arc<OsIdm>,
}

impl OsFs {
    /// Backend acting as the effective user, rooted at the system temp directory.
    pub fn new() -> Self {
        Self::with_temp_dir(std::env::temp_dir())
    }

    /// Backend whose scratch trees live under `temp_dir`.
    pub fn with_temp_dir<P: Into<PathBuf>>(temp_dir: P) -> Self {
        let uid = unistd::geteuid();
        let gid = unistd::getegid();
        let name = unistd::User::from_uid(uid)
            .ok()
            .flatten()
            .map_or_else(|| uid.to_string(), |u| u.name);

        let process = User::new(name, uid.as_raw(), gid.as_raw());
        let switching = process.is_admin() && identity::supported();

        Self {
            user: process.clone(),
            process,
            temp_dir: temp_dir.into(),
            idm: Arc::new(OsIdm::new(!switching)),
        }
    }

    /// The identity manager shared by every handle derived from this one.
    pub fn os_idm(&self) -> Arc<OsIdm> {
        self.idm.clone()
    }

    fn can_switch(&self) -> bool {
        !self.idm.is_read_only()
    }

    /// Run `op` under this handle's identity.
    fn as_user<T>(&self, op: impl FnOnce() -> VfsResult<T>) -> VfsResult<T> {
        let _identity = if self.user == self.process {
            None
        } else {
            Some(FsIdentity::assume(&self.user)?)
        };
        op()
    }

    fn file_info(path: &Path, meta: &fs::Metadata) -> FileInfo {
        FileInfo {
            name: path
                .file_name()
                .map_or_else(|| "/".to_string(), |n| n.to_string_lossy().into_owned()),
            size: meta.len(),
            mode: meta.mode() & 0o777,
            is_dir: meta.is_dir(),
            is_symlink: meta.file_type().is_symlink(),
            uid: meta.uid(),
            gid: meta.gid(),
        }
    }

    fn open_for_write(path: &Path, mode: u32, exclusive: bool) -> io::Result<fs::File> {
        let mut options = OpenOptions::new();
        options.write(true).mode(mode);
        if exclusive {
            options.create_new(true);
        } else {
            options.create(true).truncate(true);
        }
        options.open(path)
    }
}

impl Default for OsFs {
    fn default() -> Self {
        Self::new()
    }
}

impl Vfs for OsFs {
    fn name(&self) -> &str {
        "osfs"
    }

    fn os_type(&self) -> OsType {
        OsType::current()
    }

    fn features(&self) -> Features {
        Features {
            symlink: true,
            identity_mgr: self.can_switch(),
            read_only_idm: self.idm.is_read_only(),
            read_only: false,
            real_fs: true,
            chown: self.user.is_admin(),
        }
    }

    fn user(&self) -> &User {
        &self.user
    }

    fn with_user(&self, user: &User) -> VfsResult<Arc<dyn Vfs>> {
        let user = if user.uid == self.process.uid && user.gid == self.process.gid {
            self.process.clone()
        } else if self.can_switch() {
            user.clone()
        } else {
            return Err(VfsError::other(format!(
                "osfs: cannot act as user {}: identity switching needs root on Linux",
                user.name
            )));
        };
        Ok(Arc::new(Self {
            user,
            ..self.clone()
        }))
    }

    fn idm(&self) -> Option<Arc<dyn IdentityMgr>> {
        let idm: Arc<dyn IdentityMgr> = self.idm.clone();
        Some(idm)
    }

    fn temp_dir(&self) -> PathBuf {
        self.temp_dir.clone()
    }

    fn mkdir(&self, path: &Path, mode: u32) -> VfsResult<()> {
        self.as_user(|| {
            DirBuilder::new()
                .mode(mode)
                .create(path)
                .map_err(|e| VfsError::from_io("mkdir", path, &e))
        })
    }

    fn mkdir_all(&self, path: &Path, mode: u32) -> VfsResult<()> {
        self.as_user(|| {
            DirBuilder::new()
                .recursive(true)
                .mode(mode)
                .create(path)
                .map_err(|e| VfsError::from_io("mkdir", path, &e))
        })
    }

    fn create_file(&self, path: &Path, mode: u32, exclusive: bool) -> VfsResult<()> {
        self.as_user(|| {
            Self::open_for_write(path, mode, exclusive)
                .map(drop)
                .map_err(|e| VfsError::from_io("open", path, &e))
        })
    }

    fn write_file(&self, path: &Path, data: &[u8], mode: u32) -> VfsResult<()> {
        self.as_user(|| {
            let mut file = Self::open_for_write(path, mode, false)
                .map_err(|e| VfsError::from_io("open", path, &e))?;
            file.write_all(data)
                .map_err(|e| VfsError::from_io("write", path, &e))
        })
    }

    fn read_file(&self, path: &Path) -> VfsResult<Vec<u8>> {
        self.as_user(|| fs::read(path).map_err(|e| VfsError::from_io("open", path, &e)))
    }

    fn read_dir(&self, path: &Path) -> VfsResult<Vec<String>> {
        self.as_user(|| {
            let entries = fs::read_dir(path).map_err(|e| VfsError::from_io("open", path, &e))?;
            let mut names = Vec::new();
            for entry in entries {
                let entry = entry.map_err(|e| VfsError::from_io("readdirent", path, &e))?;
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
            names.sort();
            Ok(names)
        })
    }

    fn stat(&self, path: &Path) -> VfsResult<FileInfo> {
        self.as_user(|| {
            fs::metadata(path)
                .map(|meta| Self::file_info(path, &meta))
                .map_err(|e| VfsError::from_io("stat", path, &e))
        })
    }

    fn lstat(&self, path: &Path) -> VfsResult<FileInfo> {
        self.as_user(|| {
            fs::symlink_metadata(path)
                .map(|meta| Self::file_info(path, &meta))
                .map_err(|e| VfsError::from_io("lstat", path, &e))
        })
    }

    fn remove(&self, path: &Path) -> VfsResult<()> {
        self.as_user(|| {
            let meta =
                fs::symlink_metadata(path).map_err(|e| VfsError::from_io("remove", path, &e))?;
            let result = if meta.is_dir() {
                fs::remove_dir(path)
            } else {
                fs::remove_file(path)
            };
            result.map_err(|e| VfsError::from_io("remove", path, &e))
        })
    }

    fn remove_all(&self, path: &Path) -> VfsResult<()> {
        self.as_user(|| {
            let meta = match fs::symlink_metadata(path) {
                Ok(meta) => meta,
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
                Err(e) => return Err(VfsError::from_io("unlinkat", path, &e)),
            };
            let result = if meta.is_dir() {
                fs::remove_dir_all(path)
            } else {
                fs::remove_file(path)
            };
            match result {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!(path = %path.display(), "removed concurrently");
                    Ok(())
                }
                Err(e) => Err(VfsError::from_io("unlinkat", path, &e)),
            }
        })
    }

    fn rename(&self, old: &Path, new: &Path) -> VfsResult<()> {
        self.as_user(|| {
            fs::rename(old, new).map_err(|e| VfsError::from_io_link("rename", old, new, &e))
        })
    }

    fn symlink(&self, old: &Path, new: &Path) -> VfsResult<()> {
        self.as_user(|| {
            std::os::unix::fs::symlink(old, new)
                .map_err(|e| VfsError::from_io_link("symlink", old, new, &e))
        })
    }

    fn chmod(&self, path: &Path, mode: u32) -> VfsResult<()> {
        self.as_user(|| {
            fs::set_permissions(path, Permissions::from_mode(mode))
                .map_err(|e| VfsError::from_io("chmod", path, &e))
        })
    }

    fn chown(&self, path: &Path, uid: u32, gid: u32) -> VfsResult<()> {
        self.as_user(|| {
            unistd::chown(path, Some(Uid::from_raw(uid)), Some(Gid::from_raw(gid)))
                .map_err(|errno| VfsError::from_io("chown", path, &io::Error::from(errno)))
        })
    }
}
