//! Per-thread filesystem identity.
//!
//! Linux keeps a filesystem uid and gid per thread, separate from the
//! effective ids. A privileged process can point them at any user for the
//! duration of one operation and the kernel then checks permissions exactly as
//! it would for that user. Supplementary groups are not touched.

use std::sync::OnceLock;

use vfs_conformance_traits::{User, VfsError, VfsResult};

/// Id used to check that switching takes effect (`nobody` on most systems).
const PROBE_ID: u32 = 65534;

/// True when this process can switch its filesystem identity.
pub fn supported() -> bool {
    static SUPPORTED: OnceLock<bool> = OnceLock::new();
    *SUPPORTED.get_or_init(|| {
        let probe = User::new("probe", PROBE_ID, PROBE_ID);
        let ok = FsIdentity::assume(&probe).is_ok();
        tracing::debug!(supported = ok, "filesystem identity switching");
        ok
    })
}

#[cfg(target_os = "linux")]
mod imp {
    use nix::unistd::{setfsgid, setfsuid, Gid, Uid};

    use super::*;

    /// Filesystem identity of the current thread, restored on drop.
    #[derive(Debug)]
    pub struct FsIdentity {
        uid: Uid,
        gid: Gid,
    }

    impl FsIdentity {
        /// Act as `user` on this thread until the guard is dropped.
        pub fn assume(user: &User) -> VfsResult<Self> {
            let (uid, gid) = (Uid::from_raw(user.uid), Gid::from_raw(user.gid));
            let guard = Self {
                gid: setfsgid(gid),
                uid: setfsuid(uid),
            };

            // Both calls return the previous id even when they fail, so the
            // only way to tell is to ask again.
            if setfsgid(gid) != gid || setfsuid(uid) != uid {
                return Err(VfsError::other(format!(
                    "osfs: cannot act as user {} ({}:{})",
                    user.name, user.uid, user.gid
                )));
            }
            Ok(guard)
        }
    }

    impl Drop for FsIdentity {
        fn drop(&mut self) {
            setfsuid(self.uid);
            setfsgid(self.gid);
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod imp {
    use super::*;

    #[derive(Debug)]
    pub struct FsIdentity;

    impl FsIdentity {
        pub fn assume(user: &User) -> VfsResult<Self> {
            Err(VfsError::other(format!(
                "osfs: cannot act as user {}: identity switching needs Linux",
                user.name
            )))
        }
    }
}

pub use imp::FsIdentity;
