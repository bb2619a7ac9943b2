//! Configuration types for the memory filesystem

use serde::{Deserialize, Serialize};
use vfs_conformance_traits::OsType;

/// Main memory filesystem configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MemFsConfig {
    /// Operating system whose permission model and error codes are reproduced
    pub os_type: OsType,
    /// Bits cleared from the mode of newly created files and directories
    pub umask: u32,
    pub enable_symlinks: bool,
    /// Reject user and group creation
    pub read_only_idm: bool,
}

impl Default for MemFsConfig {
    fn default() -> Self {
        Self {
            os_type: OsType::Linux,
            umask: 0o022,
            enable_symlinks: true,
            read_only_idm: false,
        }
    }
}

impl MemFsConfig {
    /// Configuration emulating Windows semantics.
    pub fn windows() -> Self {
        Self {
            os_type: OsType::Windows,
            enable_symlinks: false,
            ..Self::default()
        }
    }
}
