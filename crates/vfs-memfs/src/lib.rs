//! Memory-backed filesystem for the VFS conformance suite.
//!
//! Reproduces POSIX ownership and permission-bit checks (or the Windows
//! read-only attribute model) over an in-process tree, with its own identity
//! manager so handles can act as arbitrary users without touching the host.

pub mod config;
pub mod idm;
pub mod vfs;

pub use config::MemFsConfig;
pub use idm::MemIdm;
pub use vfs::MemFs;
