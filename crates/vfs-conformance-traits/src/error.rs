//! Canonical error shapes returned by filesystem backends.

use std::io;
use std::path::{Path, PathBuf};

/// Underlying error code of a failed filesystem operation.
///
/// The same logical failure carries a different code on POSIX and Windows
/// backends, so both vocabularies live side by side. The `Display` text is the
/// message the host OS prints and is what baselines record.
#[derive(Clone, Debug, PartialEq, Eq, Hash, thiserror::Error)]
#[allow(non_camel_case_types, clippy::upper_case_acronyms)]
pub enum ErrorCode {
    #[error("permission denied")]
    EACCES,
    #[error("operation not permitted")]
    EPERM,
    #[error("no such file or directory")]
    ENOENT,
    #[error("file exists")]
    EEXIST,
    #[error("not a directory")]
    ENOTDIR,
    #[error("is a directory")]
    EISDIR,
    #[error("directory not empty")]
    ENOTEMPTY,
    #[error("invalid argument")]
    EINVAL,
    #[error("read-only file system")]
    EROFS,
    #[error("invalid cross-device link")]
    EXDEV,
    #[error("too many levels of symbolic links")]
    ELOOP,
    #[error("function not implemented")]
    ENOSYS,

    #[error("Access is denied.")]
    ERROR_ACCESS_DENIED,
    #[error("The system cannot find the file specified.")]
    ERROR_FILE_NOT_FOUND,
    #[error("The system cannot find the path specified.")]
    ERROR_PATH_NOT_FOUND,
    #[error("The file exists.")]
    ERROR_FILE_EXISTS,
    #[error("Cannot create a file when that file already exists.")]
    ERROR_ALREADY_EXISTS,
    #[error("The directory is not empty.")]
    ERROR_DIR_NOT_EMPTY,
    #[error("The filename, directory name, or volume label syntax is incorrect.")]
    ERROR_INVALID_NAME,
    #[error("A required privilege is not held by the client.")]
    ERROR_PRIVILEGE_NOT_HELD,
    #[error("The request is not supported.")]
    ERROR_NOT_SUPPORTED,

    #[error("errno {0}")]
    Other(i32),
}

impl ErrorCode {
    /// Map a host I/O error onto a canonical code.
    pub fn from_io(err: &io::Error) -> Self {
        if let Some(raw) = err.raw_os_error() {
            return Self::from_raw_os_error(raw);
        }

        match err.kind() {
            io::ErrorKind::NotFound => Self::ENOENT,
            io::ErrorKind::PermissionDenied => Self::EACCES,
            io::ErrorKind::AlreadyExists => Self::EEXIST,
            io::ErrorKind::InvalidInput => Self::EINVAL,
            io::ErrorKind::Unsupported => Self::ENOSYS,
            _ => Self::Other(-1),
        }
    }

    #[cfg(unix)]
    fn from_raw_os_error(raw: i32) -> Self {
        use nix::errno::Errno;

        match Errno::from_raw(raw) {
            Errno::EACCES => Self::EACCES,
            Errno::EPERM => Self::EPERM,
            Errno::ENOENT => Self::ENOENT,
            Errno::EEXIST => Self::EEXIST,
            Errno::ENOTDIR => Self::ENOTDIR,
            Errno::EISDIR => Self::EISDIR,
            Errno::ENOTEMPTY => Self::ENOTEMPTY,
            Errno::EINVAL => Self::EINVAL,
            Errno::EROFS => Self::EROFS,
            Errno::EXDEV => Self::EXDEV,
            Errno::ELOOP => Self::ELOOP,
            Errno::ENOSYS => Self::ENOSYS,
            _ => Self::Other(raw),
        }
    }

    #[cfg(windows)]
    fn from_raw_os_error(raw: i32) -> Self {
        match raw {
            2 => Self::ERROR_FILE_NOT_FOUND,
            3 => Self::ERROR_PATH_NOT_FOUND,
            5 => Self::ERROR_ACCESS_DENIED,
            50 => Self::ERROR_NOT_SUPPORTED,
            80 => Self::ERROR_FILE_EXISTS,
            123 => Self::ERROR_INVALID_NAME,
            145 => Self::ERROR_DIR_NOT_EMPTY,
            183 => Self::ERROR_ALREADY_EXISTS,
            1314 => Self::ERROR_PRIVILEGE_NOT_HELD,
            _ => Self::Other(raw),
        }
    }

    #[cfg(not(any(unix, windows)))]
    fn from_raw_os_error(raw: i32) -> Self {
        Self::Other(raw)
    }
}

/// Shape of a [`VfsError`], independent of its fields.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ErrorShape {
    PathError,
    LinkError,
    StringError,
}

/// Error returned by every [`crate::Vfs`] operation.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum VfsError {
    /// Failure of a single-path operation (mkdir, open, chmod, ...).
    #[error("{op} {}: {code}", .path.display())]
    Path {
        op: String,
        path: PathBuf,
        code: ErrorCode,
    },

    /// Failure of a two-path operation (rename, symlink, link).
    #[error("{op} {} {}: {code}", .old.display(), .new.display())]
    Link {
        op: String,
        old: PathBuf,
        new: PathBuf,
        code: ErrorCode,
    },

    /// Untyped error carrying only a message.
    #[error("{0}")]
    Other(String),
}

impl VfsError {
    pub fn path<S: Into<String>, P: AsRef<Path>>(op: S, path: P, code: ErrorCode) -> Self {
        Self::Path {
            op: op.into(),
            path: path.as_ref().to_path_buf(),
            code,
        }
    }

    pub fn link<S: Into<String>, P: AsRef<Path>, Q: AsRef<Path>>(
        op: S,
        old: P,
        new: Q,
        code: ErrorCode,
    ) -> Self {
        Self::Link {
            op: op.into(),
            old: old.as_ref().to_path_buf(),
            new: new.as_ref().to_path_buf(),
            code,
        }
    }

    pub fn other<S: Into<String>>(message: S) -> Self {
        Self::Other(message.into())
    }

    /// Wrap a host I/O error as a path error.
    pub fn from_io<S: Into<String>, P: AsRef<Path>>(op: S, path: P, err: &io::Error) -> Self {
        Self::path(op, path, ErrorCode::from_io(err))
    }

    /// Wrap a host I/O error as a link error.
    pub fn from_io_link<S: Into<String>, P: AsRef<Path>, Q: AsRef<Path>>(
        op: S,
        old: P,
        new: Q,
        err: &io::Error,
    ) -> Self {
        Self::link(op, old, new, ErrorCode::from_io(err))
    }

    pub fn shape(&self) -> ErrorShape {
        match self {
            Self::Path { .. } => ErrorShape::PathError,
            Self::Link { .. } => ErrorShape::LinkError,
            Self::Other(_) => ErrorShape::StringError,
        }
    }

    pub fn op(&self) -> Option<&str> {
        match self {
            Self::Path { op, .. } | Self::Link { op, .. } => Some(op),
            Self::Other(_) => None,
        }
    }

    pub fn code(&self) -> Option<&ErrorCode> {
        match self {
            Self::Path { code, .. } | Self::Link { code, .. } => Some(code),
            Self::Other(_) => None,
        }
    }

    /// Text of the underlying error, without operation or path.
    pub fn cause(&self) -> String {
        match self {
            Self::Path { code, .. } | Self::Link { code, .. } => code.to_string(),
            Self::Other(message) => message.clone(),
        }
    }
}

/// Result type for filesystem operations.
pub type VfsResult<T> = std::result::Result<T, VfsError>;

/// Errors reported by an identity manager.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum IdmError {
    #[error("user: user {0} already exists")]
    UserExists(String),
    #[error("group: group {0} already exists")]
    GroupExists(String),
    #[error("user: unknown user {0}")]
    UnknownUser(String),
    #[error("group: unknown group {0}")]
    UnknownGroup(String),
    #[error("permission denied")]
    PermissionDenied,
    #[error("identity manager is read only")]
    ReadOnly,
}

/// Result type for identity-manager operations.
pub type IdmResult<T> = std::result::Result<T, IdmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_error_display() {
        let err = VfsError::path("mkdir", "/tmp/a", ErrorCode::EACCES);
        assert_eq!(err.to_string(), "mkdir /tmp/a: permission denied");
        assert_eq!(err.shape(), ErrorShape::PathError);
        assert_eq!(err.op(), Some("mkdir"));
    }

    #[test]
    fn test_link_error_display() {
        let err = VfsError::link("rename", "/a", "/b", ErrorCode::ERROR_ACCESS_DENIED);
        assert_eq!(err.to_string(), "rename /a /b: Access is denied.");
        assert_eq!(err.code(), Some(&ErrorCode::ERROR_ACCESS_DENIED));
    }

    #[test]
    fn test_string_error_has_no_code() {
        let err = VfsError::other("boom");
        assert_eq!(err.shape(), ErrorShape::StringError);
        assert_eq!(err.code(), None);
        assert_eq!(err.cause(), "boom");
    }

    #[cfg(unix)]
    #[test]
    fn test_from_io_maps_errno() {
        let err = io::Error::from_raw_os_error(nix::errno::Errno::ENOTEMPTY as i32);
        assert_eq!(ErrorCode::from_io(&err), ErrorCode::ENOTEMPTY);

        let err = io::Error::new(io::ErrorKind::NotFound, "gone");
        assert_eq!(ErrorCode::from_io(&err), ErrorCode::ENOENT);
    }
}
