//! Chainable assertions over a captured filesystem error.
//!
//! Every step may be scoped to a set of operating systems; a step whose scope
//! excludes the current OS does nothing. After the first failing step the rest
//! of the chain is skipped so one bad result yields one report.
//!
//! ```ignore
//! let err = vfs.mkdir(&path, 0o755).err();
//! ErrorAssert::new(reporter, "perm/mkdir", vfs.os_type(), err.as_ref())
//!     .path_error()
//!     .op("mkdir")
//!     .path(&path)
//!     .code_on(ErrorCode::EACCES, POSIX)
//!     .code_on(ErrorCode::ERROR_ACCESS_DENIED, &[OsType::Windows]);
//! ```

use std::path::Path;

use vfs_conformance_traits::{ErrorCode, ErrorShape, OsType, VfsError, VfsResult};

use crate::report::Reporter;

/// Every supported operating system.
pub const ALL_OS: &[OsType] = &[OsType::Linux, OsType::Darwin, OsType::Windows];

/// POSIX-flavoured operating systems.
pub const POSIX: &[OsType] = &[OsType::Linux, OsType::Darwin];

pub struct ErrorAssert<'a> {
    reporter: &'a dyn Reporter,
    case: String,
    os: OsType,
    err: Option<&'a VfsError>,
    failed: bool,
    ignore_op: bool,
    ignore_path: bool,
}

impl<'a> ErrorAssert<'a> {
    /// Start a chain over `err` (None means the operation succeeded).
    pub fn new<C: Into<String>>(
        reporter: &'a dyn Reporter,
        case: C,
        os: OsType,
        err: Option<&'a VfsError>,
    ) -> Self {
        Self {
            reporter,
            case: case.into(),
            os,
            err,
            failed: false,
            ignore_op: false,
            ignore_path: false,
        }
    }

    /// Start a chain over the error side of `result`.
    pub fn for_result<C: Into<String>, T>(
        reporter: &'a dyn Reporter,
        case: C,
        os: OsType,
        result: &'a VfsResult<T>,
    ) -> Self {
        Self::new(reporter, case, os, result.as_ref().err())
    }

    /// Skip later operation-name checks.
    pub fn ignore_op(mut self, ignore: bool) -> Self {
        self.ignore_op = ignore;
        self
    }

    /// Skip later path-field checks.
    pub fn ignore_path(mut self, ignore: bool) -> Self {
        self.ignore_path = ignore;
        self
    }

    /// True once any step of the chain has failed.
    pub fn failed(&self) -> bool {
        self.failed
    }

    fn applies(&self, scope: &[OsType]) -> bool {
        !self.failed && scope.contains(&self.os)
    }

    fn fail(mut self, message: String) -> Self {
        let observed = match self.err {
            Some(err) => format!("{:?} {err}", err.shape()),
            None => "no error".to_string(),
        };
        self.reporter
            .fail(&self.case, &format!("{message} (observed: {observed})"));
        self.failed = true;
        self
    }

    fn require_error(self, what: &str) -> Result<(&'a VfsError, Self), Self> {
        match self.err {
            Some(err) => Ok((err, self)),
            None => Err(self.fail(format!("want {what}, got no error"))),
        }
    }

    /// The operation must have succeeded.
    pub fn no_error(self) -> Self {
        if !self.applies(ALL_OS) {
            return self;
        }
        match self.err {
            None => self,
            Some(_) => self.fail("want no error".to_string()),
        }
    }

    /// The error must have the given shape.
    pub fn shape(self, want: ErrorShape) -> Self {
        if !self.applies(ALL_OS) {
            return self;
        }
        match self.require_error(&format!("{want:?}")) {
            Ok((err, this)) if err.shape() == want => this,
            Ok((err, this)) => this.fail(format!("want {want:?}, got {:?}", err.shape())),
            Err(this) => this,
        }
    }

    pub fn path_error(self) -> Self {
        self.shape(ErrorShape::PathError)
    }

    pub fn link_error(self) -> Self {
        self.shape(ErrorShape::LinkError)
    }

    pub fn string_error(self) -> Self {
        self.shape(ErrorShape::StringError)
    }

    pub fn op(self, op: &str) -> Self {
        self.op_on(op, ALL_OS)
    }

    /// Check the operation name, only on the listed systems.
    pub fn op_on(self, op: &str, scope: &[OsType]) -> Self {
        if !self.applies(scope) || self.ignore_op {
            return self;
        }
        match self.require_error(&format!("op {op:?}")) {
            Ok((err, this)) => match err.op() {
                Some(got) if got == op => this,
                got => this.fail(format!("want op {op:?}, got {got:?}")),
            },
            Err(this) => this,
        }
    }

    pub fn path<P: AsRef<Path>>(self, path: P) -> Self {
        self.path_on(path, ALL_OS)
    }

    /// Check the path of a single-path error.
    pub fn path_on<P: AsRef<Path>>(self, path: P, scope: &[OsType]) -> Self {
        let want = path.as_ref();
        self.check_path("path", want, scope, |err| match err {
            VfsError::Path { path, .. } => Some(path),
            _ => None,
        })
    }

    pub fn old_path<P: AsRef<Path>>(self, path: P) -> Self {
        self.old_path_on(path, ALL_OS)
    }

    /// Check the source path of a link error, only on the listed systems.
    pub fn old_path_on<P: AsRef<Path>>(self, path: P, scope: &[OsType]) -> Self {
        self.check_path("old path", path.as_ref(), scope, |err| match err {
            VfsError::Link { old, .. } => Some(old),
            _ => None,
        })
    }

    pub fn new_path<P: AsRef<Path>>(self, path: P) -> Self {
        self.new_path_on(path, ALL_OS)
    }

    pub fn new_path_on<P: AsRef<Path>>(self, path: P, scope: &[OsType]) -> Self {
        self.check_path("new path", path.as_ref(), scope, |err| match err {
            VfsError::Link { new, .. } => Some(new),
            _ => None,
        })
    }

    fn check_path<F>(self, field: &str, want: &Path, scope: &[OsType], get: F) -> Self
    where
        F: Fn(&VfsError) -> Option<&std::path::PathBuf>,
    {
        if !self.applies(scope) || self.ignore_path {
            return self;
        }
        match self.require_error(&format!("{field} {}", want.display())) {
            Ok((err, this)) => match get(err) {
                Some(got) if got == want => this,
                Some(got) => this.fail(format!(
                    "want {field} {}, got {}",
                    want.display(),
                    got.display()
                )),
                None => this.fail(format!("want {field} {}, error has none", want.display())),
            },
            Err(this) => this,
        }
    }

    pub fn code(self, code: ErrorCode) -> Self {
        self.code_on(code, ALL_OS)
    }

    /// Check the underlying error code, only on the listed systems.
    pub fn code_on(self, code: ErrorCode, scope: &[OsType]) -> Self {
        if !self.applies(scope) {
            return self;
        }
        match self.require_error(&format!("code {code:?}")) {
            Ok((err, this)) => match err.code() {
                Some(got) if *got == code => this,
                got => this.fail(format!("want code {code:?}, got {got:?}")),
            },
            Err(this) => this,
        }
    }

    /// Check the text of the underlying error.
    pub fn cause(self, text: &str) -> Self {
        if !self.applies(ALL_OS) {
            return self;
        }
        match self.require_error(&format!("error {text:?}")) {
            Ok((err, this)) => {
                let got = err.cause();
                if got == text {
                    this
                } else {
                    this.fail(format!("want error {text:?}, got {got:?}"))
                }
            }
            Err(this) => this,
        }
    }
}
