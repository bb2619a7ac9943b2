//! Recorded ground truth for permission cases.
//!
//! One JSON file per case, holding one record per (user, permission) pair.
//! The file's presence decides whether a run records or replays.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info};
use vfs_conformance_traits::{ErrorShape, OsType, VfsError};

use crate::error::{Result, SuiteError};
use crate::report::escape_name;

/// Expected outcome of one operation for one (user, permission) pair.
///
/// A record without `err_type` means the operation succeeded. Paths are
/// relative to the case directory so replays on another scratch root match.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpectedErrorRecord {
    pub user: String,
    pub perm: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err_type: Option<ErrorShape>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err_op: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err_old: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err_new: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err_err: Option<String>,
}

impl ExpectedErrorRecord {
    /// Classify a captured outcome, relativizing paths against `base`.
    pub fn capture(user: &str, perm: u32, err: Option<&VfsError>, base: &Path) -> Self {
        let mut record = Self {
            user: user.to_string(),
            perm,
            err_type: None,
            err_op: None,
            err_path: None,
            err_old: None,
            err_new: None,
            err_err: None,
        };

        match err {
            None => {}
            Some(VfsError::Path { op, path, code }) => {
                record.err_type = Some(ErrorShape::PathError);
                record.err_op = Some(op.clone());
                record.err_path = Some(relative_to(path, base));
                record.err_err = Some(code.to_string());
            }
            Some(VfsError::Link { op, old, new, code }) => {
                record.err_type = Some(ErrorShape::LinkError);
                record.err_op = Some(op.clone());
                record.err_old = Some(relative_to(old, base));
                record.err_new = Some(relative_to(new, base));
                record.err_err = Some(code.to_string());
            }
            Some(VfsError::Other(message)) => {
                record.err_type = Some(ErrorShape::StringError);
                record.err_err = Some(message.clone());
            }
        }
        record
    }

    pub fn key(&self) -> String {
        record_key(&self.user, self.perm)
    }

    pub fn is_success(&self) -> bool {
        self.err_type.is_none()
    }
}

/// Lookup key of the record for `user` under permission `perm`.
pub fn record_key(user: &str, perm: u32) -> String {
    format!("{user}/{perm:03o}")
}

fn relative_to(path: &Path, base: &Path) -> String {
    match path.strip_prefix(base) {
        Ok(rel) if rel.as_os_str().is_empty() => ".".to_string(),
        Ok(rel) => rel.to_string_lossy().replace('\\', "/"),
        Err(_) => path.to_string_lossy().into_owned(),
    }
}

/// Inverse of the relativization done by [`ExpectedErrorRecord::capture`].
pub fn resolve_from(base: &Path, recorded: &str) -> PathBuf {
    let path = Path::new(recorded);
    if recorded == "." {
        base.to_path_buf()
    } else if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// The records of one case, keyed by (user, permission).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Baseline {
    records: BTreeMap<String, ExpectedErrorRecord>,
}

impl Baseline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record. Returns false, keeping the existing one, if its key is taken.
    pub fn insert(&mut self, record: ExpectedErrorRecord) -> bool {
        let key = record.key();
        if self.records.contains_key(&key) {
            return false;
        }
        self.records.insert(key, record);
        true
    }

    pub fn get(&self, user: &str, perm: u32) -> Option<&ExpectedErrorRecord> {
        self.records.get(&record_key(user, perm))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = &ExpectedErrorRecord> {
        self.records.values()
    }

    /// Serialize as a JSON array ordered by key.
    pub fn to_json(&self) -> Result<String> {
        let records: Vec<&ExpectedErrorRecord> = self.records.values().collect();
        let mut text = serde_json::to_string_pretty(&records)?;
        text.push('\n');
        Ok(text)
    }

    /// Parse a baseline file's contents; duplicate keys are rejected.
    pub fn from_json(text: &str, origin: &Path) -> Result<Self> {
        let records: Vec<ExpectedErrorRecord> = serde_json::from_str(text)?;
        let mut baseline = Self::new();
        for record in records {
            let key = record.key();
            if !baseline.insert(record) {
                return Err(SuiteError::baseline(origin, format!("duplicate record {key}")));
            }
        }
        Ok(baseline)
    }
}

/// Directory of baseline files, one subdirectory per operating system.
#[derive(Clone, Debug)]
pub struct BaselineStore {
    root: PathBuf,
    os: OsType,
}

impl BaselineStore {
    pub fn new<P: Into<PathBuf>>(root: P, os: OsType) -> Self {
        Self {
            root: root.into(),
            os,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File holding the baseline of `case`.
    pub fn path_for(&self, case: &str) -> PathBuf {
        self.root
            .join(self.os.as_str())
            .join(format!("{}.json", escape_name(case)))
    }

    pub fn exists(&self, case: &str) -> bool {
        self.path_for(case).is_file()
    }

    /// Load the baseline of `case`; `None` when none has been recorded yet.
    pub fn load(&self, case: &str) -> Result<Option<Baseline>> {
        let path = self.path_for(case);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let baseline = Baseline::from_json(&text, &path).map_err(|e| match e {
            SuiteError::Json(err) => SuiteError::baseline(&path, err.to_string()),
            other => other,
        })?;
        debug!(case, path = %path.display(), records = baseline.len(), "loaded baseline");
        Ok(Some(baseline))
    }

    /// Replace the baseline of `case` in one rename, so readers never see a
    /// partially written file.
    pub fn save(&self, case: &str, baseline: &Baseline) -> Result<PathBuf> {
        let path = self.path_for(case);
        let dir = path
            .parent()
            .ok_or_else(|| SuiteError::baseline(&path, "baseline path has no parent"))?;
        fs::create_dir_all(dir)?;

        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(baseline.to_json()?.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| SuiteError::Io(e.error))?;

        info!(case, path = %path.display(), records = baseline.len(), "recorded baseline");
        Ok(path)
    }
}
