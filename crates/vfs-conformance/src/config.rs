//! Suite configuration

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SuiteError};

pub const ENV_MAX_RACE: &str = "VFS_CONFORMANCE_MAX_RACE";
pub const ENV_BASELINE_DIR: &str = "VFS_CONFORMANCE_BASELINE_DIR";
pub const ENV_BASELINE_POLICY: &str = "VFS_CONFORMANCE_BASELINE_POLICY";
pub const ENV_KEEP_SCRATCH: &str = "VFS_CONFORMANCE_KEEP_SCRATCH";

/// When a missing baseline may be established by the current run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselinePolicy {
    /// Record only from the reference run: a privileged setup handle driving a
    /// backend that reaches the real filesystem.
    #[default]
    RecordWhenPrivileged,
    /// Record whenever the baseline is absent, whatever the backend.
    RecordWhenAbsent,
    /// Never record; a missing baseline skips the case.
    ReplayOnly,
}

impl BaselinePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RecordWhenPrivileged => "record_when_privileged",
            Self::RecordWhenAbsent => "record_when_absent",
            Self::ReplayOnly => "replay_only",
        }
    }
}

impl FromStr for BaselinePolicy {
    type Err = SuiteError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "record_when_privileged" | "privileged" => Ok(Self::RecordWhenPrivileged),
            "record_when_absent" | "absent" => Ok(Self::RecordWhenAbsent),
            "replay_only" | "replay" => Ok(Self::ReplayOnly),
            other => Err(SuiteError::config(format!("unknown baseline policy: {other}"))),
        }
    }
}

/// Main suite configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuiteConfig {
    /// Concurrent launches per race operation
    pub max_race: usize,
    /// Root of the per-OS baseline directories
    pub baseline_dir: PathBuf,
    pub baseline_policy: BaselinePolicy,
    /// Name prefix of the scratch root created under the backend's temp dir
    pub scratch_prefix: String,
    /// Leave the scratch tree behind for inspection
    pub keep_scratch: bool,
    /// Mode of per-case working directories
    pub dir_mode: u32,
}

impl Default for SuiteConfig {
    fn default() -> Self {
        Self {
            max_race: 100,
            baseline_dir: PathBuf::from("testdata/baselines"),
            baseline_policy: BaselinePolicy::default(),
            scratch_prefix: "vfs-conformance".to_string(),
            keep_scratch: false,
            dir_mode: 0o777,
        }
    }
}

impl SuiteConfig {
    /// Load a configuration from a JSON file; missing fields take their defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `VFS_CONFORMANCE_*` environment overrides.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable source.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_MAX_RACE) {
            self.max_race = value
                .trim()
                .parse()
                .map_err(|e| SuiteError::config(format!("{ENV_MAX_RACE}={value}: {e}")))?;
        }
        if let Some(value) = lookup(ENV_BASELINE_DIR) {
            self.baseline_dir = PathBuf::from(value);
        }
        if let Some(value) = lookup(ENV_BASELINE_POLICY) {
            self.baseline_policy = value.parse()?;
        }
        if let Some(value) = lookup(ENV_KEEP_SCRATCH) {
            self.keep_scratch = matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }
        self.validate()?;
        Ok(self)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.max_race == 0 {
            return Err(SuiteError::config("max_race must be at least 1"));
        }
        if self.dir_mode & !0o777 != 0 {
            return Err(SuiteError::config(format!(
                "dir_mode {:o} has bits outside 0o777",
                self.dir_mode
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = SuiteConfig::default();
        assert_eq!(config.max_race, 100);
        assert_eq!(config.baseline_policy, BaselinePolicy::RecordWhenPrivileged);
        assert_eq!(config.dir_mode, 0o777);
        assert!(!config.keep_scratch);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: SuiteConfig =
            serde_json::from_str(r#"{"max_race": 8, "baseline_policy": "replay_only"}"#).unwrap();
        assert_eq!(config.max_race, 8);
        assert_eq!(config.baseline_policy, BaselinePolicy::ReplayOnly);
        assert_eq!(config.scratch_prefix, "vfs-conformance");
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            (ENV_MAX_RACE, "12"),
            (ENV_BASELINE_POLICY, "record-when-absent"),
            (ENV_KEEP_SCRATCH, "yes"),
        ]
        .into_iter()
        .collect();

        let config = SuiteConfig::default()
            .with_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.max_race, 12);
        assert_eq!(config.baseline_policy, BaselinePolicy::RecordWhenAbsent);
        assert!(config.keep_scratch);
    }

    #[test]
    fn test_invalid_overrides_rejected() {
        let bad_race = SuiteConfig::default().with_overrides(|key| {
            (key == ENV_MAX_RACE).then(|| "many".to_string())
        });
        assert!(matches!(bad_race, Err(SuiteError::Config { .. })));

        let zero = SuiteConfig::default().with_overrides(|key| {
            (key == ENV_MAX_RACE).then(|| "0".to_string())
        });
        assert!(zero.is_err());

        assert!("sometimes".parse::<BaselinePolicy>().is_err());
    }
}
