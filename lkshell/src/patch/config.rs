/*
 * SPDX-FileCopyrightText: 2026 lkshell contributors
 * SPDX-License-Identifier: GPL-3.0-only
 */

use std::{
    collections::BTreeSet,
    fmt, fs, io,
    path::{Path, PathBuf},
    str::FromStr,
};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::util;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid log level: {0:?} (valid levels: DEBUG, INFO, WARNING, ERROR, CRITICAL)")]
    InvalidLogLevel(String),
    #[error("Configuration file not found: {0:?}")]
    NotFound(PathBuf),
    #[error("Failed to read configuration: {0:?}")]
    Read(PathBuf, #[source] io::Error),
    #[error("Invalid JSON in configuration: {0:?}")]
    Parse(PathBuf, #[source] serde_json::Error),
    #[error("Failed to save configuration: {0:?}")]
    Write(PathBuf, #[source] io::Error),
}

type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    pub const ALL: [Self; 5] = [
        Self::Debug,
        Self::Info,
        Self::Warning,
        Self::Error,
        Self::Critical,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|l| l.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::InvalidLogLevel(s.to_owned()))
    }
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Info => Self::INFO,
            LogLevel::Warning => Self::WARN,
            LogLevel::Error | LogLevel::Critical => Self::ERROR,
        }
    }
}

impl Serialize for LogLevel {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for LogLevel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Settings that control which patches are applied and how the output is
/// produced. Every field is optional in the JSON representation.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PatcherConfig {
    pub log_level: LogLevel,
    /// Copy the input image to [`Self::backup_dir`] before patching.
    pub backup: bool,
    pub backup_dir: Option<PathBuf>,
    /// Reject patch definitions that aren't valid hex.
    pub verify_patch: bool,
    /// Don't fail if none of the needles were found.
    pub allow_incomplete: bool,
    pub dry_run: bool,
    /// Categories to apply. Empty means all categories.
    pub patch_categories: BTreeSet<String>,
    pub exclude_categories: BTreeSet<String>,
}

impl Default for PatcherConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            backup: false,
            backup_dir: None,
            verify_patch: true,
            allow_incomplete: true,
            dry_run: false,
            patch_categories: BTreeSet::new(),
            exclude_categories: BTreeSet::new(),
        }
    }
}

impl PatcherConfig {
    /// The configuration the interactive shell writes to `config.json`.
    pub fn project_defaults() -> Self {
        Self {
            backup: true,
            backup_dir: Some(PathBuf::from("./backups")),
            patch_categories: ["fastboot", "dm_verity"]
                .into_iter()
                .map(str::to_owned)
                .collect(),
            ..Default::default()
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let data = match fs::read(path) {
            Ok(d) => d,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::NotFound(path.to_owned()));
            }
            Err(e) => return Err(Error::Read(path.to_owned(), e)),
        };

        serde_json::from_slice(&data).map_err(|e| Error::Parse(path.to_owned(), e))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = util::to_json_pretty(self).map_err(|e| Error::Write(path.to_owned(), e))?;
        fs::write(path, data).map_err(|e| Error::Write(path.to_owned(), e))
    }

    /// Whether patches in `category` should be applied. Exclusions take
    /// precedence over inclusions.
    pub fn should_apply_category(&self, category: &str) -> bool {
        if self.exclude_categories.contains(category) {
            return false;
        }

        self.patch_categories.is_empty() || self.patch_categories.contains(category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn log_level_case_insensitive() {
        assert_eq!("debug".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert_eq!("Warning".parse::<LogLevel>().unwrap(), LogLevel::Warning);
        assert!("verbose".parse::<LogLevel>().is_err());
    }

    #[test]
    fn missing_fields_use_defaults() {
        let config: PatcherConfig = serde_json::from_str(r#"{"dry_run": true}"#).unwrap();
        assert_eq!(
            config,
            PatcherConfig {
                dry_run: true,
                ..Default::default()
            },
        );
    }

    #[test]
    fn all_fields_are_read() {
        let config: PatcherConfig = serde_json::from_str(
            r#"{
                "log_level": "error",
                "backup": true,
                "backup_dir": "./backups",
                "verify_patch": false,
                "allow_incomplete": false,
                "dry_run": true,
                "patch_categories": ["fastboot"],
                "exclude_categories": ["red_state"]
            }"#,
        )
        .unwrap();

        assert_eq!(config.log_level, LogLevel::Error);
        assert!(config.backup);
        assert_eq!(config.backup_dir, Some(PathBuf::from("./backups")));
        assert!(!config.verify_patch);
        assert!(!config.allow_incomplete);
        assert!(config.dry_run);
        assert_eq!(config.patch_categories, set(&["fastboot"]));
        assert_eq!(config.exclude_categories, set(&["red_state"]));
    }

    #[test]
    fn category_filtering() {
        let mut config = PatcherConfig::default();
        assert!(config.should_apply_category("fastboot"));

        config.patch_categories = set(&["fastboot", "dm_verity"]);
        assert!(config.should_apply_category("fastboot"));
        assert!(!config.should_apply_category("red_state"));

        config.exclude_categories = set(&["fastboot"]);
        assert!(!config.should_apply_category("fastboot"));
        assert!(config.should_apply_category("dm_verity"));
    }
}
