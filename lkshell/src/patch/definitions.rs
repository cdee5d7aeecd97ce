/*
 * SPDX-FileCopyrightText: 2026 lkshell contributors
 * SPDX-License-Identifier: GPL-3.0-only
 */

use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::{patch::config::PatcherConfig, util};

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to read patch file: {0:?}")]
    Read(PathBuf, #[source] io::Error),
    #[error("Invalid JSON in patch file: {0:?}")]
    Parse(PathBuf, #[source] serde_json::Error),
    #[error("Patch file must contain a JSON object: {0:?}")]
    NotAnObject(PathBuf),
    #[error("Unknown patch mode {1:?} in {0:?}")]
    UnknownMode(PathBuf, String),
    #[error("Invalid patch {needle} -> {replacement}: {reason}")]
    Validation {
        needle: String,
        replacement: String,
        reason: String,
    },
    #[error("Failed to write patch file: {0:?}")]
    Write(PathBuf, #[source] io::Error),
}

type Result<T> = std::result::Result<T, Error>;

/// Needle (hex) to replacement (hex).
pub type Category = BTreeMap<String, String>;

/// Category name to patches.
pub type PatchTable = BTreeMap<String, Category>;

/// How a patch file is combined with the built-in patches.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadMode {
    /// Merge the file's needles into the built-in categories.
    #[default]
    Update,
    /// Discard the built-in patches entirely.
    Replace,
}

/// On-disk representation of a patch file. Categories are stored as top-level
/// keys next to `mode`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct PatchFile {
    pub mode: LoadMode,
    #[serde(flatten)]
    pub categories: PatchTable,
}

impl PatchFile {
    /// The sample patch file the interactive shell writes to `patches.json`.
    pub fn project_defaults() -> Self {
        let categories = [
            ("fastboot", "2de9f04fadf5ac5d", "00207047"),
            ("dm_verity", "30b583b002ab0022", "00207047"),
        ]
        .into_iter()
        .map(|(c, n, r)| (c.to_owned(), Category::from([(n.to_owned(), r.to_owned())])))
        .collect();

        Self {
            mode: LoadMode::Update,
            categories,
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = util::to_json_pretty(self).map_err(|e| Error::Write(path.to_owned(), e))?;
        fs::write(path, data).map_err(|e| Error::Write(path.to_owned(), e))
    }
}

/// Patches that are always available unless a patch file uses
/// [`LoadMode::Replace`].
pub fn builtin_patches() -> PatchTable {
    const BUILTIN: &[(&str, &[(&str, &str)])] = &[
        // Force the function that checks the unlock bit to return 0.
        (
            "fastboot",
            &[
                ("2de9f04fadf5ac5d", "00207047"),
                ("f0b5adf5925d", "00207047"),
            ],
        ),
        // Force the vbmeta state check to return 0.
        ("dm_verity", &[("30b583b002ab0022", "00207047")]),
        // Force the LCS state check to return 0.
        (
            "orange_state",
            &[
                ("08b50a4b7b441b681b68022b", "00207047"),
                ("08b50e4b7b441b681b68022b", "00207047"),
            ],
        ),
        // Return early from the device verification warning.
        ("red_state", &[("f0b5002489b0", "00207047")]),
    ];

    BUILTIN
        .iter()
        .map(|(category, patches)| {
            let patches = patches
                .iter()
                .map(|(n, r)| ((*n).to_owned(), (*r).to_owned()))
                .collect();

            ((*category).to_owned(), patches)
        })
        .collect()
}

fn is_hex(s: &str) -> bool {
    !s.is_empty() && s.len() % 2 == 0 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Holds the set of known patches, organized by category.
#[derive(Clone, Debug)]
pub struct PatchManager {
    patches: PatchTable,
}

impl PatchManager {
    /// Start from the built-in patches and apply the patch file, if any. A
    /// missing patch file is not an error.
    pub fn new(patches_file: Option<&Path>, config: &PatcherConfig) -> Result<Self> {
        let mut manager = Self {
            patches: builtin_patches(),
        };

        if let Some(path) = patches_file {
            manager.load_patches(path)?;
        }

        if config.verify_patch {
            manager.validate()?;
        }

        info!(
            "Successfully loaded {} patches in {} categories",
            manager.patch_count(),
            manager.patches.len(),
        );

        Ok(manager)
    }

    pub fn load_patches(&mut self, path: &Path) -> Result<()> {
        let data = match fs::read(path) {
            Ok(d) => d,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!("Patch file not found: {path:?}");
                return Ok(());
            }
            Err(e) => return Err(Error::Read(path.to_owned(), e)),
        };

        let value: Value =
            serde_json::from_slice(&data).map_err(|e| Error::Parse(path.to_owned(), e))?;
        let Value::Object(mut object) = value else {
            return Err(Error::NotAnObject(path.to_owned()));
        };

        let mode = match object.remove("mode") {
            None => LoadMode::Update,
            Some(Value::String(s)) => match s.to_ascii_lowercase().as_str() {
                "update" => LoadMode::Update,
                "replace" => LoadMode::Replace,
                _ => return Err(Error::UnknownMode(path.to_owned(), s)),
            },
            Some(v) => return Err(Error::UnknownMode(path.to_owned(), v.to_string())),
        };

        if mode == LoadMode::Replace {
            self.patches.clear();
        }

        for (category, patches) in object {
            let Value::Object(patches) = patches else {
                warn!("Skipping invalid category {category:?}: patches must be an object");
                continue;
            };

            let target = self.patches.entry(category.clone()).or_default();

            for (needle, replacement) in patches {
                let Value::String(replacement) = replacement else {
                    warn!("Skipping needle {needle:?} in {category:?}: patch must be a string");
                    continue;
                };

                target.insert(needle, replacement);
            }
        }

        Ok(())
    }

    /// Ensure every needle and replacement is a non-empty hex string that
    /// decodes to whole bytes.
    pub fn validate(&self) -> Result<()> {
        for (category, patches) in &self.patches {
            for (needle, replacement) in patches {
                let reason = if !is_hex(needle) {
                    format!("Needle in category {category:?} is not a valid hex string")
                } else if !is_hex(replacement) {
                    format!("Patch in category {category:?} is not a valid hex string")
                } else {
                    continue;
                };

                return Err(Error::Validation {
                    needle: needle.clone(),
                    replacement: replacement.clone(),
                    reason,
                });
            }
        }

        Ok(())
    }

    pub fn patches(&self) -> &PatchTable {
        &self.patches
    }

    pub fn patch_count(&self) -> usize {
        self.patches.values().map(|p| p.len()).sum()
    }

    /// Get the categories that pass the configuration's include and exclude
    /// filters.
    pub fn applicable_patches(&self, config: &PatcherConfig) -> PatchTable {
        self.patches
            .iter()
            .filter(|(category, _)| config.should_apply_category(category))
            .map(|(category, patches)| (category.clone(), patches.clone()))
            .collect()
    }

    pub fn export_patches(&self, path: &Path) -> Result<()> {
        let data =
            util::to_json_pretty(&self.patches).map_err(|e| Error::Write(path.to_owned(), e))?;
        fs::write(path, data).map_err(|e| Error::Write(path.to_owned(), e))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn write_file(dir: &Path, data: &str) -> PathBuf {
        let path = dir.join("patches.json");
        fs::write(&path, data).unwrap();
        path
    }

    #[test]
    fn builtins_only() {
        let manager = PatchManager::new(None, &PatcherConfig::default()).unwrap();
        assert_eq!(manager.patch_count(), 6);
        assert_eq!(
            manager.patches().keys().collect::<Vec<_>>(),
            ["dm_verity", "fastboot", "orange_state", "red_state"],
        );
    }

    #[test]
    fn update_mode_merges() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            r#"{"fastboot": {"aabbccdd": "00207047"}, "custom": {"0102": "0304"}}"#,
        );

        let manager = PatchManager::new(Some(&path), &PatcherConfig::default()).unwrap();
        assert_eq!(manager.patch_count(), 8);
        assert_eq!(manager.patches()["fastboot"].len(), 3);
        assert_eq!(manager.patches()["custom"]["0102"], "0304");
    }

    #[test]
    fn replace_mode_discards_builtins() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), r#"{"mode": "REPLACE", "custom": {"0102": "0304"}}"#);

        let manager = PatchManager::new(Some(&path), &PatcherConfig::default()).unwrap();
        assert_eq!(manager.patch_count(), 1);
        assert_eq!(manager.patches().keys().collect::<Vec<_>>(), ["custom"]);
    }

    #[test]
    fn invalid_categories_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), r#"{"mode": "replace", "bad": [1, 2], "ok": {"01": "02"}}"#);

        let manager = PatchManager::new(Some(&path), &PatcherConfig::default()).unwrap();
        assert_eq!(manager.patches().keys().collect::<Vec<_>>(), ["ok"]);
    }

    #[test]
    fn missing_file_keeps_builtins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.json");

        let manager = PatchManager::new(Some(&path), &PatcherConfig::default()).unwrap();
        assert_eq!(manager.patch_count(), 6);
    }

    #[test]
    fn malformed_files() {
        let dir = tempfile::tempdir().unwrap();
        let config = PatcherConfig::default();

        let path = write_file(dir.path(), "{");
        assert_matches!(PatchManager::new(Some(&path), &config), Err(Error::Parse(_, _)));

        let path = write_file(dir.path(), "[]");
        assert_matches!(PatchManager::new(Some(&path), &config), Err(Error::NotAnObject(_)));

        let path = write_file(dir.path(), r#"{"mode": "merge"}"#);
        assert_matches!(
            PatchManager::new(Some(&path), &config),
            Err(Error::UnknownMode(_, m)) if m == "merge"
        );
    }

    #[test]
    fn validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), r#"{"custom": {"xyz": "00"}}"#);

        assert_matches!(
            PatchManager::new(Some(&path), &PatcherConfig::default()),
            Err(Error::Validation { needle, .. }) if needle == "xyz"
        );

        let config = PatcherConfig {
            verify_patch: false,
            ..Default::default()
        };
        assert!(PatchManager::new(Some(&path), &config).is_ok());

        let path = write_file(dir.path(), r#"{"custom": {"0102": "123"}}"#);
        assert_matches!(
            PatchManager::new(Some(&path), &PatcherConfig::default()),
            Err(Error::Validation { replacement, .. }) if replacement == "123"
        );
    }

    #[test]
    fn applicable_patches_follow_config() {
        let manager = PatchManager::new(None, &PatcherConfig::default()).unwrap();

        let config = PatcherConfig::project_defaults();
        let applicable = manager.applicable_patches(&config);
        assert_eq!(
            applicable.keys().collect::<Vec<_>>(),
            ["dm_verity", "fastboot"],
        );
    }

    #[test]
    fn project_defaults_layout() {
        let data = util::to_json_pretty(&PatchFile::project_defaults()).unwrap();
        let expected = r#"{
    "mode": "update",
    "dm_verity": {
        "30b583b002ab0022": "00207047"
    },
    "fastboot": {
        "2de9f04fadf5ac5d": "00207047"
    }
}"#;

        assert_eq!(String::from_utf8(data).unwrap(), expected);
    }

    #[test]
    fn export_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.json");

        let manager = PatchManager::new(None, &PatcherConfig::default()).unwrap();
        manager.export_patches(&path).unwrap();

        let data = fs::read(&path).unwrap();
        let table: PatchTable = serde_json::from_slice(&data).unwrap();
        assert_eq!(&table, manager.patches());
    }
}
