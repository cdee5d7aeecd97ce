/*
 * SPDX-FileCopyrightText: 2026 lkshell contributors
 * SPDX-License-Identifier: GPL-3.0-only
 */

use std::{fs, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::cli::bootstrap::{self, Requirement};

/// Shell settings, loaded from a TOML file:
///
/// ```toml
/// [[requirement]]
/// name = "mtkclient"
/// probe = ["python3", "-c", "import mtkclient"]
/// install = ["python3", "-m", "pip", "install", "mtkclient"]
/// ```
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct Settings {
    #[serde(rename = "requirement", default = "bootstrap::default_requirements")]
    pub requirements: Vec<Requirement>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            requirements: bootstrap::default_requirements(),
        }
    }
}

pub fn load_settings(path: &Path) -> Result<Settings> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("Failed to read settings: {path:?}"))?;
    let settings = toml_edit::de::from_str(&contents)
        .with_context(|| format!("Failed to parse settings: {path:?}"))?;

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_section_uses_defaults() {
        let settings: Settings = toml_edit::de::from_str("").unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn empty_list_disables_bootstrap() {
        let settings: Settings = toml_edit::de::from_str("requirement = []").unwrap();
        assert!(settings.requirements.is_empty());
    }

    #[test]
    fn custom_requirement() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(
            &path,
            "[[requirement]]\n\
             name = \"adb\"\n\
             probe = [\"adb\", \"version\"]\n\
             install = [\"apt-get\", \"install\", \"-y\", \"adb\"]\n",
        )
        .unwrap();

        let settings = load_settings(&path).unwrap();
        assert_eq!(
            settings.requirements,
            [Requirement {
                name: "adb".to_owned(),
                probe: vec!["adb".to_owned(), "version".to_owned()],
                install: ["apt-get", "install", "-y", "adb"]
                    .map(str::to_owned)
                    .to_vec(),
            }],
        );
    }
}
