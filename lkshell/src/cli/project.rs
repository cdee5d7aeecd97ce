/*
 * SPDX-FileCopyrightText: 2026 lkshell contributors
 * SPDX-License-Identifier: GPL-3.0-only
 */

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};

use crate::{
    patch::{config::PatcherConfig, definitions::PatchFile},
    util,
};

pub const PATCHES_FILE: &str = "patches.json";
pub const CONFIG_FILE: &str = "config.json";
pub const BACKUP_DIR: &str = "backups";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TargetKind {
    File,
    Directory,
}

#[derive(Debug)]
pub enum CleanupStatus {
    Removed,
    Missing,
    Failed(io::Error),
}

#[derive(Debug)]
pub struct CleanupEntry {
    pub path: PathBuf,
    pub kind: TargetKind,
    pub status: CleanupStatus,
}

/// The working directory of the interactive shell and the files it generates
/// there.
#[derive(Clone, Debug)]
pub struct Project {
    root: PathBuf,
}

impl Project {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve a user-supplied path relative to the project root.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        util::resolve_path(&self.root, path)
    }

    pub fn patches_path(&self) -> PathBuf {
        self.root.join(PATCHES_FILE)
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.root.join(BACKUP_DIR)
    }

    /// Overwrite `patches.json` with the sample patch definitions.
    pub fn write_patches(&self) -> Result<PathBuf> {
        let path = self.patches_path();
        PatchFile::project_defaults()
            .save(&path)
            .with_context(|| format!("Failed to write patch definitions: {path:?}"))?;

        Ok(path)
    }

    /// Overwrite `config.json` with the default configuration and make sure
    /// the backup directory exists.
    pub fn write_config(&self) -> Result<PathBuf> {
        let backup_dir = self.backup_dir();
        fs::create_dir_all(&backup_dir)
            .with_context(|| format!("Failed to create directory: {backup_dir:?}"))?;

        let path = self.config_path();
        PatcherConfig::project_defaults()
            .save(&path)
            .with_context(|| format!("Failed to write configuration: {path:?}"))?;

        Ok(path)
    }

    /// Delete every `*.json` file in the root, then `last_output` if set, then
    /// the backup directory. Every target is attempted even if earlier ones
    /// fail.
    pub fn clean(&self, last_output: Option<&Path>) -> Vec<CleanupEntry> {
        let mut entries = vec![];

        match self.json_files() {
            Ok(files) => {
                for path in files {
                    let status = remove_target(&path, TargetKind::File);
                    entries.push(CleanupEntry {
                        path,
                        kind: TargetKind::File,
                        status,
                    });
                }
            }
            Err(e) => entries.push(CleanupEntry {
                path: self.root.clone(),
                kind: TargetKind::Directory,
                status: CleanupStatus::Failed(e),
            }),
        }

        if let Some(output) = last_output {
            let path = self.resolve(output);
            let status = remove_target(&path, TargetKind::File);
            entries.push(CleanupEntry {
                path,
                kind: TargetKind::File,
                status,
            });
        }

        let path = self.backup_dir();
        let status = remove_target(&path, TargetKind::Directory);
        entries.push(CleanupEntry {
            path,
            kind: TargetKind::Directory,
            status,
        });

        entries
    }

    fn json_files(&self) -> io::Result<Vec<PathBuf>> {
        let mut files = vec![];

        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let path = entry.path();

            if path.extension().is_some_and(|e| e == "json") && entry.file_type()?.is_file() {
                files.push(path);
            }
        }

        files.sort();

        Ok(files)
    }
}

fn remove_target(path: &Path, kind: TargetKind) -> CleanupStatus {
    let result = match kind {
        TargetKind::File => fs::remove_file(path),
        TargetKind::Directory => fs::remove_dir_all(path),
    };

    match result {
        Ok(()) => CleanupStatus::Removed,
        Err(e) if e.kind() == io::ErrorKind::NotFound => CleanupStatus::Missing,
        Err(e) => CleanupStatus::Failed(e),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn materialize_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let project = Project::new(dir.path());

        project.write_patches().unwrap();
        project.write_config().unwrap();
        let patches = fs::read(project.patches_path()).unwrap();
        let config = fs::read(project.config_path()).unwrap();

        project.write_patches().unwrap();
        project.write_config().unwrap();
        assert_eq!(fs::read(project.patches_path()).unwrap(), patches);
        assert_eq!(fs::read(project.config_path()).unwrap(), config);
        assert!(project.backup_dir().is_dir());
    }

    #[test]
    fn config_contents() {
        let dir = tempfile::tempdir().unwrap();
        let project = Project::new(dir.path());
        project.write_config().unwrap();

        let data = fs::read_to_string(project.config_path()).unwrap();
        let expected = r#"{
    "log_level": "INFO",
    "backup": true,
    "backup_dir": "./backups",
    "verify_patch": true,
    "allow_incomplete": true,
    "dry_run": false,
    "patch_categories": [
        "dm_verity",
        "fastboot"
    ],
    "exclude_categories": []
}"#;
        assert_eq!(data, expected);
    }

    #[test]
    fn overwrite_ignores_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let project = Project::new(dir.path());
        fs::write(project.config_path(), "not json").unwrap();

        project.write_config().unwrap();
        assert_eq!(
            PatcherConfig::from_file(&project.config_path()).unwrap(),
            PatcherConfig::project_defaults(),
        );
    }

    #[test]
    fn clean_removes_generated_files() {
        let dir = tempfile::tempdir().unwrap();
        let project = Project::new(dir.path());
        project.write_patches().unwrap();
        project.write_config().unwrap();
        fs::write(dir.path().join("out.img"), b"image").unwrap();
        fs::write(dir.path().join("keep.img"), b"image").unwrap();

        let entries = project.clean(Some(Path::new("out.img")));
        assert_eq!(entries.len(), 4);
        assert!(
            entries
                .iter()
                .all(|e| matches!(e.status, CleanupStatus::Removed))
        );

        assert!(!project.patches_path().exists());
        assert!(!project.config_path().exists());
        assert!(!dir.path().join("out.img").exists());
        assert!(!project.backup_dir().exists());
        assert!(dir.path().join("keep.img").exists());
    }

    #[test]
    fn clean_reports_missing_targets() {
        let dir = tempfile::tempdir().unwrap();
        let project = Project::new(dir.path());

        let entries = project.clean(Some(Path::new("never_created.img")));
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].path, dir.path().join("never_created.img"));
        assert_matches!(entries[0].status, CleanupStatus::Missing);
        assert_eq!(entries[1].kind, TargetKind::Directory);
        assert_matches!(entries[1].status, CleanupStatus::Missing);
    }

    #[test]
    fn clean_continues_after_failure() {
        let dir = tempfile::tempdir().unwrap();
        let project = Project::new(dir.path());
        fs::create_dir(dir.path().join("outdir")).unwrap();
        fs::create_dir(project.backup_dir()).unwrap();

        let entries = project.clean(Some(Path::new("outdir")));
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].path, dir.path().join("outdir"));
        assert_matches!(entries[0].status, CleanupStatus::Failed(_));
        assert_eq!(entries[1].path, project.backup_dir());
        assert_matches!(entries[1].status, CleanupStatus::Removed);

        assert!(dir.path().join("outdir").is_dir());
        assert!(!project.backup_dir().exists());
    }
}
